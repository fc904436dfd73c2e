use rigcal_core::{transforms, Line, Plane};
use serde::{Deserialize, Serialize};

/// Decides whether two primitives, expressed in a common frame, describe the
/// same physical feature.
pub trait CompatibilityTest<P> {
    /// Returns true if `a` and `b` are compatible.
    fn compatible(&self, a: &P, b: &P) -> bool;
}

impl<P, F> CompatibilityTest<P> for F
where
    F: Fn(&P, &P) -> bool,
{
    fn compatible(&self, a: &P, b: &P) -> bool {
        self(a, b)
    }
}

// Angle between two unit vectors, ignoring orientation.
fn unsigned_angle(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    transforms::dot(a, b).abs().min(1.0).acos()
}

/// Thresholds for matching line segments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineCompatibility {
    /// Maximum angle between the line directions in radians.
    pub max_angle: f64,
    /// Maximum perpendicular distance between the supporting lines in meters.
    pub max_offset: f64,
}

impl Default for LineCompatibility {
    fn default() -> Self {
        Self {
            max_angle: 5f64.to_radians(),
            max_offset: 0.1,
        }
    }
}

impl LineCompatibility {
    /// Creates line thresholds with the angle given in degrees.
    pub fn from_degrees(max_angle_deg: f64, max_offset: f64) -> Self {
        Self {
            max_angle: max_angle_deg.to_radians(),
            max_offset,
        }
    }

    /// Direction angle and offset between two segments.
    ///
    /// The offset is the larger of the two midpoint-to-line distances.
    /// Returns `None` for degenerate segments.
    pub fn residuals(a: &Line, b: &Line) -> Option<(f64, f64)> {
        let da = a.direction()?;
        let db = b.direction()?;
        let angle = unsigned_angle(&da, &db);
        let offset = a
            .distance_to_point(&b.midpoint())
            .max(b.distance_to_point(&a.midpoint()));
        Some((angle, offset))
    }
}

impl CompatibilityTest<Line> for LineCompatibility {
    fn compatible(&self, a: &Line, b: &Line) -> bool {
        match Self::residuals(a, b) {
            Some((angle, offset)) => angle <= self.max_angle && offset <= self.max_offset,
            None => false,
        }
    }
}

/// Thresholds for matching planes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaneCompatibility {
    /// Maximum angle between the plane normals in radians.
    pub max_angle: f64,
    /// Maximum difference of the plane offsets in meters.
    pub max_offset: f64,
}

impl Default for PlaneCompatibility {
    fn default() -> Self {
        Self {
            max_angle: 5f64.to_radians(),
            max_offset: 0.1,
        }
    }
}

impl PlaneCompatibility {
    /// Creates plane thresholds with the angle given in degrees.
    pub fn from_degrees(max_angle_deg: f64, max_offset: f64) -> Self {
        Self {
            max_angle: max_angle_deg.to_radians(),
            max_offset,
        }
    }

    /// Normal angle and offset difference between two planes.
    ///
    /// `b` is flipped first when its normal points away from the normal of `a`.
    pub fn residuals(a: &Plane, b: &Plane) -> (f64, f64) {
        let ca = a.coefficients;
        let mut cb = b.coefficients;
        if transforms::dot(&ca.normal, &cb.normal) < 0.0 {
            cb = cb.flipped();
        }
        let angle = unsigned_angle(&ca.normal, &cb.normal);
        (angle, (ca.offset - cb.offset).abs())
    }
}

impl CompatibilityTest<Plane> for PlaneCompatibility {
    fn compatible(&self, a: &Plane, b: &Plane) -> bool {
        let (angle, offset) = Self::residuals(a, b);
        angle <= self.max_angle && offset <= self.max_offset
    }
}
