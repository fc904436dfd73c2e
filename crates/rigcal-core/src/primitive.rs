use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    observation::RangeScan,
    sensor::SensorId,
    transforms::{self, Pose3},
};

/// The kind of a geometric primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    /// Planar region.
    Plane,
    /// Line segment.
    Line,
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimitiveKind::Plane => write!(f, "plane"),
            PrimitiveKind::Line => write!(f, "line"),
        }
    }
}

/// A geometric feature that can be matched across sensors.
pub trait Primitive: Clone + fmt::Debug + Send + Sync + 'static {
    /// Kind of the primitive.
    const KIND: PrimitiveKind;

    /// Returns the primitive expressed in the parent frame of `pose`.
    fn transformed(&self, pose: &Pose3) -> Self;
}

/// Plane coefficients `normal . x + offset = 0` with a unit normal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneCoefficients {
    /// Unit normal.
    pub normal: [f64; 3],
    /// Signed offset.
    pub offset: f64,
}

impl PlaneCoefficients {
    /// Creates coefficients from `[a, b, c, d]`, normalizing the normal.
    ///
    /// Returns `None` if the normal is zero.
    pub fn from_array(coefficients: [f64; 4]) -> Option<Self> {
        let n = [coefficients[0], coefficients[1], coefficients[2]];
        let magnitude = transforms::norm(&n);
        let normal = transforms::normalize(&n)?;
        Some(Self {
            normal,
            offset: coefficients[3] / magnitude,
        })
    }

    /// Creates the plane through `point` with the given normal.
    pub fn from_point_normal(point: &[f64; 3], normal: &[f64; 3]) -> Option<Self> {
        let normal = transforms::normalize(normal)?;
        Some(Self {
            normal,
            offset: -transforms::dot(&normal, point),
        })
    }

    /// Returns `[a, b, c, d]`.
    pub fn to_array(&self) -> [f64; 4] {
        [self.normal[0], self.normal[1], self.normal[2], self.offset]
    }

    /// Signed distance of a point to the plane.
    #[inline]
    pub fn signed_distance(&self, point: &[f64; 3]) -> f64 {
        transforms::dot(&self.normal, point) + self.offset
    }

    /// The same plane with the opposite orientation.
    pub fn flipped(&self) -> Self {
        Self {
            normal: transforms::scale(&self.normal, -1.0),
            offset: -self.offset,
        }
    }

    /// Returns the coefficients expressed in the parent frame of `pose`.
    pub fn transformed(&self, pose: &Pose3) -> Self {
        // n' = R n, d' = d - n' . t
        let normal = pose.rotate(&self.normal);
        Self {
            normal,
            offset: self.offset - transforms::dot(&normal, &pose.translation),
        }
    }
}

/// A planar region detected in one observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    /// Inlier points of the region.
    pub inliers: Vec<[f64; 3]>,
    /// Fitted plane coefficients.
    pub coefficients: PlaneCoefficients,
}

impl Plane {
    /// Creates a plane from its inliers and coefficients.
    pub fn new(inliers: Vec<[f64; 3]>, coefficients: PlaneCoefficients) -> Self {
        Self {
            inliers,
            coefficients,
        }
    }
}

impl Primitive for Plane {
    const KIND: PrimitiveKind = PrimitiveKind::Plane;

    fn transformed(&self, pose: &Pose3) -> Self {
        let mut inliers = vec![[0.0; 3]; self.inliers.len()];
        pose.transform_points(&self.inliers, &mut inliers);
        Self {
            inliers,
            coefficients: self.coefficients.transformed(pose),
        }
    }
}

/// A line segment detected in one observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line {
    /// Segment endpoints in pixel coordinates.
    pub image_endpoints: [[f64; 2]; 2],
    /// Segment endpoints in metric coordinates.
    pub endpoints: [[f64; 3]; 2],
}

impl Line {
    /// Creates a line segment from its image and metric endpoints.
    pub fn new(image_endpoints: [[f64; 2]; 2], endpoints: [[f64; 3]; 2]) -> Self {
        Self {
            image_endpoints,
            endpoints,
        }
    }

    /// Lifts an image segment to 3d using the range image of the scan.
    ///
    /// Returns `None` when either endpoint has no valid depth.
    pub fn from_image_segment(scan: &RangeScan, image_endpoints: [[f64; 2]; 2]) -> Option<Self> {
        let lift = |p: &[f64; 2]| {
            if p[0] < 0.0 || p[1] < 0.0 {
                return None;
            }
            scan.point_at(p[0].round() as usize, p[1].round() as usize)
        };
        let start = lift(&image_endpoints[0])?;
        let end = lift(&image_endpoints[1])?;
        Some(Self {
            image_endpoints,
            endpoints: [start, end],
        })
    }

    /// Unit direction from the first to the second endpoint.
    pub fn direction(&self) -> Option<[f64; 3]> {
        transforms::normalize(&transforms::sub(&self.endpoints[1], &self.endpoints[0]))
    }

    /// Midpoint of the segment.
    pub fn midpoint(&self) -> [f64; 3] {
        transforms::scale(&transforms::add(&self.endpoints[0], &self.endpoints[1]), 0.5)
    }

    /// Metric length of the segment.
    pub fn length(&self) -> f64 {
        transforms::norm(&transforms::sub(&self.endpoints[1], &self.endpoints[0]))
    }

    /// Perpendicular distance of a point to the supporting line.
    ///
    /// For a degenerate segment this is the distance to its first endpoint.
    pub fn distance_to_point(&self, point: &[f64; 3]) -> f64 {
        let offset = transforms::sub(point, &self.endpoints[0]);
        match self.direction() {
            Some(d) => transforms::norm(&transforms::cross(&offset, &d)),
            None => transforms::norm(&offset),
        }
    }
}

impl Primitive for Line {
    const KIND: PrimitiveKind = PrimitiveKind::Line;

    fn transformed(&self, pose: &Pose3) -> Self {
        Self {
            image_endpoints: self.image_endpoints,
            endpoints: [
                pose.transform_point(&self.endpoints[0]),
                pose.transform_point(&self.endpoints[1]),
            ],
        }
    }
}

/// A primitive together with the observation it was extracted from.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection<P> {
    /// Sensor of the source observation.
    pub sensor: SensorId,
    /// Index of the source observation in the sensor stream.
    pub observation: usize,
    /// The detected primitive, in the sensor frame.
    pub primitive: P,
}

impl<P> Detection<P> {
    /// Wraps a primitive with its provenance.
    pub fn new(sensor: SensorId, observation: usize, primitive: P) -> Self {
        Self {
            sensor,
            observation,
            primitive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        camera::PinholeIntrinsics,
        image::{GrayImage, RangeImage},
    };
    use approx::assert_relative_eq;

    #[test]
    fn test_plane_coefficients_normalized() {
        let plane = PlaneCoefficients::from_array([0.0, 0.0, 2.0, -4.0]).expect("valid plane");
        assert_eq!(plane.normal, [0.0, 0.0, 1.0]);
        assert_relative_eq!(plane.offset, -2.0);
        assert_relative_eq!(plane.signed_distance(&[5.0, 1.0, 3.0]), 1.0);
        assert!(PlaneCoefficients::from_array([0.0, 0.0, 0.0, 1.0]).is_none());
    }

    #[test]
    fn test_plane_transform_keeps_points_on_plane() -> Result<(), Box<dyn std::error::Error>> {
        let plane = PlaneCoefficients::from_point_normal(&[0.0, 0.0, 2.0], &[0.0, 0.3, 1.0])
            .ok_or("degenerate normal")?;
        let pose = Pose3::from_axis_angle(&[1.0, 1.0, 0.0], 0.4, [0.5, -0.2, 1.0])?;
        let point = [0.0, 0.0, 2.0];
        let moved = plane.transformed(&pose);
        assert_relative_eq!(
            moved.signed_distance(&pose.transform_point(&point)),
            0.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(transforms::norm(&moved.normal), 1.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_line_geometry() {
        let line = Line::new([[0.0, 0.0], [10.0, 0.0]], [[0.0, 0.0, 1.0], [2.0, 0.0, 1.0]]);
        assert_eq!(line.direction(), Some([1.0, 0.0, 0.0]));
        assert_eq!(line.midpoint(), [1.0, 0.0, 1.0]);
        assert_relative_eq!(line.length(), 2.0);
        assert_relative_eq!(line.distance_to_point(&[5.0, 3.0, 1.0]), 3.0);
    }

    #[test]
    fn test_line_from_image_segment() -> Result<(), Box<dyn std::error::Error>> {
        let range = RangeImage::new(3, 1, vec![2.0, 0.0, 2.0])?;
        let k = PinholeIntrinsics::new(1.0, 1.0, 0.0, 0.0);
        let scan = RangeScan::new(GrayImage::empty(), range, k, Pose3::identity())?;

        let line = Line::from_image_segment(&scan, [[0.0, 0.0], [2.0, 0.0]]).ok_or("no depth")?;
        assert_eq!(line.endpoints, [[0.0, 0.0, 2.0], [4.0, 0.0, 2.0]]);
        assert!(Line::from_image_segment(&scan, [[0.0, 0.0], [1.0, 0.0]]).is_none());
        Ok(())
    }

    #[test]
    fn test_line_transformed() -> Result<(), Box<dyn std::error::Error>> {
        let line = Line::new([[0.0; 2]; 2], [[1.0, 0.0, 0.0], [2.0, 0.0, 0.0]]);
        let pose = Pose3::from_axis_angle(&[0.0, 0.0, 1.0], std::f64::consts::FRAC_PI_2, [0.0; 3])?;
        let moved = line.transformed(&pose);
        let d = moved.direction().ok_or("degenerate")?;
        assert_relative_eq!(d[1], 1.0, epsilon = 1e-12);
        assert_eq!(moved.image_endpoints, line.image_endpoints);
        Ok(())
    }
}
