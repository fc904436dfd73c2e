use serde::{Deserialize, Serialize};

/// Dot product of two 3d vectors.
#[inline]
pub fn dot(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Cross product of two 3d vectors.
#[inline]
pub fn cross(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Component-wise difference `a - b`.
#[inline]
pub fn sub(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// Component-wise sum `a + b`.
#[inline]
pub fn add(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

/// Scales a vector by `s`.
#[inline]
pub fn scale(a: &[f64; 3], s: f64) -> [f64; 3] {
    [a[0] * s, a[1] * s, a[2] * s]
}

/// Euclidean norm of a vector.
#[inline]
pub fn norm(a: &[f64; 3]) -> f64 {
    dot(a, a).sqrt()
}

/// Returns the unit vector along `a`, or `None` for a (near) zero vector.
pub fn normalize(a: &[f64; 3]) -> Option<[f64; 3]> {
    let magnitude = norm(a);
    match magnitude < 1e-12 {
        true => None,
        false => Some(scale(a, 1.0 / magnitude)),
    }
}

/// Rigid transform mapping points from a sensor frame into a parent frame.
///
/// `p_parent = rotation * p_sensor + translation`, the rotation stored row
/// major.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose3 {
    /// Rotation matrix.
    pub rotation: [[f64; 3]; 3],
    /// Translation vector.
    pub translation: [f64; 3],
}

impl Default for Pose3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose3 {
    /// Creates a pose from a rotation matrix and a translation.
    pub fn new(rotation: [[f64; 3]; 3], translation: [f64; 3]) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// The identity transform.
    pub const fn identity() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0, 0.0, 0.0],
        }
    }

    /// Creates a pose from an axis-angle rotation and a translation.
    ///
    /// The axis does not need to be normalized but must not be zero.
    ///
    /// Example:
    ///
    /// ```
    /// use rigcal_core::transforms::Pose3;
    ///
    /// let angle = std::f64::consts::FRAC_PI_2;
    /// let pose = Pose3::from_axis_angle(&[0.0, 0.0, 1.0], angle, [1.0, 0.0, 0.0]).unwrap();
    /// let p = pose.transform_point(&[1.0, 0.0, 0.0]);
    /// assert!((p[0] - 1.0).abs() < 1e-12 && (p[1] - 1.0).abs() < 1e-12);
    /// ```
    pub fn from_axis_angle(
        axis: &[f64; 3],
        angle: f64,
        translation: [f64; 3],
    ) -> Result<Self, &'static str> {
        Ok(Self {
            rotation: axis_angle_to_rotation_matrix(axis, angle)?,
            translation,
        })
    }

    /// Creates a pose from a row major homogeneous 4x4 matrix.
    pub fn from_matrix4(m: &[[f64; 4]; 4]) -> Self {
        Self {
            rotation: [
                [m[0][0], m[0][1], m[0][2]],
                [m[1][0], m[1][1], m[1][2]],
                [m[2][0], m[2][1], m[2][2]],
            ],
            translation: [m[0][3], m[1][3], m[2][3]],
        }
    }

    /// Returns the row major homogeneous 4x4 matrix of the pose.
    pub fn to_matrix4(&self) -> [[f64; 4]; 4] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            [r[0][0], r[0][1], r[0][2], t[0]],
            [r[1][0], r[1][1], r[1][2], t[1]],
            [r[2][0], r[2][1], r[2][2], t[2]],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }

    /// Rotates a direction vector (no translation).
    #[inline]
    pub fn rotate(&self, v: &[f64; 3]) -> [f64; 3] {
        let r = &self.rotation;
        [dot(&r[0], v), dot(&r[1], v), dot(&r[2], v)]
    }

    /// Transforms a point.
    #[inline]
    pub fn transform_point(&self, p: &[f64; 3]) -> [f64; 3] {
        add(&self.rotate(p), &self.translation)
    }

    /// Transforms a set of points into a pre-allocated destination.
    ///
    /// PRECONDITION: `dst_points` has the same length as `src_points`.
    pub fn transform_points(&self, src_points: &[[f64; 3]], dst_points: &mut [[f64; 3]]) {
        assert_eq!(src_points.len(), dst_points.len());
        for (dst, src) in dst_points.iter_mut().zip(src_points.iter()) {
            *dst = self.transform_point(src);
        }
    }

    /// Returns `self * other`, i.e. applies `other` first.
    pub fn compose(&self, other: &Pose3) -> Pose3 {
        let mut rotation = [[0.0; 3]; 3];
        for (i, row) in rotation.iter_mut().enumerate() {
            for (j, val) in row.iter_mut().enumerate() {
                *val = (0..3).map(|k| self.rotation[i][k] * other.rotation[k][j]).sum();
            }
        }
        Pose3 {
            rotation,
            translation: self.transform_point(&other.translation),
        }
    }

    /// Returns the inverse transform.
    pub fn inverse(&self) -> Pose3 {
        // R' = R^T
        let mut rotation = [[0.0; 3]; 3];
        for (i, row) in rotation.iter_mut().enumerate() {
            for (j, val) in row.iter_mut().enumerate() {
                *val = self.rotation[j][i];
            }
        }
        // t' = -R^T * t
        let inv = Pose3 {
            rotation,
            translation: [0.0; 3],
        };
        let t = inv.rotate(&self.translation);
        Pose3 {
            rotation,
            translation: scale(&t, -1.0),
        }
    }
}

/// Compute the rotation matrix from an axis and angle.
///
/// # Arguments
///
/// * `axis` - The axis of rotation.
/// * `angle` - The angle of rotation in radians.
///
/// # Returns
///
/// The row major rotation matrix.
pub fn axis_angle_to_rotation_matrix(
    axis: &[f64; 3],
    angle: f64,
) -> Result<[[f64; 3]; 3], &'static str> {
    let k = normalize(axis).ok_or("cannot compute rotation matrix from a zero vector")?;
    let (sin, cos) = angle.sin_cos();

    // Rodrigues: R v = v cos + (k x v) sin + k (k . v) (1 - cos), column by column
    let mut rotation = [[0.0; 3]; 3];
    for j in 0..3 {
        let mut e = [0.0; 3];
        e[j] = 1.0;
        let column = add(
            &add(&scale(&e, cos), &scale(&cross(&k, &e), sin)),
            &scale(&k, dot(&k, &e) * (1.0 - cos)),
        );
        for (row, value) in rotation.iter_mut().zip(column) {
            row[j] = value;
        }
    }
    Ok(rotation)
}
