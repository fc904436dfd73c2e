use serde::{Deserialize, Serialize};

/// Intrinsic parameters of a pinhole camera, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PinholeIntrinsics {
    /// Focal length along x.
    pub fx: f64,
    /// Focal length along y.
    pub fy: f64,
    /// Principal point x coordinate.
    pub cx: f64,
    /// Principal point y coordinate.
    pub cy: f64,
}

impl PinholeIntrinsics {
    /// Creates a new set of pinhole intrinsics.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Returns the camera matrix as a row major 3x3 array.
    pub fn camera_matrix(&self) -> [[f64; 3]; 3] {
        [
            [self.fx, 0.0, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Back-projects a pixel with a known depth into the camera frame.
    ///
    /// `depth` is the distance along the optical axis.
    pub fn unproject(&self, u: f64, v: f64, depth: f64) -> [f64; 3] {
        [
            (u - self.cx) * depth / self.fx,
            (v - self.cy) * depth / self.fy,
            depth,
        ]
    }

    /// Projects a point in the camera frame to pixel coordinates.
    ///
    /// Returns `None` for points on or behind the image plane.
    pub fn project(&self, point: &[f64; 3]) -> Option<[f64; 2]> {
        if point[2] <= 0.0 {
            return None;
        }
        let inv_z = 1.0 / point[2];
        Some([
            self.fx * point[0] * inv_z + self.cx,
            self.fy * point[1] * inv_z + self.cy,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_unproject_project() {
        let k = PinholeIntrinsics::new(525.0, 525.0, 319.5, 239.5);
        let p = k.unproject(100.0, 50.0, 2.0);
        assert_relative_eq!(p[2], 2.0);
        let uv = k.project(&p).expect("point in front of the camera");
        assert_relative_eq!(uv[0], 100.0, epsilon = 1e-9);
        assert_relative_eq!(uv[1], 50.0, epsilon = 1e-9);
    }

    #[test]
    fn test_project_behind_camera() {
        let k = PinholeIntrinsics::new(500.0, 500.0, 320.0, 240.0);
        assert!(k.project(&[0.0, 0.0, -1.0]).is_none());
    }
}
