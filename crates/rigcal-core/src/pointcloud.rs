use crate::transforms::Pose3;

/// A point cloud with optional colors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    // The points in the point cloud.
    points: Vec<[f64; 3]>,
    // The colors of the points.
    colors: Option<Vec<[u8; 3]>>,
}

impl PointCloud {
    /// Create a new point cloud from points and optional colors.
    pub fn new(points: Vec<[f64; 3]>, colors: Option<Vec<[u8; 3]>>) -> Self {
        Self { points, colors }
    }

    /// Get the number of points in the point cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the point cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get as reference the points in the point cloud.
    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    /// Get as reference the colors of the points in the point cloud.
    pub fn colors(&self) -> Option<&[[u8; 3]]> {
        self.colors.as_deref()
    }

    /// Returns a copy of the cloud expressed in the parent frame of `pose`.
    pub fn transformed(&self, pose: &Pose3) -> Self {
        let mut points = vec![[0.0; 3]; self.points.len()];
        pose.transform_points(&self.points, &mut points);
        Self {
            points,
            colors: self.colors.clone(),
        }
    }

    /// Get the centroid of the points, `None` when empty.
    pub fn centroid(&self) -> Option<[f64; 3]> {
        if self.points.is_empty() {
            return None;
        }
        let n = self.points.len() as f64;
        let sum = self.points.iter().fold([0.0; 3], |acc, p| {
            [acc[0] + p[0], acc[1] + p[1], acc[2] + p[2]]
        });
        Some([sum[0] / n, sum[1] / n, sum[2] / n])
    }
}
