use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Surface normal estimation method used before plane segmentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NormalEstimationMethod {
    /// Normals from the covariance matrix of the neighbourhood.
    #[default]
    CovarianceMatrix,
    /// Normals from averaged 3d gradients.
    #[serde(rename = "AVERAGE_3D_GRADIENT")]
    Average3dGradient,
    /// Normals from averaged depth changes.
    AverageDepthChange,
}

impl NormalEstimationMethod {
    /// Label of the method.
    pub fn label(&self) -> &'static str {
        match self {
            NormalEstimationMethod::CovarianceMatrix => "COVARIANCE_MATRIX",
            NormalEstimationMethod::Average3dGradient => "AVERAGE_3D_GRADIENT",
            NormalEstimationMethod::AverageDepthChange => "AVERAGE_DEPTH_CHANGE",
        }
    }
}

impl fmt::Display for NormalEstimationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for NormalEstimationMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COVARIANCE_MATRIX" => Ok(NormalEstimationMethod::CovarianceMatrix),
            "AVERAGE_3D_GRADIENT" => Ok(NormalEstimationMethod::Average3dGradient),
            "AVERAGE_DEPTH_CHANGE" => Ok(NormalEstimationMethod::AverageDepthChange),
            other => Err(ConfigError::UnknownNormalEstimationMethod(other.to_string())),
        }
    }
}

fn check_non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::NegativeValue { name, value });
    }
    Ok(())
}

fn check_fraction(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::FractionOutOfRange { name, value });
    }
    Ok(())
}

/// Parameters of the plane segmentation collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaneSegmentationConfig {
    /// Normal estimation method.
    pub normal_estimation_method: NormalEstimationMethod,
    /// Scale the smoothing area with depth.
    pub depth_dependent_smoothing: bool,
    /// Depth change threshold for object borders.
    pub max_depth_change_factor: f64,
    /// Size of the normal smoothing area.
    pub normal_smoothing_size: f64,
    /// Maximum angle between neighbouring normals, in degrees.
    pub angle_threshold: f64,
    /// Maximum point to plane distance, in metres.
    pub distance_threshold: f64,
    /// Minimum fraction of the cloud a plane must cover.
    pub min_inliers_frac: f64,
    /// Maximum curvature of a planar region.
    pub max_curvature: f64,
}

impl Default for PlaneSegmentationConfig {
    fn default() -> Self {
        Self {
            normal_estimation_method: NormalEstimationMethod::CovarianceMatrix,
            depth_dependent_smoothing: true,
            max_depth_change_factor: 0.02,
            normal_smoothing_size: 10.0,
            angle_threshold: 4.0,
            distance_threshold: 0.05,
            min_inliers_frac: 0.001,
            max_curvature: 0.1,
        }
    }
}

impl PlaneSegmentationConfig {
    /// Checks the thresholds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_non_negative("max_depth_change_factor", self.max_depth_change_factor)?;
        check_non_negative("normal_smoothing_size", self.normal_smoothing_size)?;
        check_non_negative("angle_threshold", self.angle_threshold)?;
        check_non_negative("distance_threshold", self.distance_threshold)?;
        check_non_negative("max_curvature", self.max_curvature)?;
        check_fraction("min_inliers_frac", self.min_inliers_frac)
    }

    /// Minimum number of inliers of a plane for a cloud of `num_points`.
    pub fn min_inliers(&self, num_points: usize) -> usize {
        (self.min_inliers_frac * num_points as f64) as usize
    }

    /// Angle threshold in radians.
    pub fn angle_threshold_rad(&self) -> f64 {
        self.angle_threshold.to_radians()
    }
}

/// Parameters of the line detection collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineSegmentationConfig {
    /// Lower hysteresis threshold of the edge detector.
    pub canny_low_threshold: f64,
    /// Ratio between the upper and lower hysteresis thresholds.
    pub canny_high_ratio: f64,
    /// Aperture of the edge detector.
    pub canny_kernel_size: u32,
    /// Accumulator votes needed for a line.
    pub hough_threshold: u32,
    /// Minimum segment length, in pixels.
    pub min_segment_length: f64,
    /// Segments whose endpoints lie further away are dropped, in metres.
    pub max_depth: f64,
}

impl Default for LineSegmentationConfig {
    fn default() -> Self {
        Self {
            canny_low_threshold: 50.0,
            canny_high_ratio: 3.0,
            canny_kernel_size: 3,
            hough_threshold: 150,
            min_segment_length: 20.0,
            max_depth: 10.0,
        }
    }
}

impl LineSegmentationConfig {
    /// Checks the thresholds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_non_negative("canny_low_threshold", self.canny_low_threshold)?;
        check_non_negative("canny_high_ratio", self.canny_high_ratio)?;
        check_non_negative("min_segment_length", self.min_segment_length)?;
        check_non_negative("max_depth", self.max_depth)?;
        if self.canny_kernel_size < 3 || self.canny_kernel_size % 2 == 0 {
            return Err(ConfigError::InvalidKernelSize(self.canny_kernel_size));
        }
        Ok(())
    }

    /// Upper hysteresis threshold of the edge detector.
    pub fn canny_high_threshold(&self) -> f64 {
        self.canny_low_threshold * self.canny_high_ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_defaults_are_valid() {
        let config = PlaneSegmentationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_inliers(307_200), 307);
    }

    #[test]
    fn test_plane_invalid_fraction() {
        let config = PlaneSegmentationConfig {
            min_inliers_frac: 1.5,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::FractionOutOfRange {
                name: "min_inliers_frac",
                value: 1.5
            })
        );
    }

    #[test]
    fn test_line_invalid_kernel() {
        let config = LineSegmentationConfig {
            canny_kernel_size: 4,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidKernelSize(4)));
        assert!(LineSegmentationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_normal_estimation_labels() -> Result<(), Box<dyn std::error::Error>> {
        for method in [
            NormalEstimationMethod::CovarianceMatrix,
            NormalEstimationMethod::Average3dGradient,
            NormalEstimationMethod::AverageDepthChange,
        ] {
            assert_eq!(method.label().parse::<NormalEstimationMethod>()?, method);
        }
        assert!("SOBEL".parse::<NormalEstimationMethod>().is_err());
        Ok(())
    }

    #[test]
    fn test_plane_config_from_partial_json() -> Result<(), Box<dyn std::error::Error>> {
        let config: PlaneSegmentationConfig = serde_json::from_str(
            r#"{"normal_estimation_method": "AVERAGE_3D_GRADIENT", "angle_threshold": 2.0}"#,
        )?;
        assert_eq!(
            config.normal_estimation_method,
            NormalEstimationMethod::Average3dGradient
        );
        assert_eq!(config.angle_threshold, 2.0);
        assert_eq!(config.distance_threshold, 0.05);
        Ok(())
    }
}
