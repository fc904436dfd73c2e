use crate::sensor::{SensorId, Timestamp};

/// An error type for building observations and streams.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum StreamError {
    /// The pixel buffer does not match the image dimensions.
    #[error("Data length ({actual}) does not match the image size ({expected})")]
    InvalidImageShape {
        /// Number of pixels implied by the dimensions.
        expected: usize,
        /// Number of pixels provided.
        actual: usize,
    },

    /// The intensity and range images of a scan have different sizes.
    #[error("Intensity image {intensity:?} and range image {range:?} differ in size")]
    ImageSizeMismatch {
        /// Intensity image `(width, height)`.
        intensity: (usize, usize),
        /// Range image `(width, height)`.
        range: (usize, usize),
    },

    /// Observations of a stream are not ordered by timestamp.
    #[error("Stream of sensor {sensor} is unordered at observation {index} ({timestamp})")]
    Unordered {
        /// Sensor owning the stream.
        sensor: SensorId,
        /// Index of the first out of order observation.
        index: usize,
        /// Timestamp of that observation.
        timestamp: Timestamp,
    },

    /// An observation was pushed into the stream of another sensor.
    #[error("Observation of sensor {found} cannot be added to the stream of sensor {expected}")]
    SensorMismatch {
        /// Sensor owning the stream.
        expected: SensorId,
        /// Sensor of the observation.
        found: SensorId,
    },
}

/// An error type for invalid extractor configurations.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    /// A threshold that must be non-negative is negative or not finite.
    #[error("Parameter `{name}` must be a finite non-negative value, got {value}")]
    NegativeValue {
        /// Parameter name.
        name: &'static str,
        /// Offending value.
        value: f64,
    },

    /// A fraction is outside of `[0, 1]`.
    #[error("Parameter `{name}` must lie in [0, 1], got {value}")]
    FractionOutOfRange {
        /// Parameter name.
        name: &'static str,
        /// Offending value.
        value: f64,
    },

    /// The edge detector aperture must be an odd number.
    #[error("Kernel size must be odd and at least 3, got {0}")]
    InvalidKernelSize(u32),

    /// Unknown normal estimation method label.
    #[error("Unknown normal estimation method: {0}")]
    UnknownNormalEstimationMethod(String),
}
