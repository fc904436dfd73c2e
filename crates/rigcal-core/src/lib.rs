#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Camera intrinsic parameters.
pub mod camera;

/// Configuration records for the primitive extractors.
pub mod config;

/// Error types shared by the calibration crates.
pub mod error;

/// Primitive extraction seam.
pub mod extractor;

/// Image buffers carried by range scans.
pub mod image;

/// Observations, per-sensor streams and the observation log.
pub mod observation;

/// Point cloud container.
pub mod pointcloud;

/// Geometric primitives detected in observations.
pub mod primitive;

/// Sensor identifiers and timestamps.
pub mod sensor;

/// Rigid transforms and small vector utilities.
pub mod transforms;

pub use camera::PinholeIntrinsics;
pub use config::{LineSegmentationConfig, NormalEstimationMethod, PlaneSegmentationConfig};
pub use error::{ConfigError, StreamError};
pub use extractor::{ExtractionError, PrimitiveExtractor};
pub use image::{GrayImage, Image, RangeImage};
pub use observation::{
    Observation, ObservationLog, ObservationPayload, ObservationStream, RangeScan,
    RecordedObservation,
};
pub use pointcloud::PointCloud;
pub use primitive::{Detection, Line, Plane, PlaneCoefficients, Primitive, PrimitiveKind};
pub use sensor::{SensorId, Timestamp};
pub use transforms::Pose3;
