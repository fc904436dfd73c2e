#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Geometric compatibility tests between primitives of two sensors.
pub mod compatibility;

mod correspondence;
pub use correspondence::{Correspondence, CorrespondenceMap, SensorPair};

mod error;
pub use error::MatchError;

mod matcher;
pub use matcher::{CorrespondenceMatcher, SetMatchReport};

pub use compatibility::{CompatibilityTest, LineCompatibility, PlaneCompatibility};
