use crate::{observation::Observation, primitive::Primitive};

/// An error reported by a primitive extractor for one observation.
#[derive(thiserror::Error, Debug)]
pub enum ExtractionError {
    /// The observation lacks data the extractor needs.
    #[error("Observation is missing required data: {0}")]
    MissingData(&'static str),

    /// The extractor ran but produced no usable result.
    #[error("No usable result: {0}")]
    NoUsableResult(String),

    /// Any error raised by the extraction backend.
    #[error(transparent)]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// A plane segmentation or line detection algorithm.
///
/// Implementations are pure functions of one observation and the
/// configuration they were built with. An empty result is valid and means
/// nothing was found.
pub trait PrimitiveExtractor: Send + Sync {
    /// Primitive produced by the extractor.
    type Primitive: Primitive;

    /// Extracts primitives, in the sensor frame, from one observation.
    fn extract(&self, observation: &Observation) -> Result<Vec<Self::Primitive>, ExtractionError>;
}

impl<E: PrimitiveExtractor + ?Sized> PrimitiveExtractor for Box<E> {
    type Primitive = E::Primitive;

    fn extract(&self, observation: &Observation) -> Result<Vec<Self::Primitive>, ExtractionError> {
        (**self).extract(observation)
    }
}
