use std::fmt;

use serde::{Deserialize, Serialize};

/// Stage reached by a calibration workflow.
///
/// Stages only move forward within one workflow run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum CalibrationState {
    /// Nothing has been extracted yet.
    #[default]
    NotStarted,
    /// Primitives were extracted from every synchronized observation.
    PrimitivesExtracted,
    /// Correspondences were computed for every sync set.
    PrimitivesMatched,
    /// The pose solver produced a result.
    PoseSolved,
}

impl CalibrationState {
    /// Check if the workflow reached at least `other`.
    pub fn has_reached(&self, other: CalibrationState) -> bool {
        *self >= other
    }
}

impl fmt::Display for CalibrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CalibrationState::NotStarted => "not started",
            CalibrationState::PrimitivesExtracted => "primitives extracted",
            CalibrationState::PrimitivesMatched => "primitives matched",
            CalibrationState::PoseSolved => "pose solved",
        };
        write!(f, "{name}")
    }
}
