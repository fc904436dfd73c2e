use rigcal_match::MatchError;
use rigcal_sync::SyncError;

use crate::state::CalibrationState;

/// An error type for the calibration workflow.
#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    /// Synchronization of the observation log failed.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// The operation needs a synchronized model.
    #[error("No synchronized model, synchronize the observation log first")]
    UnsynchronizedModel,

    /// The operation is not allowed in the current stage.
    #[error("Cannot {operation} in state '{state}'")]
    InvalidWorkflowState {
        /// Rejected operation.
        operation: &'static str,
        /// Stage of the workflow when the operation was requested.
        state: CalibrationState,
    },

    /// The sweep was cancelled at a sync set boundary.
    #[error("Cancelled after {completed_sets} completed sync sets")]
    Cancelled {
        /// Number of sync sets fully processed.
        completed_sets: usize,
    },

    /// The correspondence model is inconsistent.
    #[error(transparent)]
    Match(#[from] MatchError),

    /// The pose solver failed.
    #[error("Pose solver failed: {0}")]
    Solver(Box<dyn std::error::Error + Send + Sync>),
}
