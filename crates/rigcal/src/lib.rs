#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Per-sensor cache of extracted primitives.
pub mod cache;

/// Error types for the calibration workflow.
pub mod error;

/// Synchronous typed event channel.
pub mod events;

/// Pose solver seam.
pub mod solver;

/// Calibration stages.
pub mod state;

/// The calibration workflow state machine.
pub mod workflow;

pub use cache::PrimitiveCache;
pub use error::WorkflowError;
pub use events::{Event, EventChannel, EventKind, SubscriptionId};
pub use solver::{PoseSolver, SolverProblem};
pub use state::CalibrationState;
pub use workflow::{CalibrationWorkflow, CancelToken, WorkflowConfig};

#[doc(inline)]
pub use rigcal_core as base;

#[doc(inline)]
pub use rigcal_match as matching;

#[doc(inline)]
pub use rigcal_sync as sync;
