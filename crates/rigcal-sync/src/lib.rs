#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

mod config;
pub use config::{ReferencePolicy, SyncConfig};

mod error;
pub use error::SyncError;

mod model;
pub use model::{SyncMember, SyncModel, SyncSet, SyncSetId};

mod synchronize;
pub use synchronize::synchronize;
