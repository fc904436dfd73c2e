use rigcal_core::SensorId;
use rigcal_sync::SyncSetId;

/// An error type for the correspondence model.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    /// A correspondence references a sync set that does not exist.
    #[error("Correspondence references unknown sync set {0}")]
    UnknownSet(SyncSetId),

    /// A correspondence references a sensor absent from its sync set.
    #[error("Sensor {sensor} is not part of sync set {set}")]
    SensorNotInSet {
        /// Sync set of the correspondence.
        set: SyncSetId,
        /// Missing sensor.
        sensor: SensorId,
    },

    /// A primitive index is out of range for its sensor list.
    #[error("Primitive index {index} out of range ({len}) for sensor {sensor} in set {set}")]
    CorrespondenceIndex {
        /// Sync set of the correspondence.
        set: SyncSetId,
        /// Sensor whose primitive list is indexed.
        sensor: SensorId,
        /// Offending index.
        index: usize,
        /// Length of the primitive list.
        len: usize,
    },
}
