use rigcal_core::SensorId;

/// An error type for the synchronization engine.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Fewer than two distinct sensors were selected.
    #[error("At least two sensors must be selected for synchronization, got {selected}")]
    InsufficientSensors {
        /// Number of distinct selected sensors.
        selected: usize,
    },

    /// A selected sensor has no stream in the log.
    #[error("Sensor {0} has no observation stream")]
    UnknownSensor(SensorId),
}
