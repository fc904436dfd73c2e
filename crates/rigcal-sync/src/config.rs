use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the time reference sensor is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferencePolicy {
    /// The first sensor of the selection.
    #[default]
    First,
    /// The sensor with the fewest observations, ties broken by selection order.
    Sparsest,
}

/// Parameters of the synchronization engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum time difference between an observation and the reference.
    pub delay: Duration,
    /// Reference sensor choice.
    #[serde(default)]
    pub reference: ReferencePolicy,
    /// Stop after this many sets, `None` for no limit.
    #[serde(default)]
    pub max_sets: Option<usize>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(30),
            reference: ReferencePolicy::First,
            max_sets: None,
        }
    }
}

impl SyncConfig {
    /// Creates a configuration with the given delay tolerance.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    /// Sets the reference policy.
    pub fn reference(mut self, reference: ReferencePolicy) -> Self {
        self.reference = reference;
        self
    }

    /// Caps the number of produced sets.
    pub fn max_sets(mut self, max_sets: usize) -> Self {
        self.max_sets = Some(max_sets);
        self
    }
}
