use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use rigcal_core::{Observation, ObservationLog, Pose3, SensorId, Timestamp};
use serde::{Deserialize, Serialize};

/// Sequential identifier of a sync set, starting at 0.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SyncSetId(pub usize);

impl SyncSetId {
    /// Returns the id as a plain index.
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for SyncSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Slot of one sensor inside a sync set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncMember {
    /// Index of the observation in the sensor stream.
    pub observation: usize,
    /// Position of the observation among the synchronized observations of
    /// the sensor.
    pub sync_index: usize,
    /// Timestamp of the observation.
    pub timestamp: Timestamp,
}

/// Observations of different sensors captured at the same moment.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSet {
    id: SyncSetId,
    reference_timestamp: Timestamp,
    members: BTreeMap<SensorId, SyncMember>,
}

impl SyncSet {
    pub(crate) fn new(
        id: SyncSetId,
        reference_timestamp: Timestamp,
        members: BTreeMap<SensorId, SyncMember>,
    ) -> Self {
        Self {
            id,
            reference_timestamp,
            members,
        }
    }

    /// Identifier of the set.
    #[inline]
    pub fn id(&self) -> SyncSetId {
        self.id
    }

    /// Timestamp of the reference observation.
    #[inline]
    pub fn reference_timestamp(&self) -> Timestamp {
        self.reference_timestamp
    }

    /// Present sensors with their slots, ordered by sensor id.
    pub fn members(&self) -> &BTreeMap<SensorId, SyncMember> {
        &self.members
    }

    /// Slot of a sensor, `None` if the sensor is absent from the set.
    pub fn get(&self, sensor: SensorId) -> Option<&SyncMember> {
        self.members.get(&sensor)
    }

    /// Check if a sensor is present in the set.
    pub fn contains(&self, sensor: SensorId) -> bool {
        self.members.contains_key(&sensor)
    }

    /// Present sensors in increasing id order.
    pub fn sensors(&self) -> impl Iterator<Item = SensorId> + '_ {
        self.members.keys().copied()
    }

    /// Number of present sensors.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if no sensor is present.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Largest time difference between a member and the reference.
    pub fn spread(&self) -> Duration {
        self.members
            .values()
            .map(|m| m.timestamp.abs_diff(self.reference_timestamp))
            .max()
            .unwrap_or_default()
    }
}

/// The synchronized model: ordered sync sets over a sensor selection.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncModel {
    sensors: Vec<SensorId>,
    reference: SensorId,
    delay: Duration,
    sets: Vec<SyncSet>,
    sync_indices: BTreeMap<SensorId, Vec<usize>>,
    poses: BTreeMap<SensorId, Pose3>,
}

impl SyncModel {
    pub(crate) fn new(
        sensors: Vec<SensorId>,
        reference: SensorId,
        delay: Duration,
        sets: Vec<SyncSet>,
        sync_indices: BTreeMap<SensorId, Vec<usize>>,
        poses: BTreeMap<SensorId, Pose3>,
    ) -> Self {
        Self {
            sensors,
            reference,
            delay,
            sets,
            sync_indices,
            poses,
        }
    }

    /// Selected sensors in selection order.
    pub fn sensors(&self) -> &[SensorId] {
        &self.sensors
    }

    /// The time reference sensor.
    pub fn reference(&self) -> SensorId {
        self.reference
    }

    /// Delay tolerance used to build the sets.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Sync sets in increasing reference timestamp order.
    pub fn sets(&self) -> &[SyncSet] {
        &self.sets
    }

    /// A sync set by id.
    pub fn set(&self, id: SyncSetId) -> Option<&SyncSet> {
        self.sets.get(id.index())
    }

    /// Number of sync sets.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Check if the model has no sets.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Stream indices of the synchronized observations of a sensor, in set
    /// order. Indices are strictly increasing.
    pub fn sync_indices(&self, sensor: SensorId) -> &[usize] {
        self.sync_indices
            .get(&sensor)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Local sync index of a sensor in a set.
    pub fn sync_index(&self, set: SyncSetId, sensor: SensorId) -> Option<usize> {
        self.set(set)?.get(sensor).map(|m| m.sync_index)
    }

    /// Pose guess of a sensor, identity for unknown sensors.
    pub fn pose(&self, sensor: SensorId) -> Pose3 {
        self.poses.get(&sensor).copied().unwrap_or_default()
    }

    /// Pose guesses of all selected sensors.
    pub fn poses(&self) -> &BTreeMap<SensorId, Pose3> {
        &self.poses
    }

    /// Resolves the observation of a sensor in a set.
    pub fn observation<'a>(
        &self,
        log: &'a ObservationLog,
        set: SyncSetId,
        sensor: SensorId,
    ) -> Option<&'a Observation> {
        let member = self.set(set)?.get(sensor)?;
        log.observation(sensor, member.observation)
    }
}
