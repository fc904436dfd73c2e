use std::collections::BTreeMap;
use std::fmt;

use rigcal_core::SensorId;
use rigcal_sync::SyncSetId;
use serde::{Deserialize, Serialize};

use crate::error::MatchError;

/// An unordered pair of distinct sensors, stored with `first < second`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SensorPair {
    first: SensorId,
    second: SensorId,
}

impl SensorPair {
    /// Creates the normalized pair, `None` if both sensors are the same.
    pub fn new(a: SensorId, b: SensorId) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self {
                first: a,
                second: b,
            }),
            std::cmp::Ordering::Greater => Some(Self {
                first: b,
                second: a,
            }),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Sensor with the smaller id.
    #[inline]
    pub fn first(&self) -> SensorId {
        self.first
    }

    /// Sensor with the larger id.
    #[inline]
    pub fn second(&self) -> SensorId {
        self.second
    }

    /// Check if the pair contains a sensor.
    pub fn contains(&self, sensor: SensorId) -> bool {
        self.first == sensor || self.second == sensor
    }
}

impl fmt::Display for SensorPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.first, self.second)
    }
}

/// Two primitives of one sync set describing the same physical feature.
///
/// `first` indexes the primitives of the pair's first sensor and `second`
/// those of its second sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Correspondence {
    /// Sync set both primitives were observed in.
    pub set: SyncSetId,
    /// Index into the first sensor's primitives for the set.
    pub first: usize,
    /// Index into the second sensor's primitives for the set.
    pub second: usize,
}

impl Correspondence {
    /// Creates a correspondence.
    pub fn new(set: SyncSetId, first: usize, second: usize) -> Self {
        Self { set, first, second }
    }
}

/// Append-only correspondence lists per sensor pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrespondenceMap {
    pairs: BTreeMap<SensorPair, Vec<Correspondence>>,
}

impl CorrespondenceMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a correspondence to the list of a pair.
    pub fn push(&mut self, pair: SensorPair, correspondence: Correspondence) {
        self.pairs.entry(pair).or_default().push(correspondence);
    }

    /// Makes sure a pair has a (possibly empty) list.
    pub(crate) fn register_pair(&mut self, pair: SensorPair) {
        self.pairs.entry(pair).or_default();
    }

    /// Correspondences of a pair in insertion order.
    pub fn for_pair(&self, pair: SensorPair) -> &[Correspondence] {
        self.pairs
            .get(&pair)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Correspondences of one sync set grouped by pair.
    ///
    /// Every known pair is present, possibly with an empty list.
    pub fn for_set(&self, set: SyncSetId) -> BTreeMap<SensorPair, Vec<Correspondence>> {
        self.pairs
            .iter()
            .map(|(pair, list)| {
                let in_set = list.iter().filter(|c| c.set == set).copied().collect();
                (*pair, in_set)
            })
            .collect()
    }

    /// Number of correspondences of a pair in one set.
    pub fn count(&self, set: SyncSetId, pair: SensorPair) -> usize {
        self.for_pair(pair).iter().filter(|c| c.set == set).count()
    }

    /// Known sensor pairs in increasing order.
    pub fn pairs(&self) -> impl Iterator<Item = SensorPair> + '_ {
        self.pairs.keys().copied()
    }

    /// Total number of correspondences.
    pub fn len(&self) -> usize {
        self.pairs.values().map(Vec::len).sum()
    }

    /// Check if there are no correspondences.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All correspondences ordered by sync set, then by sensor pair, then by
    /// insertion.
    pub fn iter(&self) -> impl Iterator<Item = (SensorPair, Correspondence)> + '_ {
        let mut all = self
            .pairs
            .iter()
            .flat_map(|(pair, list)| list.iter().map(move |c| (*pair, *c)))
            .collect::<Vec<_>>();
        // stable: keeps insertion order within a (set, pair) group
        all.sort_by_key(|(pair, c)| (c.set, *pair));
        all.into_iter()
    }

    /// Checks every correspondence against the primitive lists.
    ///
    /// `primitive_count(set, sensor)` returns the number of primitives of a
    /// sensor in a set, `None` if the set does not exist or the sensor is
    /// absent from it.
    pub fn validate<F>(&self, num_sets: usize, primitive_count: F) -> Result<(), MatchError>
    where
        F: Fn(SyncSetId, SensorId) -> Option<usize>,
    {
        for (pair, list) in &self.pairs {
            for c in list {
                if c.set.index() >= num_sets {
                    return Err(MatchError::UnknownSet(c.set));
                }
                for (sensor, index) in [(pair.first, c.first), (pair.second, c.second)] {
                    let len = primitive_count(c.set, sensor).ok_or(MatchError::SensorNotInSet {
                        set: c.set,
                        sensor,
                    })?;
                    if index >= len {
                        return Err(MatchError::CorrespondenceIndex {
                            set: c.set,
                            sensor,
                            index,
                            len,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
