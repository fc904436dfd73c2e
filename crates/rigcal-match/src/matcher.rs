use std::collections::BTreeMap;
use std::fmt;

use rigcal_core::{Pose3, Primitive, SensorId};
use rigcal_sync::SyncSetId;

use crate::{
    compatibility::CompatibilityTest,
    correspondence::{Correspondence, CorrespondenceMap, SensorPair},
};

/// Number of correspondences found per sensor pair in one sync set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetMatchReport {
    /// The matched sync set.
    pub set: SyncSetId,
    /// Correspondences added per pair, zero counts included.
    pub counts: BTreeMap<SensorPair, usize>,
}

impl SetMatchReport {
    /// Total number of correspondences added for the set.
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

impl fmt::Display for SetMatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (pair, count)) in self.counts.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "{count} matches found between sensor {} and sensor {}",
                pair.first(),
                pair.second()
            )?;
        }
        Ok(())
    }
}

/// Finds correspondences between the primitives of every sensor pair of a
/// sync set.
///
/// Primitives are brought into the rig frame with the sensor poses before
/// the compatibility test runs. Sensors without a pose use the identity.
#[derive(Debug, Clone, Default)]
pub struct CorrespondenceMatcher<T> {
    test: T,
}

impl<T> CorrespondenceMatcher<T> {
    /// Creates a matcher around a compatibility test.
    pub fn new(test: T) -> Self {
        Self { test }
    }

    /// The compatibility test in use.
    pub fn test(&self) -> &T {
        &self.test
    }

    /// Matches one sync set and appends the results to `out`.
    ///
    /// `primitives` holds the sensor-frame primitives of each sensor present
    /// in the set. Correspondences are appended pair by pair in increasing
    /// pair order, and within a pair in increasing `(first, second)` order.
    pub fn match_set<P>(
        &self,
        set: SyncSetId,
        primitives: &BTreeMap<SensorId, &[P]>,
        poses: &BTreeMap<SensorId, Pose3>,
        out: &mut CorrespondenceMap,
    ) -> SetMatchReport
    where
        P: Primitive,
        T: CompatibilityTest<P>,
    {
        let rig_frame = primitives
            .iter()
            .map(|(sensor, list)| {
                let pose = poses.get(sensor).copied().unwrap_or_default();
                let moved = list.iter().map(|p| p.transformed(&pose)).collect::<Vec<_>>();
                (*sensor, moved)
            })
            .collect::<BTreeMap<_, _>>();

        let mut counts = BTreeMap::new();
        for (a, list_a) in rig_frame.iter() {
            for (b, list_b) in rig_frame.range(*a..).skip(1) {
                let Some(pair) = SensorPair::new(*a, *b) else {
                    continue;
                };
                out.register_pair(pair);

                let mut count = 0;
                for (ia, pa) in list_a.iter().enumerate() {
                    for (ib, pb) in list_b.iter().enumerate() {
                        if self.test.compatible(pa, pb) {
                            out.push(pair, Correspondence::new(set, ia, ib));
                            count += 1;
                        }
                    }
                }

                log::debug!(
                    "set {set}: {count} {} correspondences between {a} and {b}",
                    P::KIND
                );
                counts.insert(pair, count);
            }
        }

        SetMatchReport { set, counts }
    }

    /// Matches a sequence of sync sets into a fresh correspondence map.
    pub fn match_sets<'a, P, I>(
        &self,
        sets: I,
        poses: &BTreeMap<SensorId, Pose3>,
    ) -> (CorrespondenceMap, Vec<SetMatchReport>)
    where
        P: Primitive,
        T: CompatibilityTest<P>,
        I: IntoIterator<Item = (SyncSetId, BTreeMap<SensorId, &'a [P]>)>,
    {
        let mut map = CorrespondenceMap::new();
        let reports = sets
            .into_iter()
            .map(|(set, primitives)| self.match_set(set, &primitives, poses, &mut map))
            .collect();
        (map, reports)
    }
}
