use std::collections::BTreeMap;

use rigcal_core::{Detection, Pose3, SensorId};
use rigcal_match::{CorrespondenceMap, SensorPair};

/// Everything a pose solver receives once matching completed.
#[derive(Debug)]
pub struct SolverProblem<'a, P> {
    /// Selected sensors in selection order.
    pub sensors: &'a [SensorId],
    /// Initial sensor to rig poses.
    pub poses: &'a BTreeMap<SensorId, Pose3>,
    /// Correspondences of every sync set.
    pub correspondences: &'a CorrespondenceMap,
    /// Matched primitives per sensor pair, in the sensor frames, as
    /// `(first sensor, second sensor)` tuples.
    pub pairs: BTreeMap<SensorPair, Vec<(&'a Detection<P>, &'a Detection<P>)>>,
}

impl<P> SolverProblem<'_, P> {
    /// Total number of matched primitive pairs.
    pub fn num_matches(&self) -> usize {
        self.pairs.values().map(Vec::len).sum()
    }
}

/// Estimates sensor to rig poses from matched primitives.
pub trait PoseSolver<P> {
    /// Returns the solved pose of every sensor.
    fn solve(
        &self,
        problem: &SolverProblem<'_, P>,
    ) -> Result<BTreeMap<SensorId, Pose3>, Box<dyn std::error::Error + Send + Sync>>;
}

impl<P, F> PoseSolver<P> for F
where
    F: Fn(
        &SolverProblem<'_, P>,
    ) -> Result<BTreeMap<SensorId, Pose3>, Box<dyn std::error::Error + Send + Sync>>,
{
    fn solve(
        &self,
        problem: &SolverProblem<'_, P>,
    ) -> Result<BTreeMap<SensorId, Pose3>, Box<dyn std::error::Error + Send + Sync>> {
        self(problem)
    }
}
