use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use rigcal_core::{
    Detection, ExtractionError, ObservationLog, Pose3, Primitive, PrimitiveExtractor, SensorId,
};
use rigcal_match::{CompatibilityTest, CorrespondenceMap, CorrespondenceMatcher, SensorPair};
use rigcal_sync::{SyncConfig, SyncMember, SyncModel, SyncSetId};
use serde::{Deserialize, Serialize};

use crate::{
    cache::PrimitiveCache,
    error::WorkflowError,
    events::{Event, EventChannel},
    solver::{PoseSolver, SolverProblem},
    state::CalibrationState,
};

/// Parameters of the calibration workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Run the extractor on the sensors of one sync set in parallel.
    pub parallel_extraction: bool,
}

/// Shared flag to stop a running sweep at the next sync set boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Check if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clears a previous cancellation request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

type Resolved<'a, P> = BTreeMap<SensorPair, Vec<(&'a Detection<P>, &'a Detection<P>)>>;

/// Drives synchronization, extraction, matching and pose solving over one
/// observation log.
///
/// Stages run in order and the workflow state only moves forward. Every
/// operation requested in the wrong stage fails with
/// [`WorkflowError::InvalidWorkflowState`] and leaves the workflow untouched.
pub struct CalibrationWorkflow<E: PrimitiveExtractor, T> {
    log: Arc<ObservationLog>,
    model: Option<SyncModel>,
    extractor: E,
    matcher: CorrespondenceMatcher<T>,
    config: WorkflowConfig,
    cache: PrimitiveCache<E::Primitive>,
    correspondences: CorrespondenceMap,
    events: EventChannel<E::Primitive>,
    cancel: Option<CancelToken>,
    state: CalibrationState,
    extracted_sets: usize,
    matched_sets: usize,
    solved: Option<BTreeMap<SensorId, Pose3>>,
}

impl<E, T> CalibrationWorkflow<E, T>
where
    E: PrimitiveExtractor,
    T: CompatibilityTest<E::Primitive>,
{
    /// Creates a workflow over a log with an extractor and a compatibility
    /// test for matching.
    pub fn new(log: Arc<ObservationLog>, extractor: E, test: T) -> Self {
        Self {
            log,
            model: None,
            extractor,
            matcher: CorrespondenceMatcher::new(test),
            config: WorkflowConfig::default(),
            cache: PrimitiveCache::default(),
            correspondences: CorrespondenceMap::new(),
            events: EventChannel::new(),
            cancel: None,
            state: CalibrationState::NotStarted,
            extracted_sets: 0,
            matched_sets: 0,
            solved: None,
        }
    }

    /// Sets the workflow configuration.
    pub fn with_config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the token checked at every sync set boundary.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Synchronizes the selected sensors of the log.
    ///
    /// Only allowed before extraction completed. Replaces any previous model
    /// and drops partial results.
    pub fn synchronize(
        &mut self,
        selected: &[SensorId],
        config: &SyncConfig,
    ) -> Result<&SyncModel, WorkflowError> {
        self.ensure_state("synchronize", &[CalibrationState::NotStarted])?;
        let model = rigcal_sync::synchronize(&self.log, selected, config)?;
        Ok(self.install_model(model))
    }

    /// Installs a model synchronized elsewhere.
    pub fn set_model(&mut self, model: SyncModel) -> Result<(), WorkflowError> {
        self.ensure_state("set the sync model", &[CalibrationState::NotStarted])?;
        self.install_model(model);
        Ok(())
    }

    fn install_model(&mut self, model: SyncModel) -> &SyncModel {
        self.cache = PrimitiveCache::for_model(&model);
        self.correspondences = CorrespondenceMap::new();
        self.extracted_sets = 0;
        self.matched_sets = 0;
        self.model.insert(model)
    }

    /// Runs the extractor on every synchronized observation.
    ///
    /// Before completion this resumes from the first unfinished set. Once
    /// primitives were extracted a new call sweeps every set again from
    /// scratch and only replaces the cached primitives if it completes. The
    /// `PrimitivesReady` events of such a sweep are held back until every set
    /// was extracted, so a cancelled sweep publishes none. Extraction
    /// failures of single observations are reported and leave an empty
    /// primitive list.
    pub fn extract(&mut self) -> Result<(), WorkflowError> {
        self.ensure_state(
            "extract primitives",
            &[
                CalibrationState::NotStarted,
                CalibrationState::PrimitivesExtracted,
            ],
        )?;
        let model = self
            .model
            .as_ref()
            .ok_or(WorkflowError::UnsynchronizedModel)?;

        let resweep = self.state == CalibrationState::PrimitivesExtracted;
        let (mut cache, start) = if resweep {
            log::info!("re-extracting primitives of {} sync sets", model.len());
            (PrimitiveCache::for_model(model), 0)
        } else {
            (std::mem::take(&mut self.cache), self.extracted_sets)
        };

        let outcome = self.sweep_extraction(&mut cache, start, resweep);
        match outcome {
            Ok(num_sets) => {
                self.cache = cache;
                self.extracted_sets = num_sets;
                if resweep {
                    self.correspondences = CorrespondenceMap::new();
                    self.matched_sets = 0;
                }
                self.state = CalibrationState::PrimitivesExtracted;
                Ok(())
            }
            Err(err) => {
                if !resweep {
                    if let WorkflowError::Cancelled { completed_sets } = &err {
                        self.extracted_sets = *completed_sets;
                    }
                    self.cache = cache;
                }
                Err(err)
            }
        }
    }

    fn sweep_extraction(
        &mut self,
        cache: &mut PrimitiveCache<E::Primitive>,
        start: usize,
        hold_ready: bool,
    ) -> Result<usize, WorkflowError> {
        let model = self
            .model
            .as_ref()
            .ok_or(WorkflowError::UnsynchronizedModel)?;
        let kind = <E::Primitive as Primitive>::KIND;
        let sweep_start = Instant::now();

        self.events.publish(&Event::TextProgress(format!(
            "****Running {kind} segmentation algorithm****"
        )));

        let mut held = Vec::new();
        for set in model.sets().iter().skip(start) {
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                log::info!("extraction cancelled before sync set {}", set.id());
                return Err(WorkflowError::Cancelled {
                    completed_sets: set.id().index(),
                });
            }

            let members = set
                .members()
                .iter()
                .map(|(sensor, member)| (*sensor, *member))
                .collect::<Vec<_>>();

            let source = &self.log;
            let extractor = &self.extractor;
            let run = |&(sensor, member): &(SensorId, SyncMember)| {
                let timer = Instant::now();
                let result = match source.observation(sensor, member.observation) {
                    Some(observation) => extractor.extract(observation),
                    None => Err(ExtractionError::MissingData("observation not in log")),
                };
                (sensor, member, timer.elapsed(), result)
            };

            // join before the set is committed
            let results = if self.config.parallel_extraction {
                members.par_iter().map(run).collect::<Vec<_>>()
            } else {
                members.iter().map(run).collect::<Vec<_>>()
            };

            for (sensor, member, elapsed, result) in results {
                let primitives = match result {
                    Ok(primitives) => {
                        log::debug!(
                            "sensor {sensor}: {} {kind}(s) from observation #{} in {elapsed:?}",
                            primitives.len(),
                            member.observation
                        );
                        self.events.publish(&Event::TextProgress(format!(
                            "{} {kind}(s) extracted from observation #{}\nTime elapsed: {:.3} ms",
                            primitives.len(),
                            member.observation,
                            elapsed.as_secs_f64() * 1e3
                        )));
                        primitives
                    }
                    Err(err) => {
                        log::warn!(
                            "sensor {sensor}: extraction failed on observation #{}: {err}",
                            member.observation
                        );
                        self.events.publish(&Event::TextProgress(format!(
                            "Warning: {kind} extraction failed on observation #{} of sensor {sensor}: {err}",
                            member.observation
                        )));
                        Vec::new()
                    }
                };

                let detections = primitives
                    .iter()
                    .cloned()
                    .map(|p| Detection::new(sensor, member.observation, p))
                    .collect();
                cache.insert(sensor, member.sync_index, detections);

                let ready = Event::PrimitivesReady {
                    sensor,
                    set: set.id(),
                    primitives,
                };
                if hold_ready {
                    held.push(ready);
                } else {
                    self.events.publish(&ready);
                }
            }
        }

        for ready in &held {
            self.events.publish(ready);
        }

        for sensor in model.sensors() {
            self.events.publish(&Event::TextProgress(format!(
                "**{} {kind}(s) extracted from {} observations of sensor {sensor}**",
                cache.total(*sensor),
                model.sync_indices(*sensor).len()
            )));
        }

        log::info!(
            "extracted {kind}s from {} sync sets in {:?}",
            model.len() - start.min(model.len()),
            sweep_start.elapsed()
        );

        Ok(model.len())
    }

    /// Matches the primitives of every sync set across sensor pairs.
    ///
    /// Resumes from the first set that was not matched yet.
    pub fn match_primitives(&mut self) -> Result<(), WorkflowError> {
        self.ensure_state("match primitives", &[CalibrationState::PrimitivesExtracted])?;
        let model = self
            .model
            .as_ref()
            .ok_or(WorkflowError::UnsynchronizedModel)?;
        let kind = <E::Primitive as Primitive>::KIND;
        let match_start = Instant::now();

        self.events.publish(&Event::TextProgress(format!(
            "****Running {kind} matching algorithm****"
        )));

        for set in model.sets().iter().skip(self.matched_sets) {
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                log::info!("matching cancelled before sync set {}", set.id());
                return Err(WorkflowError::Cancelled {
                    completed_sets: self.matched_sets,
                });
            }

            let owned = set
                .members()
                .iter()
                .map(|(sensor, member)| {
                    let primitives = self
                        .cache
                        .get(*sensor, member.sync_index)
                        .unwrap_or_default()
                        .iter()
                        .map(|d| d.primitive.clone())
                        .collect::<Vec<_>>();
                    (*sensor, primitives)
                })
                .collect::<BTreeMap<_, _>>();
            let primitives = owned
                .iter()
                .map(|(sensor, list)| (*sensor, list.as_slice()))
                .collect::<BTreeMap<_, _>>();

            let report = self.matcher.match_set(
                set.id(),
                &primitives,
                model.poses(),
                &mut self.correspondences,
            );

            let mut message = format!("**Finding matches between {kind}s in set {}**", set.id());
            if !report.counts.is_empty() {
                message.push('\n');
                message.push_str(&report.to_string());
            }
            self.events.publish(&Event::TextProgress(message));
            self.events.publish(&Event::CorrespondencesReady {
                set: set.id(),
                correspondences: self.correspondences.for_set(set.id()),
            });

            self.matched_sets += 1;
        }

        let cache = &self.cache;
        let validation = self.correspondences.validate(model.len(), |set, sensor| {
            let sync_index = model.sync_index(set, sensor)?;
            cache.get(sensor, sync_index).map(<[_]>::len)
        });
        debug_assert!(validation.is_ok(), "invalid correspondences: {validation:?}");
        validation?;

        log::info!(
            "found {} {kind} correspondences in {:?}",
            self.correspondences.len(),
            match_start.elapsed()
        );

        self.state = CalibrationState::PrimitivesMatched;
        Ok(())
    }

    /// Hands the matched primitives to a pose solver.
    pub fn solve<S>(&mut self, solver: &S) -> Result<&BTreeMap<SensorId, Pose3>, WorkflowError>
    where
        S: PoseSolver<E::Primitive> + ?Sized,
    {
        self.ensure_state("solve poses", &[CalibrationState::PrimitivesMatched])?;
        let model = self
            .model
            .as_ref()
            .ok_or(WorkflowError::UnsynchronizedModel)?;

        let poses = {
            let mut pairs: Resolved<'_, E::Primitive> = BTreeMap::new();
            for set in model.sets() {
                for (pair, resolved) in self.matched_pairs(set.id()) {
                    pairs.entry(pair).or_default().extend(resolved);
                }
            }
            let problem = SolverProblem {
                sensors: model.sensors(),
                poses: model.poses(),
                correspondences: &self.correspondences,
                pairs,
            };
            log::info!(
                "solving poses of {} sensors from {} matches",
                problem.sensors.len(),
                problem.num_matches()
            );
            solver.solve(&problem).map_err(WorkflowError::Solver)?
        };

        self.events.publish(&Event::TextProgress(format!(
            "****Poses solved for {} sensors****",
            poses.len()
        )));
        self.state = CalibrationState::PoseSolved;
        Ok(self.solved.insert(poses))
    }

    /// Matched primitives of one set per sensor pair, resolved from the
    /// primitive cache.
    pub fn matched_pairs(&self, set: SyncSetId) -> Resolved<'_, E::Primitive> {
        let Some(model) = self.model.as_ref() else {
            return BTreeMap::new();
        };
        let slot = |sensor: SensorId| {
            model
                .sync_index(set, sensor)
                .and_then(|i| self.cache.get(sensor, i))
                .unwrap_or_default()
        };

        self.correspondences
            .for_set(set)
            .into_iter()
            .map(|(pair, list)| {
                let first = slot(pair.first());
                let second = slot(pair.second());
                let resolved = list
                    .iter()
                    .filter_map(|c| Some((first.get(c.first)?, second.get(c.second)?)))
                    .collect();
                (pair, resolved)
            })
            .collect()
    }

    fn ensure_state(
        &self,
        operation: &'static str,
        allowed: &[CalibrationState],
    ) -> Result<(), WorkflowError> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        log::warn!("cannot {operation} in state '{}'", self.state);
        Err(WorkflowError::InvalidWorkflowState {
            operation,
            state: self.state,
        })
    }

    /// Current stage of the workflow.
    pub fn current_state(&self) -> CalibrationState {
        self.state
    }

    /// The observation log.
    pub fn log(&self) -> &ObservationLog {
        &self.log
    }

    /// The workflow configuration.
    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// The synchronized model, if any.
    pub fn model(&self) -> Option<&SyncModel> {
        self.model.as_ref()
    }

    /// The extractor in use.
    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    /// The primitive cache.
    pub fn primitives(&self) -> &PrimitiveCache<E::Primitive> {
        &self.cache
    }

    /// Correspondences found so far.
    pub fn correspondences(&self) -> &CorrespondenceMap {
        &self.correspondences
    }

    /// Number of sync sets whose extraction completed.
    pub fn extracted_sets(&self) -> usize {
        self.extracted_sets
    }

    /// Number of sync sets already matched.
    pub fn matched_sets(&self) -> usize {
        self.matched_sets
    }

    /// Poses returned by the solver.
    pub fn solved_poses(&self) -> Option<&BTreeMap<SensorId, Pose3>> {
        self.solved.as_ref()
    }

    /// The event channel, to manage subscriptions.
    pub fn events_mut(&mut self) -> &mut EventChannel<E::Primitive> {
        &mut self.events
    }
}
