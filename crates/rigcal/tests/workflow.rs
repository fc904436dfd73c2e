use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use approx::assert_relative_eq;
use rand::{rngs::StdRng, Rng, SeedableRng};

use rigcal::base::{
    transforms, ExtractionError, GrayImage, Line, Observation, ObservationLog, PinholeIntrinsics,
    Pose3, Primitive, PrimitiveExtractor, RangeImage, RangeScan, SensorId, Timestamp,
};
use rigcal::matching::{LineCompatibility, SensorPair};
use rigcal::sync::{SyncConfig, SyncSetId};
use rigcal::{
    CalibrationState, CalibrationWorkflow, CancelToken, Event, EventKind, PoseSolver,
    SolverProblem, WorkflowConfig, WorkflowError,
};

const A: SensorId = SensorId(0);
const B: SensorId = SensorId(1);
const C: SensorId = SensorId(2);

/// Returns pre-recorded lines per `(sensor, timestamp)`.
#[derive(Default)]
struct TableExtractor {
    lines: BTreeMap<(SensorId, Timestamp), Vec<Line>>,
    failing: BTreeSet<(SensorId, Timestamp)>,
}

impl PrimitiveExtractor for TableExtractor {
    type Primitive = Line;

    fn extract(&self, observation: &Observation) -> Result<Vec<Line>, ExtractionError> {
        let key = (observation.sensor, observation.timestamp);
        if self.failing.contains(&key) {
            return Err(ExtractionError::NoUsableResult("no edges".to_string()));
        }
        Ok(self.lines.get(&key).cloned().unwrap_or_default())
    }
}

struct KeepGuesses;

impl PoseSolver<Line> for KeepGuesses {
    fn solve(
        &self,
        problem: &SolverProblem<'_, Line>,
    ) -> Result<BTreeMap<SensorId, Pose3>, Box<dyn std::error::Error + Send + Sync>> {
        if problem.num_matches() == 0 {
            return Err("no matched primitives".into());
        }
        Ok(problem.poses.clone())
    }
}

fn scan(pose: Pose3) -> RangeScan {
    RangeScan {
        intensity: GrayImage::empty(),
        range: RangeImage::empty(),
        intrinsics: PinholeIntrinsics::new(525.0, 525.0, 319.5, 239.5),
        sensor_pose: pose,
        cloud: None,
    }
}

fn tagged(tag: f64) -> Line {
    Line::new([[tag, 0.0], [tag, 1.0]], [[0.0, 0.0, 1.0], [1.0, 0.0, 1.0]])
}

fn stream_times(sensor: SensorId) -> Vec<u64> {
    match sensor.index() {
        0 => vec![0, 100, 200, 300],
        1 => vec![5, 105, 195, 310],
        _ => vec![12, 90, 215, 290],
    }
}

// Three sensors, four sync sets, and `n` tagged lines per observation where
// the tag identifies sensor and observation.
fn tagged_fixture() -> Result<(Arc<ObservationLog>, TableExtractor), Box<dyn std::error::Error>> {
    let mut log = ObservationLog::new();
    let mut extractor = TableExtractor::default();
    for sensor in [A, B, C] {
        let times = stream_times(sensor);
        for (k, t) in times.iter().enumerate() {
            let lines = (0..=sensor.index())
                .map(|i| tagged((100 * sensor.index() + 10 * k + i) as f64))
                .collect();
            extractor
                .lines
                .insert((sensor, Timestamp::from_millis(*t)), lines);
        }
        let observations = times
            .iter()
            .map(|t| (Timestamp::from_millis(*t), scan(Pose3::identity())));
        log.add_stream(&format!("rgbd_{}", sensor.index()), observations)?;
    }
    Ok((Arc::new(log), extractor))
}

fn all_lines(_: &Line, _: &Line) -> bool {
    true
}

fn sync_config() -> SyncConfig {
    SyncConfig::with_delay(Duration::from_millis(20))
}

type TestWorkflow = CalibrationWorkflow<TableExtractor, fn(&Line, &Line) -> bool>;

fn record_text(workflow: &mut TestWorkflow) -> Arc<Mutex<Vec<String>>> {
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();
    workflow
        .events_mut()
        .subscribe(EventKind::TextProgress, move |event| {
            if let Event::TextProgress(msg) = event {
                sink.lock().expect("poisoned").push(msg.clone());
            }
        });
    messages
}

fn workflow() -> Result<TestWorkflow, Box<dyn std::error::Error>> {
    let (log, extractor) = tagged_fixture()?;
    let test: fn(&Line, &Line) -> bool = all_lines;
    let mut workflow = CalibrationWorkflow::new(log, extractor, test);
    workflow.synchronize(&[A, B, C], &sync_config())?;
    Ok(workflow)
}

#[test]
fn test_match_before_extract_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let mut workflow = workflow()?;

    let err = workflow.match_primitives();
    assert!(matches!(
        err,
        Err(WorkflowError::InvalidWorkflowState {
            state: CalibrationState::NotStarted,
            ..
        })
    ));
    assert!(matches!(
        workflow.solve(&KeepGuesses),
        Err(WorkflowError::InvalidWorkflowState { .. })
    ));
    assert_eq!(workflow.current_state(), CalibrationState::NotStarted);
    assert!(workflow.correspondences().is_empty());
    Ok(())
}

#[test]
fn test_full_run_is_monotone() -> Result<(), Box<dyn std::error::Error>> {
    let mut workflow = workflow()?;
    assert_eq!(workflow.model().map(|m| m.len()), Some(4));

    workflow.extract()?;
    assert_eq!(workflow.current_state(), CalibrationState::PrimitivesExtracted);
    workflow.match_primitives()?;
    assert_eq!(workflow.current_state(), CalibrationState::PrimitivesMatched);
    let poses = workflow.solve(&KeepGuesses)?.clone();
    assert_eq!(poses.len(), 3);
    assert_eq!(workflow.current_state(), CalibrationState::PoseSolved);
    assert_eq!(workflow.solved_poses(), Some(&poses));

    for result in [workflow.extract(), workflow.match_primitives()] {
        assert!(matches!(
            result,
            Err(WorkflowError::InvalidWorkflowState {
                state: CalibrationState::PoseSolved,
                ..
            })
        ));
    }
    assert_eq!(workflow.current_state(), CalibrationState::PoseSolved);
    Ok(())
}

#[test]
fn test_extraction_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let mut workflow = workflow()?;
    workflow.extract()?;
    let first = workflow.primitives().clone();

    workflow.extract()?;
    assert_eq!(workflow.primitives(), &first);
    assert_eq!(workflow.current_state(), CalibrationState::PrimitivesExtracted);

    // every synchronized observation has an extracted slot
    let model = workflow.model().ok_or("no model")?;
    for set in model.sets() {
        for (sensor, member) in set.members() {
            assert!(first.is_extracted(*sensor, member.sync_index));
        }
    }
    Ok(())
}

#[test]
fn test_extraction_failure_absorbed() -> Result<(), Box<dyn std::error::Error>> {
    let (log, mut extractor) = tagged_fixture()?;
    extractor.failing.insert((B, Timestamp::from_millis(105)));
    let test: fn(&Line, &Line) -> bool = all_lines;
    let mut workflow = CalibrationWorkflow::new(log, extractor, test);
    workflow.synchronize(&[A, B, C], &sync_config())?;
    let messages = record_text(&mut workflow);

    workflow.extract()?;
    assert_eq!(workflow.current_state(), CalibrationState::PrimitivesExtracted);

    let slot = workflow.primitives().get(B, 1).ok_or("slot not extracted")?;
    assert!(slot.is_empty());
    assert_eq!(workflow.primitives().total(B), 6);

    let messages = messages.lock().expect("poisoned");
    let warnings = messages
        .iter()
        .filter(|m| m.starts_with("Warning"))
        .collect::<Vec<_>>();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("observation #1 of sensor #1"));
    Ok(())
}

#[test]
fn test_event_order() -> Result<(), Box<dyn std::error::Error>> {
    let mut workflow = workflow()?;
    let events = Arc::new(Mutex::new(Vec::new()));
    for kind in [
        EventKind::TextProgress,
        EventKind::PrimitivesReady,
        EventKind::CorrespondencesReady,
    ] {
        let sink = events.clone();
        workflow.events_mut().subscribe(kind, move |event: &Event<Line>| {
            let entry = match event {
                Event::TextProgress(msg) => format!("text: {}", msg.lines().next().unwrap_or("")),
                Event::PrimitivesReady { sensor, set, primitives } => {
                    format!("ready: {sensor} {set} {}", primitives.len())
                }
                Event::CorrespondencesReady { set, .. } => format!("matched: {set}"),
            };
            sink.lock().expect("poisoned").push(entry);
        });
    }

    workflow.extract()?;
    {
        let events = events.lock().expect("poisoned");
        assert_eq!(events[0], "text: ****Running line segmentation algorithm****");
        assert_eq!(events[1], "text: 1 line(s) extracted from observation #0");
        assert_eq!(events[2], "ready: #0 #0 1");
        assert_eq!(events[3], "text: 2 line(s) extracted from observation #0");
        assert_eq!(events[4], "ready: #1 #0 2");
        assert_eq!(events[6], "ready: #2 #0 3");
        assert_eq!(events[7], "text: 1 line(s) extracted from observation #1");
        // 1 header, 2 events per extracted slot, 1 summary per sensor
        let slots = workflow
            .model()
            .ok_or("no model")?
            .sets()
            .iter()
            .map(|s| s.len())
            .sum::<usize>();
        assert_eq!(events.len(), 1 + 2 * slots + 3);
        assert!(events[events.len() - 3].starts_with("text: **"));
    }

    events.lock().expect("poisoned").clear();
    workflow.match_primitives()?;
    let events = events.lock().expect("poisoned");
    assert_eq!(events[0], "text: ****Running line matching algorithm****");
    assert_eq!(events[1], "text: **Finding matches between lines in set #0**");
    assert_eq!(events[2], "matched: #0");
    assert_eq!(events[3], "text: **Finding matches between lines in set #1**");
    assert_eq!(events.len(), 1 + 2 * 4);
    Ok(())
}

#[test]
fn test_match_summary_counts() -> Result<(), Box<dyn std::error::Error>> {
    let mut workflow = workflow()?;
    workflow.extract()?;
    let messages = record_text(&mut workflow);
    workflow.match_primitives()?;

    let messages = messages.lock().expect("poisoned");
    assert_eq!(
        messages[1],
        "**Finding matches between lines in set #0**\n\
         2 matches found between sensor #0 and sensor #1\n\
         3 matches found between sensor #0 and sensor #2\n\
         6 matches found between sensor #1 and sensor #2"
    );
    Ok(())
}

#[test]
fn test_stub_matcher_single_correspondence() -> Result<(), Box<dyn std::error::Error>> {
    let mut log = ObservationLog::new();
    let mut extractor = TableExtractor::default();
    for (sensor, n, tag) in [(A, 3, 0.0), (B, 2, 10.0)] {
        let t = Timestamp::from_millis(sensor.index() as u64);
        extractor.lines.insert(
            (sensor, t),
            (0..n).map(|i| tagged(tag + i as f64)).collect(),
        );
        log.add_stream(&format!("s{}", sensor.index()), [(t, scan(Pose3::identity()))])?;
    }

    let stub: fn(&Line, &Line) -> bool =
        |a, b| a.image_endpoints[0][0] == 1.0 && b.image_endpoints[0][0] == 10.0;
    let mut workflow = CalibrationWorkflow::new(Arc::new(log), extractor, stub);
    workflow.synchronize(&[A, B], &sync_config())?;
    workflow.extract()?;
    workflow.match_primitives()?;

    let pair = SensorPair::new(A, B).ok_or("same sensor")?;
    let found = workflow
        .correspondences()
        .iter()
        .map(|(p, c)| (p, c.set.index(), c.first, c.second))
        .collect::<Vec<_>>();
    assert_eq!(found, vec![(pair, 0, 1, 0)]);

    let resolved = workflow.matched_pairs(SyncSetId(0));
    let (first, second) = resolved[&pair][0];
    assert_eq!(first.primitive, tagged(1.0));
    assert_eq!(second.primitive, tagged(10.0));
    assert_eq!((first.sensor, second.sensor), (A, B));
    Ok(())
}

#[test]
fn test_cancel_and_resume() -> Result<(), Box<dyn std::error::Error>> {
    let mut reference = workflow()?;
    reference.extract()?;

    let token = CancelToken::new();
    let mut workflow = workflow()?.with_cancel_token(token.clone());
    let trigger = token.clone();
    workflow
        .events_mut()
        .subscribe(EventKind::PrimitivesReady, move |event: &Event<Line>| {
            if let Event::PrimitivesReady { set, .. } = event {
                if set.index() == 1 {
                    trigger.cancel();
                }
            }
        });

    let err = workflow.extract();
    assert!(matches!(
        err,
        Err(WorkflowError::Cancelled { completed_sets: 2 })
    ));
    assert_eq!(workflow.current_state(), CalibrationState::NotStarted);
    assert_eq!(workflow.extracted_sets(), 2);
    assert!(workflow.primitives().is_extracted(A, 1));
    assert!(!workflow.primitives().is_extracted(A, 2));

    // still cancelled: no progress
    assert!(matches!(
        workflow.extract(),
        Err(WorkflowError::Cancelled { completed_sets: 2 })
    ));

    token.reset();
    workflow.extract()?;
    assert_eq!(workflow.current_state(), CalibrationState::PrimitivesExtracted);
    assert_eq!(workflow.primitives(), reference.primitives());
    Ok(())
}

#[test]
fn test_cancel_matching_and_resume() -> Result<(), Box<dyn std::error::Error>> {
    let mut reference = workflow()?;
    reference.extract()?;
    reference.match_primitives()?;

    let token = CancelToken::new();
    let mut workflow = workflow()?.with_cancel_token(token.clone());
    workflow.extract()?;
    let trigger = token.clone();
    workflow
        .events_mut()
        .subscribe(EventKind::CorrespondencesReady, move |event: &Event<Line>| {
            if let Event::CorrespondencesReady { set, .. } = event {
                if set.index() == 1 {
                    trigger.cancel();
                }
            }
        });

    let err = workflow.match_primitives();
    assert!(matches!(
        err,
        Err(WorkflowError::Cancelled { completed_sets: 2 })
    ));
    assert_eq!(workflow.current_state(), CalibrationState::PrimitivesExtracted);
    assert_eq!(workflow.matched_sets(), 2);
    // 2 + 3 + 6 matches per set
    assert_eq!(workflow.correspondences().len(), 2 * 11);
    assert!(workflow
        .correspondences()
        .iter()
        .all(|(_, c)| c.set.index() < 2));

    token.reset();
    workflow.match_primitives()?;
    assert_eq!(workflow.current_state(), CalibrationState::PrimitivesMatched);
    assert_eq!(workflow.matched_sets(), 4);
    assert_eq!(workflow.correspondences(), reference.correspondences());
    Ok(())
}

#[test]
fn test_cancelled_resweep_keeps_results() -> Result<(), Box<dyn std::error::Error>> {
    let token = CancelToken::new();
    let mut workflow = workflow()?.with_cancel_token(token.clone());
    workflow.extract()?;

    // leave the matching half done
    let trigger = token.clone();
    let stop_matching = workflow
        .events_mut()
        .subscribe(EventKind::CorrespondencesReady, move |_: &Event<Line>| {
            trigger.cancel();
        });
    assert!(matches!(
        workflow.match_primitives(),
        Err(WorkflowError::Cancelled { completed_sets: 1 })
    ));
    assert!(workflow.events_mut().unsubscribe(stop_matching));
    token.reset();

    let primitives = workflow.primitives().clone();
    let correspondences = workflow.correspondences().clone();
    assert_eq!(correspondences.len(), 11);

    let ready = Arc::new(AtomicUsize::new(0));
    let counter = ready.clone();
    workflow
        .events_mut()
        .subscribe(EventKind::PrimitivesReady, move |_: &Event<Line>| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    // sensor #0 reports one line per observation, observation #1 is in set #1
    let trigger = token.clone();
    let stop_sweep = workflow
        .events_mut()
        .subscribe(EventKind::TextProgress, move |event: &Event<Line>| {
            if let Event::TextProgress(msg) = event {
                if msg.starts_with("1 line(s) extracted from observation #1") {
                    trigger.cancel();
                }
            }
        });

    assert!(matches!(
        workflow.extract(),
        Err(WorkflowError::Cancelled { completed_sets: 2 })
    ));
    assert_eq!(workflow.current_state(), CalibrationState::PrimitivesExtracted);
    assert_eq!(workflow.extracted_sets(), 4);
    assert_eq!(workflow.matched_sets(), 1);
    assert_eq!(workflow.primitives(), &primitives);
    assert_eq!(workflow.correspondences(), &correspondences);
    assert_eq!(ready.load(Ordering::SeqCst), 0);

    assert!(workflow.events_mut().unsubscribe(stop_sweep));
    token.reset();
    workflow.extract()?;
    let slots = workflow
        .model()
        .ok_or("no model")?
        .sets()
        .iter()
        .map(|s| s.len())
        .sum::<usize>();
    assert_eq!(ready.load(Ordering::SeqCst), slots);
    assert_eq!(workflow.primitives(), &primitives);
    assert!(workflow.correspondences().is_empty());
    assert_eq!(workflow.matched_sets(), 0);

    workflow.match_primitives()?;
    assert_eq!(workflow.correspondences().len(), 4 * 11);
    Ok(())
}

#[test]
fn test_parallel_extraction_matches_sequential() -> Result<(), Box<dyn std::error::Error>> {
    let mut sequential = workflow()?;
    sequential.extract()?;
    sequential.match_primitives()?;

    let (log, extractor) = tagged_fixture()?;
    let test: fn(&Line, &Line) -> bool = all_lines;
    let mut parallel = CalibrationWorkflow::new(log, extractor, test).with_config(WorkflowConfig {
        parallel_extraction: true,
    });
    parallel.synchronize(&[A, B, C], &sync_config())?;
    parallel.extract()?;
    parallel.match_primitives()?;

    assert_eq!(parallel.primitives(), sequential.primitives());
    assert_eq!(parallel.correspondences(), sequential.correspondences());
    Ok(())
}

#[test]
fn test_solver_failure_keeps_state() -> Result<(), Box<dyn std::error::Error>> {
    let (log, extractor) = tagged_fixture()?;
    let none: fn(&Line, &Line) -> bool = |_, _| false;
    let mut workflow = CalibrationWorkflow::new(log, extractor, none);
    workflow.synchronize(&[A, B, C], &sync_config())?;
    workflow.extract()?;
    workflow.match_primitives()?;
    assert!(workflow.correspondences().is_empty());

    assert!(matches!(
        workflow.solve(&KeepGuesses),
        Err(WorkflowError::Solver(_))
    ));
    assert_eq!(workflow.current_state(), CalibrationState::PrimitivesMatched);
    assert!(workflow.solved_poses().is_none());
    Ok(())
}

#[test]
fn test_geometric_matching_in_rig_frame() -> Result<(), Box<dyn std::error::Error>> {
    let poses = [
        Pose3::identity(),
        Pose3::from_axis_angle(&[0.0, 0.0, 1.0], 0.3, [0.2, 0.0, 0.0])?,
        Pose3::from_axis_angle(&[0.0, 1.0, 0.0], -0.4, [-0.2, 0.1, 0.05])?,
    ];
    // pairwise distinct directions
    let world = [
        Line::new([[0.0; 2]; 2], [[-1.0, 0.0, 2.0], [1.0, 0.0, 2.0]]),
        Line::new([[0.0; 2]; 2], [[1.0, -1.0, 2.5], [1.0, 1.0, 2.5]]),
        Line::new([[0.0; 2]; 2], [[0.0, 1.0, 1.5], [0.0, 1.0, 3.5]]),
    ];

    let mut rng = StdRng::seed_from_u64(7);
    let mut log = ObservationLog::new();
    let mut extractor = TableExtractor::default();
    for (s, pose) in poses.iter().enumerate() {
        let sensor = SensorId(s);
        let times = stream_times(sensor);
        let inverse = pose.inverse();
        for t in &times {
            let lines = world
                .iter()
                .map(|l| {
                    let mut seen = l.transformed(&inverse);
                    for p in seen.endpoints.iter_mut() {
                        for v in p.iter_mut() {
                            *v += rng.random_range(-0.002..0.002);
                        }
                    }
                    seen
                })
                .collect();
            extractor
                .lines
                .insert((sensor, Timestamp::from_millis(*t)), lines);
        }
        log.add_stream(
            &format!("rgbd_{s}"),
            times
                .iter()
                .map(|t| (Timestamp::from_millis(*t), scan(*pose))),
        )?;
    }

    let mut workflow =
        CalibrationWorkflow::new(Arc::new(log), extractor, LineCompatibility::default());
    workflow.synchronize(&[A, B, C], &sync_config())?;
    workflow.extract()?;
    workflow.match_primitives()?;

    let model = workflow.model().ok_or("no model")?;
    let sets = model.len();
    // each line matches its own counterpart in every pair
    assert_eq!(workflow.correspondences().len(), sets * 3 * world.len());
    for (_, c) in workflow.correspondences().iter() {
        assert_eq!(c.first, c.second);
    }

    for set in model.sets() {
        for (pair, matches) in workflow.matched_pairs(set.id()) {
            for (a, b) in matches {
                let pa = a.primitive.transformed(&model.pose(pair.first()));
                let pb = b.primitive.transformed(&model.pose(pair.second()));
                let gap = transforms::norm(&transforms::sub(&pa.midpoint(), &pb.midpoint()));
                assert_relative_eq!(gap, 0.0, epsilon = 1e-2);
            }
        }
    }
    Ok(())
}
