use argh::FromArgs;
use rand::{rngs::StdRng, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rigcal::base::{transforms, Line, ObservationLog, Plane, SensorId};
use rigcal::matching::CompatibilityTest;
use rigcal::sync::SyncConfig;
use rigcal::{CalibrationWorkflow, CancelToken, Event, EventKind, WorkflowError};

mod synthetic;
use synthetic::{DemoConfig, OracleExtractor, ResidualReport, SyntheticPrimitive, SyntheticRig};

#[derive(FromArgs)]
/// Calibrate a synthetic multi-sensor rig from line or plane correspondences
struct Args {
    /// number of sensors in the rig
    #[argh(option, default = "3")]
    num_sensors: usize,

    /// number of frames recorded per sensor
    #[argh(option, default = "40")]
    num_frames: usize,

    /// synchronization delay tolerance in milliseconds
    #[argh(option, default = "30")]
    delay_ms: u64,

    /// stop after this many sync sets
    #[argh(option)]
    max_sets: Option<usize>,

    /// primitive used for calibration: line or plane
    #[argh(option, default = "String::from(\"line\")")]
    primitive: String,

    /// measurement noise amplitude in meters
    #[argh(option, default = "0.002")]
    noise: f64,

    /// probability that the extraction of one observation fails
    #[argh(option, default = "0.05")]
    dropout: f64,

    /// seed of the synthetic scene
    #[argh(option, default = "0")]
    seed: u64,

    /// extract the sensors of a sync set in parallel
    #[argh(switch)]
    parallel: bool,

    /// path to a JSON file with segmentation and matching settings
    #[argh(option)]
    config: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let mut config = match &args.config {
        Some(path) => {
            log::info!("loading demo config from {}", path.display());
            serde_json::from_str::<DemoConfig>(&std::fs::read_to_string(path)?)?
        }
        None => DemoConfig::default(),
    };
    config.line_segmentation.validate()?;
    config.plane_segmentation.validate()?;
    if args.parallel {
        config.workflow.parallel_extraction = true;
    }

    let mut rng = StdRng::seed_from_u64(args.seed);
    let rig = SyntheticRig::new(args.num_sensors, &mut rng)?;
    let log = Arc::new(rig.record(args.num_frames, &mut rng)?);
    println!(
        "Recorded {} sensors with {} frames each",
        log.num_sensors(),
        args.num_frames
    );

    let cancel_token = CancelToken::new();
    ctrlc::set_handler({
        let cancel_token = cancel_token.clone();
        move || {
            println!("Received Ctrl-C signal. Stopping at the next sync set !!");
            cancel_token.cancel();
        }
    })?;

    let mut sync_config = SyncConfig::with_delay(Duration::from_millis(args.delay_ms))
        .reference(config.reference);
    if let Some(max_sets) = args.max_sets {
        sync_config = sync_config.max_sets(max_sets);
    }

    match args.primitive.as_str() {
        "line" => {
            let test = config.line_matching;
            run::<Line, _>(&args, &rig, log, config, test, &sync_config, cancel_token)
        }
        "plane" => {
            let test = config.plane_matching;
            run::<Plane, _>(&args, &rig, log, config, test, &sync_config, cancel_token)
        }
        other => Err(format!("unknown primitive '{other}', expected line or plane").into()),
    }
}

fn run<P, T>(
    args: &Args,
    rig: &SyntheticRig,
    log: Arc<ObservationLog>,
    config: DemoConfig,
    test: T,
    sync_config: &SyncConfig,
    cancel_token: CancelToken,
) -> Result<(), Box<dyn std::error::Error>>
where
    P: SyntheticPrimitive,
    T: CompatibilityTest<P>,
{
    let workflow_config = config.workflow.clone();
    let extractor = OracleExtractor::<P>::new(rig, config, args.noise, args.dropout, args.seed);
    let mut workflow = CalibrationWorkflow::new(log, extractor, test)
        .with_config(workflow_config)
        .with_cancel_token(cancel_token);

    workflow
        .events_mut()
        .subscribe(EventKind::TextProgress, |event: &Event<P>| {
            if let Event::TextProgress(msg) = event {
                println!("{msg}");
            }
        });

    let selected = (0..args.num_sensors).map(SensorId).collect::<Vec<_>>();
    let model = workflow.synchronize(&selected, sync_config)?;
    println!(
        "Synchronized {} sets with reference sensor {}",
        model.len(),
        model.reference()
    );

    match workflow.extract().and_then(|()| workflow.match_primitives()) {
        Ok(()) => {}
        Err(WorkflowError::Cancelled { completed_sets }) => {
            log::warn!("workflow cancelled in state {}", workflow.current_state());
            println!("Cancelled after {completed_sets} sync sets");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    }

    let solved = workflow.solve(&ResidualReport)?;
    for (sensor, pose) in solved {
        let truth = rig.true_poses.get(sensor).copied().unwrap_or_default();
        let error = transforms::norm(&transforms::sub(&pose.translation, &truth.translation));
        println!("sensor {sensor}: translation error of the guess {error:.4} m");
    }
    Ok(())
}
