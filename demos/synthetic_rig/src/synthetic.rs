use std::collections::BTreeMap;

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use rigcal::base::{
    transforms, ExtractionError, GrayImage, Line, LineSegmentationConfig, Observation,
    ObservationLog, PinholeIntrinsics, Plane, PlaneCoefficients, PlaneSegmentationConfig, Pose3,
    Primitive, PrimitiveExtractor, RangeImage, RangeScan, SensorId, StreamError, Timestamp,
};
use rigcal::matching::{LineCompatibility, PlaneCompatibility};
use rigcal::sync::ReferencePolicy;
use rigcal::{PoseSolver, SolverProblem, WorkflowConfig};

/// Settings loaded from the optional JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub reference: ReferencePolicy,
    pub line_matching: LineCompatibility,
    pub plane_matching: PlaneCompatibility,
    pub line_segmentation: LineSegmentationConfig,
    pub plane_segmentation: PlaneSegmentationConfig,
    pub workflow: WorkflowConfig,
}

/// A rig of sensors looking at the same static scene.
pub struct SyntheticRig {
    pub intrinsics: PinholeIntrinsics,
    pub true_poses: BTreeMap<SensorId, Pose3>,
    pub guesses: BTreeMap<SensorId, Pose3>,
}

impl SyntheticRig {
    pub fn new(num_sensors: usize, rng: &mut StdRng) -> Result<Self, &'static str> {
        let mut true_poses = BTreeMap::new();
        let mut guesses = BTreeMap::new();
        for s in 0..num_sensors {
            let pose = if s == 0 {
                Pose3::identity()
            } else {
                let axis = [
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                ];
                let t = [
                    rng.random_range(-0.3..0.3),
                    rng.random_range(-0.1..0.1),
                    rng.random_range(-0.1..0.1),
                ];
                Pose3::from_axis_angle(&axis, rng.random_range(0.05..0.25), t)?
            };

            // the guess is off by a few centimeters
            let offset = [
                rng.random_range(-0.02..0.02),
                rng.random_range(-0.02..0.02),
                rng.random_range(-0.02..0.02),
            ];
            let guess = Pose3::new(pose.rotation, transforms::add(&pose.translation, &offset));

            true_poses.insert(SensorId(s), pose);
            guesses.insert(SensorId(s), guess);
        }

        Ok(Self {
            intrinsics: PinholeIntrinsics::new(525.0, 525.0, 319.5, 239.5),
            true_poses,
            guesses,
        })
    }

    /// Records `num_frames` jittered captures per sensor at about 30 fps.
    pub fn record(
        &self,
        num_frames: usize,
        rng: &mut StdRng,
    ) -> Result<ObservationLog, StreamError> {
        let mut log = ObservationLog::new();
        for (sensor, guess) in &self.guesses {
            let start = rng.random_range(0..10u64);
            let observations = (0..num_frames as u64)
                .map(|k| {
                    let t = start + k * 33 + rng.random_range(0..8u64);
                    let scan = RangeScan {
                        intensity: GrayImage::empty(),
                        range: RangeImage::empty(),
                        intrinsics: self.intrinsics,
                        sensor_pose: *guess,
                        cloud: None,
                    };
                    (Timestamp::from_millis(t), scan)
                })
                .collect::<Vec<_>>();
            log.add_stream(&format!("rgbd_{}", sensor.index()), observations)?;
        }
        Ok(log)
    }
}

/// Primitives the oracle extractor knows how to render.
pub trait SyntheticPrimitive: Primitive {
    /// The scene, in the rig frame.
    fn scene() -> Vec<Self>;

    /// Adds measurement noise.
    fn perturbed(&self, rng: &mut StdRng, noise: f64) -> Self;

    /// The part of the primitive a sensor can see, in the sensor frame.
    fn observed(&self, intrinsics: &PinholeIntrinsics, config: &DemoConfig) -> Option<Self>;

    /// Misalignment of two primitives in a common frame.
    fn residual(a: &Self, b: &Self) -> f64;
}

fn jitter(rng: &mut StdRng, noise: f64) -> [f64; 3] {
    [
        rng.random_range(-noise..=noise),
        rng.random_range(-noise..=noise),
        rng.random_range(-noise..=noise),
    ]
}

impl SyntheticPrimitive for Line {
    fn scene() -> Vec<Self> {
        [
            [[-1.0, -0.5, 3.0], [1.0, -0.5, 3.0]],
            [[0.8, -1.0, 2.5], [0.8, 1.0, 2.5]],
            [[-0.6, 0.4, 2.0], [-0.6, 0.4, 4.0]],
            [[-1.0, 0.8, 3.5], [1.0, -0.2, 3.5]],
        ]
        .into_iter()
        .map(|endpoints| Line::new([[0.0; 2]; 2], endpoints))
        .collect()
    }

    fn perturbed(&self, rng: &mut StdRng, noise: f64) -> Self {
        let [a, b] = self.endpoints;
        Line::new(
            self.image_endpoints,
            [
                transforms::add(&a, &jitter(rng, noise)),
                transforms::add(&b, &jitter(rng, noise)),
            ],
        )
    }

    fn observed(&self, intrinsics: &PinholeIntrinsics, config: &DemoConfig) -> Option<Self> {
        let max_depth = config.line_segmentation.max_depth;
        if self.endpoints.iter().any(|p| p[2] > max_depth) {
            return None;
        }
        let a = intrinsics.project(&self.endpoints[0])?;
        let b = intrinsics.project(&self.endpoints[1])?;
        let pixels = ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt();
        if pixels < config.line_segmentation.min_segment_length {
            return None;
        }
        Some(Line::new([a, b], self.endpoints))
    }

    fn residual(a: &Self, b: &Self) -> f64 {
        LineCompatibility::residuals(a, b).map_or(f64::INFINITY, |(_, offset)| offset)
    }
}

// Regular grid of points on a plane patch.
fn patch(origin: [f64; 3], u: [f64; 3], v: [f64; 3], n: usize) -> Vec<[f64; 3]> {
    let mut points = Vec::with_capacity(n * n);
    for i in 0..n {
        for j in 0..n {
            let su = i as f64 / (n - 1) as f64;
            let sv = j as f64 / (n - 1) as f64;
            let p = transforms::add(
                &origin,
                &transforms::add(&transforms::scale(&u, su), &transforms::scale(&v, sv)),
            );
            points.push(p);
        }
    }
    points
}

impl SyntheticPrimitive for Plane {
    fn scene() -> Vec<Self> {
        [
            // floor
            ([-1.5, 1.0, 1.5], [3.0, 0.0, 0.0], [0.0, 0.0, 2.5], [0.0, 1.0, 0.0]),
            // back wall
            ([-1.5, -1.0, 4.0], [3.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 1.0]),
            // side wall
            ([-1.5, -1.0, 1.5], [0.0, 2.0, 0.0], [0.0, 0.0, 2.5], [1.0, 0.0, 0.0]),
        ]
        .into_iter()
        .filter_map(|(origin, u, v, normal)| {
            let coefficients = PlaneCoefficients::from_point_normal(&origin, &normal)?;
            Some(Plane::new(patch(origin, u, v, 12), coefficients))
        })
        .collect()
    }

    fn perturbed(&self, rng: &mut StdRng, noise: f64) -> Self {
        let c = self.coefficients;
        let n = transforms::add(&c.normal, &jitter(rng, noise));
        let offset = c.offset + rng.random_range(-noise..=noise);
        let coefficients =
            PlaneCoefficients::from_array([n[0], n[1], n[2], offset]).unwrap_or(c);
        Plane::new(self.inliers.clone(), coefficients)
    }

    fn observed(&self, _: &PinholeIntrinsics, config: &DemoConfig) -> Option<Self> {
        let visible = self
            .inliers
            .iter()
            .filter(|p| p[2] > 0.0)
            .copied()
            .collect::<Vec<_>>();
        let min_inliers = config.plane_segmentation.min_inliers(self.inliers.len()).max(3);
        if visible.len() < min_inliers {
            return None;
        }
        Some(Plane::new(visible, self.coefficients))
    }

    fn residual(a: &Self, b: &Self) -> f64 {
        PlaneCompatibility::residuals(a, b).1
    }
}

/// Renders the scene as each sensor would see it.
///
/// Noise is seeded per observation so results do not depend on the order
/// observations are extracted in.
pub struct OracleExtractor<P> {
    scene: Vec<P>,
    true_poses: BTreeMap<SensorId, Pose3>,
    intrinsics: PinholeIntrinsics,
    config: DemoConfig,
    noise: f64,
    dropout: f64,
    seed: u64,
}

impl<P: SyntheticPrimitive> OracleExtractor<P> {
    pub fn new(
        rig: &SyntheticRig,
        config: DemoConfig,
        noise: f64,
        dropout: f64,
        seed: u64,
    ) -> Self {
        Self {
            scene: P::scene(),
            true_poses: rig.true_poses.clone(),
            intrinsics: rig.intrinsics,
            config,
            noise,
            dropout,
            seed,
        }
    }
}

impl<P: SyntheticPrimitive> PrimitiveExtractor for OracleExtractor<P> {
    type Primitive = P;

    fn extract(&self, observation: &Observation) -> Result<Vec<P>, ExtractionError> {
        let pose = self
            .true_poses
            .get(&observation.sensor)
            .ok_or(ExtractionError::MissingData("sensor pose"))?;
        let sensor_bits = (observation.sensor.index() as u64) << 48;
        let mut rng =
            StdRng::seed_from_u64(self.seed ^ sensor_bits ^ observation.timestamp.as_nanos());
        if rng.random_bool(self.dropout.clamp(0.0, 1.0)) {
            return Err(ExtractionError::NoUsableResult(
                "simulated segmentation failure".to_string(),
            ));
        }

        let world_to_sensor = pose.inverse();
        Ok(self
            .scene
            .iter()
            .filter_map(|p| {
                p.transformed(&world_to_sensor)
                    .observed(&self.intrinsics, &self.config)
            })
            .map(|p| p.perturbed(&mut rng, self.noise))
            .collect())
    }
}

/// Keeps the pose guesses and reports the residual misalignment per pair.
pub struct ResidualReport;

impl<P: SyntheticPrimitive> PoseSolver<P> for ResidualReport {
    fn solve(
        &self,
        problem: &SolverProblem<'_, P>,
    ) -> Result<BTreeMap<SensorId, Pose3>, Box<dyn std::error::Error + Send + Sync>> {
        if problem.num_matches() == 0 {
            return Err("no matched primitives to solve from".into());
        }
        for (pair, matches) in &problem.pairs {
            if matches.is_empty() {
                log::debug!("sensors {} and {}: no matches", pair.first(), pair.second());
                continue;
            }
            let pose_a = problem.poses.get(&pair.first()).copied().unwrap_or_default();
            let pose_b = problem.poses.get(&pair.second()).copied().unwrap_or_default();
            let total = matches
                .iter()
                .map(|(a, b)| {
                    P::residual(
                        &a.primitive.transformed(&pose_a),
                        &b.primitive.transformed(&pose_b),
                    )
                })
                .sum::<f64>();
            println!(
                "sensors {} and {}: {} matches, mean residual {:.4} m",
                pair.first(),
                pair.second(),
                matches.len(),
                total / matches.len() as f64
            );
        }
        Ok(problem.poses.clone())
    }
}
