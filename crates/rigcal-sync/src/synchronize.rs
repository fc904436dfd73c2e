use std::collections::BTreeMap;
use std::time::Duration;

use rigcal_core::{Observation, ObservationLog, SensorId, Timestamp};

use crate::{
    config::{ReferencePolicy, SyncConfig},
    error::SyncError,
    model::{SyncMember, SyncModel, SyncSet, SyncSetId},
};

/// Groups the streams of the selected sensors into sync sets.
///
/// The reference sensor stream is walked in timestamp order. For every
/// reference observation each other sensor contributes its nearest
/// unconsumed observation within `config.delay`, ties going to the earliest
/// one, or leaves its slot empty. Consumption only moves forward, so an
/// observation is bound to at most one set.
///
/// # Arguments
///
/// * `log` - The ingested observation streams.
/// * `selected` - Sensors to synchronize. Duplicates are ignored, order is
///   kept and decides the reference under [`ReferencePolicy::First`].
/// * `config` - Delay tolerance, reference policy and set cap.
///
/// # Errors
///
/// [`SyncError::InsufficientSensors`] with fewer than two distinct sensors,
/// [`SyncError::UnknownSensor`] if a sensor has no stream.
pub fn synchronize(
    log: &ObservationLog,
    selected: &[SensorId],
    config: &SyncConfig,
) -> Result<SyncModel, SyncError> {
    let mut sensors: Vec<SensorId> = Vec::with_capacity(selected.len());
    for sensor in selected {
        if !sensors.contains(sensor) {
            sensors.push(*sensor);
        }
    }

    if sensors.len() < 2 {
        return Err(SyncError::InsufficientSensors {
            selected: sensors.len(),
        });
    }

    let streams = sensors
        .iter()
        .map(|sensor| {
            log.stream(*sensor)
                .map(|s| s.observations())
                .ok_or(SyncError::UnknownSensor(*sensor))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let reference_pos = match config.reference {
        ReferencePolicy::First => 0,
        ReferencePolicy::Sparsest => {
            let mut best = 0;
            for (pos, stream) in streams.iter().enumerate() {
                if stream.len() < streams[best].len() {
                    best = pos;
                }
            }
            best
        }
    };
    let reference = sensors[reference_pos];

    let mut cursors = vec![0usize; sensors.len()];
    let mut sync_indices: BTreeMap<SensorId, Vec<usize>> =
        sensors.iter().map(|s| (*s, Vec::new())).collect();
    let mut sets = Vec::new();

    for (reference_index, reference_obs) in streams[reference_pos].iter().enumerate() {
        if config.max_sets.is_some_and(|max| sets.len() >= max) {
            log::debug!("Reached the cap of {} sync set(s)", sets.len());
            break;
        }

        let reference_time = reference_obs.timestamp;
        let mut members = BTreeMap::new();

        for (pos, stream) in streams.iter().enumerate() {
            let index = match pos == reference_pos {
                true => Some(reference_index),
                false => bind_nearest(stream, &mut cursors[pos], reference_time, config.delay),
            };
            let Some(index) = index else {
                continue;
            };

            let bound = sync_indices.entry(sensors[pos]).or_default();
            members.insert(
                sensors[pos],
                SyncMember {
                    observation: index,
                    sync_index: bound.len(),
                    timestamp: stream[index].timestamp,
                },
            );
            bound.push(index);
        }

        sets.push(SyncSet::new(SyncSetId(sets.len()), reference_time, members));
    }

    for (sensor, bound) in &sync_indices {
        log::debug!("Sensor {} bound {} observation(s)", sensor, bound.len());
    }
    log::info!(
        "Synchronized {} sensor(s) into {} set(s), reference {} with delay {:?}",
        sensors.len(),
        sets.len(),
        reference,
        config.delay
    );

    let poses = sensors
        .iter()
        .filter_map(|s| log.stream(*s).map(|stream| (*s, stream.pose_guess())))
        .collect();

    Ok(SyncModel::new(
        sensors,
        reference,
        config.delay,
        sets,
        sync_indices,
        poses,
    ))
}

/// Binds the nearest unconsumed observation to `reference_time`.
///
/// Observations older than the window are skipped for good since reference
/// timestamps never decrease.
fn bind_nearest(
    observations: &[Observation],
    cursor: &mut usize,
    reference_time: Timestamp,
    delay: Duration,
) -> Option<usize> {
    while let Some(obs) = observations.get(*cursor) {
        if obs.timestamp >= reference_time || obs.timestamp.abs_diff(reference_time) <= delay {
            break;
        }
        *cursor += 1;
    }

    let mut best: Option<(usize, Duration)> = None;
    for (index, obs) in observations.iter().enumerate().skip(*cursor) {
        let diff = obs.timestamp.abs_diff(reference_time);
        if obs.timestamp > reference_time && diff > delay {
            break;
        }
        if best.map_or(true, |(_, best_diff)| diff < best_diff) {
            best = Some((index, diff));
        }
    }

    let (index, _) = best?;
    *cursor = index + 1;
    Some(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use rigcal_core::{GrayImage, PinholeIntrinsics, Pose3, RangeImage, RangeScan};

    fn scan() -> RangeScan {
        RangeScan {
            intensity: GrayImage::empty(),
            range: RangeImage::empty(),
            intrinsics: PinholeIntrinsics::new(1.0, 1.0, 0.0, 0.0),
            sensor_pose: Pose3::identity(),
            cloud: None,
        }
    }

    fn log_from_millis(streams: &[(&str, &[u64])]) -> ObservationLog {
        let mut log = ObservationLog::new();
        for (label, times) in streams {
            log.add_stream(
                label,
                times.iter().map(|t| (Timestamp::from_millis(*t), scan())),
            )
            .expect("ordered stream");
        }
        log
    }

    fn random_log(seed: u64, num_sensors: usize, len: usize) -> ObservationLog {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut log = ObservationLog::new();
        for s in 0..num_sensors {
            let mut t = rng.random_range(0..50u64);
            let mut obs = Vec::with_capacity(len);
            for _ in 0..len {
                t += rng.random_range(5..60u64);
                obs.push((Timestamp::from_millis(t), scan()));
            }
            log.add_stream(&format!("sensor_{s}"), obs)
                .expect("ordered stream");
        }
        log
    }

    fn members_millis(set: &SyncSet) -> Vec<(usize, u64)> {
        set.members()
            .iter()
            .map(|(s, m)| (s.index(), m.timestamp.as_nanos() / 1_000_000))
            .collect()
    }

    #[test]
    fn test_two_sensor_scenario() -> Result<(), Box<dyn std::error::Error>> {
        let log = log_from_millis(&[("a", &[0, 100, 200]), ("b", &[5, 105, 310])]);
        let config = SyncConfig::with_delay(Duration::from_millis(20));
        let model = synchronize(&log, &[SensorId(0), SensorId(1)], &config)?;

        assert_eq!(model.len(), 3);
        assert_eq!(model.reference(), SensorId(0));
        let ids = model.sets().iter().map(|s| s.id()).collect::<Vec<_>>();
        assert_eq!(ids, vec![SyncSetId(0), SyncSetId(1), SyncSetId(2)]);

        assert_eq!(members_millis(&model.sets()[0]), vec![(0, 0), (1, 5)]);
        assert_eq!(members_millis(&model.sets()[1]), vec![(0, 100), (1, 105)]);
        assert_eq!(members_millis(&model.sets()[2]), vec![(0, 200)]);

        assert_eq!(model.sync_indices(SensorId(1)), &[0, 1]);
        assert_eq!(model.sync_index(SyncSetId(1), SensorId(1)), Some(1));
        assert_eq!(model.sync_index(SyncSetId(2), SensorId(1)), None);
        assert_eq!(model.sets()[0].spread(), Duration::from_millis(5));
        Ok(())
    }

    #[test]
    fn test_insufficient_sensors() {
        let log = log_from_millis(&[("a", &[0, 100]), ("b", &[0, 100])]);
        let config = SyncConfig::default();

        assert_eq!(
            synchronize(&log, &[], &config),
            Err(SyncError::InsufficientSensors { selected: 0 })
        );
        assert_eq!(
            synchronize(&log, &[SensorId(1)], &config),
            Err(SyncError::InsufficientSensors { selected: 1 })
        );
        assert_eq!(
            synchronize(&log, &[SensorId(1), SensorId(1)], &config),
            Err(SyncError::InsufficientSensors { selected: 1 })
        );
    }

    #[test]
    fn test_unknown_sensor() {
        let log = log_from_millis(&[("a", &[0]), ("b", &[0])]);
        let res = synchronize(&log, &[SensorId(0), SensorId(7)], &SyncConfig::default());
        assert_eq!(res, Err(SyncError::UnknownSensor(SensorId(7))));
    }

    #[test]
    fn test_tie_picks_earliest() -> Result<(), Box<dyn std::error::Error>> {
        let log = log_from_millis(&[("a", &[100]), ("b", &[90, 110])]);
        let config = SyncConfig::with_delay(Duration::from_millis(10));
        let model = synchronize(&log, &[SensorId(0), SensorId(1)], &config)?;
        assert_eq!(model.sets()[0].get(SensorId(1)).map(|m| m.observation), Some(0));
        Ok(())
    }

    #[test]
    fn test_nearest_within_window() -> Result<(), Box<dyn std::error::Error>> {
        let log = log_from_millis(&[("a", &[100, 120]), ("b", &[85, 98, 112])]);
        let config = SyncConfig::with_delay(Duration::from_millis(20));
        let model = synchronize(&log, &[SensorId(0), SensorId(1)], &config)?;

        // 98 is nearer to 100 than 85; 85 is left behind for good
        assert_eq!(members_millis(&model.sets()[0]), vec![(0, 100), (1, 98)]);
        assert_eq!(members_millis(&model.sets()[1]), vec![(0, 120), (1, 112)]);
        Ok(())
    }

    #[test]
    fn test_exhausted_stream_leaves_empty_slots() -> Result<(), Box<dyn std::error::Error>> {
        let log = log_from_millis(&[("a", &[0, 10, 20, 30]), ("b", &[1]), ("c", &[2, 12, 22, 32])]);
        let config = SyncConfig::with_delay(Duration::from_millis(5));
        let model = synchronize(&log, &[SensorId(0), SensorId(1), SensorId(2)], &config)?;

        assert_eq!(model.len(), 4);
        assert_eq!(model.sets()[0].len(), 3);
        for set in &model.sets()[1..] {
            assert!(!set.contains(SensorId(1)));
            assert!(set.contains(SensorId(2)));
        }
        Ok(())
    }

    #[test]
    fn test_sparsest_reference() -> Result<(), Box<dyn std::error::Error>> {
        let log = log_from_millis(&[("a", &[0, 10, 20, 30, 40]), ("b", &[11, 31])]);
        let config =
            SyncConfig::with_delay(Duration::from_millis(3)).reference(ReferencePolicy::Sparsest);
        let model = synchronize(&log, &[SensorId(0), SensorId(1)], &config)?;

        assert_eq!(model.reference(), SensorId(1));
        assert_eq!(model.len(), 2);
        assert_eq!(members_millis(&model.sets()[0]), vec![(0, 10), (1, 11)]);
        assert_eq!(members_millis(&model.sets()[1]), vec![(0, 30), (1, 31)]);
        Ok(())
    }

    #[test]
    fn test_max_sets_cap() -> Result<(), Box<dyn std::error::Error>> {
        let log = random_log(7, 3, 40);
        let config = SyncConfig::with_delay(Duration::from_millis(15)).max_sets(15);
        let model = synchronize(&log, &[SensorId(0), SensorId(1), SensorId(2)], &config)?;
        assert_eq!(model.len(), 15);
        Ok(())
    }

    #[test]
    fn test_no_observation_reuse() -> Result<(), Box<dyn std::error::Error>> {
        for seed in 0..20 {
            let log = random_log(seed, 4, 60);
            let selected = [SensorId(2), SensorId(0), SensorId(3), SensorId(1)];
            let config = SyncConfig::with_delay(Duration::from_millis(25));
            let model = synchronize(&log, &selected, &config)?;

            for sensor in selected {
                let indices = model.sync_indices(sensor);
                assert!(indices.windows(2).all(|w| w[0] < w[1]));

                let from_sets = model
                    .sets()
                    .iter()
                    .filter_map(|set| set.get(sensor))
                    .enumerate()
                    .map(|(local, m)| {
                        assert_eq!(m.sync_index, local);
                        m.observation
                    })
                    .collect::<Vec<_>>();
                assert_eq!(from_sets, indices);
            }

            for set in model.sets() {
                assert!(set.spread() <= config.delay);
                assert!(set.contains(model.reference()));
            }

            let times = model
                .sets()
                .iter()
                .map(|s| s.reference_timestamp())
                .collect::<Vec<_>>();
            assert!(times.windows(2).all(|w| w[0] <= w[1]));
        }
        Ok(())
    }

    #[test]
    fn test_deterministic() -> Result<(), Box<dyn std::error::Error>> {
        let log = random_log(42, 3, 100);
        let selected = [SensorId(1), SensorId(0), SensorId(2)];
        let config = SyncConfig::with_delay(Duration::from_millis(20));
        let first = synchronize(&log, &selected, &config)?;
        for _ in 0..5 {
            assert_eq!(synchronize(&log, &selected, &config)?, first);
        }
        Ok(())
    }
}
