use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::{
    camera::PinholeIntrinsics,
    error::StreamError,
    image::{GrayImage, RangeImage},
    pointcloud::PointCloud,
    sensor::{SensorId, Timestamp},
    transforms::Pose3,
};

/// A depth capture: intensity and range images with the camera model.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeScan {
    /// Intensity image, may be empty for depth-only sensors.
    pub intensity: GrayImage,
    /// Range image, depth along the optical axis in metres.
    pub range: RangeImage,
    /// Intrinsics of the camera the range image is registered to.
    pub intrinsics: PinholeIntrinsics,
    /// Initial guess of the sensor pose in the rig frame.
    pub sensor_pose: Pose3,
    /// Precomputed point cloud in the sensor frame, if any.
    pub cloud: Option<PointCloud>,
}

impl RangeScan {
    /// Creates a range scan, checking that both images agree in size.
    ///
    /// An empty intensity image is accepted.
    pub fn new(
        intensity: GrayImage,
        range: RangeImage,
        intrinsics: PinholeIntrinsics,
        sensor_pose: Pose3,
    ) -> Result<Self, StreamError> {
        if !intensity.is_empty() && intensity.dimensions() != range.dimensions() {
            return Err(StreamError::ImageSizeMismatch {
                intensity: intensity.dimensions(),
                range: range.dimensions(),
            });
        }
        Ok(Self {
            intensity,
            range,
            intrinsics,
            sensor_pose,
            cloud: None,
        })
    }

    /// Attaches a precomputed point cloud.
    pub fn with_cloud(mut self, cloud: PointCloud) -> Self {
        self.cloud = Some(cloud);
        self
    }

    /// Back-projects pixel `(u, v)`; `None` for missing or invalid depth.
    pub fn point_at(&self, u: usize, v: usize) -> Option<[f64; 3]> {
        let depth = *self.range.get(u, v)?;
        if !depth.is_finite() || depth <= 0.0 {
            return None;
        }
        Some(self.intrinsics.unproject(u as f64, v as f64, depth as f64))
    }

    /// Points of the scan in the sensor frame.
    ///
    /// Uses the precomputed cloud if present, otherwise back-projects every
    /// pixel with a valid depth in row major order.
    pub fn points(&self) -> Cow<'_, [[f64; 3]]> {
        if let Some(cloud) = &self.cloud {
            return Cow::Borrowed(cloud.points());
        }
        let (width, height) = self.range.dimensions();
        let points = (0..height)
            .flat_map(|v| (0..width).map(move |u| (u, v)))
            .filter_map(|(u, v)| self.point_at(u, v))
            .collect::<Vec<_>>();
        Cow::Owned(points)
    }
}

/// One capture of one sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Sensor that produced the observation.
    pub sensor: SensorId,
    /// Capture time.
    pub timestamp: Timestamp,
    /// Range scan payload.
    pub scan: RangeScan,
}

/// Payload kinds delivered by a log loader.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservationPayload {
    /// Registered intensity and range images.
    RangeScan(RangeScan),
    /// Intensity only image.
    Image(GrayImage),
    /// Any other record kind, identified by its name.
    Other {
        /// Record kind name as reported by the loader.
        kind: String,
    },
}

impl ObservationPayload {
    /// Short name of the payload kind.
    pub fn kind(&self) -> &str {
        match self {
            ObservationPayload::RangeScan(_) => "range_scan",
            ObservationPayload::Image(_) => "image",
            ObservationPayload::Other { kind } => kind,
        }
    }
}

/// A raw record as produced by an external log loader.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedObservation {
    /// Label of the sensor that produced the record.
    pub sensor_label: String,
    /// Capture time.
    pub timestamp: Timestamp,
    /// Payload of the record.
    pub payload: ObservationPayload,
}

/// Time-ordered observations of one sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationStream {
    sensor: SensorId,
    label: String,
    observations: Vec<Observation>,
}

impl ObservationStream {
    /// Creates a stream, checking ownership and timestamp ordering.
    pub fn new(
        sensor: SensorId,
        label: impl Into<String>,
        observations: Vec<Observation>,
    ) -> Result<Self, StreamError> {
        let mut stream = Self {
            sensor,
            label: label.into(),
            observations: Vec::with_capacity(observations.len()),
        };
        for observation in observations {
            stream.push(observation)?;
        }
        Ok(stream)
    }

    /// Appends an observation at the end of the stream.
    ///
    /// Timestamps must be non-decreasing.
    pub fn push(&mut self, observation: Observation) -> Result<(), StreamError> {
        if observation.sensor != self.sensor {
            return Err(StreamError::SensorMismatch {
                expected: self.sensor,
                found: observation.sensor,
            });
        }
        if let Some(last) = self.observations.last() {
            if observation.timestamp < last.timestamp {
                return Err(StreamError::Unordered {
                    sensor: self.sensor,
                    index: self.observations.len(),
                    timestamp: observation.timestamp,
                });
            }
        }
        self.observations.push(observation);
        Ok(())
    }

    /// Sensor owning the stream.
    #[inline]
    pub fn sensor(&self) -> SensorId {
        self.sensor
    }

    /// Human readable sensor label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of observations.
    #[inline]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// Check if the stream has no observations.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Get the observation at `index`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Observation> {
        self.observations.get(index)
    }

    /// All observations in timestamp order.
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Pose guess of the sensor, taken from its first observation.
    pub fn pose_guess(&self) -> Pose3 {
        self.observations
            .first()
            .map(|o| o.scan.sensor_pose)
            .unwrap_or_default()
    }
}

/// All ingested streams of a calibration session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationLog {
    labels: Vec<String>,
    streams: BTreeMap<SensorId, ObservationStream>,
    skipped: usize,
}

impl ObservationLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingests loader records into per-sensor streams.
    ///
    /// Sensor ids are assigned in first-appearance order of the labels of
    /// range scan records. Records with any other payload are skipped. Each
    /// stream is sorted by timestamp, keeping the record order among equal
    /// timestamps.
    pub fn from_records(records: impl IntoIterator<Item = RecordedObservation>) -> Self {
        let mut log = Self::new();
        let mut pending: BTreeMap<SensorId, Vec<Observation>> = BTreeMap::new();

        for record in records {
            let scan = match record.payload {
                ObservationPayload::RangeScan(scan) => scan,
                other => {
                    log::debug!(
                        "Skipping {} record of sensor {} at {}",
                        other.kind(),
                        record.sensor_label,
                        record.timestamp
                    );
                    log.skipped += 1;
                    continue;
                }
            };

            let sensor = log.intern_label(&record.sensor_label);
            pending.entry(sensor).or_default().push(Observation {
                sensor,
                timestamp: record.timestamp,
                scan,
            });
        }

        for (sensor, mut observations) in pending {
            observations.sort_by_key(|o| o.timestamp);
            let label = log.labels[sensor.index()].clone();
            log.streams.insert(
                sensor,
                ObservationStream {
                    sensor,
                    label,
                    observations,
                },
            );
        }

        log::info!(
            "Ingested {} sensor stream(s), skipped {} record(s)",
            log.streams.len(),
            log.skipped
        );

        log
    }

    /// Adds a stream for a new sensor label and returns its id.
    ///
    /// Observations are given as `(timestamp, scan)` and must be ordered.
    /// Adding observations under an existing label appends to its stream.
    pub fn add_stream(
        &mut self,
        label: &str,
        observations: impl IntoIterator<Item = (Timestamp, RangeScan)>,
    ) -> Result<SensorId, StreamError> {
        let sensor = self
            .sensor_id(label)
            .unwrap_or(SensorId(self.labels.len()));
        let observations = observations.into_iter().collect::<Vec<_>>();

        // validate everything before touching the log
        let existing = self.streams.get(&sensor);
        let offset = existing.map_or(0, ObservationStream::len);
        let mut last = existing
            .and_then(|s| s.observations.last())
            .map(|o| o.timestamp);
        for (i, (timestamp, _)) in observations.iter().enumerate() {
            if last.is_some_and(|t| *timestamp < t) {
                return Err(StreamError::Unordered {
                    sensor,
                    index: offset + i,
                    timestamp: *timestamp,
                });
            }
            last = Some(*timestamp);
        }

        let sensor = self.intern_label(label);
        let stream = self
            .streams
            .entry(sensor)
            .or_insert_with(|| ObservationStream {
                sensor,
                label: label.to_string(),
                observations: Vec::new(),
            });
        stream
            .observations
            .extend(observations.into_iter().map(|(timestamp, scan)| Observation {
                sensor,
                timestamp,
                scan,
            }));
        Ok(sensor)
    }

    fn intern_label(&mut self, label: &str) -> SensorId {
        match self.labels.iter().position(|l| l == label) {
            Some(index) => SensorId(index),
            None => {
                self.labels.push(label.to_string());
                SensorId(self.labels.len() - 1)
            }
        }
    }

    /// Looks up the id of a sensor label.
    pub fn sensor_id(&self, label: &str) -> Option<SensorId> {
        self.labels.iter().position(|l| l == label).map(SensorId)
    }

    /// Looks up the label of a sensor.
    pub fn label(&self, sensor: SensorId) -> Option<&str> {
        self.labels.get(sensor.index()).map(String::as_str)
    }

    /// Sensor ids in increasing order.
    pub fn sensors(&self) -> impl Iterator<Item = SensorId> + '_ {
        self.streams.keys().copied()
    }

    /// Number of sensor streams.
    pub fn num_sensors(&self) -> usize {
        self.streams.len()
    }

    /// The stream of a sensor.
    pub fn stream(&self, sensor: SensorId) -> Option<&ObservationStream> {
        self.streams.get(&sensor)
    }

    /// An observation by sensor and stream index.
    pub fn observation(&self, sensor: SensorId, index: usize) -> Option<&Observation> {
        self.streams.get(&sensor)?.get(index)
    }

    /// Number of records skipped during ingestion.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}
