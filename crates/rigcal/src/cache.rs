use std::collections::BTreeMap;

use rigcal_core::{Detection, SensorId};
use rigcal_sync::SyncModel;

/// Extracted primitives addressed by `[sensor][local sync index]`.
///
/// A slot is `None` until the extraction of its observation completed. A
/// completed extraction that found nothing is an empty list.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveCache<P> {
    slots: BTreeMap<SensorId, Vec<Option<Vec<Detection<P>>>>>,
}

impl<P> Default for PrimitiveCache<P> {
    fn default() -> Self {
        Self {
            slots: BTreeMap::new(),
        }
    }
}

impl<P> PrimitiveCache<P> {
    /// Creates an empty cache shaped after the synchronized observations of a
    /// model.
    pub fn for_model(model: &SyncModel) -> Self {
        let slots = model
            .sensors()
            .iter()
            .map(|sensor| {
                let len = model.sync_indices(*sensor).len();
                (*sensor, (0..len).map(|_| None).collect())
            })
            .collect();
        Self { slots }
    }

    /// Stores the primitives of a slot, returning the previous content.
    pub fn insert(
        &mut self,
        sensor: SensorId,
        sync_index: usize,
        detections: Vec<Detection<P>>,
    ) -> Option<Vec<Detection<P>>> {
        let slots = self.slots.entry(sensor).or_default();
        if slots.len() <= sync_index {
            slots.resize_with(sync_index + 1, || None);
        }
        slots[sync_index].replace(detections)
    }

    /// Primitives of a slot, `None` if it was not extracted.
    pub fn get(&self, sensor: SensorId, sync_index: usize) -> Option<&[Detection<P>]> {
        self.slots
            .get(&sensor)?
            .get(sync_index)?
            .as_deref()
    }

    /// Check if the slot was extracted.
    pub fn is_extracted(&self, sensor: SensorId, sync_index: usize) -> bool {
        self.get(sensor, sync_index).is_some()
    }

    /// Number of slots of a sensor.
    pub fn num_slots(&self, sensor: SensorId) -> usize {
        self.slots.get(&sensor).map_or(0, Vec::len)
    }

    /// Total number of primitives cached for a sensor.
    pub fn total(&self, sensor: SensorId) -> usize {
        self.slots
            .get(&sensor)
            .map_or(0, |slots| slots.iter().flatten().map(Vec::len).sum())
    }

    /// Extracted slots as `(sensor, sync index, primitives)`.
    pub fn iter(&self) -> impl Iterator<Item = (SensorId, usize, &[Detection<P>])> + '_ {
        self.slots.iter().flat_map(|(sensor, slots)| {
            slots
                .iter()
                .enumerate()
                .filter_map(move |(i, slot)| slot.as_deref().map(|d| (*sensor, i, d)))
        })
    }

    /// Empties every slot, keeping the shape.
    pub fn clear(&mut self) {
        self.slots
            .values_mut()
            .flat_map(|slots| slots.iter_mut())
            .for_each(|slot| *slot = None);
    }
}
