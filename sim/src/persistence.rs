//! Saved belt state.
//!
//! Records are plain serde structs encoded as JSON. Decoding never fails on
//! a bad field: anything missing or of the wrong shape falls back to its
//! default, and restoring clamps every number back into range.

use crate::grid::{Facing, GridPos};
use crate::item::{ItemId, ItemKind};
use crate::queue::{ItemQueue, QueuedItem};
use crate::scheduler::StepBudget;
use crate::segment::{Segment, SegmentConfig};
use crate::splitter::Splitter;
use crate::storage::Chest;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

/// Decode `T`, or its default if the value has the wrong shape.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Decode a list, skipping elements that do not decode.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let serde_json::Value::Array(elements) = value else {
        return Ok(Vec::new());
    };
    Ok(elements
        .into_iter()
        .filter_map(|element| serde_json::from_value(element).ok())
        .collect())
}

/// One occupied slot. `id == 0` means the id was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotRecord {
    #[serde(deserialize_with = "lenient")]
    pub kind: u32,
    #[serde(deserialize_with = "lenient")]
    pub count: u32,
    #[serde(deserialize_with = "lenient")]
    pub position: i64,
    #[serde(deserialize_with = "lenient")]
    pub id: u64,
}

impl SlotRecord {
    fn capture(item: &QueuedItem) -> Self {
        Self {
            kind: item.kind.0,
            count: item.count,
            position: item.position as i64,
            id: item.id.map_or(0, |id| id.0),
        }
    }

    pub fn restore(&self, capacity: usize) -> QueuedItem {
        let last = capacity.max(1) - 1;
        QueuedItem {
            kind: ItemKind(self.kind),
            count: self.count,
            id: (self.id > 0).then_some(ItemId(self.id)),
            position: self.position.clamp(0, last as i64) as usize,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentRecord {
    #[serde(deserialize_with = "lenient")]
    pub config: SegmentConfig,
    #[serde(deserialize_with = "lenient")]
    pub capacity: usize,
    #[serde(deserialize_with = "lenient")]
    pub length_units: usize,
    /// Head first.
    #[serde(deserialize_with = "lenient_list")]
    pub slots: Vec<SlotRecord>,
    #[serde(deserialize_with = "lenient")]
    pub step_accumulator: f64,
    #[serde(deserialize_with = "lenient")]
    pub revision: u64,
}

impl SegmentRecord {
    pub fn capture(segment: &Segment) -> Self {
        Self {
            config: segment.config.clone(),
            capacity: segment.capacity(),
            length_units: segment.length_units,
            slots: segment.queue.items().iter().map(SlotRecord::capture).collect(),
            step_accumulator: segment.budget.accumulator(),
            revision: segment.revision,
        }
    }

    /// Saved capacity, at least 1.
    pub fn clamped_capacity(&self) -> usize {
        self.capacity.max(1)
    }

    pub fn clamped_length_units(&self) -> usize {
        self.length_units.max(1)
    }

    /// Queue as saved, clamped into the saved capacity. Entries beyond it
    /// are returned separately.
    pub fn restore_queue(&self) -> (ItemQueue, Vec<QueuedItem>) {
        let capacity = self.clamped_capacity();
        let items = self.slots.iter().map(|slot| slot.restore(capacity)).collect();
        ItemQueue::restore(capacity, items)
    }

    /// Rebuild a segment at `pos`.
    ///
    /// Capacity is re-derived from the configuration; saved items are
    /// remapped into it if the two disagree. Everything that no longer
    /// fits is returned for the host to drop.
    pub fn restore(&self, pos: GridPos, budget_cap: f64) -> (Segment, Vec<QueuedItem>) {
        let mut config = self.config.clone();
        config.travel_ticks_per_unit = config.travel_ticks();

        let (queue, mut overflow) = self.restore_queue();
        let mut segment = Segment::new(pos, config, 0);
        let derived = segment.capacity();
        segment.queue = queue;
        segment.queue.resize(derived, |item| overflow.push(item));
        segment.budget = StepBudget::restored(self.step_accumulator, budget_cap);
        segment.revision = self.revision;
        (segment, overflow)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedSegment {
    pub pos: GridPos,
    pub record: SegmentRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedChest {
    pub pos: GridPos,
    pub chest: Chest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitterRecord {
    pub pos: GridPos,
    pub input: Facing,
    #[serde(default, deserialize_with = "lenient")]
    pub buffer: Option<ItemKind>,
    #[serde(default, deserialize_with = "lenient")]
    pub next_output: i64,
}

impl SplitterRecord {
    pub fn capture(splitter: &Splitter) -> Self {
        Self {
            pos: splitter.pos,
            input: splitter.input,
            buffer: splitter.buffer,
            next_output: splitter.next_output() as i64,
        }
    }

    pub fn restore(&self) -> Splitter {
        Splitter::restored(self.pos, self.input, self.buffer, self.next_output)
    }
}

/// Everything needed to rebuild a world.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldRecord {
    #[serde(deserialize_with = "lenient")]
    pub tick: u64,
    #[serde(deserialize_with = "lenient")]
    pub next_item_id: u64,
    #[serde(deserialize_with = "lenient_list")]
    pub segments: Vec<PlacedSegment>,
    #[serde(deserialize_with = "lenient_list")]
    pub chests: Vec<PlacedChest>,
    #[serde(deserialize_with = "lenient_list")]
    pub splitters: Vec<SplitterRecord>,
}

impl WorldRecord {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ItemIdAllocator, ItemUnit};
    use crate::segment::CapacityRule;

    fn sample_segment() -> Segment {
        let ids = ItemIdAllocator::default();
        let mut segment = Segment::new(
            GridPos::new(2, 0, 3),
            SegmentConfig::straight(Facing::South).with_slots(4).with_travel_ticks(12),
            0,
        );
        for kind in [ItemKind(1), ItemKind(2)] {
            segment
                .queue
                .try_enqueue_at_tail(ItemUnit { kind, id: ids.allocate() })
                .unwrap();
            segment.queue.advance_one_step();
        }
        segment.budget = StepBudget::restored(2.75, 64.0);
        segment.revision = 9;
        segment
    }

    #[test]
    fn test_record_round_trip() {
        let segment = sample_segment();
        let record = SegmentRecord::capture(&segment);
        let decoded = SegmentRecord::from_json(&record.to_json().unwrap()).unwrap();
        assert_eq!(decoded, record);

        let (restored, overflow) = decoded.restore(segment.pos, 64.0);
        assert!(overflow.is_empty());
        assert_eq!(restored.queue, segment.queue);
        assert_eq!(restored.budget.accumulator(), 2.75);
        assert_eq!(restored.revision, 9);
        assert_eq!(SegmentRecord::capture(&restored), record);
    }

    #[test]
    fn test_missing_fields_default() {
        let record = SegmentRecord::from_json("{}").unwrap();
        assert_eq!(record, SegmentRecord::default());
        let (segment, overflow) = record.restore(GridPos::default(), 64.0);
        assert!(overflow.is_empty());
        assert!(segment.queue.is_empty());
        assert_eq!(segment.config, SegmentConfig::default());
    }

    #[test]
    fn test_malformed_fields_default() {
        let json = r#"{
            "capacity": "lots",
            "step_accumulator": -12.5,
            "revision": -3,
            "slots": [
                { "kind": 4, "count": 1, "position": 99, "id": 7 },
                "garbage",
                { "kind": 5, "count": 1, "position": -1, "id": "x" }
            ]
        }"#;
        let record = SegmentRecord::from_json(json).unwrap();
        assert_eq!(record.capacity, 0);
        assert_eq!(record.revision, 0);
        assert_eq!(record.slots.len(), 2);
        assert_eq!(record.slots[1].id, 0);

        let (segment, overflow) = record.restore(GridPos::default(), 64.0);
        assert_eq!(segment.budget.accumulator(), 0.0);
        // Saved capacity clamps to 1, so only one slot survives before the
        // remap into the derived 5 slots.
        assert_eq!(overflow.len(), 1);
        let positions: Vec<usize> = segment.queue.items().iter().map(|i| i.position).collect();
        assert_eq!(positions, vec![2]);
    }

    #[test]
    fn test_capacity_mismatch_remaps() {
        let mut record = SegmentRecord::capture(&sample_segment());
        record.config.capacity = CapacityRule::Fixed(2);
        let (segment, overflow) = record.restore(GridPos::default(), 64.0);
        assert_eq!(segment.capacity(), 2);
        assert_eq!(segment.queue.len() + overflow.len(), 2);
    }

    #[test]
    fn test_accumulator_clamped_to_cap() {
        let mut record = SegmentRecord::capture(&sample_segment());
        record.step_accumulator = 1e9;
        let (segment, _) = record.restore(GridPos::default(), 64.0);
        assert_eq!(segment.budget.accumulator(), 64.0);
    }

    #[test]
    fn test_splitter_record_wraps_cursor() {
        let record = SplitterRecord {
            pos: GridPos::default(),
            input: Facing::East,
            buffer: Some(ItemKind(3)),
            next_output: 5,
        };
        let splitter = record.restore();
        assert_eq!(splitter.next_output(), 2);
        assert_eq!(SplitterRecord::capture(&splitter).next_output, 2);
    }
}
