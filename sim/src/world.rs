//! Serializable views of the authoritative world.
//!
//! [`WorldSnapshot`] is a flat read-only view for debugging and tooling.
//! [`capture_record`] builds the [`WorldRecord`] used for saving.

use crate::grid::GridPos;
use crate::host::{CellIndex, DroppedItems, WorldTick};
use crate::item::ItemIdAllocator;
use crate::persistence::{PlacedChest, PlacedSegment, SegmentRecord, SplitterRecord, WorldRecord};
use crate::segment::Segment;
use crate::splitter::Splitter;
use crate::storage::Chest;
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

/// One item as shown in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemView {
    pub id: Option<u64>,
    pub kind: u32,
    pub count: u32,
    pub position: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentView {
    pub pos: GridPos,
    pub output_target: GridPos,
    pub capacity: usize,
    pub length_units: usize,
    pub travel_ticks_per_unit: u32,
    pub revision: u64,
    pub step_accumulator: f64,
    /// Head first.
    pub items: Vec<ItemView>,
}

impl SegmentView {
    fn of(segment: &Segment) -> Self {
        Self {
            pos: segment.pos,
            output_target: segment.output_target(),
            capacity: segment.capacity(),
            length_units: segment.length_units,
            travel_ticks_per_unit: segment.config.travel_ticks(),
            revision: segment.revision,
            step_accumulator: segment.budget.accumulator(),
            items: segment
                .queue
                .items()
                .iter()
                .map(|item| ItemView {
                    id: item.id.map(|id| id.0),
                    kind: item.kind.0,
                    count: item.count,
                    position: item.position,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChestView {
    pub pos: GridPos,
    pub total: u32,
}

/// Complete belt state at one tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub tick: u64,
    /// Sorted by host cell.
    pub segments: Vec<SegmentView>,
    pub chests: Vec<ChestView>,
    /// Loose items waiting for the host to collect them.
    pub dropped: usize,
}

impl WorldSnapshot {
    pub fn from_world(world: &mut World) -> Self {
        let tick = world.get_resource::<WorldTick>().map_or(0, |tick| tick.0);

        let mut segments: Vec<SegmentView> = world
            .query::<&Segment>()
            .iter(world)
            .map(SegmentView::of)
            .collect();
        segments.sort_by_key(|view| view.pos);

        let cells = world
            .get_resource::<CellIndex>()
            .map(CellIndex::device_cells)
            .unwrap_or_default();
        let chests = cells
            .into_iter()
            .filter_map(|pos| {
                let entity = world.get_resource::<CellIndex>()?.device_entity(pos)?;
                let chest = world.get::<Chest>(entity)?;
                Some(ChestView {
                    pos,
                    total: chest.total(),
                })
            })
            .collect();

        let dropped = world.get_resource::<DroppedItems>().map_or(0, |d| d.0.len());
        Self {
            tick,
            segments,
            chests,
            dropped,
        }
    }

    pub fn segment(&self, pos: GridPos) -> Option<&SegmentView> {
        self.segments.iter().find(|view| view.pos == pos)
    }

    pub fn item_count(&self) -> usize {
        self.segments.iter().map(|view| view.items.len()).sum()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Everything needed to rebuild `world` later.
pub fn capture_record(world: &mut World) -> WorldRecord {
    let tick = world.get_resource::<WorldTick>().map_or(0, |tick| tick.0);
    let next_item_id = world
        .get_resource::<ItemIdAllocator>()
        .map_or(1, ItemIdAllocator::peek_next);

    let mut segments: Vec<PlacedSegment> = world
        .query::<&Segment>()
        .iter(world)
        .map(|segment| PlacedSegment {
            pos: segment.pos,
            record: SegmentRecord::capture(segment),
        })
        .collect();
    segments.sort_by_key(|placed| placed.pos);

    let cells = world
        .get_resource::<CellIndex>()
        .map(CellIndex::device_cells)
        .unwrap_or_default();
    let mut chests = Vec::new();
    let mut splitters = Vec::new();
    for pos in cells {
        let Some(entity) = world
            .get_resource::<CellIndex>()
            .and_then(|index| index.device_entity(pos))
        else {
            continue;
        };
        if let Some(chest) = world.get::<Chest>(entity) {
            chests.push(PlacedChest {
                pos,
                chest: chest.clone(),
            });
        } else if let Some(splitter) = world.get::<Splitter>(entity) {
            splitters.push(SplitterRecord::capture(splitter));
        }
    }

    WorldRecord {
        tick,
        next_item_id,
        segments,
        chests,
        splitters,
    }
}
