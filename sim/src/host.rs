//! The host world as seen by the belt engine.
//!
//! The engine queries and mutates the world only through [`Topology`] and
//! [`WorldGrid`]. Both are implemented for `bevy_ecs::World`, backed by a
//! [`CellIndex`] resource that maps cells to the entities living in them.

use crate::grid::{Facing, GridPos};
use crate::item::{ItemId, ItemIdAllocator, ItemStack};
use crate::segment::{Segment, SegmentConfig};
use crate::splitter::Splitter;
use crate::storage::{Chest, ExternalStorage, ItemStorage, StorageView};
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

/// Read-only belt layout.
pub trait Topology {
    /// Host cell and configuration of the belt covering `pos`, if any.
    fn config_at(&self, pos: GridPos) -> Option<(GridPos, &SegmentConfig)>;
}

/// Everything the engine needs from the world it runs in.
pub trait WorldGrid: Topology {
    fn segment_at(&self, pos: GridPos) -> Option<&Segment>;
    fn segment_at_mut(&mut self, pos: GridPos) -> Option<&mut Segment>;
    /// Place or reconfigure a belt. Returns false when refused.
    fn set_segment(&mut self, pos: GridPos, config: SegmentConfig) -> bool;
    /// Remove a belt, dropping its contents into the world.
    fn remove_segment(&mut self, pos: GridPos) -> bool;
    fn is_loaded(&self, pos: GridPos) -> bool;
    fn storage_at(&mut self, pos: GridPos) -> Option<&mut dyn ItemStorage>;
    /// Turn an item into a loose world object.
    fn drop_item(&mut self, pos: GridPos, stack: ItemStack, id: Option<ItemId>);
    fn item_ids(&self) -> ItemIdAllocator;
}

/// Open a storage view on whatever sits at `pos`, belt or device, as seen
/// through its `side` face, and run `f` on it.
pub fn with_port<G, R>(
    grid: &mut G,
    pos: GridPos,
    side: Facing,
    f: impl FnOnce(&mut StorageView<'_>) -> R,
) -> Option<R>
where
    G: WorldGrid + ?Sized,
{
    let ids = grid.item_ids();
    if let Some(segment) = grid.segment_at_mut(pos) {
        let mut port = segment.port(pos, ids);
        let mut view = StorageView::open(&mut port, side);
        return Some(f(&mut view));
    }
    let storage = grid.storage_at(pos)?;
    let mut view = StorageView::open(storage, side);
    Some(f(&mut view))
}

// ============================================================================
// RESOURCES
// ============================================================================

/// Current authoritative tick.
#[derive(Resource, Debug, Clone, Copy, Default)]
pub struct WorldTick(pub u64);

/// Cell to entity lookup for belts and devices.
#[derive(Resource, Debug, Default)]
pub struct CellIndex {
    hosts: BTreeMap<GridPos, Entity>,
    /// Non-host cells of multi-cell belts, pointing at their host.
    markers: HashMap<GridPos, GridPos>,
    devices: HashMap<GridPos, Entity>,
}

impl CellIndex {
    pub fn host_of(&self, pos: GridPos) -> Option<GridPos> {
        if self.hosts.contains_key(&pos) {
            Some(pos)
        } else {
            self.markers.get(&pos).copied()
        }
    }

    pub fn segment_entity(&self, pos: GridPos) -> Option<Entity> {
        self.host_of(pos).and_then(|host| self.hosts.get(&host).copied())
    }

    pub fn device_entity(&self, pos: GridPos) -> Option<Entity> {
        self.devices.get(&pos).copied()
    }

    /// Belt host cells in sort order.
    pub fn segment_hosts(&self) -> Vec<GridPos> {
        self.hosts.keys().copied().collect()
    }

    pub fn device_cells(&self) -> Vec<GridPos> {
        let mut cells: Vec<GridPos> = self.devices.keys().copied().collect();
        cells.sort();
        cells
    }

    /// Whether `pos` is taken by anything other than the belt hosted at
    /// `ignore_host`.
    pub fn is_occupied(&self, pos: GridPos, ignore_host: Option<GridPos>) -> bool {
        if self.devices.contains_key(&pos) {
            return true;
        }
        match self.host_of(pos) {
            Some(host) => Some(host) != ignore_host,
            None => false,
        }
    }

    pub fn insert_segment(&mut self, host: GridPos, cells: &[GridPos], entity: Entity) {
        self.hosts.insert(host, entity);
        for cell in cells.iter().filter(|cell| **cell != host) {
            self.markers.insert(*cell, host);
        }
    }

    pub fn remove_segment(&mut self, host: GridPos) -> Option<Entity> {
        self.markers.retain(|_, owner| *owner != host);
        self.hosts.remove(&host)
    }

    pub fn insert_device(&mut self, pos: GridPos, entity: Entity) {
        self.devices.insert(pos, entity);
    }

    pub fn remove_device(&mut self, pos: GridPos) -> Option<Entity> {
        self.devices.remove(&pos)
    }
}

/// Cells whose chunks are not loaded. Belts there are frozen.
#[derive(Resource, Debug, Default)]
pub struct FrozenCells(pub HashSet<GridPos>);

/// An item that left the belt system as a loose world object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedItem {
    pub pos: GridPos,
    pub stack: ItemStack,
    pub id: Option<ItemId>,
}

/// Items dropped since the host last drained them.
#[derive(Resource, Debug, Default)]
pub struct DroppedItems(pub Vec<DroppedItem>);

// ============================================================================
// WORLD IMPLEMENTATION
// ============================================================================

impl Topology for World {
    fn config_at(&self, pos: GridPos) -> Option<(GridPos, &SegmentConfig)> {
        let segment = self.segment_at(pos)?;
        Some((segment.pos, &segment.config))
    }
}

impl WorldGrid for World {
    fn segment_at(&self, pos: GridPos) -> Option<&Segment> {
        let entity = self.get_resource::<CellIndex>()?.segment_entity(pos)?;
        self.get::<Segment>(entity)
    }

    fn segment_at_mut(&mut self, pos: GridPos) -> Option<&mut Segment> {
        let entity = self.get_resource::<CellIndex>()?.segment_entity(pos)?;
        self.get_mut::<Segment>(entity).map(Mut::into_inner)
    }

    fn set_segment(&mut self, pos: GridPos, config: SegmentConfig) -> bool {
        if let Err(err) = config.validate(pos) {
            warn!(%pos, %err, "refusing segment");
            return false;
        }
        let cells = config.path.cells(pos);
        let Some(index) = self.get_resource::<CellIndex>() else {
            return false;
        };
        let existing = index.hosts.get(&pos).copied();
        if cells
            .iter()
            .any(|cell| index.is_occupied(*cell, existing.map(|_| pos)))
        {
            debug!(%pos, "segment cells already occupied");
            return false;
        }

        match existing {
            Some(entity) => {
                let mut overflow = Vec::new();
                if let Some(mut segment) = self.get_mut::<Segment>(entity) {
                    segment.reconfigure(config, |item| overflow.push(item));
                }
                for item in overflow {
                    warn!(%pos, kind = %item.kind, "resize overflow dropped");
                    self.drop_item(pos, ItemStack::new(item.kind, item.count), item.id);
                }
                if let Some(mut index) = self.get_resource_mut::<CellIndex>() {
                    index.remove_segment(pos);
                    index.insert_segment(pos, &cells, entity);
                }
            }
            None => {
                let now = self.get_resource::<WorldTick>().map_or(0, |tick| tick.0);
                let entity = self.spawn(Segment::new(pos, config, now)).id();
                if let Some(mut index) = self.get_resource_mut::<CellIndex>() {
                    index.insert_segment(pos, &cells, entity);
                }
                debug!(%pos, "segment placed");
            }
        }
        true
    }

    fn remove_segment(&mut self, pos: GridPos) -> bool {
        let Some(host) = self.get_resource::<CellIndex>().and_then(|index| index.host_of(pos))
        else {
            return false;
        };
        let Some(entity) = self
            .get_resource_mut::<CellIndex>()
            .and_then(|mut index| index.remove_segment(host))
        else {
            return false;
        };
        let contents = self
            .get_mut::<Segment>(entity)
            .map(|mut segment| segment.queue.drain())
            .unwrap_or_default();
        for item in contents {
            self.drop_item(host, ItemStack::new(item.kind, item.count), item.id);
        }
        self.despawn(entity);
        debug!(%host, "segment removed");
        true
    }

    fn is_loaded(&self, pos: GridPos) -> bool {
        self.get_resource::<FrozenCells>()
            .map_or(true, |frozen| !frozen.0.contains(&pos))
    }

    fn storage_at(&mut self, pos: GridPos) -> Option<&mut dyn ItemStorage> {
        let entity = self.get_resource::<CellIndex>()?.device_entity(pos)?;
        if self.get::<Splitter>(entity).is_some() {
            let splitter: &mut dyn ItemStorage = self.get_mut::<Splitter>(entity)?.into_inner();
            return Some(splitter);
        }
        if self.get::<Chest>(entity).is_some() {
            let chest: &mut dyn ItemStorage = self.get_mut::<Chest>(entity)?.into_inner();
            return Some(chest);
        }
        let external: &mut dyn ItemStorage =
            self.get_mut::<ExternalStorage>(entity)?.into_inner().0.as_mut();
        Some(external)
    }

    fn drop_item(&mut self, pos: GridPos, stack: ItemStack, id: Option<ItemId>) {
        if stack.is_empty() {
            return;
        }
        debug!(%pos, kind = %stack.kind, count = stack.count, "item dropped into world");
        if let Some(mut dropped) = self.get_resource_mut::<DroppedItems>() {
            dropped.0.push(DroppedItem { pos, stack, id });
        }
    }

    fn item_ids(&self) -> ItemIdAllocator {
        self.get_resource::<ItemIdAllocator>()
            .cloned()
            .unwrap_or_default()
    }
}

/// Bare world with the resources the grid needs.
#[cfg(test)]
pub(crate) fn test_world() -> World {
    let mut world = World::new();
    world.insert_resource(CellIndex::default());
    world.insert_resource(DroppedItems::default());
    world.insert_resource(FrozenCells::default());
    world.insert_resource(WorldTick(0));
    world.insert_resource(ItemIdAllocator::default());
    world
}
