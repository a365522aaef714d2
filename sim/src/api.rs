//! Public API for the belt simulation.
//!
//! [`BeltWorld`] owns the ECS world and schedule and is the interface a host
//! game (or a test) drives: place belts and devices, tick, read snapshots,
//! collect outgoing sync messages and dropped items, save and load.
//!
//! ## Tick order
//!
//! Each call to [`BeltWorld::tick`] advances the world tick and runs, in order:
//!
//! 1. `observer_grid_update_system` - rebuild the observer index
//! 2. `splitter_system` - push splitter buffers outward
//! 3. `conveyor_system` - schedule and arbitrate every belt network
//! 4. `broadcast_system` - send dirty belts to observers in range

use crate::config::BeltConfig;
use crate::curve::Vec3;
use crate::error::{BeltError, Result};
use crate::grid::{Facing, GridPos};
use crate::host::{CellIndex, DroppedItem, DroppedItems, FrozenCells, WorldGrid, WorldTick};
use crate::item::{ItemId, ItemIdAllocator, ItemKind, ItemStack};
use crate::persistence::WorldRecord;
use crate::segment::{Segment, SegmentConfig};
use crate::spatial::{Observer, ObserverGrid, ObserverId};
use crate::splitter::Splitter;
use crate::storage::{Chest, ExternalStorage, ItemStorage};
use crate::sync::{Outbound, Outbox};
use crate::systems::{
    broadcast_system, conveyor_system, mark_all_for_resend, observer_grid_update_system,
    splitter_system, LastStepReport,
};
use crate::world::{capture_record, WorldSnapshot};
use bevy_ecs::prelude::*;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// The authoritative belt world.
pub struct BeltWorld {
    world: World,
    schedule: Schedule,
    observers: HashMap<ObserverId, Entity>,
}

impl BeltWorld {
    /// Create a new empty belt world with the default config.
    pub fn new() -> Self {
        Self::with_config(BeltConfig::default())
    }

    /// Create a new empty belt world with `config`.
    pub fn with_config(config: BeltConfig) -> Self {
        Self::build(config, 0, ItemIdAllocator::default())
    }

    fn build(config: BeltConfig, tick: u64, ids: ItemIdAllocator) -> Self {
        let mut world = World::new();
        world.insert_resource(WorldTick(tick));
        world.insert_resource(CellIndex::default());
        world.insert_resource(FrozenCells::default());
        world.insert_resource(DroppedItems::default());
        world.insert_resource(ids);
        world.insert_resource(ObserverGrid::new(config.observer_cell_size));
        world.insert_resource(Outbox::default());
        world.insert_resource(LastStepReport::default());
        world.insert_resource(config);

        let mut schedule = Schedule::default();
        schedule.add_systems(
            (
                observer_grid_update_system,
                splitter_system,
                conveyor_system,
                broadcast_system,
            )
                .chain(),
        );

        Self {
            world,
            schedule,
            observers: HashMap::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Stepping
    // ------------------------------------------------------------------------

    /// Advance one host tick.
    pub fn tick(&mut self) {
        if let Some(mut tick) = self.world.get_resource_mut::<WorldTick>() {
            tick.0 += 1;
        }
        self.schedule.run(&mut self.world);
    }

    /// Advance `ticks` host ticks.
    pub fn step(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    /// Get the current world tick.
    pub fn current_tick(&self) -> u64 {
        self.world.get_resource::<WorldTick>().map_or(0, |tick| tick.0)
    }

    /// Get a copy of the active config.
    pub fn config(&self) -> BeltConfig {
        self.world
            .get_resource::<BeltConfig>()
            .cloned()
            .unwrap_or_default()
    }

    /// Totals of the last tick's conveyor pass.
    pub fn last_report(&self) -> LastStepReport {
        self.world
            .get_resource::<LastStepReport>()
            .copied()
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Layout
    // ------------------------------------------------------------------------

    /// Place a belt, or reconfigure the one already hosted at `pos`.
    pub fn place_segment(&mut self, pos: GridPos, config: SegmentConfig) -> Result<()> {
        config.validate(pos)?;
        let existing = self.index().host_of(pos).filter(|host| *host == pos);
        for cell in config.path.cells(pos) {
            if self.index().is_occupied(cell, existing) {
                return Err(BeltError::Occupied(cell));
            }
        }
        if self.world.set_segment(pos, config) {
            Ok(())
        } else {
            Err(BeltError::Occupied(pos))
        }
    }

    /// Remove the belt covering `pos`, dropping its contents.
    pub fn remove_segment(&mut self, pos: GridPos) -> Result<()> {
        if self.world.remove_segment(pos) {
            Ok(())
        } else {
            Err(BeltError::NoSegment(pos))
        }
    }

    /// Place a chest at `pos`.
    pub fn place_chest(&mut self, pos: GridPos, chest: Chest) -> Result<()> {
        self.place_device(pos, chest)
    }

    /// Place an empty splitter at `pos` fed through `input`.
    pub fn place_splitter(&mut self, pos: GridPos, input: Facing) -> Result<()> {
        self.place_device(pos, Splitter::new(pos, input))
    }

    /// Attach host-provided storage at `pos`.
    pub fn place_storage(&mut self, pos: GridPos, storage: Box<dyn ItemStorage>) -> Result<()> {
        self.place_device(pos, ExternalStorage(storage))
    }

    fn place_device<C: Component>(&mut self, pos: GridPos, device: C) -> Result<()> {
        if self.index().is_occupied(pos, None) {
            return Err(BeltError::Occupied(pos));
        }
        let entity = self.world.spawn(device).id();
        self.index_mut().insert_device(pos, entity);
        debug!(%pos, "device placed");
        Ok(())
    }

    /// Remove the device at `pos`. Chest contents are dropped.
    pub fn remove_device(&mut self, pos: GridPos) -> Result<()> {
        let entity = self
            .index_mut()
            .remove_device(pos)
            .ok_or(BeltError::NoStorage(pos))?;
        let mut leftovers: Vec<ItemStack> = Vec::new();
        if let Some(mut chest) = self.world.get_mut::<Chest>(entity) {
            while let Some(stack) = chest.try_extract(Facing::Up, u32::MAX, false) {
                leftovers.push(stack);
            }
        }
        if let Some(kind) = self.world.get::<Splitter>(entity).and_then(|s| s.buffer) {
            leftovers.push(ItemStack::single(kind));
        }
        for stack in leftovers {
            self.world.drop_item(pos, stack, None);
        }
        self.world.despawn(entity);
        Ok(())
    }

    /// Get the chest at `pos`.
    pub fn chest(&self, pos: GridPos) -> Option<&Chest> {
        let entity = self.index().device_entity(pos)?;
        self.world.get::<Chest>(entity)
    }

    /// Get the splitter at `pos`.
    pub fn splitter(&self, pos: GridPos) -> Option<&Splitter> {
        let entity = self.index().device_entity(pos)?;
        self.world.get::<Splitter>(entity)
    }

    /// Get the belt covering `pos`.
    pub fn segment(&self, pos: GridPos) -> Option<&Segment> {
        self.world.segment_at(pos)
    }

    /// Put one unit of `kind` on the tail of the belt covering `pos`.
    pub fn insert_item(&mut self, pos: GridPos, kind: ItemKind) -> Result<ItemId> {
        let ids = self.world.item_ids();
        let segment = self
            .world
            .segment_at_mut(pos)
            .ok_or(BeltError::NoSegment(pos))?;
        if !segment.queue.can_accept_at_tail() {
            return Err(BeltError::TailBlocked(pos));
        }
        let unit = ids.unit(kind);
        segment
            .queue
            .try_enqueue_at_tail(unit)
            .map_err(|_| BeltError::TailBlocked(pos))?;
        segment.mark_dirty();
        Ok(unit.id)
    }

    /// Freeze or unfreeze a cell, as when its chunk unloads or loads.
    ///
    /// A belt coming back resumes its budget from the tick it was frozen
    /// at, so the catch-up burst is bounded by the budget cap.
    pub fn set_loaded(&mut self, pos: GridPos, loaded: bool) {
        if let Some(mut frozen) = self.world.get_resource_mut::<FrozenCells>() {
            if loaded {
                frozen.0.remove(&pos);
            } else {
                frozen.0.insert(pos);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Observers and sync
    // ------------------------------------------------------------------------

    /// Register a viewer. Every belt is resent on the next broadcast.
    pub fn add_observer(&mut self, id: ObserverId, position: Vec3) {
        if let Some(entity) = self.observers.get(&id).copied() {
            if let Some(mut observer) = self.world.get_mut::<Observer>(entity) {
                observer.position = position;
            }
        } else {
            let entity = self.world.spawn(Observer { id, position }).id();
            self.observers.insert(id, entity);
            info!(%id, "observer joined");
        }
        mark_all_for_resend(&mut self.world);
    }

    /// Move a registered viewer. Returns false if `id` is unknown.
    pub fn move_observer(&mut self, id: ObserverId, position: Vec3) -> bool {
        let Some(entity) = self.observers.get(&id).copied() else {
            return false;
        };
        match self.world.get_mut::<Observer>(entity) {
            Some(mut observer) => {
                observer.position = position;
                true
            }
            None => false,
        }
    }

    /// Unregister a viewer.
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        match self.observers.remove(&id) {
            Some(entity) => self.world.despawn(entity),
            None => false,
        }
    }

    /// Snapshots broadcast since the last drain.
    pub fn drain_outbox(&mut self) -> Vec<Outbound> {
        self.world
            .get_resource_mut::<Outbox>()
            .map(|mut outbox| outbox.drain())
            .unwrap_or_default()
    }

    /// Items that left the belt system since the last drain.
    pub fn drain_dropped(&mut self) -> Vec<DroppedItem> {
        self.world
            .get_resource_mut::<DroppedItems>()
            .map(|mut dropped| std::mem::take(&mut dropped.0))
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------------
    // Snapshots and persistence
    // ------------------------------------------------------------------------

    /// Get a read-only view of every belt, sorted by position.
    pub fn snapshot(&mut self) -> WorldSnapshot {
        WorldSnapshot::from_world(&mut self.world)
    }

    /// Get the snapshot as JSON, or `{}` if encoding fails.
    pub fn snapshot_json(&mut self) -> String {
        self.snapshot().to_json().unwrap_or_else(|_| "{}".to_string())
    }

    /// Capture the persistent state of the world.
    pub fn save(&mut self) -> WorldRecord {
        capture_record(&mut self.world)
    }

    /// Capture the persistent state as JSON.
    pub fn save_json(&mut self) -> Result<String> {
        Ok(self.save().to_json()?)
    }

    /// Rebuild a world from a record.
    ///
    /// Entries that no longer fit anywhere are dropped into the world
    /// rather than lost, and the id allocator is bumped above every loaded
    /// id.
    pub fn load(record: WorldRecord, config: BeltConfig) -> Self {
        let cap = config.max_step_budget;
        let ids = ItemIdAllocator::starting_at(record.next_item_id);
        let mut belts = Self::build(config, record.tick, ids.clone());

        for placed in record.segments {
            let (mut segment, overflow) = placed.record.restore(placed.pos, cap);
            if let Some(max) = segment.queue.max_id() {
                ids.ensure_above(max);
            }
            let placeable = belts.placeable(&segment);
            let stranded = if placeable {
                overflow
            } else {
                warn!(pos = %placed.pos, "saved segment cannot be placed");
                overflow.into_iter().chain(segment.queue.drain()).collect()
            };
            for item in stranded {
                warn!(pos = %placed.pos, kind = %item.kind, "saved item dropped on load");
                belts
                    .world
                    .drop_item(placed.pos, ItemStack::new(item.kind, item.count), item.id);
            }
            if !placeable {
                continue;
            }
            segment.budget.reset_clock();
            let cells = segment.cells();
            let host = segment.pos;
            let entity = belts.world.spawn(segment).id();
            belts.index_mut().insert_segment(host, &cells, entity);
        }

        for placed in record.chests {
            if let Err(err) = belts.place_chest(placed.pos, placed.chest) {
                warn!(%err, "saved chest skipped");
            }
        }
        for saved in record.splitters {
            if let Err(err) = belts.place_device(saved.pos, saved.restore()) {
                warn!(%err, "saved splitter skipped");
            }
        }
        info!(tick = record.tick, "world loaded");
        belts
    }

    /// Rebuild a world from a JSON record. See [`BeltWorld::load`].
    pub fn load_json(json: &str, config: BeltConfig) -> Result<Self> {
        let record = WorldRecord::from_json(json)?;
        Ok(Self::load(record, config))
    }

    /// Whether a restored segment has a valid shape and free cells.
    fn placeable(&self, segment: &Segment) -> bool {
        segment.config.validate(segment.pos).is_ok()
            && segment
                .cells()
                .iter()
                .all(|cell| !self.index().is_occupied(*cell, None))
    }

    // ------------------------------------------------------------------------
    // Access
    // ------------------------------------------------------------------------

    fn index(&self) -> &CellIndex {
        self.world.resource::<CellIndex>()
    }

    fn index_mut(&mut self) -> Mut<'_, CellIndex> {
        self.world.resource_mut::<CellIndex>()
    }

    /// Get the underlying ECS world.
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Get mutable access to the underlying ECS world.
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }
}

impl Default for BeltWorld {
    fn default() -> Self {
        Self::new()
    }
}
