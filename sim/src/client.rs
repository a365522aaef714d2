//! Client-side mirror and prediction.
//!
//! The client keeps the last applied snapshot of every segment it has heard
//! about. Between snapshots it predicts where items are by replaying the
//! step logic on a private copy, so motion stays smooth even though updates
//! arrive rarely and unevenly across neighbouring belts.
//!
//! ## Prediction
//!
//! For a snapshot taken `elapsed` ticks ago the predictor projects
//! `elapsed * steps_per_tick` steps, capped at `max(2N, min_prediction_steps)`.
//! It runs the whole steps on a copy of the queue, runs one more step to get
//! a blend target, and interpolates by the fractional remainder. An item
//! that leaves the belt during the whole steps is dead-reckoned across the
//! known downstream belts. With nothing known downstream it is clamped just
//! short of the output edge.
//!
//! When `parallel` is enabled, [`ClientPredictor::predict_all`] spreads
//! segments across the rayon pool.

use crate::config::BeltConfig;
use crate::grid::GridPos;
use crate::host::Topology;
use crate::item::{ItemId, ItemKind};
use crate::network::strict_output;
use crate::queue::{ItemQueue, QueuedItem};
use crate::segment::{steps_per_tick, SegmentConfig};
use crate::sync::{SegmentSnapshot, SyncRevisionGate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// How far short of the output edge an exiting item with nowhere to go is
/// held, in slots.
pub const EDGE_CLAMP: f64 = 1e-6;

// ============================================================================
// MIRROR
// ============================================================================

/// Last applied state of one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSegment {
    pub pos: GridPos,
    pub config: SegmentConfig,
    pub length_units: usize,
    pub queue: ItemQueue,
    pub revision: u64,
    /// Authoritative tick the snapshot was taken at.
    pub snapshot_tick: u64,
}

impl ClientSegment {
    pub fn from_snapshot(snapshot: &SegmentSnapshot) -> Self {
        let record = &snapshot.record;
        let (queue, _) = record.restore_queue();
        let mut config = record.config.clone();
        config.travel_ticks_per_unit = config.travel_ticks();
        Self {
            pos: snapshot.pos,
            config,
            length_units: record.clamped_length_units(),
            queue,
            revision: snapshot.revision,
            snapshot_tick: snapshot.server_tick,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn steps_per_tick(&self) -> f64 {
        steps_per_tick(self.capacity(), self.length_units, self.config.travel_ticks())
    }

    pub fn cells(&self) -> Vec<GridPos> {
        self.config.path.cells(self.pos)
    }
}

/// Every segment the client knows about.
#[derive(Debug, Default)]
pub struct ClientWorld {
    segments: BTreeMap<GridPos, ClientSegment>,
    markers: HashMap<GridPos, GridPos>,
    /// Kept across removals so a late stale snapshot cannot resurrect a
    /// belt.
    gates: HashMap<GridPos, SyncRevisionGate>,
}

impl ClientWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn hosts(&self) -> impl Iterator<Item = GridPos> + '_ {
        self.segments.keys().copied()
    }

    pub fn segment(&self, pos: GridPos) -> Option<&ClientSegment> {
        let host = self.host_of(pos)?;
        self.segments.get(&host)
    }

    fn host_of(&self, pos: GridPos) -> Option<GridPos> {
        if self.segments.contains_key(&pos) {
            Some(pos)
        } else {
            self.markers.get(&pos).copied()
        }
    }

    /// Apply `snapshot` unless an equal-or-newer revision already arrived
    /// for its segment. Returns whether it was applied.
    pub fn apply_snapshot(&mut self, snapshot: &SegmentSnapshot) -> bool {
        let host = snapshot.pos;
        let gate = self.gates.entry(host).or_default();
        if !gate.accepts(snapshot.revision) {
            trace!(%host, revision = snapshot.revision, "stale snapshot dropped");
            return false;
        }

        let incoming = ClientSegment::from_snapshot(snapshot);
        let mut current = self.segments.get(&host).cloned();
        if !gate.apply_if_newer(snapshot.revision, &mut current, Some(incoming)) {
            return false;
        }
        let Some(segment) = current else {
            return false;
        };

        self.unlink(host);
        for cell in segment.cells() {
            if let Some(other) = self.host_of(cell).filter(|other| *other != host) {
                self.unlink(other);
                self.segments.remove(&other);
            }
            if cell != host {
                self.markers.insert(cell, host);
            }
        }
        self.segments.insert(host, segment);
        true
    }

    /// Forget a segment the server reported as removed.
    pub fn remove_segment(&mut self, host: GridPos) -> bool {
        self.unlink(host);
        self.segments.remove(&host).is_some()
    }

    fn unlink(&mut self, host: GridPos) {
        self.markers.retain(|_, owner| *owner != host);
    }
}

impl Topology for ClientWorld {
    fn config_at(&self, pos: GridPos) -> Option<(GridPos, &SegmentConfig)> {
        let segment = self.segment(pos)?;
        Some((segment.pos, &segment.config))
    }
}

// ============================================================================
// PREDICTION
// ============================================================================

/// Stable identity of one rendered item across frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VisualKey {
    Item(ItemId),
    /// An entry restored without an id, keyed by its belt and slot.
    Slot(GridPos, usize),
}

/// Where one item should be drawn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictedItem {
    pub key: VisualKey,
    pub kind: ItemKind,
    /// Host cell of the belt the item is drawn on.
    pub segment: GridPos,
    /// Continuous position in slots, in `[0, N)`.
    pub slot_units: f64,
    /// False when the item has left its snapshot belt in the prediction.
    pub on_belt: bool,
    pub snapshot_tick: u64,
}

impl PredictedItem {
    /// Position along the belt in `[0, 1)`.
    pub fn progress(&self, capacity: usize) -> f64 {
        (self.slot_units / capacity.max(1) as f64).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientPredictor {
    pub min_steps: usize,
    pub max_hops: usize,
}

impl Default for ClientPredictor {
    fn default() -> Self {
        Self::from_config(&BeltConfig::default())
    }
}

/// One unit that left the simulated belt.
#[derive(Debug, Clone, Copy)]
struct Exit {
    key: VisualKey,
    kind: ItemKind,
    /// Whole step during which it left, 1-based.
    step: usize,
}

impl ClientPredictor {
    pub fn from_config(config: &BeltConfig) -> Self {
        Self {
            min_steps: config.min_prediction_steps,
            max_hops: config.dead_reckon_hops,
        }
    }

    pub fn step_cap(&self, capacity: usize) -> usize {
        (capacity * 2).max(self.min_steps)
    }

    /// Predicted items of the belt hosted at `host` at client tick `now`.
    pub fn predict(&self, world: &ClientWorld, host: GridPos, now: f64) -> Vec<PredictedItem> {
        let Some(segment) = world.segments.get(&host) else {
            return Vec::new();
        };
        let capacity = segment.capacity();
        let spt = segment.steps_per_tick();
        let elapsed = (now - segment.snapshot_tick as f64).max(0.0);
        let projected = (elapsed * spt).min(self.step_cap(capacity) as f64);
        let whole = projected.floor() as usize;
        let fraction = projected - whole as f64;

        let mut queue = segment.queue.clone();
        let mut exits: Vec<Exit> = Vec::new();
        for step in 1..=whole {
            if let Some(exit) = simulate_step(&mut queue, step) {
                exits.push(exit);
            }
        }

        let mut target = queue.clone();
        let speculative_exit = simulate_step(&mut target, whole + 1);
        let skipped = usize::from(speculative_exit.is_some());

        let edge = capacity as f64 - EDGE_CLAMP;
        let mut predicted: Vec<PredictedItem> = Vec::with_capacity(queue.len() + exits.len());
        for (index, item) in queue.items().iter().enumerate() {
            let from = item.position as f64;
            let to = if index < skipped {
                capacity as f64
            } else {
                target
                    .items()
                    .get(index - skipped)
                    .map_or(from, |next| next.position as f64)
            };
            predicted.push(PredictedItem {
                key: key_of(item, host, index),
                kind: item.kind,
                segment: host,
                slot_units: (from + (to - from) * fraction).min(edge),
                on_belt: true,
                snapshot_tick: segment.snapshot_tick,
            });
        }

        let downstream = strict_output(world, host, &segment.config);
        for exit in exits {
            // Ticks since the item crossed the output edge.
            let since_exit = (projected - exit.step as f64) / spt;
            let placed = match downstream {
                Some(next) => self.dead_reckon(world, next, since_exit),
                None => None,
            };
            let (on, slot_units) = placed.unwrap_or((host, edge));
            predicted.push(PredictedItem {
                key: exit.key,
                kind: exit.kind,
                segment: on,
                slot_units,
                on_belt: false,
                snapshot_tick: segment.snapshot_tick,
            });
        }
        predicted
    }

    /// Follow downstream belts for `ticks` after entering `start` at its
    /// tail. Stops at the last known belt, just short of its edge.
    fn dead_reckon(&self, world: &ClientWorld, start: GridPos, ticks: f64) -> Option<(GridPos, f64)> {
        let mut current = world.segments.get(&start)?;
        let mut remaining = ticks.max(0.0);
        for _ in 0..self.max_hops {
            let capacity = current.capacity() as f64;
            let spt = current.steps_per_tick();
            let travelled = remaining * spt;
            if travelled < capacity {
                return Some((current.pos, travelled));
            }
            let next = strict_output(world, current.pos, &current.config)
                .and_then(|pos| world.segments.get(&pos));
            match next {
                Some(next) if next.pos != start => {
                    remaining -= capacity / spt;
                    current = next;
                }
                _ => break,
            }
        }
        Some((current.pos, current.capacity() as f64 - EDGE_CLAMP))
    }

    /// Predictions for every known belt, one entry per item.
    ///
    /// An item claimed by two belts keeps its on-belt prediction over a
    /// dead-reckoned one, then the one from the newer snapshot.
    pub fn predict_all(&self, world: &ClientWorld, now: f64) -> Vec<PredictedItem> {
        let hosts: Vec<GridPos> = world.hosts().collect();

        #[cfg(feature = "parallel")]
        let all: Vec<PredictedItem> = hosts
            .par_iter()
            .flat_map_iter(|host| self.predict(world, *host, now))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let all: Vec<PredictedItem> = hosts
            .iter()
            .flat_map(|host| self.predict(world, *host, now))
            .collect();

        let mut best: BTreeMap<VisualKey, PredictedItem> = BTreeMap::new();
        for item in all {
            match best.get(&item.key) {
                Some(kept) if !prefer(&item, kept) => {}
                _ => {
                    best.insert(item.key, item);
                }
            }
        }
        best.into_values().collect()
    }
}

fn prefer(candidate: &PredictedItem, kept: &PredictedItem) -> bool {
    (candidate.on_belt, candidate.snapshot_tick) > (kept.on_belt, kept.snapshot_tick)
}

fn key_of(item: &QueuedItem, host: GridPos, index: usize) -> VisualKey {
    item.id.map_or(VisualKey::Slot(host, index), VisualKey::Item)
}

/// One simulated step: the head leaves if it can, then everything advances.
fn simulate_step(queue: &mut ItemQueue, step: usize) -> Option<Exit> {
    let exit = queue.pop_head_if_at_output_edge().map(|unit| Exit {
        key: VisualKey::Item(unit.id),
        kind: unit.kind,
        step,
    });
    queue.advance_one_step();
    exit
}
