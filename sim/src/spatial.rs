//! Spatial partitioning of observers.
//!
//! Broadcasts ask which observers stand near a belt anchor. The grid buckets
//! observers by horizontal cell so that query only visits nearby buckets.

use crate::curve::Vec3;
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identifies a remote viewer of the belt world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObserverId(pub u32);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

/// A viewer and where it stands.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Observer {
    pub id: ObserverId,
    pub position: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObserverEntry {
    pub id: ObserverId,
    pub position: Vec3,
}

#[derive(Resource, Debug)]
pub struct ObserverGrid {
    /// Bucket edge in world units.
    pub cell_size: f64,
    cells: HashMap<(i32, i32), Vec<ObserverEntry>>,
    observer_cells: HashMap<ObserverId, (i32, i32)>,
}

impl Default for ObserverGrid {
    fn default() -> Self {
        Self::new(16.0)
    }
}

impl ObserverGrid {
    pub fn new(cell_size: f64) -> Self {
        Self {
            cell_size: if cell_size > 0.0 { cell_size } else { 16.0 },
            cells: HashMap::new(),
            observer_cells: HashMap::new(),
        }
    }

    #[inline]
    pub fn world_to_cell(&self, position: Vec3) -> (i32, i32) {
        (
            (position.x / self.cell_size).floor() as i32,
            (position.z / self.cell_size).floor() as i32,
        )
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.observer_cells.clear();
    }

    pub fn insert(&mut self, id: ObserverId, position: Vec3) {
        self.remove(id);
        let cell = self.world_to_cell(position);
        self.cells
            .entry(cell)
            .or_default()
            .push(ObserverEntry { id, position });
        self.observer_cells.insert(id, cell);
    }

    pub fn remove(&mut self, id: ObserverId) {
        if let Some(cell) = self.observer_cells.remove(&id) {
            if let Some(entries) = self.cells.get_mut(&cell) {
                entries.retain(|entry| entry.id != id);
            }
        }
    }

    /// Observers within `radius` of `point`, by id.
    ///
    /// When the query square would cover more buckets than are occupied,
    /// every bucket is scanned instead.
    pub fn query_radius(&self, point: Vec3, radius: f64) -> Vec<ObserverEntry> {
        if radius.is_nan() || radius < 0.0 {
            return Vec::new();
        }
        let radius_sq = radius * radius;
        let within = |entry: &&ObserverEntry| entry.position.distance_squared(point) <= radius_sq;

        let reach = (radius / self.cell_size).ceil() + 1.0;
        let span = 2.0 * reach + 1.0;
        let mut results: Vec<ObserverEntry> = Vec::new();
        if span * span > self.cells.len() as f64 {
            for entries in self.cells.values() {
                results.extend(entries.iter().filter(within).copied());
            }
        } else {
            let reach = reach as i32;
            let center = self.world_to_cell(point);
            for dx in -reach..=reach {
                for dz in -reach..=reach {
                    let cell = (center.0.saturating_add(dx), center.1.saturating_add(dz));
                    if let Some(entries) = self.cells.get(&cell) {
                        results.extend(entries.iter().filter(within).copied());
                    }
                }
            }
        }
        results.sort_by_key(|entry| entry.id);
        results
    }

    /// Observers within `radius` of any of `points`, deduplicated, by id.
    pub fn query_near_any(&self, points: &[Vec3], radius: f64) -> Vec<ObserverId> {
        let mut ids: Vec<ObserverId> = points
            .iter()
            .flat_map(|point| self.query_radius(*point, radius))
            .map(|entry| entry.id)
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn total_count(&self) -> usize {
        self.observer_cells.len()
    }
}
