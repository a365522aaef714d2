//! Turning predictions into drawn items.
//!
//! Items are not entities in the host world. The renderer owns short-lived
//! actors keyed by [`VisualKey`], and [`VisualSync`] keeps that set in step
//! with each frame's predictions.

use crate::client::{ClientPredictor, ClientWorld, PredictedItem, VisualKey};
use crate::curve::Vec3;
use crate::item::ItemKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderedItem {
    pub key: VisualKey,
    pub kind: ItemKind,
    pub position: Vec3,
}

/// World position of one prediction, or `None` if its belt is unknown.
pub fn place(world: &ClientWorld, item: &PredictedItem) -> Option<Vec3> {
    let segment = world.segment(item.segment)?;
    let progress = item.progress(segment.capacity());
    Some(segment.config.path.sample(segment.pos, progress))
}

/// Items to draw for a viewer at `viewer`, skipping belts whose anchors are
/// both farther than `range`.
pub fn render_frame(
    world: &ClientWorld,
    predictor: &ClientPredictor,
    now: f64,
    viewer: Vec3,
    range: f64,
) -> Vec<RenderedItem> {
    let range_sq = range * range;
    let visible = |item: &PredictedItem| {
        world.segment(item.segment).is_some_and(|segment| {
            let path = &segment.config.path;
            path.start_anchor(segment.pos).distance_squared(viewer) <= range_sq
                || path.end_anchor(segment.pos).distance_squared(viewer) <= range_sq
        })
    };

    predictor
        .predict_all(world, now)
        .into_iter()
        .filter(|item| visible(item))
        .filter_map(|item| {
            Some(RenderedItem {
                key: item.key,
                kind: item.kind,
                position: place(world, &item)?,
            })
        })
        .collect()
}

/// Registration API for the renderer's short-lived item actors.
pub trait EphemeralActors {
    fn spawn(&mut self, key: VisualKey, kind: ItemKind, position: Vec3);
    fn move_to(&mut self, key: VisualKey, position: Vec3);
    fn despawn(&mut self, key: VisualKey);
}

/// Diffs frames against the live actor set.
#[derive(Debug, Default)]
pub struct VisualSync {
    live: BTreeMap<VisualKey, ItemKind>,
}

impl VisualSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Spawn new keys, move surviving ones, despawn vanished ones. A key
    /// whose kind changed is respawned.
    pub fn apply<A: EphemeralActors + ?Sized>(&mut self, frame: &[RenderedItem], actors: &mut A) {
        let mut next: BTreeMap<VisualKey, ItemKind> = BTreeMap::new();
        for item in frame {
            match self.live.remove(&item.key) {
                Some(kind) if kind == item.kind => actors.move_to(item.key, item.position),
                Some(_) => {
                    actors.despawn(item.key);
                    actors.spawn(item.key, item.kind, item.position);
                }
                None => actors.spawn(item.key, item.kind, item.position),
            }
            next.insert(item.key, item.kind);
        }
        for key in std::mem::take(&mut self.live).into_keys() {
            actors.despawn(key);
        }
        self.live = next;
    }

    /// Despawn everything, e.g. when the view is torn down.
    pub fn clear<A: EphemeralActors + ?Sized>(&mut self, actors: &mut A) {
        for key in std::mem::take(&mut self.live).into_keys() {
            actors.despawn(key);
        }
    }
}
