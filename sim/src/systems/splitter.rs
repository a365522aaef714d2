//! Splitter system - empties full splitter buffers round-robin.

use crate::host::{with_port, CellIndex, WorldGrid};
use crate::splitter::Splitter;
use bevy_ecs::prelude::*;
use tracing::trace;

/// Push each full splitter's unit to the next output that takes it.
pub fn splitter_system(world: &mut World) {
    let cells = match world.get_resource::<CellIndex>() {
        Some(index) => index.device_cells(),
        None => return,
    };
    for pos in cells {
        if !world.is_loaded(pos) {
            continue;
        }
        let Some(entity) = world
            .get_resource::<CellIndex>()
            .and_then(|index| index.device_entity(pos))
        else {
            continue;
        };
        let Some(splitter) = world.get::<Splitter>(entity).cloned() else {
            continue;
        };
        let Some(kind) = splitter.buffer else {
            continue;
        };

        for (index, side) in splitter.rotation() {
            let target = pos.relative(side);
            if !world.is_loaded(target) {
                continue;
            }
            let delivered = with_port(world, target, side.opposite(), |view| {
                view.would_accept(kind) && view.insert_one(kind).is_empty()
            })
            .unwrap_or(false);
            if delivered {
                trace!(%pos, %target, "splitter output");
                if let Some(mut live) = world.get_mut::<Splitter>(entity) {
                    live.emitted(index);
                }
                break;
            }
        }
    }
}
