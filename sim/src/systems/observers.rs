//! Observer system - keeps the observer index in step with observer entities.

use crate::spatial::{Observer, ObserverGrid};
use bevy_ecs::prelude::*;

/// Rebuild the observer grid from the observer entities.
pub fn observer_grid_update_system(mut grid: ResMut<ObserverGrid>, query: Query<&Observer>) {
    grid.clear();
    for observer in query.iter() {
        grid.insert(observer.id, observer.position);
    }
}
