//! ECS systems of the belt simulation.
//!
//! All belt systems run in one chained group per tick. Arbitration needs
//! the whole network at once, so the heavy systems are exclusive
//! (`fn(&mut World)`) and run in a fixed order:
//!
//! - `observer_grid_update_system` - rebuilds the observer index
//! - `splitter_system` - empties splitter buffers round-robin
//! - `conveyor_system` - budgets, networks and transfer arbitration
//! - `broadcast_system` - rate-limited, range-gated snapshots

pub mod broadcast;
pub mod conveyor;
pub mod observers;
pub mod splitter;

pub use broadcast::*;
pub use conveyor::*;
pub use observers::*;
pub use splitter::*;
