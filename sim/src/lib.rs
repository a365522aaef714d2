//! Belt Sim - Simulation Core
//!
//! Deterministic conveyor-belt item transport on a discrete grid. Items move
//! one slot per step along segments, segments link into networks, and
//! networks trade items with each other and with external storage.
//! Uses `bevy_ecs` for the entity-component-system architecture.

pub mod api;
pub mod client;
pub mod config;
pub mod curve;
pub mod error;
pub mod grid;
pub mod host;
pub mod item;
pub mod network;
pub mod persistence;
pub mod queue;
pub mod render;
pub mod scheduler;
pub mod segment;
pub mod spatial;
pub mod splitter;
pub mod storage;
pub mod sync;
pub mod systems;
pub mod transfer;
pub mod world;

pub use api::BeltWorld;
pub use client::{ClientPredictor, ClientSegment, ClientWorld, PredictedItem, VisualKey};
pub use config::BeltConfig;
pub use curve::{BeltCurve, Vec3};
pub use error::{BeltError, Result};
pub use grid::{Facing, GridPos};
pub use host::{DroppedItem, Topology, WorldGrid, WorldTick};
pub use item::{ItemId, ItemIdAllocator, ItemKind, ItemStack, ItemUnit};
pub use persistence::{SegmentRecord, SlotRecord, WorldRecord};
pub use queue::{ItemQueue, QueuedItem};
pub use render::{render_frame, EphemeralActors, RenderedItem, VisualSync};
pub use scheduler::StepBudget;
pub use segment::{CapacityRule, ConveyorTier, Segment, SegmentConfig, SegmentPath};
pub use spatial::{Observer, ObserverGrid, ObserverId};
pub use splitter::Splitter;
pub use storage::{Chest, ItemStorage, SideAccess, StorageView};
pub use sync::{Outbound, SegmentSnapshot, SyncRevisionGate};
pub use systems::*;
pub use transfer::StepReport;
pub use world::WorldSnapshot;
