//! Item payloads and the per-world item id allocator.

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Opaque payload reference. The engine never interprets it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct ItemKind(pub u32);

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kind#{}", self.0)
    }
}

/// Unique identity of an item unit while it exists in the world.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ItemId(pub u64);

/// A counted stack, the currency of external storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ItemStack {
    pub kind: ItemKind,
    pub count: u32,
}

impl ItemStack {
    pub const EMPTY: ItemStack = ItemStack {
        kind: ItemKind(0),
        count: 0,
    };

    pub fn new(kind: ItemKind, count: u32) -> Self {
        Self { kind, count }
    }

    pub fn single(kind: ItemKind) -> Self {
        Self::new(kind, 1)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// One item in transit on a belt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemUnit {
    pub kind: ItemKind,
    pub id: ItemId,
}

/// Monotonic id source shared by everything in one world.
///
/// Cloning yields another handle to the same counter, so systems can hold
/// one while mutably borrowing segments out of the same `World`.
#[derive(Resource, Debug, Clone)]
pub struct ItemIdAllocator {
    next: Arc<AtomicU64>,
}

impl Default for ItemIdAllocator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl ItemIdAllocator {
    /// Id 0 is reserved as "missing" in persisted data.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: Arc::new(AtomicU64::new(first.max(1))),
        }
    }

    pub fn allocate(&self) -> ItemId {
        ItemId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Make sure future ids are strictly greater than `id`.
    pub fn ensure_above(&self, id: ItemId) {
        self.next.fetch_max(id.0.saturating_add(1), Ordering::Relaxed);
    }

    /// The id the next call to `allocate` will return.
    pub fn peek_next(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }

    pub fn unit(&self, kind: ItemKind) -> ItemUnit {
        ItemUnit {
            kind,
            id: self.allocate(),
        }
    }
}
