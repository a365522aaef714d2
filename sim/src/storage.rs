//! External storage seen by belts.
//!
//! Anything a belt can feed or drain implements [`ItemStorage`]. Access is
//! always per side: a device may accept insertion on one face and refuse it
//! on another. Belts never call the trait directly, they open a
//! [`StorageView`] for the face they touch and simulate before committing.

use crate::grid::Facing;
use crate::item::{ItemKind, ItemStack};
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

/// What one side of a storage allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SideAccess {
    pub insert: bool,
    pub extract: bool,
}

impl SideAccess {
    pub const BOTH: SideAccess = SideAccess {
        insert: true,
        extract: true,
    };
    pub const NONE: SideAccess = SideAccess {
        insert: false,
        extract: false,
    };
}

/// Non-blocking simulate/commit storage protocol.
pub trait ItemStorage: Send + Sync {
    fn access(&self, side: Facing) -> SideAccess;

    /// Insert as much of `stack` as fits and return the leftover.
    fn try_insert(&mut self, side: Facing, stack: ItemStack, simulate: bool) -> ItemStack;

    /// Take up to `max` units of whatever comes out first.
    fn try_extract(&mut self, side: Facing, max: u32, simulate: bool) -> Option<ItemStack>;
}

/// Capability object for one face of one storage.
pub struct StorageView<'a> {
    storage: &'a mut dyn ItemStorage,
    side: Facing,
    access: SideAccess,
}

impl<'a> StorageView<'a> {
    pub fn open(storage: &'a mut dyn ItemStorage, side: Facing) -> Self {
        let access = storage.access(side);
        Self {
            storage,
            side,
            access,
        }
    }

    pub fn side(&self) -> Facing {
        self.side
    }

    pub fn access(&self) -> SideAccess {
        self.access
    }

    pub fn would_accept(&mut self, kind: ItemKind) -> bool {
        self.access.insert
            && self
                .storage
                .try_insert(self.side, ItemStack::single(kind), true)
                .is_empty()
    }

    /// Commit one unit. Returns the leftover, empty on success.
    pub fn insert_one(&mut self, kind: ItemKind) -> ItemStack {
        let unit = ItemStack::single(kind);
        if !self.access.insert {
            return unit;
        }
        self.storage.try_insert(self.side, unit, false)
    }

    pub fn peek_extract_one(&mut self) -> Option<ItemKind> {
        if !self.access.extract {
            return None;
        }
        self.storage
            .try_extract(self.side, 1, true)
            .filter(|stack| !stack.is_empty())
            .map(|stack| stack.kind)
    }

    pub fn extract_one(&mut self) -> Option<ItemKind> {
        if !self.access.extract {
            return None;
        }
        self.storage
            .try_extract(self.side, 1, false)
            .filter(|stack| !stack.is_empty())
            .map(|stack| stack.kind)
    }
}

// ============================================================================
// CHEST
// ============================================================================

/// Plain slotted container open on every side.
#[derive(Component, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chest {
    slots: Vec<Option<ItemStack>>,
    stack_limit: u32,
    /// Accept only these kinds when set.
    #[serde(default)]
    filter: Option<Vec<ItemKind>>,
}

impl Chest {
    pub fn new(slot_count: usize, stack_limit: u32) -> Self {
        Self {
            slots: vec![None; slot_count.max(1)],
            stack_limit: stack_limit.max(1),
            filter: None,
        }
    }

    pub fn with_filter(mut self, kinds: Vec<ItemKind>) -> Self {
        self.filter = Some(kinds);
        self
    }

    /// Pre-fill, ignoring the filter. Whatever does not fit is discarded.
    pub fn with_contents(mut self, kind: ItemKind, count: u32) -> Self {
        let mut remaining = count;
        for slot in &mut self.slots {
            if remaining == 0 {
                break;
            }
            if slot.is_none() {
                let moved = remaining.min(self.stack_limit);
                *slot = Some(ItemStack::new(kind, moved));
                remaining -= moved;
            }
        }
        self
    }

    pub fn count_of(&self, kind: ItemKind) -> u32 {
        self.slots
            .iter()
            .flatten()
            .filter(|stack| stack.kind == kind)
            .map(|stack| stack.count)
            .sum()
    }

    pub fn total(&self) -> u32 {
        self.slots.iter().flatten().map(|stack| stack.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    fn accepts_kind(&self, kind: ItemKind) -> bool {
        self.filter
            .as_ref()
            .map_or(true, |kinds| kinds.contains(&kind))
    }

    /// Units of `kind` that could still be stored.
    fn room_for(&self, kind: ItemKind) -> u32 {
        self.slots
            .iter()
            .map(|slot| match slot {
                None => self.stack_limit,
                Some(stack) if stack.kind == kind => self.stack_limit.saturating_sub(stack.count),
                Some(_) => 0,
            })
            .sum()
    }
}

impl ItemStorage for Chest {
    fn access(&self, _side: Facing) -> SideAccess {
        SideAccess::BOTH
    }

    fn try_insert(&mut self, _side: Facing, stack: ItemStack, simulate: bool) -> ItemStack {
        if stack.is_empty() || !self.accepts_kind(stack.kind) {
            return stack;
        }
        let accepted = stack.count.min(self.room_for(stack.kind));
        if !simulate && accepted > 0 {
            let limit = self.stack_limit;
            let mut remaining = accepted;
            // Top up matching stacks before opening empty slots.
            for slot in self.slots.iter_mut().flatten() {
                if slot.kind == stack.kind && slot.count < limit {
                    let moved = remaining.min(limit - slot.count);
                    slot.count += moved;
                    remaining -= moved;
                }
            }
            for slot in &mut self.slots {
                if remaining == 0 {
                    break;
                }
                if slot.is_none() {
                    let moved = remaining.min(limit);
                    *slot = Some(ItemStack::new(stack.kind, moved));
                    remaining -= moved;
                }
            }
        }
        ItemStack::new(stack.kind, stack.count - accepted)
    }

    fn try_extract(&mut self, _side: Facing, max: u32, simulate: bool) -> Option<ItemStack> {
        if max == 0 {
            return None;
        }
        let index = self.slots.iter().position(|slot| slot.is_some())?;
        let stack = self.slots[index]?;
        let taken = stack.count.min(max);
        if !simulate {
            let left = stack.count - taken;
            self.slots[index] = (left > 0).then(|| ItemStack::new(stack.kind, left));
        }
        Some(ItemStack::new(stack.kind, taken))
    }
}

/// Host-provided storage with behaviour the engine does not know about.
#[derive(Component)]
pub struct ExternalStorage(pub Box<dyn ItemStorage>);
