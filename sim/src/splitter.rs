//! Three-way splitter.
//!
//! Holds a single unit. Units arrive through the input face and are pushed
//! out round-robin through the three other horizontal faces.

use crate::grid::{Facing, GridPos};
use crate::item::{ItemKind, ItemStack};
use crate::storage::{ItemStorage, SideAccess};
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Component, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Splitter {
    pub pos: GridPos,
    /// Face units arrive through.
    pub input: Facing,
    pub buffer: Option<ItemKind>,
    next_output: usize,
}

impl Splitter {
    pub fn new(pos: GridPos, input: Facing) -> Self {
        Self {
            pos,
            input,
            buffer: None,
            next_output: 0,
        }
    }

    /// Restore with a persisted cursor, wrapped into range.
    pub fn restored(pos: GridPos, input: Facing, buffer: Option<ItemKind>, next: i64) -> Self {
        Self {
            pos,
            input,
            buffer,
            next_output: next.rem_euclid(3) as usize,
        }
    }

    pub fn next_output(&self) -> usize {
        self.next_output
    }

    /// Output faces in round-robin order.
    pub fn outputs(&self) -> [Facing; 3] {
        [
            self.input.counter_clockwise(),
            self.input.opposite(),
            self.input.clockwise(),
        ]
    }

    /// Outputs in the order they are tried this tick.
    pub(crate) fn rotation(&self) -> impl Iterator<Item = (usize, Facing)> + '_ {
        let outputs = self.outputs();
        (0..3).map(move |offset| {
            let index = (self.next_output + offset) % 3;
            (index, outputs[index])
        })
    }

    /// Clear the buffer after it left through output `index`.
    pub(crate) fn emitted(&mut self, index: usize) {
        self.buffer = None;
        self.next_output = (index + 1) % 3;
    }
}

impl ItemStorage for Splitter {
    fn access(&self, side: Facing) -> SideAccess {
        SideAccess {
            insert: side == self.input,
            extract: side.is_horizontal() && side != self.input,
        }
    }

    fn try_insert(&mut self, side: Facing, stack: ItemStack, simulate: bool) -> ItemStack {
        if stack.is_empty() || !self.access(side).insert || self.buffer.is_some() {
            return stack;
        }
        if !simulate {
            self.buffer = Some(stack.kind);
        }
        ItemStack::new(stack.kind, stack.count - 1)
    }

    fn try_extract(&mut self, side: Facing, max: u32, simulate: bool) -> Option<ItemStack> {
        if max == 0 || !self.access(side).extract {
            return None;
        }
        let kind = self.buffer?;
        if !simulate {
            self.buffer = None;
        }
        Some(ItemStack::single(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_order_from_input() {
        let splitter = Splitter::new(GridPos::default(), Facing::West);
        assert_eq!(
            splitter.outputs(),
            [Facing::South, Facing::East, Facing::North]
        );
    }

    #[test]
    fn test_accepts_one_unit_from_input_only() {
        let mut splitter = Splitter::new(GridPos::default(), Facing::West);
        let stack = ItemStack::new(ItemKind(1), 5);
        assert_eq!(splitter.try_insert(Facing::North, stack, false), stack);
        assert_eq!(splitter.try_insert(Facing::West, stack, false).count, 4);
        assert_eq!(splitter.try_insert(Facing::West, stack, true), stack);

        assert_eq!(splitter.try_extract(Facing::West, 1, false), None);
        assert_eq!(splitter.try_extract(Facing::Up, 1, false), None);
        assert_eq!(
            splitter.try_extract(Facing::South, 1, false),
            Some(ItemStack::single(ItemKind(1)))
        );
        assert!(splitter.buffer.is_none());
    }

    #[test]
    fn test_restored_cursor_wraps() {
        let pos = GridPos::default();
        assert_eq!(Splitter::restored(pos, Facing::North, None, 7).next_output(), 1);
        assert_eq!(Splitter::restored(pos, Facing::North, None, -1).next_output(), 2);
    }
}
