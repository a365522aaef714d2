//! Per-segment slot queue.
//!
//! A segment holds `capacity` discrete slots. Position `0` is the tail where
//! items enter, position `capacity - 1` is the head where they leave. Entries
//! are stored head-first, so their positions are strictly decreasing and no
//! two items can ever share or swap a slot.

use crate::item::{ItemId, ItemIdAllocator, ItemKind, ItemUnit};
use serde::{Deserialize, Serialize};

/// One occupied slot.
///
/// `count` is 1 for every item that entered through the engine. Only
/// restored data can carry a stacked entry; `ItemQueue::normalize` splits
/// those apart when free slots exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedItem {
    pub kind: ItemKind,
    pub count: u32,
    pub id: Option<ItemId>,
    pub position: usize,
}

impl QueuedItem {
    pub fn unit(unit: ItemUnit, position: usize) -> Self {
        Self {
            kind: unit.kind,
            count: 1,
            id: Some(unit.id),
            position,
        }
    }
}

/// What a queue would look like after an optional head pop plus one shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftPreview {
    pub tail_empty: bool,
    pub count: usize,
}

impl ShiftPreview {
    /// Whether one more unit could land at the tail after the shift.
    #[inline]
    pub fn can_land(&self, capacity: usize) -> bool {
        self.tail_empty && self.count < capacity
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemQueue {
    capacity: usize,
    items: Vec<QueuedItem>,
}

impl ItemQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: Vec::new(),
        }
    }

    /// Rebuild a queue from untrusted parts.
    ///
    /// Empty entries are discarded, positions are clamped into range and
    /// sorted head-first, and entries that do not fit are returned.
    pub fn restore(capacity: usize, items: Vec<QueuedItem>) -> (Self, Vec<QueuedItem>) {
        let capacity = capacity.max(1);
        let mut items: Vec<QueuedItem> = items
            .into_iter()
            .filter(|item| item.count > 0)
            .map(|mut item| {
                item.position = item.position.min(capacity - 1);
                item
            })
            .collect();
        items.sort_by(|a, b| b.position.cmp(&a.position));
        let overflow = if items.len() > capacity {
            items.split_off(capacity)
        } else {
            Vec::new()
        };
        let mut queue = Self { capacity, items };
        queue.normalize_positions();
        (queue, overflow)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Entries, head first.
    pub fn items(&self) -> &[QueuedItem] {
        &self.items
    }

    #[inline]
    fn last_position(&self) -> usize {
        self.capacity - 1
    }

    pub fn has_item_at(&self, position: usize) -> bool {
        self.items.iter().any(|item| item.position == position)
    }

    /// A unit can enter only when a slot is free and the tail is clear.
    pub fn can_accept_at_tail(&self) -> bool {
        self.items.len() < self.capacity && !self.has_item_at(0)
    }

    /// Place `unit` at position 0, handing it back if the tail is blocked.
    pub fn try_enqueue_at_tail(&mut self, unit: ItemUnit) -> Result<(), ItemUnit> {
        if !self.can_accept_at_tail() {
            return Err(unit);
        }
        self.items.push(QueuedItem::unit(unit, 0));
        Ok(())
    }

    pub fn peek_head(&self) -> Option<&QueuedItem> {
        self.items.first()
    }

    pub fn head_at_output_edge(&self) -> bool {
        self.peek_head()
            .is_some_and(|head| head.position >= self.last_position() && head.count > 0)
    }

    pub fn peek_head_at_output_edge(&self) -> Option<&QueuedItem> {
        if self.head_at_output_edge() {
            self.peek_head()
        } else {
            None
        }
    }

    /// Remove one unit from the head if it sits at the output edge.
    ///
    /// The head must carry an id. A stacked head gives up one unit under
    /// its id and stays behind without one until the next normalize.
    pub fn pop_head_if_at_output_edge(&mut self) -> Option<ItemUnit> {
        if !self.head_at_output_edge() {
            return None;
        }
        let head = self.items.first_mut()?;
        let id = head.id?;
        let unit = ItemUnit {
            kind: head.kind,
            id,
        };
        if head.count > 1 {
            head.count -= 1;
            head.id = None;
        } else {
            self.items.remove(0);
        }
        Some(unit)
    }

    /// Move every item one slot toward the head.
    ///
    /// Entries are visited head-first, so a moving train advances together
    /// and an item only holds when the slot in front of it stays occupied.
    pub fn advance_one_step(&mut self) -> bool {
        let last = self.last_position();
        let mut claimed = vec![false; self.capacity];
        let mut changed = false;
        for item in &mut self.items {
            let current = item.position.min(last);
            let desired = (current + 1).min(last);
            let next = if claimed[desired] { current } else { desired };
            claimed[next] = true;
            if next != item.position {
                item.position = next;
                changed = true;
            }
        }
        changed
    }

    /// Simulate an optional head pop followed by one shift pass.
    pub fn preview_after_pop_and_shift(&self, pop_head: bool) -> ShiftPreview {
        let last = self.last_position();
        let mut occupied = vec![false; self.capacity];
        for item in &self.items {
            occupied[item.position.min(last)] = true;
        }
        if pop_head && self.head_at_output_edge() {
            occupied[last] = false;
        }
        for position in (0..last).rev() {
            if occupied[position] && !occupied[position + 1] {
                occupied[position + 1] = true;
                occupied[position] = false;
            }
        }
        ShiftPreview {
            tail_empty: !occupied[0],
            count: occupied.iter().filter(|slot| **slot).count(),
        }
    }

    /// Change capacity, remapping items by fractional progress.
    ///
    /// Entries that no longer fit are passed to `overflow` tail-first.
    pub fn resize(&mut self, new_capacity: usize, mut overflow: impl FnMut(QueuedItem)) -> bool {
        let new_capacity = new_capacity.max(1);
        if new_capacity == self.capacity {
            return false;
        }
        let old = self.capacity as f64;
        let new = new_capacity as f64;
        for item in &mut self.items {
            let current = item.position.min(self.capacity - 1) as f64;
            let progress = (current + 0.5) / old;
            let mapped = (progress * new).floor().max(0.0) as usize;
            item.position = mapped.min(new_capacity - 1);
        }
        if self.items.len() > new_capacity {
            for dropped in self.items.split_off(new_capacity).into_iter().rev() {
                overflow(dropped);
            }
        }
        self.capacity = new_capacity;
        self.normalize_positions();
        true
    }

    /// Restore every invariant: compact, assign ids, split stacks.
    ///
    /// A stacked entry is split one unit at a time into free slots. Units
    /// that do not fit stay stacked until a later pass finds room.
    pub fn normalize(&mut self, ids: &ItemIdAllocator) -> bool {
        let before = self.items.clone();

        self.items.retain(|item| item.count > 0);
        self.items.sort_by(|a, b| b.position.cmp(&a.position));

        let original_len = self.items.len();
        for index in 0..original_len {
            if self.items[index].id.is_none() {
                self.items[index].id = Some(ids.allocate());
            }
            while self.items[index].count > 1 && self.items.len() < self.capacity {
                self.items[index].count -= 1;
                let kind = self.items[index].kind;
                self.items.push(QueuedItem::unit(ids.unit(kind), 0));
            }
        }

        self.normalize_positions();
        before != self.items
    }

    /// Clamp positions so they stay strictly decreasing and leave room
    /// for every entry behind.
    fn normalize_positions(&mut self) {
        let last = self.last_position();
        let count = self.items.len();
        let mut previous_max = last;
        for (seen, item) in self.items.iter_mut().enumerate() {
            let lower = last.min(count.saturating_sub(seen + 1));
            let upper = lower.max(previous_max);
            let clamped = item.position.clamp(lower, upper);
            item.position = clamped;
            previous_max = clamped.saturating_sub(1);
        }
    }

    /// Remove and return every entry, head first.
    pub fn drain(&mut self) -> Vec<QueuedItem> {
        std::mem::take(&mut self.items)
    }

    /// Highest id present, used to bump the allocator after a load.
    pub fn max_id(&self) -> Option<ItemId> {
        self.items.iter().filter_map(|item| item.id).max()
    }
}
