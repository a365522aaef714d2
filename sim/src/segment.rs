//! Segment configuration and state.
//!
//! A segment is one belt: a path through one or two cells, a slot queue
//! sized from that path, and the scheduling state that drives it. Fixed
//! and curved belts share this one engine and only differ in how their
//! capacity is derived.

use crate::curve::{estimate_length_units, BeltCurve, Vec3};
use crate::error::BeltError;
use crate::grid::{Facing, GridPos};
use crate::item::{ItemIdAllocator, ItemKind, ItemStack, ItemUnit};
use crate::queue::{ItemQueue, QueuedItem};
use crate::scheduler::StepBudget;
use crate::storage::{ItemStorage, SideAccess};
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

/// Slots in a fixed one-cell belt unless configured otherwise.
pub const DEFAULT_FIXED_SLOTS: usize = 5;

/// Slots per block of curved belt.
pub const DEFAULT_SLOTS_PER_UNIT: usize = 3;

/// Distance from a cell centre to its face.
const EDGE_OFFSET: f64 = 0.5;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Speed tiers. Higher marks need fewer ticks to cross one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConveyorTier {
    #[default]
    Mk1,
    Mk2,
    Mk3,
    Mk4,
    Mk5,
    Mk6,
}

impl ConveyorTier {
    pub fn travel_ticks_per_unit(self) -> u32 {
        match self {
            ConveyorTier::Mk1 => 60,
            ConveyorTier::Mk2 => 30,
            ConveyorTier::Mk3 => 15,
            ConveyorTier::Mk4 => 7,
            ConveyorTier::Mk5 => 3,
            ConveyorTier::Mk6 => 1,
        }
    }
}

/// Where a belt runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentPath {
    /// One cell. Items enter through `input` and leave through `output`.
    Cell { input: Facing, output: Facing },
    /// From the host cell, heading `start_facing`, to the `end` cell,
    /// leaving it through `end_facing`.
    Curve {
        start_facing: Facing,
        end: GridPos,
        end_facing: Facing,
    },
}

impl Default for SegmentPath {
    fn default() -> Self {
        SegmentPath::Cell {
            input: Facing::South,
            output: Facing::North,
        }
    }
}

impl SegmentPath {
    /// Face of the host cell that items enter through.
    pub fn input_side(&self) -> Facing {
        match *self {
            SegmentPath::Cell { input, .. } => input,
            SegmentPath::Curve { start_facing, .. } => start_facing.opposite(),
        }
    }

    /// Face of the output cell that items leave through.
    pub fn output_side(&self) -> Facing {
        match *self {
            SegmentPath::Cell { output, .. } => output,
            SegmentPath::Curve { end_facing, .. } => end_facing,
        }
    }

    /// Cell holding the head slot.
    pub fn output_cell(&self, host: GridPos) -> GridPos {
        match *self {
            SegmentPath::Cell { .. } => host,
            SegmentPath::Curve { end, .. } => end,
        }
    }

    /// Every cell the belt occupies, host first.
    pub fn cells(&self, host: GridPos) -> Vec<GridPos> {
        match *self {
            SegmentPath::Curve { end, .. } if end != host => vec![host, end],
            _ => vec![host],
        }
    }

    pub fn start_anchor(&self, host: GridPos) -> Vec3 {
        host.center() + self.input_side().vector() * EDGE_OFFSET
    }

    pub fn end_anchor(&self, host: GridPos) -> Vec3 {
        self.output_cell(host).center() + self.output_side().vector() * EDGE_OFFSET
    }

    /// Direction of travel at the start anchor.
    pub fn start_direction(&self) -> Vec3 {
        self.input_side().opposite().vector()
    }

    /// Direction of travel at the end anchor.
    pub fn end_direction(&self) -> Vec3 {
        self.output_side().vector()
    }

    /// World point at `progress` in `[0, 1]` from the start anchor.
    pub fn sample(&self, host: GridPos, progress: f64) -> Vec3 {
        let start = self.start_anchor(host);
        let end = self.end_anchor(host);
        match self {
            SegmentPath::Cell { .. } => start.lerp(end, progress.clamp(0.0, 1.0)),
            SegmentPath::Curve { .. } => {
                BeltCurve::new(start, self.start_direction(), end, self.end_direction())
                    .sample(progress)
            }
        }
    }
}

/// How the slot count is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapacityRule {
    Fixed(usize),
    CurveEstimate { slots_per_unit: usize },
}

impl Default for CapacityRule {
    fn default() -> Self {
        CapacityRule::Fixed(DEFAULT_FIXED_SLOTS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentConfig {
    pub path: SegmentPath,
    pub capacity: CapacityRule,
    pub travel_ticks_per_unit: u32,
    /// Extra host faces that accept hand-offs, in priority order after the
    /// primary input.
    #[serde(default)]
    pub side_inputs: Vec<Facing>,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            path: SegmentPath::default(),
            capacity: CapacityRule::default(),
            travel_ticks_per_unit: ConveyorTier::Mk1.travel_ticks_per_unit(),
            side_inputs: Vec::new(),
        }
    }
}

impl SegmentConfig {
    /// One-cell belt moving items toward `facing`.
    pub fn straight(facing: Facing) -> Self {
        Self {
            path: SegmentPath::Cell {
                input: facing.opposite(),
                output: facing,
            },
            ..Self::default()
        }
    }

    /// Curved belt from the host cell to `end`.
    pub fn curve(start_facing: Facing, end: GridPos, end_facing: Facing) -> Self {
        Self {
            path: SegmentPath::Curve {
                start_facing,
                end,
                end_facing,
            },
            capacity: CapacityRule::CurveEstimate {
                slots_per_unit: DEFAULT_SLOTS_PER_UNIT,
            },
            ..Self::default()
        }
    }

    pub fn with_slots(mut self, slots: usize) -> Self {
        self.capacity = CapacityRule::Fixed(slots);
        self
    }

    pub fn with_tier(mut self, tier: ConveyorTier) -> Self {
        self.travel_ticks_per_unit = tier.travel_ticks_per_unit();
        self
    }

    pub fn with_travel_ticks(mut self, ticks: u32) -> Self {
        self.travel_ticks_per_unit = ticks;
        self
    }

    pub fn with_side_input(mut self, side: Facing) -> Self {
        self.side_inputs.push(side);
        self
    }

    /// Reject shapes the engine cannot run.
    pub fn validate(&self, host: GridPos) -> Result<(), BeltError> {
        if self.travel_ticks_per_unit == 0 {
            return Err(BeltError::InvalidConfig(
                "travel ticks per unit must be at least 1".into(),
            ));
        }
        match self.path {
            SegmentPath::Cell { input, output } if input == output => {
                return Err(BeltError::InvalidConfig(format!(
                    "input and output share the {input:?} face"
                )));
            }
            SegmentPath::Curve {
                start_facing,
                end,
                end_facing,
            } => {
                if !start_facing.is_horizontal() || !end_facing.is_horizontal() {
                    return Err(BeltError::InvalidConfig(
                        "curved belts must start and end on horizontal faces".into(),
                    ));
                }
                if end == host {
                    return Err(BeltError::InvalidConfig(
                        "curved belt ends in its own host cell".into(),
                    ));
                }
            }
            _ => {}
        }
        if self.side_inputs.contains(&self.path.output_side()) {
            return Err(BeltError::InvalidConfig(
                "a side input cannot use the output face".into(),
            ));
        }
        Ok(())
    }

    #[inline]
    pub fn travel_ticks(&self) -> u32 {
        self.travel_ticks_per_unit.max(1)
    }

    pub fn input_side(&self) -> Facing {
        self.path.input_side()
    }

    pub fn output_side(&self) -> Facing {
        self.path.output_side()
    }

    /// Input faces, primary first.
    pub fn input_sides(&self) -> impl Iterator<Item = Facing> + '_ {
        std::iter::once(self.path.input_side()).chain(
            self.side_inputs
                .iter()
                .copied()
                .filter(|side| *side != self.path.input_side()),
        )
    }

    /// Cells an upstream belt must end in to feed this one, primary first.
    pub fn input_targets(&self, host: GridPos) -> impl Iterator<Item = GridPos> + '_ {
        self.input_sides().map(move |side| host.relative(side))
    }

    /// Priority of `side` among the input faces, lower wins.
    pub fn input_priority(&self, side: Facing) -> Option<usize> {
        self.input_sides().position(|candidate| candidate == side)
    }

    /// Cell the head slot hands off into.
    pub fn output_target(&self, host: GridPos) -> GridPos {
        self.path.output_cell(host).relative(self.path.output_side())
    }

    /// Blocks spanned, used to scale the step rate.
    pub fn length_units(&self, host: GridPos) -> usize {
        match self.capacity {
            CapacityRule::Fixed(_) => 1,
            CapacityRule::CurveEstimate { .. } => estimate_length_units(
                self.path.start_anchor(host),
                self.path.start_direction(),
                self.path.end_anchor(host),
                self.path.end_direction(),
            ),
        }
    }

    pub fn slot_count(&self, length_units: usize) -> usize {
        match self.capacity {
            CapacityRule::Fixed(slots) => slots.max(1),
            CapacityRule::CurveEstimate { slots_per_unit } => {
                length_units.max(1) * slots_per_unit.max(1)
            }
        }
    }

    /// Minimum ticks between two broadcasts of the same segment.
    pub fn sync_interval(&self) -> u64 {
        (self.travel_ticks() as u64 / 2).max(1)
    }
}

/// Discrete steps a segment earns per host tick.
pub fn steps_per_tick(capacity: usize, length_units: usize, travel_ticks: u32) -> f64 {
    capacity.max(1) as f64 / (length_units.max(1) as f64 * travel_ticks.max(1) as f64)
}

// ============================================================================
// SEGMENT COMPONENT
// ============================================================================

/// One belt in the authoritative world.
#[derive(Component, Debug, Clone)]
pub struct Segment {
    /// Host cell.
    pub pos: GridPos,
    pub config: SegmentConfig,
    pub length_units: usize,
    pub queue: ItemQueue,
    pub budget: StepBudget,
    /// Bumped on every broadcast.
    pub revision: u64,
    /// Queue changed since the last broadcast.
    pub dirty: bool,
    pub last_broadcast: Option<u64>,
}

impl Segment {
    /// New empty segment whose budget clock starts at `now`.
    pub fn new(pos: GridPos, config: SegmentConfig, now: u64) -> Self {
        let length_units = config.length_units(pos);
        let capacity = config.slot_count(length_units);
        Self {
            pos,
            config,
            length_units,
            queue: ItemQueue::new(capacity),
            budget: StepBudget::seeded(now),
            revision: 0,
            dirty: true,
            last_broadcast: None,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn steps_per_tick(&self) -> f64 {
        steps_per_tick(
            self.capacity(),
            self.length_units,
            self.config.travel_ticks(),
        )
    }

    pub fn output_target(&self) -> GridPos {
        self.config.output_target(self.pos)
    }

    pub fn output_cell(&self) -> GridPos {
        self.config.path.output_cell(self.pos)
    }

    pub fn cells(&self) -> Vec<GridPos> {
        self.config.path.cells(self.pos)
    }

    /// Swap in a new configuration, remapping items into the new capacity.
    /// Items that no longer fit go to `overflow`.
    pub fn reconfigure(&mut self, config: SegmentConfig, overflow: impl FnMut(QueuedItem)) {
        let length_units = config.length_units(self.pos);
        let capacity = config.slot_count(length_units);
        self.config = config;
        self.length_units = length_units;
        self.queue.resize(capacity, overflow);
        self.dirty = true;
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Storage-style access to this belt as seen from `side` of `cell`.
    pub fn port(&mut self, cell: GridPos, ids: ItemIdAllocator) -> SegmentPort<'_> {
        SegmentPort {
            segment: self,
            cell,
            ids,
        }
    }
}

/// A segment seen as external storage from one of its cells.
///
/// Units go in only through an input face of the host cell, one at a time
/// into the tail. They come out only through the output face, and only the
/// head once it reaches the output edge.
pub struct SegmentPort<'a> {
    segment: &'a mut Segment,
    cell: GridPos,
    ids: ItemIdAllocator,
}

impl ItemStorage for SegmentPort<'_> {
    fn access(&self, side: Facing) -> SideAccess {
        let config = &self.segment.config;
        SideAccess {
            insert: self.cell == self.segment.pos && config.input_priority(side).is_some(),
            extract: self.cell == self.segment.output_cell() && side == config.output_side(),
        }
    }

    fn try_insert(&mut self, side: Facing, stack: ItemStack, simulate: bool) -> ItemStack {
        if stack.is_empty()
            || !self.access(side).insert
            || !self.segment.queue.can_accept_at_tail()
        {
            return stack;
        }
        if !simulate {
            let unit = self.ids.unit(stack.kind);
            if self.segment.queue.try_enqueue_at_tail(unit).is_err() {
                return stack;
            }
            self.segment.mark_dirty();
        }
        ItemStack::new(stack.kind, stack.count - 1)
    }

    fn try_extract(&mut self, side: Facing, max: u32, simulate: bool) -> Option<ItemStack> {
        if max == 0 || !self.access(side).extract {
            return None;
        }
        let kind: ItemKind = self.segment.queue.peek_head_at_output_edge()?.kind;
        if simulate {
            return Some(ItemStack::single(kind));
        }
        let unit: ItemUnit = self.segment.queue.pop_head_if_at_output_edge()?;
        self.segment.mark_dirty();
        Some(ItemStack::single(unit.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiers_map_to_travel_ticks() {
        let ticks: Vec<u32> = [
            ConveyorTier::Mk1,
            ConveyorTier::Mk2,
            ConveyorTier::Mk3,
            ConveyorTier::Mk4,
            ConveyorTier::Mk5,
            ConveyorTier::Mk6,
        ]
        .iter()
        .map(|tier| tier.travel_ticks_per_unit())
        .collect();
        assert_eq!(ticks, vec![60, 30, 15, 7, 3, 1]);
    }

    #[test]
    fn test_straight_targets() {
        let host = GridPos::new(0, 0, 0);
        let config = SegmentConfig::straight(Facing::East);
        assert_eq!(config.output_target(host), GridPos::new(1, 0, 0));
        assert_eq!(
            config.input_targets(host).collect::<Vec<_>>(),
            vec![GridPos::new(-1, 0, 0)]
        );
        assert_eq!(config.length_units(host), 1);
        assert_eq!(config.slot_count(1), DEFAULT_FIXED_SLOTS);
    }

    #[test]
    fn test_curve_capacity_scales_with_length() {
        let host = GridPos::new(0, 0, 0);
        let short = SegmentConfig::curve(Facing::East, GridPos::new(1, 0, 0), Facing::East);
        let long = SegmentConfig::curve(Facing::East, GridPos::new(6, 0, 0), Facing::East);
        let short_len = short.length_units(host);
        let long_len = long.length_units(host);
        assert!(long_len > short_len);
        assert_eq!(short.slot_count(short_len), short_len * DEFAULT_SLOTS_PER_UNIT);
        assert_eq!(long.output_target(host), GridPos::new(7, 0, 0));
    }

    #[test]
    fn test_steps_per_tick_formula() {
        assert!((steps_per_tick(3, 1, 10) - 0.3).abs() < 1e-12);
        assert!((steps_per_tick(6, 2, 10) - 0.3).abs() < 1e-12);
        assert_eq!(steps_per_tick(1, 1, 0), 1.0);
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        let host = GridPos::new(0, 0, 0);
        let folded = SegmentConfig {
            path: SegmentPath::Cell {
                input: Facing::East,
                output: Facing::East,
            },
            ..SegmentConfig::default()
        };
        assert!(folded.validate(host).is_err());
        let vertical = SegmentConfig::curve(Facing::Up, GridPos::new(2, 0, 0), Facing::East);
        assert!(vertical.validate(host).is_err());
        let stalled = SegmentConfig::straight(Facing::North).with_travel_ticks(0);
        assert!(stalled.validate(host).is_err());
        assert!(SegmentConfig::straight(Facing::North).validate(host).is_ok());
    }

    #[test]
    fn test_port_is_side_gated() {
        let ids = ItemIdAllocator::default();
        let host = GridPos::new(0, 0, 0);
        let mut segment = Segment::new(host, SegmentConfig::straight(Facing::East).with_slots(1), 0);
        let stack = ItemStack::new(ItemKind(4), 3);

        let mut port = segment.port(host, ids.clone());
        assert_eq!(port.try_insert(Facing::North, stack, true), stack);
        assert_eq!(port.try_insert(Facing::West, stack, true).count, 2);
        assert_eq!(port.try_insert(Facing::West, stack, false).count, 2);
        assert_eq!(port.try_insert(Facing::West, stack, true), stack);

        // Single slot: the inserted unit already sits at the output edge.
        assert_eq!(port.try_extract(Facing::West, 1, true), None);
        assert_eq!(
            port.try_extract(Facing::East, 1, false),
            Some(ItemStack::single(ItemKind(4)))
        );
        assert!(segment.queue.is_empty());
    }

    #[test]
    fn test_reconfigure_reports_overflow() {
        let ids = ItemIdAllocator::default();
        let host = GridPos::new(0, 0, 0);
        let mut segment = Segment::new(host, SegmentConfig::straight(Facing::East).with_slots(2), 0);
        segment.queue.try_enqueue_at_tail(ids.unit(ItemKind(1))).unwrap();
        segment.queue.advance_one_step();
        segment.queue.try_enqueue_at_tail(ids.unit(ItemKind(2))).unwrap();

        let mut dropped = Vec::new();
        segment.reconfigure(SegmentConfig::straight(Facing::East).with_slots(1), |item| {
            dropped.push(item.kind)
        });
        assert_eq!(segment.capacity(), 1);
        assert_eq!(dropped, vec![ItemKind(2)]);
    }
}
