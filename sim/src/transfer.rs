//! Transfer arbitration for one discrete step of one network.
//!
//! ## Phases
//!
//! 1. **Propose** - every due belt whose head sits at the output edge names
//!    a destination: the strictly linked downstream belt, or failing that
//!    the storage behind its output face (simulated without mutation).
//! 2. **Reconcile** - each due belt is previewed as if its proposed pop and
//!    one shift had happened. A proposal into a belt whose preview cannot
//!    land one more unit is revoked, and so is every proposal that loses
//!    the claim on a shared destination. Revocations change previews, so
//!    this repeats until nothing changes, at most once per due belt.
//! 3. **Commit** - surviving pops are taken. Storage inserts are committed
//!    immediately; belt hand-offs are held until after the advance.
//! 4. **Advance** - every due belt advances one slot.
//! 5. **Land** - held hand-offs are enqueued at their destination tails.
//! 6. **Pull** - due belts with a free tail pull one unit from storage
//!    behind their input face, probing before extracting.
//!
//! Nothing committed is ever rolled back. A commit that fails after a
//! successful simulation drops the unit into the world instead of losing or
//! duplicating it.
//!
//! ## Tie-break
//!
//! When several sources claim one destination, the source feeding the
//! destination's primary input wins, then side inputs in declaration
//! order, then network sort order.

use crate::grid::{Facing, GridPos};
use crate::host::WorldGrid;
use crate::item::{ItemKind, ItemStack, ItemUnit};
use crate::network::strict_output_with_priority;
use crate::queue::ShiftPreview;
use crate::storage::StorageView;
use std::collections::{HashMap, HashSet};
use tracing::{trace, warn};

/// Counters for one or more executed steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepReport {
    /// Units moved belt to belt.
    pub handoffs: u32,
    /// Units delivered into storage.
    pub deliveries: u32,
    /// Units pulled from storage.
    pub pulls: u32,
    /// Proposals revoked during reconciliation.
    pub revoked: u32,
    /// Units dropped into the world after a failed commit.
    pub dropped: u32,
    /// Belts whose items advanced.
    pub advanced: u32,
}

impl StepReport {
    pub fn merge(&mut self, other: StepReport) {
        self.handoffs += other.handoffs;
        self.deliveries += other.deliveries;
        self.pulls += other.pulls;
        self.revoked += other.revoked;
        self.dropped += other.dropped;
        self.advanced += other.advanced;
    }
}

#[derive(Debug, Clone, Copy)]
enum Destination {
    Belt { target: GridPos, priority: usize },
    Storage { cell: GridPos, side: Facing },
}

#[derive(Debug, Clone, Copy)]
struct Proposal {
    source: GridPos,
    kind: ItemKind,
    destination: Destination,
}

/// Execute one step for the due members of a network.
///
/// `due` must be in network sort order; it decides the final tie-break.
pub fn run_network_step<G>(grid: &mut G, due: &[GridPos]) -> StepReport
where
    G: WorldGrid + ?Sized,
{
    let mut report = StepReport::default();
    let proposals = propose(grid, due);
    let accepted = reconcile(grid, due, &proposals, &mut report);

    let mut landing: Vec<(GridPos, ItemUnit)> = Vec::new();
    for proposal in proposals.iter().filter(|p| accepted.contains(&p.source)) {
        let Some(unit) = pop_head(grid, proposal.source) else {
            continue;
        };
        match proposal.destination {
            Destination::Belt { target, .. } => landing.push((target, unit)),
            Destination::Storage { cell, side } => {
                let leftover = grid
                    .storage_at(cell)
                    .map(|storage| StorageView::open(storage, side).insert_one(unit.kind))
                    .unwrap_or(ItemStack::single(unit.kind));
                if leftover.is_empty() {
                    report.deliveries += 1;
                    trace!(source = %proposal.source, %cell, "delivered to storage");
                } else {
                    warn!(source = %proposal.source, %cell, "storage refused a simulated insert");
                    grid.drop_item(cell, leftover, Some(unit.id));
                    report.dropped += 1;
                }
            }
        }
    }

    for &pos in due {
        if let Some(segment) = grid.segment_at_mut(pos) {
            if segment.queue.advance_one_step() {
                segment.mark_dirty();
                report.advanced += 1;
            }
        }
    }

    for (target, unit) in landing {
        let landed = grid
            .segment_at_mut(target)
            .map(|segment| {
                let result = segment.queue.try_enqueue_at_tail(unit);
                if result.is_ok() {
                    segment.mark_dirty();
                }
                result
            })
            .unwrap_or(Err(unit));
        match landed {
            Ok(()) => {
                report.handoffs += 1;
                trace!(%target, id = unit.id.0, "hand-off landed");
            }
            Err(unit) => {
                warn!(%target, id = unit.id.0, "hand-off could not land");
                grid.drop_item(target, ItemStack::single(unit.kind), Some(unit.id));
                report.dropped += 1;
            }
        }
    }

    for &pos in due {
        if pull_from_storage(grid, pos) {
            report.pulls += 1;
        }
    }

    report
}

fn propose<G>(grid: &mut G, due: &[GridPos]) -> Vec<Proposal>
where
    G: WorldGrid + ?Sized,
{
    let mut proposals = Vec::new();
    for &source in due {
        let (kind, downstream, cell, side) = {
            let Some(segment) = grid.segment_at(source) else {
                continue;
            };
            let Some(head) = segment
                .queue
                .peek_head_at_output_edge()
                .filter(|head| head.id.is_some())
            else {
                continue;
            };
            (
                head.kind,
                strict_output_with_priority(grid, source, &segment.config),
                segment.output_target(),
                segment.config.output_side().opposite(),
            )
        };

        if let Some((target, priority)) = downstream {
            if grid.is_loaded(target) {
                proposals.push(Proposal {
                    source,
                    kind,
                    destination: Destination::Belt { target, priority },
                });
            }
            continue;
        }

        if !grid.is_loaded(cell) {
            continue;
        }
        let accepts = grid
            .storage_at(cell)
            .is_some_and(|storage| StorageView::open(storage, side).would_accept(kind));
        if accepts {
            proposals.push(Proposal {
                source,
                kind,
                destination: Destination::Storage { cell, side },
            });
        }
    }
    proposals
}

/// Revoke proposals until every surviving belt hand-off is guaranteed to
/// land. Returns the sources still allowed to pop.
fn reconcile<G>(
    grid: &G,
    due: &[GridPos],
    proposals: &[Proposal],
    report: &mut StepReport,
) -> HashSet<GridPos>
where
    G: WorldGrid + ?Sized,
{
    let due_set: HashSet<GridPos> = due.iter().copied().collect();
    let order: HashMap<GridPos, usize> = due.iter().enumerate().map(|(i, p)| (*p, i)).collect();
    let mut accepted: HashSet<GridPos> = proposals.iter().map(|p| p.source).collect();

    for _ in 0..=due.len() {
        let previews: HashMap<GridPos, (ShiftPreview, usize)> = due
            .iter()
            .filter_map(|&pos| {
                let segment = grid.segment_at(pos)?;
                let preview = segment
                    .queue
                    .preview_after_pop_and_shift(accepted.contains(&pos));
                Some((pos, (preview, segment.capacity())))
            })
            .collect();

        let mut revoke: Vec<GridPos> = Vec::new();
        let mut winners: HashMap<GridPos, (usize, usize, GridPos)> = HashMap::new();
        for proposal in proposals.iter().filter(|p| accepted.contains(&p.source)) {
            let Destination::Belt { target, priority } = proposal.destination else {
                continue;
            };
            let can_land = if due_set.contains(&target) {
                previews
                    .get(&target)
                    .is_some_and(|(preview, capacity)| preview.can_land(*capacity))
            } else {
                grid.segment_at(target)
                    .is_some_and(|segment| segment.queue.can_accept_at_tail())
            };
            if !can_land {
                revoke.push(proposal.source);
                continue;
            }
            let rank = (
                priority,
                order.get(&proposal.source).copied().unwrap_or(usize::MAX),
                proposal.source,
            );
            match winners.get_mut(&target) {
                Some(best) if rank < *best => {
                    revoke.push(best.2);
                    *best = rank;
                }
                Some(_) => revoke.push(proposal.source),
                None => {
                    winners.insert(target, rank);
                }
            }
        }

        if revoke.is_empty() {
            break;
        }
        for source in revoke {
            if accepted.remove(&source) {
                trace!(%source, "hand-off revoked");
                report.revoked += 1;
            }
        }
    }
    accepted
}

fn pop_head<G>(grid: &mut G, pos: GridPos) -> Option<ItemUnit>
where
    G: WorldGrid + ?Sized,
{
    let segment = grid.segment_at_mut(pos)?;
    let unit = segment.queue.pop_head_if_at_output_edge()?;
    segment.mark_dirty();
    Some(unit)
}

/// Pull one unit from storage behind the primary input face.
fn pull_from_storage<G>(grid: &mut G, pos: GridPos) -> bool
where
    G: WorldGrid + ?Sized,
{
    let (cell, side) = {
        let Some(segment) = grid.segment_at(pos) else {
            return false;
        };
        if !segment.queue.can_accept_at_tail() {
            return false;
        }
        let input = segment.config.input_side();
        (pos.relative(input), input.opposite())
    };
    // Upstream belts push; only storage is pulled from.
    if grid.config_at(cell).is_some() || !grid.is_loaded(cell) {
        return false;
    }
    let available = grid
        .storage_at(cell)
        .and_then(|storage| StorageView::open(storage, side).peek_extract_one());
    if available.is_none() {
        return false;
    }
    let Some(kind) = grid
        .storage_at(cell)
        .and_then(|storage| StorageView::open(storage, side).extract_one())
    else {
        return false;
    };

    let unit = grid.item_ids().unit(kind);
    let enqueued = grid
        .segment_at_mut(pos)
        .map(|segment| {
            let result = segment.queue.try_enqueue_at_tail(unit);
            if result.is_ok() {
                segment.mark_dirty();
            }
            result.is_ok()
        })
        .unwrap_or(false);
    if !enqueued {
        warn!(%pos, "pulled unit could not be enqueued");
        grid.drop_item(pos, ItemStack::single(kind), Some(unit.id));
    }
    enqueued
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{test_world, DroppedItems, CellIndex};
    use crate::item::ItemId;
    use crate::segment::SegmentConfig;
    use crate::storage::{Chest, ExternalStorage, ItemStorage, SideAccess};
    use bevy_ecs::world::World;

    const ORE: ItemKind = ItemKind(3);

    fn belt(world: &mut World, pos: GridPos, config: SegmentConfig) {
        assert!(world.set_segment(pos, config));
    }

    fn load(world: &mut World, pos: GridPos) -> ItemId {
        let unit = world.item_ids().unit(ORE);
        let segment = world.segment_at_mut(pos).unwrap();
        segment.queue.try_enqueue_at_tail(unit).unwrap();
        while segment.queue.advance_one_step() {}
        unit.id
    }

    fn ids_at(world: &World, pos: GridPos) -> Vec<(ItemId, usize)> {
        world
            .segment_at(pos)
            .unwrap()
            .queue
            .items()
            .iter()
            .map(|item| (item.id.unwrap(), item.position))
            .collect()
    }

    fn place_device<C: bevy_ecs::component::Component>(world: &mut World, pos: GridPos, device: C) {
        let entity = world.spawn(device).id();
        world.resource_mut::<CellIndex>().insert_device(pos, entity);
    }

    /// Accepts every simulation, refuses every commit.
    struct Fickle;

    impl ItemStorage for Fickle {
        fn access(&self, _side: Facing) -> SideAccess {
            SideAccess::BOTH
        }
        fn try_insert(&mut self, _side: Facing, stack: ItemStack, simulate: bool) -> ItemStack {
            if simulate {
                ItemStack::EMPTY
            } else {
                stack
            }
        }
        fn try_extract(&mut self, _side: Facing, _max: u32, _simulate: bool) -> Option<ItemStack> {
            None
        }
    }

    #[test]
    fn test_handoff_lands_at_tail_without_skipping() {
        let mut world = test_world();
        let a = GridPos::new(0, 0, 0);
        let b = GridPos::new(1, 0, 0);
        let config = SegmentConfig::straight(Facing::East).with_slots(1).with_travel_ticks(1);
        belt(&mut world, a, config.clone());
        belt(&mut world, b, config);
        let id = load(&mut world, a);

        let report = run_network_step(&mut world, &[a, b]);
        assert_eq!(report.handoffs, 1);
        assert!(world.segment_at(a).unwrap().queue.is_empty());
        assert_eq!(ids_at(&world, b), vec![(id, 0)]);
    }

    #[test]
    fn test_shared_destination_goes_to_primary_input() {
        let mut world = test_world();
        let merge = GridPos::new(0, 0, 0);
        let west = GridPos::new(-1, 0, 0);
        let north = GridPos::new(0, 0, -1);
        let one_slot = |facing| SegmentConfig::straight(facing).with_slots(1).with_travel_ticks(1);
        belt(&mut world, merge, one_slot(Facing::East).with_side_input(Facing::North));
        belt(&mut world, west, one_slot(Facing::East));
        belt(&mut world, north, one_slot(Facing::South));
        place_device(&mut world, GridPos::new(1, 0, 0), Chest::new(4, 64));
        let west_id = load(&mut world, west);
        let north_id = load(&mut world, north);

        let mut due = vec![merge, west, north];
        due.sort();
        let first = run_network_step(&mut world, &due);
        assert_eq!(first.handoffs, 1);
        assert_eq!(first.revoked, 1);
        assert_eq!(ids_at(&world, merge), vec![(west_id, 0)]);
        assert_eq!(ids_at(&world, north), vec![(north_id, 0)]);

        // The loser retries once the merge belt drains into the chest.
        let second = run_network_step(&mut world, &due);
        assert_eq!(second.deliveries, 1);
        assert_eq!(second.handoffs, 1);
        assert_eq!(ids_at(&world, merge), vec![(north_id, 0)]);
        assert!(world.segment_at(north).unwrap().queue.is_empty());
        assert!(world.resource::<DroppedItems>().0.is_empty());
    }

    #[test]
    fn test_blocked_chain_holds_everything() {
        let mut world = test_world();
        let cells = [GridPos::new(0, 0, 0), GridPos::new(1, 0, 0), GridPos::new(2, 0, 0)];
        for pos in cells {
            belt(&mut world, pos, SegmentConfig::straight(Facing::East).with_slots(1));
        }
        let ids: Vec<ItemId> = cells.iter().map(|pos| load(&mut world, *pos)).collect();

        let report = run_network_step(&mut world, &cells);
        assert_eq!(report.handoffs, 0);
        assert_eq!(report.dropped, 0);
        for (pos, id) in cells.iter().zip(ids) {
            assert_eq!(ids_at(&world, *pos), vec![(id, 0)]);
        }
    }

    #[test]
    fn test_full_chain_moves_as_one_when_head_drains() {
        let mut world = test_world();
        let cells = [GridPos::new(0, 0, 0), GridPos::new(1, 0, 0)];
        for pos in cells {
            belt(&mut world, pos, SegmentConfig::straight(Facing::East).with_slots(1));
        }
        place_device(&mut world, GridPos::new(2, 0, 0), Chest::new(1, 64));
        let first = load(&mut world, cells[0]);
        load(&mut world, cells[1]);

        let report = run_network_step(&mut world, &cells);
        assert_eq!(report.deliveries, 1);
        assert_eq!(report.handoffs, 1);
        assert!(world.segment_at(cells[0]).unwrap().queue.is_empty());
        assert_eq!(ids_at(&world, cells[1]), vec![(first, 0)]);
    }

    #[test]
    fn test_non_due_target_must_have_free_tail() {
        let mut world = test_world();
        let a = GridPos::new(0, 0, 0);
        let b = GridPos::new(1, 0, 0);
        belt(&mut world, a, SegmentConfig::straight(Facing::East).with_slots(1));
        belt(&mut world, b, SegmentConfig::straight(Facing::East).with_slots(2));
        load(&mut world, a);
        let unit = world.item_ids().unit(ORE);
        world.segment_at_mut(b).unwrap().queue.try_enqueue_at_tail(unit).unwrap();

        let report = run_network_step(&mut world, &[a]);
        assert_eq!(report.handoffs, 0);
        assert_eq!(report.revoked, 1);
        assert_eq!(world.segment_at(a).unwrap().queue.len(), 1);
    }

    #[test]
    fn test_failed_storage_commit_drops_unit() {
        let mut world = test_world();
        let a = GridPos::new(0, 0, 0);
        belt(&mut world, a, SegmentConfig::straight(Facing::East).with_slots(1));
        place_device(&mut world, GridPos::new(1, 0, 0), ExternalStorage(Box::new(Fickle)));
        let id = load(&mut world, a);

        let report = run_network_step(&mut world, &[a]);
        assert_eq!(report.dropped, 1);
        assert!(world.segment_at(a).unwrap().queue.is_empty());
        let dropped = &world.resource::<DroppedItems>().0;
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].id, Some(id));
    }

    #[test]
    fn test_pull_from_chest_behind_input() {
        let mut world = test_world();
        let a = GridPos::new(0, 0, 0);
        belt(&mut world, a, SegmentConfig::straight(Facing::East).with_slots(2));
        let chest = world.spawn(Chest::new(1, 64).with_contents(ORE, 2)).id();
        world.resource_mut::<CellIndex>().insert_device(GridPos::new(-1, 0, 0), chest);

        let first = run_network_step(&mut world, &[a]);
        assert_eq!(first.pulls, 1);
        assert_eq!(world.get::<Chest>(chest).unwrap().count_of(ORE), 1);

        // Tail is occupied until the next advance frees it.
        let second = run_network_step(&mut world, &[a]);
        assert_eq!(second.pulls, 1);
        assert_eq!(world.get::<Chest>(chest).unwrap().count_of(ORE), 0);
        let positions: Vec<usize> = world
            .segment_at(a)
            .unwrap()
            .queue
            .items()
            .iter()
            .map(|item| item.position)
            .collect();
        assert_eq!(positions, vec![1, 0]);
    }

    #[test]
    fn test_report_merge() {
        let mut total = StepReport::default();
        total.merge(StepReport { handoffs: 2, pulls: 1, ..StepReport::default() });
        total.merge(StepReport { handoffs: 1, dropped: 1, ..StepReport::default() });
        assert_eq!(total.handoffs, 3);
        assert_eq!(total.pulls, 1);
        assert_eq!(total.dropped, 1);
    }
}
