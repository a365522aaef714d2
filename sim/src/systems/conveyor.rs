//! Conveyor system - advances every loaded belt network by the steps its
//! members have earned.

use crate::config::BeltConfig;
use crate::grid::GridPos;
use crate::host::{CellIndex, WorldGrid, WorldTick};
use crate::network::collect_network;
use crate::transfer::{run_network_step, StepReport};
use bevy_ecs::prelude::*;
use std::collections::HashSet;
use tracing::{debug, trace};

/// Totals of the most recent conveyor pass.
#[derive(Resource, Debug, Clone, Copy, Default)]
pub struct LastStepReport {
    pub networks: u32,
    pub report: StepReport,
}

/// Due members of one network with the whole steps each still owes.
type PendingNetwork = Vec<(GridPos, u32)>;

/// Normalize each member and bring its budget up to `now`.
fn accrue_budgets<G>(grid: &mut G, members: &[GridPos], now: u64, budget_cap: f64) -> PendingNetwork
where
    G: WorldGrid + ?Sized,
{
    let ids = grid.item_ids();
    let mut pending = Vec::with_capacity(members.len());
    for &pos in members {
        let Some(segment) = grid.segment_at_mut(pos) else {
            continue;
        };
        if segment.queue.normalize(&ids) {
            segment.mark_dirty();
        }
        let spt = segment.steps_per_tick();
        let steps = segment.budget.update(now, spt, budget_cap);
        pending.push((pos, steps));
    }
    pending
}

/// Run step rounds until no member of any network owes a step.
///
/// Each round executes one [`run_network_step`] per network that still has
/// due members, in network order, so networks sharing storage see each
/// other's hand-offs between rounds.
fn run_rounds<G>(grid: &mut G, networks: &mut [PendingNetwork]) -> StepReport
where
    G: WorldGrid + ?Sized,
{
    let mut report = StepReport::default();
    loop {
        let mut stepped = false;
        for network in networks.iter_mut() {
            let due: Vec<GridPos> = network
                .iter()
                .filter(|(_, steps)| *steps > 0)
                .map(|(pos, _)| *pos)
                .collect();
            if due.is_empty() {
                continue;
            }
            stepped = true;
            report.merge(run_network_step(grid, &due));
            for (pos, steps) in network.iter_mut().filter(|(_, steps)| *steps > 0) {
                *steps -= 1;
                if let Some(segment) = grid.segment_at_mut(*pos) {
                    segment.budget.consume_one();
                }
            }
        }
        if !stepped {
            return report;
        }
    }
}

/// Run one pass over a single network.
///
/// Each member is normalized and its budget brought up to `now`. Then
/// rounds of [`run_network_step`] run for the members that still hold a
/// whole step, each round spending one step from every participant.
pub fn run_network_pass<G>(grid: &mut G, members: &[GridPos], now: u64, budget_cap: f64) -> StepReport
where
    G: WorldGrid + ?Sized,
{
    let mut networks = vec![accrue_budgets(grid, members, now, budget_cap)];
    run_rounds(grid, &mut networks)
}

/// Exclusive system: discover every loaded network, accrue budgets, then
/// run step rounds across all of them together.
pub fn conveyor_system(world: &mut World) {
    let Some(hosts) = world.get_resource::<CellIndex>().map(CellIndex::segment_hosts) else {
        return;
    };
    let now = world.get_resource::<WorldTick>().map_or(0, |tick| tick.0);
    let cap = world
        .get_resource::<BeltConfig>()
        .map_or(BeltConfig::default().max_step_budget, |config| config.max_step_budget);

    let mut processed: HashSet<GridPos> = HashSet::new();
    let mut networks: Vec<PendingNetwork> = Vec::new();
    for host in hosts {
        if processed.contains(&host) || !world.is_loaded(host) {
            continue;
        }
        let members = collect_network(world, host);
        processed.extend(members.iter().copied());
        if members.is_empty() {
            continue;
        }
        trace!(%host, members = members.len(), "network collected");
        networks.push(accrue_budgets(world, &members, now, cap));
    }

    let report = run_rounds(world, &mut networks);
    let last = LastStepReport {
        networks: networks.len() as u32,
        report,
    };
    trace!(networks = last.networks, ?report, "conveyor pass");
    if report.dropped > 0 {
        debug!(dropped = report.dropped, "items left the belt system");
    }
    world.insert_resource(last);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Facing;
    use crate::host::{test_world, FrozenCells};
    use crate::item::ItemKind;
    use crate::segment::SegmentConfig;
    use crate::storage::Chest;

    fn load_tail(world: &mut World, pos: GridPos) {
        let unit = world.item_ids().unit(ItemKind(1));
        world
            .segment_at_mut(pos)
            .unwrap()
            .queue
            .try_enqueue_at_tail(unit)
            .unwrap();
    }

    fn head_position(world: &World, pos: GridPos) -> Option<usize> {
        world
            .segment_at(pos)
            .and_then(|segment| segment.queue.peek_head().map(|item| item.position))
    }

    #[test]
    fn test_pass_follows_budget_accrual() {
        let mut world = test_world();
        let pos = GridPos::new(0, 0, 0);
        world.set_segment(pos, SegmentConfig::straight(Facing::East).with_slots(3).with_travel_ticks(10));
        load_tail(&mut world, pos);

        let mut positions = Vec::new();
        for now in 1..=7 {
            run_network_pass(&mut world, &[pos], now, 64.0);
            positions.push(head_position(&world, pos).unwrap());
        }
        assert_eq!(positions, vec![0, 0, 0, 1, 1, 1, 2]);
    }

    #[test]
    fn test_system_skips_frozen_networks() {
        let mut world = test_world();
        world.insert_resource(BeltConfig::default());
        let pos = GridPos::new(0, 0, 0);
        world.set_segment(pos, SegmentConfig::straight(Facing::East).with_slots(2).with_travel_ticks(1));
        load_tail(&mut world, pos);
        world.resource_mut::<FrozenCells>().0.insert(pos);

        for tick in 1..=5 {
            world.resource_mut::<WorldTick>().0 = tick;
            conveyor_system(&mut world);
        }
        assert_eq!(head_position(&world, pos), Some(0));
        assert_eq!(world.resource::<LastStepReport>().networks, 0);
    }

    #[test]
    fn test_system_runs_each_network_once() {
        let mut world = test_world();
        let config = SegmentConfig::straight(Facing::East).with_slots(2).with_travel_ticks(2);
        for x in 0..3 {
            world.set_segment(GridPos::new(x, 0, 0), config.clone());
        }
        world.set_segment(GridPos::new(0, 0, 5), config);
        load_tail(&mut world, GridPos::new(0, 0, 0));

        world.resource_mut::<WorldTick>().0 = 1;
        conveyor_system(&mut world);
        assert_eq!(world.resource::<LastStepReport>().networks, 2);
        assert_eq!(head_position(&world, GridPos::new(0, 0, 0)), Some(1));
    }

    #[test]
    fn test_rounds_interleave_networks_sharing_storage() {
        let mut world = test_world();
        world.insert_resource(BeltConfig::default());
        let hub = GridPos::new(0, 0, 0);
        let sink = GridPos::new(-2, 0, 0);
        let puller = GridPos::new(-1, 0, 0);
        let feeder = GridPos::new(0, 0, 1);
        let mut chests = Vec::new();
        for pos in [hub, sink] {
            let entity = world.spawn(Chest::new(1, 64)).id();
            world.resource_mut::<CellIndex>().insert_device(pos, entity);
            chests.push(entity);
        }
        let one_slot = |facing| SegmentConfig::straight(facing).with_slots(1).with_travel_ticks(1);
        // The puller draws from the hub and sorts ahead of the feeder.
        world.set_segment(puller, one_slot(Facing::West));
        world.set_segment(feeder, one_slot(Facing::North));
        load_tail(&mut world, feeder);

        world.resource_mut::<FrozenCells>().0.extend([puller, feeder]);
        for tick in 1..=5 {
            world.resource_mut::<WorldTick>().0 = tick;
            conveyor_system(&mut world);
        }
        world.resource_mut::<FrozenCells>().0.clear();
        world.resource_mut::<WorldTick>().0 = 6;
        conveyor_system(&mut world);

        assert_eq!(world.get::<Chest>(chests[0]).map(Chest::total), Some(0));
        assert_eq!(world.get::<Chest>(chests[1]).map(Chest::total), Some(1));
        assert!(world.segment_at(puller).unwrap().queue.is_empty());
        assert_eq!(world.resource::<LastStepReport>().networks, 2);
    }
}
