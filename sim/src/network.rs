//! Strict adjacency and network discovery.
//!
//! Two belts are linked only when both agree: the upstream belt's output
//! target is the downstream host cell, and one of the downstream input
//! faces points back at the upstream output cell. A belt merely pointing at
//! another is not enough.

use crate::grid::GridPos;
use crate::host::{Topology, WorldGrid};
use crate::segment::SegmentConfig;
use std::collections::{HashSet, VecDeque};

/// Host cell of the belt `host` hands off into.
pub fn strict_output<T>(topology: &T, host: GridPos, config: &SegmentConfig) -> Option<GridPos>
where
    T: Topology + ?Sized,
{
    strict_output_with_priority(topology, host, config).map(|(downstream, _)| downstream)
}

/// Like [`strict_output`], also returning which downstream input face is
/// used (0 is the primary input).
pub fn strict_output_with_priority<T>(
    topology: &T,
    host: GridPos,
    config: &SegmentConfig,
) -> Option<(GridPos, usize)>
where
    T: Topology + ?Sized,
{
    let output_cell = config.path.output_cell(host);
    let target = config.output_target(host);
    let (downstream, downstream_config) = topology.config_at(target)?;
    if downstream == host || downstream != target {
        return None;
    }
    let priority = downstream_config
        .input_targets(downstream)
        .position(|cell| cell == output_cell)?;
    Some((downstream, priority))
}

/// Host cells of every belt that hands off into `host`, by input priority.
pub fn strict_inputs<T>(topology: &T, host: GridPos, config: &SegmentConfig) -> Vec<GridPos>
where
    T: Topology + ?Sized,
{
    config
        .input_targets(host)
        .filter_map(|cell| {
            let (upstream, upstream_config) = topology.config_at(cell)?;
            let linked = upstream != host
                && upstream_config.path.output_cell(upstream) == cell
                && upstream_config.output_target(upstream) == host;
            linked.then_some(upstream)
        })
        .collect()
}

/// Every loaded belt strictly connected to `seed`, in sort order.
///
/// Returns an empty list when `seed` holds no loaded belt.
pub fn collect_network<G>(grid: &G, seed: GridPos) -> Vec<GridPos>
where
    G: WorldGrid + ?Sized,
{
    let Some((start, _)) = grid.config_at(seed) else {
        return Vec::new();
    };
    if !grid.is_loaded(start) {
        return Vec::new();
    }

    let mut visited = HashSet::from([start]);
    let mut frontier = VecDeque::from([start]);
    while let Some(host) = frontier.pop_front() {
        let Some((_, config)) = grid.config_at(host) else {
            continue;
        };
        let neighbours = strict_output(grid, host, config)
            .into_iter()
            .chain(strict_inputs(grid, host, config));
        for neighbour in neighbours {
            if grid.is_loaded(neighbour) && visited.insert(neighbour) {
                frontier.push_back(neighbour);
            }
        }
    }

    let mut members: Vec<GridPos> = visited.into_iter().collect();
    members.sort();
    members
}
