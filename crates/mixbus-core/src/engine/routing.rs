//! Bus routing graph
//!
//! Every channel feeds exactly one destination: another channel (acting as
//! a sub-mix bus) or master. Restricted to channels, the graph must stay a
//! forest so buses can be summed children-first.
//!
//! The index-based helpers write into caller-provided storage and never
//! allocate, so the mixer can rebuild its processing order on the audio
//! thread after a routing command.

use crate::types::{BusTarget, ChannelId};

/// Read access to channel routing, shared by the mixer and the controller mirror
pub trait RoutingGraph {
    /// Destination channel of `id` (`None` when it feeds master or is unknown)
    fn parent_of(&self, id: ChannelId) -> Option<ChannelId>;

    /// Number of channels in the graph
    fn node_count(&self) -> usize;
}

/// Whether routing `node` into `target` would close a loop
///
/// Follows the chain of output buses from the new target; reaching `node`
/// means a cycle. The walk is bounded by the node count so a graph that is
/// already inconsistent cannot hang the caller.
pub fn would_create_cycle<G: RoutingGraph + ?Sized>(graph: &G, node: ChannelId, target: BusTarget) -> bool {
    let BusTarget::Channel(mut current) = target else {
        return false;
    };
    for _ in 0..=graph.node_count() {
        if current == node {
            return true;
        }
        match graph.parent_of(current) {
            Some(parent) => current = parent,
            None => return false,
        }
    }
    true
}

/// Hops from each channel to master (a channel feeding master has depth 0)
pub fn compute_depths(parents: &[Option<usize>], depths: &mut [usize]) {
    let n = parents.len();
    for (node, depth) in depths.iter_mut().enumerate().take(n) {
        let mut hops = 0;
        let mut current = parents[node];
        while let Some(parent) = current {
            hops += 1;
            if hops > n {
                break;
            }
            current = parents[parent];
        }
        *depth = hops;
    }
}

/// Fill `order` with channel indices, deepest first
///
/// A bus is always deeper than nothing it feeds, so every bus appears after
/// all of its contributors. Ties keep creation order. `order` must have
/// capacity for `depths.len()` entries.
pub fn order_by_depth(depths: &[usize], order: &mut Vec<usize>) {
    order.clear();
    order.extend(0..depths.len());
    order.sort_unstable_by(|&a, &b| depths[b].cmp(&depths[a]).then(a.cmp(&b)));
}

/// Decide which channels run this block
///
/// A channel is active when it is not muted, lies on a solo path (itself,
/// a bus it feeds or a channel feeding it is soloed) whenever any solo is
/// engaged, and its destination bus is active. `order` must come from
/// [`order_by_depth`]. Returns whether any channel is soloed.
pub fn resolve_activity(
    parents: &[Option<usize>],
    order: &[usize],
    muted: impl Fn(usize) -> bool,
    soloed: impl Fn(usize) -> bool,
    active: &mut [bool],
) -> bool {
    let n = parents.len();
    let any_solo = (0..n).any(&soloed);

    for node in 0..n {
        active[node] = !any_solo || on_solo_path(parents, node, &soloed);
    }
    // Mark buses that lead to a soloed channel
    if any_solo {
        for node in 0..n {
            if soloed(node) {
                let mut current = parents[node];
                let mut hops = 0;
                while let Some(parent) = current {
                    active[parent] = true;
                    hops += 1;
                    if hops > n {
                        break;
                    }
                    current = parents[parent];
                }
            }
        }
    }
    // Top-down: a muted or inactive bus silences everything feeding it
    for &node in order.iter().rev() {
        let parent_active = parents[node].map_or(true, |p| active[p]);
        active[node] = active[node] && parent_active && !muted(node);
    }
    any_solo
}

/// The node or one of the buses it feeds is soloed
fn on_solo_path(parents: &[Option<usize>], node: usize, soloed: &impl Fn(usize) -> bool) -> bool {
    let mut current = Some(node);
    let mut hops = 0;
    while let Some(n) = current {
        if soloed(n) {
            return true;
        }
        hops += 1;
        if hops > parents.len() {
            return false;
        }
        current = parents[n];
    }
    false
}
