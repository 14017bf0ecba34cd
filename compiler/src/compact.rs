// compact.rs — Per-level grouping and level renumbering
//
// Grouping makes each level contiguous in program order by moving every
// member of a level in front of that level's last member. Unleveled nodes
// between a member and that anchor which read the member's results travel
// with it. Renumbering folds
// consecutive original levels into output stages of at least `min_gran`
// levels, stretching a stage as far as a recorded merge requires.
//
// Preconditions: top-level dataflow nodes carry levels; for every level L > 1
//                the last node at L precedes the last node at L - 1; no
//                leveled node reads results of a node at a lower level.
// Postconditions: leveled nodes appear in non-increasing level order;
//                 renumbered levels form a contiguous range from 1.
// Failure modes: none.
// Side effects: mutates node order and node levels of the region.

use std::collections::BTreeMap;

use tracing::debug;

use crate::id::NodeId;
use crate::ir::Region;

/// Leveled top-level nodes grouped by level, each group in program order.
pub fn level_groups(region: &Region) -> BTreeMap<u32, Vec<NodeId>> {
    let mut groups: BTreeMap<u32, Vec<NodeId>> = BTreeMap::new();
    for &id in &region.body {
        if let Some(level) = region.node(id).level {
            groups.entry(level).or_default().push(id);
        }
    }
    groups
}

/// `node` followed by the unleveled nodes between it and `anchor` that read
/// its results, directly or through each other.
fn dependents_before(region: &Region, node: NodeId, anchor: NodeId) -> Vec<NodeId> {
    let mut carried = vec![node];
    let (Some(from), Some(to)) = (region.position(node), region.position(anchor)) else {
        return carried;
    };
    for &id in region.body.iter().take(to).skip(from + 1) {
        if region.node(id).level.is_some() {
            continue;
        }
        let mut reads = false;
        region.walk(id, &mut |n| {
            reads |= n.operands.iter().any(|&v| {
                region
                    .value(v)
                    .defining_node()
                    .is_some_and(|def| carried.contains(&region.top_level_ancestor(def)))
            });
        });
        if reads {
            carried.push(id);
        }
    }
    carried
}

/// Move each level's members directly in front of its last member, taking
/// their unleveled readers along. Returns the number of nodes moved.
pub fn group_levels(region: &mut Region) -> usize {
    let mut moved = 0;
    for (_, members) in level_groups(region) {
        let Some((&anchor, rest)) = members.split_last() else {
            continue;
        };
        for &member in rest {
            for node in dependents_before(region, member, anchor) {
                if region.move_before(node, anchor) {
                    moved += 1;
                }
            }
        }
    }
    moved
}

/// Output stage for each original level `1..=max_level` (index 0 unused).
///
/// A countdown starts at `min_gran` and drops by one per level; the stage
/// advances when it reaches zero. At a level where a merge starts the
/// countdown is raised so that the whole merge span stays in one stage.
pub fn stage_map(max_level: u32, merge_targets: &BTreeMap<u32, u32>, min_gran: u32) -> Vec<u32> {
    let min_gran = min_gran.max(1);
    let mut stages = vec![0; max_level as usize + 1];
    let mut stage = 1;
    let mut countdown = min_gran;
    for level in 1..=max_level {
        countdown -= 1;
        if let Some(&target) = merge_targets.get(&level) {
            countdown = countdown.max(target.saturating_sub(level));
        }
        stages[level as usize] = stage;
        if countdown == 0 {
            countdown = min_gran;
            stage += 1;
        }
    }
    stages
}

/// Relabel every top-level level through `stage_map`. Returns the stage count.
pub fn renumber(region: &mut Region, merge_targets: &BTreeMap<u32, u32>, min_gran: u32) -> u32 {
    let max_level = region
        .body
        .iter()
        .filter_map(|&n| region.node(n).level)
        .max()
        .unwrap_or(0);
    let stages = stage_map(max_level, merge_targets, min_gran);
    let body = region.body.clone();
    for id in body {
        let node = region.node_mut(id);
        if let Some(level) = node.level {
            node.level = stages.get(level as usize).copied();
        }
    }
    let count = stages.last().copied().unwrap_or(0);
    debug!(
        region = %region.name,
        levels = max_level,
        stages = count,
        min_gran,
        "levels renumbered"
    );
    count
}
