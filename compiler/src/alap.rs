// alap.rs — As-late-as-possible level assignment
//
// Walks the top-level nodes in reverse program order and gives each
// dataflow-eligible node `1 + max(level of its successors)`, or 1 when it has
// none. A node whose results reach a dataflow node without forming a
// successor edge (scalar results, or through a layout conversion) is raised
// to at least that node's level, so per-level grouping never moves it past a
// user.
//
// Preconditions: every successor edge points forward in program order.
// Postconditions: every dataflow-eligible top-level node has a level >= 1;
//                 a producer is at least one level above each successor and
//                 no lower than any other dataflow node that reads its results.
// Failure modes: a successor without a level at visit time returns
//                `LegalizeError::TopologyViolation`.
// Side effects: none. Levels are returned, not written into the region.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::error::LegalizeError;
use crate::id::NodeId;
use crate::ir::Region;
use crate::successors::SuccessorMap;
use crate::use_index::UseIndex;

/// Levels keyed by node, in assignment order (reverse program order).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelMap {
    levels: IndexMap<NodeId, u32>,
}

impl LevelMap {
    pub fn get(&self, node: NodeId) -> Option<u32> {
        self.levels.get(&node).copied()
    }

    pub fn set(&mut self, node: NodeId, level: u32) {
        self.levels.insert(node, level);
    }

    pub fn max_level(&self) -> u32 {
        self.levels.values().copied().max().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, u32)> + '_ {
        self.levels.iter().map(|(&n, &l)| (n, l))
    }

    /// Write the levels into the nodes' scheduling field.
    pub fn apply_to(&self, region: &mut Region) {
        for (node, level) in self.iter() {
            region.node_mut(node).level = Some(level);
        }
    }
}

/// Successor edges whose consumer does not come strictly after the producer.
pub fn backward_edges(region: &Region, successors: &SuccessorMap) -> Vec<(NodeId, NodeId)> {
    let pos: HashMap<NodeId, usize> = region
        .body
        .iter()
        .enumerate()
        .map(|(i, &n)| (n, i))
        .collect();
    successors
        .iter()
        .filter(|(producer, succ)| match (pos.get(producer), pos.get(&succ.consumer)) {
            (Some(p), Some(c)) => c <= p,
            _ => true,
        })
        .map(|(producer, succ)| (producer, succ.consumer))
        .collect()
}

pub fn assign_levels(region: &Region, successors: &SuccessorMap) -> Result<LevelMap, LegalizeError> {
    let backward = backward_edges(region, successors);
    if !backward.is_empty() {
        warn!(
            region = %region.name,
            count = backward.len(),
            "region is not in topological order"
        );
    }

    let uses = UseIndex::build(region);
    let mut levels = LevelMap::default();
    // Ordering floor of non-dataflow nodes: the deepest dataflow level their
    // results reach.
    let mut floors: HashMap<NodeId, u32> = HashMap::new();
    let mut raised = 0usize;
    for &id in region.body.iter().rev() {
        let mut floor = 0u32;
        for &result in &region.node(id).results {
            for user in uses.top_level_users(result) {
                if user == id {
                    continue;
                }
                let reach = levels.get(user).or_else(|| floors.get(&user).copied());
                floor = floor.max(reach.unwrap_or(0));
            }
        }
        if !region.node(id).kind.is_dataflow() {
            floors.insert(id, floor);
            continue;
        }
        let mut deepest = 0u32;
        for succ in successors.successors(id) {
            match levels.get(succ.consumer) {
                Some(level) => deepest = deepest.max(level),
                None => {
                    return Err(LegalizeError::TopologyViolation {
                        producer: id,
                        successor: succ.consumer,
                        backward_edges: backward.len(),
                    })
                }
            }
        }
        if floor > deepest + 1 {
            raised += 1;
        }
        levels.set(id, (deepest + 1).max(floor));
    }

    debug!(
        region = %region.name,
        leveled = levels.len(),
        raised,
        max_level = levels.max_level(),
        "levels assigned"
    );
    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::resolve::resolve;
    use crate::successors::{successor_map, Carrier};

    fn region(src: &str) -> Region {
        let program = parse(src).program.expect("parse");
        let mut result = resolve(&program);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        result.module.regions.remove(0)
    }

    #[test]
    fn chain_levels_count_down() {
        let r = region(
            "func @k(%in: memref<4xf32>) {\n\
             \x20 %a = op \"a\"(%in) : memref<4xf32>\n\
             \x20 %b = op \"b\"(%a) : memref<4xf32>\n\
             \x20 %c = op \"c\"(%b) : memref<4xf32>\n\
             \x20 return %c\n\
             }\n",
        );
        let levels = assign_levels(&r, &successor_map(&r)).expect("topological");
        assert_eq!(levels.get(r.body[0]), Some(3));
        assert_eq!(levels.get(r.body[1]), Some(2));
        assert_eq!(levels.get(r.body[2]), Some(1));
        assert_eq!(levels.get(r.body[3]), None);
        assert_eq!(levels.max_level(), 3);
    }

    #[test]
    fn producer_sits_above_deepest_successor() {
        let r = region(
            "func @k(%in: memref<4xf32>) {\n\
             \x20 %a = op \"a\"(%in) : memref<4xf32>\n\
             \x20 %b = op \"b\"(%a) : memref<4xf32>\n\
             \x20 op \"d\"(%a, %b)\n\
             \x20 op \"e\"(%a)\n\
             }\n",
        );
        let levels = assign_levels(&r, &successor_map(&r)).expect("topological");
        assert_eq!(levels.get(r.body[0]), Some(3));
        assert_eq!(levels.get(r.body[1]), Some(2));
        assert_eq!(levels.get(r.body[2]), Some(1));
        assert_eq!(levels.get(r.body[3]), Some(1));
    }

    #[test]
    fn unrelated_nodes_are_level_one() {
        let r = region(
            "func @k(%in: memref<4xf32>) {\n\
             \x20 %c = constant 1 : i32\n\
             \x20 op \"a\"(%in)\n\
             \x20 op \"b\"(%in)\n\
             }\n",
        );
        let levels = assign_levels(&r, &successor_map(&r)).expect("topological");
        assert_eq!(levels.len(), 2);
        assert_eq!(levels.iter().map(|(_, l)| l).collect::<Vec<_>>(), vec![1, 1]);
    }

    #[test]
    fn scalar_producer_stays_with_its_reader() {
        let r = region(
            "func @k(%in: memref<4xf32>) {\n\
             \x20 %s = op \"x\"(%in) : f32\n\
             \x20 %a = op \"y\"(%in, %s) : memref<4xf32>\n\
             \x20 op \"z\"(%a)\n\
             }\n",
        );
        let succ = successor_map(&r);
        assert!(succ.successors(r.body[0]).is_empty());
        let levels = assign_levels(&r, &succ).expect("topological");
        assert_eq!(levels.get(r.body[0]), Some(2));
        assert_eq!(levels.get(r.body[1]), Some(2));
        assert_eq!(levels.get(r.body[2]), Some(1));
    }

    #[test]
    fn floor_passes_through_layout_conversion() {
        let r = region(
            "func @k(%in: memref<4xf32>) {\n\
             \x20 %a = op \"a\"(%in) : memref<4xf32>\n\
             \x20 %t = to_tensor %a : tensor<4xf32>\n\
             \x20 %b = op \"b\"(%t) : tensor<4xf32>\n\
             \x20 op \"c\"(%b)\n\
             }\n",
        );
        let levels = assign_levels(&r, &successor_map(&r)).expect("topological");
        assert_eq!(levels.get(r.body[0]), Some(2));
        assert_eq!(levels.get(r.body[1]), None);
        assert_eq!(levels.get(r.body[2]), Some(2));
        assert_eq!(levels.get(r.body[3]), Some(1));
    }

    #[test]
    fn backward_edge_is_a_topology_violation() {
        let r = region(
            "func @k(%in: memref<4xf32>) {\n\
             \x20 %a = op \"a\"(%in) : memref<4xf32>\n\
             \x20 %b = op \"b\"(%a) : memref<4xf32>\n\
             }\n",
        );
        let (a, b) = (r.body[0], r.body[1]);
        let mut map = SuccessorMap::default();
        // b claims a as its successor although a comes first.
        map.add(b, Carrier::Value(r.node(b).results[0]), a);
        map.add(a, Carrier::Value(r.node(a).results[0]), b);
        assert_eq!(backward_edges(&r, &map), vec![(b, a)]);
        let err = assign_levels(&r, &map).expect_err("must fail");
        assert_eq!(
            err,
            LegalizeError::TopologyViolation {
                producer: b,
                successor: a,
                backward_edges: 1,
            }
        );
    }
}
