// successors.rs — Producer/consumer graph over top-level dataflow nodes
//
// Loop → loop edges come from memory flow (a location one loop writes and
// another loop only reads); a loop also feeds a later array copy out of a
// location it writes. Other dataflow nodes get an edge for every shaped
// result used by a dataflow node, and an array copy for every later reader of
// its target. Nested users map to their top-level loop.
//
// Preconditions: `flow` and `uses` were built from the same `region`.
// Postconditions: only dataflow-eligible nodes are sources or consumers;
//                 identical (carrier, consumer) pairs are recorded once.
// Failure modes: none.
// Side effects: none.

use indexmap::IndexMap;
use tracing::debug;

use crate::id::{NodeId, ValueId};
use crate::ir::{NodeKind, Region};
use crate::memflow::MemoryFlow;
use crate::use_index::UseIndex;

/// What an edge carries from producer to consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Carrier {
    /// A shaped SSA result used directly.
    Value(ValueId),
    /// A memory location written by a loop or an array copy and read by a later node.
    Memory(ValueId),
}

impl Carrier {
    pub fn value(self) -> ValueId {
        match self {
            Carrier::Value(v) | Carrier::Memory(v) => v,
        }
    }

    pub fn is_memory(self) -> bool {
        matches!(self, Carrier::Memory(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Successor {
    pub carrier: Carrier,
    pub consumer: NodeId,
}

#[derive(Debug, Clone, Default)]
pub struct SuccessorMap {
    edges: IndexMap<NodeId, Vec<Successor>>,
}

impl SuccessorMap {
    pub fn build(region: &Region, flow: &MemoryFlow, uses: &UseIndex) -> Self {
        let mut map = SuccessorMap::default();
        for &id in &region.body {
            let node = region.node(id);
            if node.kind.is_loop() {
                let here = uses.position(id);
                for mem in flow.written_by(id) {
                    for reader in flow.readers_of(mem) {
                        // A loop that also writes the location accumulates into it.
                        if reader == id || flow.writes(reader, mem) {
                            continue;
                        }
                        map.add(id, Carrier::Memory(mem), reader);
                    }
                    // A later array copy out of the location forwards it.
                    for user in uses.top_level_users(mem) {
                        let user_node = region.node(user);
                        let copies_out = matches!(
                            (&user_node.kind, user_node.operands.as_slice()),
                            (NodeKind::Copy, [src, _]) if *src == mem
                        );
                        if copies_out && uses.position(user) > here {
                            map.add(id, Carrier::Memory(mem), user);
                        }
                    }
                }
            } else if node.kind.is_dataflow() {
                // A top-level array copy produces its target buffer for the
                // dataflow nodes that read it later.
                if let (NodeKind::Copy, [_, target]) = (&node.kind, node.operands.as_slice()) {
                    let here = uses.position(id);
                    for user in uses.top_level_users(*target) {
                        let later = uses.position(user) > here;
                        if user != id && later && region.node(user).kind.is_dataflow() {
                            map.add(id, Carrier::Memory(*target), user);
                        }
                    }
                }
                for &result in &node.results {
                    if !region.value(result).ty.is_shaped() {
                        continue;
                    }
                    for user in uses.top_level_users(result) {
                        if user != id && region.node(user).kind.is_dataflow() {
                            map.add(id, Carrier::Value(result), user);
                        }
                    }
                }
            }
        }
        debug!(
            producers = map.edges.len(),
            edges = map.edge_count(),
            "successor graph built"
        );
        map
    }

    /// Record an edge. Returns `false` if it was already present.
    pub fn add(&mut self, producer: NodeId, carrier: Carrier, consumer: NodeId) -> bool {
        let list = self.edges.entry(producer).or_default();
        let edge = Successor { carrier, consumer };
        if list.contains(&edge) {
            return false;
        }
        list.push(edge);
        true
    }

    pub fn successors(&self, producer: NodeId) -> &[Successor] {
        self.edges.get(&producer).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All edges as `(producer, successor)`, producers in program order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Successor)> + '_ {
        self.edges
            .iter()
            .flat_map(|(&p, list)| list.iter().map(move |s| (p, s)))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edge_count() == 0
    }
}

/// Build the memory flow, use index and successor map of `region` in one go.
pub fn successor_map(region: &Region) -> SuccessorMap {
    let flow = MemoryFlow::build(region);
    let uses = UseIndex::build(region);
    SuccessorMap::build(region, &flow, &uses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::resolve::resolve;

    fn region(src: &str) -> Region {
        let program = parse(src).program.expect("parse");
        let mut result = resolve(&program);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        result.module.regions.remove(0)
    }

    #[test]
    fn value_edges_skip_scalars_and_non_dataflow_users() {
        let r = region(
            "func @k(%a: memref<4xf32>) {\n\
             \x20 %x, %s = op \"p\"(%a) : memref<4xf32>, f32\n\
             \x20 %y = op \"q\"(%x, %s) : memref<4xf32>\n\
             \x20 %t = to_tensor %y : tensor<4xf32>\n\
             \x20 op \"r\"(%y, %y)\n\
             \x20 return %y\n\
             }\n",
        );
        let map = successor_map(&r);
        let (p, q, rr) = (r.body[0], r.body[1], r.body[3]);
        let x = r.node(p).results[0];
        let y = r.node(q).results[0];
        assert_eq!(
            map.successors(p),
            &[Successor {
                carrier: Carrier::Value(x),
                consumer: q
            }]
        );
        // The layout conversion and the return are not consumers.
        assert_eq!(
            map.successors(q),
            &[Successor {
                carrier: Carrier::Value(y),
                consumer: rr
            }]
        );
        assert_eq!(map.edge_count(), 2);
    }

    #[test]
    fn loop_edges_follow_memory() {
        let r = region(
            "func @k(%a: memref<4xf32>, %b: memref<4xf32>, %c: memref<4xf32>) {\n\
             \x20 for %i = 0 to 4 {\n\
             \x20   %v = load %a : f32\n\
             \x20   store %v, %b\n\
             \x20 }\n\
             \x20 for %j = 0 to 4 {\n\
             \x20   %w = load %b : f32\n\
             \x20   store %w, %c\n\
             \x20 }\n\
             \x20 for %k = 0 to 4 {\n\
             \x20   %u = load %c : f32\n\
             \x20   store %u, %c\n\
             \x20 }\n\
             }\n",
        );
        let map = successor_map(&r);
        let (l0, l1, l2) = (r.body[0], r.body[1], r.body[2]);
        assert_eq!(
            map.successors(l0),
            &[Successor {
                carrier: Carrier::Memory(r.args[1]),
                consumer: l1
            }]
        );
        // l2 reads and writes %c, so it is not a successor of l1.
        assert!(map.successors(l1).is_empty());
        assert!(map.successors(l2).is_empty());
    }

    #[test]
    fn self_accumulation_has_no_edge() {
        let r = region(
            "func @k(%a: memref<4xf32>) {\n\
             \x20 for %i = 0 to 4 {\n\
             \x20   %v = load %a : f32\n\
             \x20   store %v, %a\n\
             \x20 }\n\
             }\n",
        );
        assert!(successor_map(&r).is_empty());
    }

    #[test]
    fn nested_users_map_to_their_loop() {
        let r = region(
            "func @k(%a: memref<4xf32>, %b: memref<4xf32>) {\n\
             \x20 %x = op \"p\"(%a) : memref<4xf32>\n\
             \x20 for %i = 0 to 4 {\n\
             \x20   %v = load %x : f32\n\
             \x20   %w = load %x : f32\n\
             \x20   store %w, %b\n\
             \x20 }\n\
             }\n",
        );
        let map = successor_map(&r);
        let x = r.node(r.body[0]).results[0];
        assert_eq!(
            map.successors(r.body[0]),
            &[Successor {
                carrier: Carrier::Value(x),
                consumer: r.body[1]
            }]
        );
    }

    #[test]
    fn array_copy_feeds_later_readers() {
        let r = region(
            "func @k(%a: memref<4xf32>, %b: memref<4xf32>) {\n\
             \x20 op \"early\"(%b)\n\
             \x20 copy %a, %b\n\
             \x20 op \"late\"(%b)\n\
             }\n",
        );
        let map = successor_map(&r);
        assert_eq!(
            map.successors(r.body[1]),
            &[Successor {
                carrier: Carrier::Memory(r.args[1]),
                consumer: r.body[2]
            }]
        );
        assert_eq!(map.edge_count(), 1);
    }

    #[test]
    fn loop_feeds_later_copy_of_its_output() {
        let r = region(
            "func @k(%a: memref<4xf32>, %b: memref<4xf32>, %c: memref<4xf32>) {\n\
             \x20 copy %b, %c\n\
             \x20 for %i = 0 to 4 {\n\
             \x20   %v = load %a : f32\n\
             \x20   store %v, %b\n\
             \x20 }\n\
             \x20 copy %b, %c\n\
             }\n",
        );
        let map = successor_map(&r);
        // Only the copy after the loop is a consumer.
        assert_eq!(
            map.successors(r.body[1]),
            &[Successor {
                carrier: Carrier::Memory(r.args[1]),
                consumer: r.body[2]
            }]
        );
    }

    #[test]
    fn duplicate_edges_are_ignored() {
        let mut map = SuccessorMap::default();
        let (p, c) = (NodeId(0), NodeId(1));
        assert!(map.add(p, Carrier::Value(ValueId(0)), c));
        assert!(!map.add(p, Carrier::Value(ValueId(0)), c));
        assert!(map.add(p, Carrier::Memory(ValueId(0)), c));
        assert_eq!(map.iter().count(), 2);
    }
}
