// memflow.rs — Memory-flow indexing over top-level loops
//
// Records, for every top-level loop, the memory locations its body writes and,
// for every memory location, the top-level loops whose bodies read it. Loop
// bodies are walked to any depth.
//
// Preconditions: `region` is well-formed.
// Postconditions: maps are keyed in program order of first occurrence.
// Failure modes: none.
// Side effects: none (pure read).

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use crate::id::{NodeId, ValueId};
use crate::ir::{NodeKind, Region};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// One load/store-like access to a memory location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemAccess {
    pub node: NodeId,
    pub kind: AccessKind,
}

/// Memory accesses inside `root` (inclusive), grouped by memory location.
///
/// `load` reads its operand, `store` writes its memref operand, and an array
/// `copy` reads its source and writes its target.
pub fn mem_accesses_map(region: &Region, root: NodeId) -> IndexMap<ValueId, Vec<MemAccess>> {
    let mut map: IndexMap<ValueId, Vec<MemAccess>> = IndexMap::new();
    region.walk(root, &mut |node| {
        let mut record = |mem: ValueId, kind| {
            map.entry(mem).or_default().push(MemAccess {
                node: node.id,
                kind,
            })
        };
        match (&node.kind, node.operands.as_slice()) {
            (NodeKind::Load, [mem]) => record(*mem, AccessKind::Read),
            (NodeKind::Store, [_, mem]) => record(*mem, AccessKind::Write),
            (NodeKind::Copy, [src, dst]) => {
                record(*src, AccessKind::Read);
                record(*dst, AccessKind::Write);
            }
            _ => {}
        }
    });
    map
}

/// Loop-level memory footprint of a region.
#[derive(Debug, Clone, Default)]
pub struct MemoryFlow {
    /// Memory locations written by each top-level loop.
    pub writes: IndexMap<NodeId, IndexSet<ValueId>>,
    /// Top-level loops reading each memory location.
    pub readers: IndexMap<ValueId, IndexSet<NodeId>>,
}

impl MemoryFlow {
    pub fn build(region: &Region) -> Self {
        let mut flow = MemoryFlow::default();
        let mut loops = 0usize;
        for &top in &region.body {
            if !region.node(top).kind.is_loop() {
                continue;
            }
            loops += 1;
            for (mem, accesses) in mem_accesses_map(region, top) {
                for access in accesses {
                    match access.kind {
                        AccessKind::Write => {
                            flow.writes.entry(top).or_default().insert(mem);
                        }
                        AccessKind::Read => {
                            flow.readers.entry(mem).or_default().insert(top);
                        }
                    }
                }
            }
        }
        debug!(
            loops,
            writers = flow.writes.len(),
            locations_read = flow.readers.len(),
            "memory flow indexed"
        );
        flow
    }

    pub fn writes(&self, lp: NodeId, mem: ValueId) -> bool {
        self.writes.get(&lp).is_some_and(|set| set.contains(&mem))
    }

    pub fn written_by(&self, lp: NodeId) -> impl Iterator<Item = ValueId> + '_ {
        self.writes.get(&lp).into_iter().flatten().copied()
    }

    pub fn readers_of(&self, mem: ValueId) -> impl Iterator<Item = NodeId> + '_ {
        self.readers.get(&mem).into_iter().flatten().copied()
    }
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

    const SRC: &str = "func @k(%a: memref<4xf32>, %b: memref<4xf32>, %c: memref<4xf32>) {\n\
        \x20 for %i = 0 to 4 {\n\
        \x20   for %j = 0 to 4 {\n\
        \x20     %v = load %a : f32\n\
        \x20     store %v, %b\n\
        \x20   }\n\
        \x20 }\n\
        \x20 for %k = 0 to 4 {\n\
        \x20   %w = load %b : f32\n\
        \x20   %u = load %c : f32\n\
        \x20   store %u, %c\n\
        \x20 }\n\
        \x20 copy %b, %c\n\
        }\n";

    #[test]
    fn access_map_walks_nested_bodies() {
        let r = region(SRC);
        let map = mem_accesses_map(&r, r.body[0]);
        let (a, b) = (r.args[0], r.args[1]);
        assert_eq!(map.len(), 2);
        assert_eq!(map[&a][0].kind, AccessKind::Read);
        assert_eq!(map[&b][0].kind, AccessKind::Write);

        let copy = mem_accesses_map(&r, r.body[2]);
        assert_eq!(copy[&b][0].kind, AccessKind::Read);
        assert_eq!(copy[&r.args[2]][0].kind, AccessKind::Write);
    }

    #[test]
    fn loop_flow() {
        let r = region(SRC);
        let flow = MemoryFlow::build(&r);
        let (l0, l1) = (r.body[0], r.body[1]);
        let (a, b, c) = (r.args[0], r.args[1], r.args[2]);

        assert_eq!(flow.written_by(l0).collect::<Vec<_>>(), vec![b]);
        assert!(flow.writes(l1, c));
        assert!(!flow.writes(l1, b));
        assert_eq!(flow.readers_of(a).collect::<Vec<_>>(), vec![l0]);
        assert_eq!(flow.readers_of(b).collect::<Vec<_>>(), vec![l1]);
        // The top-level copy is not a loop and is not indexed.
        assert_eq!(flow.readers_of(c).collect::<Vec<_>>(), vec![l1]);
    }
}
