// use_index.rs — Read-only use/position index over a region
//
// Maps every value to the nodes that use it and every attached node to its
// top-level ancestor and that ancestor's program-order position.
//
// Preconditions: `region` is well-formed (every attached node reachable from `body`).
// Postconditions: the index reflects `region` at build time only.
// Failure modes: none. Lookups of unknown IDs return `None` / empty slices.
// Side effects: none.

use std::collections::HashMap;

use crate::id::{NodeId, ValueId};
use crate::ir::Region;

#[derive(Debug, Clone, Default)]
pub struct UseIndex {
    users: HashMap<ValueId, Vec<NodeId>>,
    top_level: HashMap<NodeId, NodeId>,
    top_pos: HashMap<NodeId, usize>,
}

impl UseIndex {
    pub fn build(region: &Region) -> Self {
        let mut index = UseIndex::default();
        for (pos, &top) in region.body.iter().enumerate() {
            index.top_pos.insert(top, pos);
            region.walk(top, &mut |node| {
                index.top_level.insert(node.id, top);
                for &operand in &node.operands {
                    let users = index.users.entry(operand).or_default();
                    if users.last() != Some(&node.id) {
                        users.push(node.id);
                    }
                }
            });
        }
        index
    }

    /// Nodes (at any depth) that use `value`, in program order.
    pub fn users(&self, value: ValueId) -> &[NodeId] {
        self.users.get(&value).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn top_level(&self, node: NodeId) -> Option<NodeId> {
        self.top_level.get(&node).copied()
    }

    /// Program-order position of the node's top-level ancestor.
    pub fn position(&self, node: NodeId) -> Option<usize> {
        self.top_level(node).and_then(|t| self.top_pos.get(&t).copied())
    }

    /// Top-level ancestors of every user of `value`, deduplicated, in program order.
    pub fn top_level_users(&self, value: ValueId) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = Vec::new();
        for &user in self.users(value) {
            if let Some(top) = self.top_level(user) {
                if !out.contains(&top) {
                    out.push(top);
                }
            }
        }
        out
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

    #[test]
    fn users_and_ancestors() {
        let r = region(
            "func @k(%a: memref<4xf32>, %b: memref<4xf32>) {\n\
             \x20 %x = op \"p\"(%a, %a) : memref<4xf32>\n\
             \x20 for %i = 0 to 4 {\n\
             \x20   %v = load %x : f32\n\
             \x20   %w = load %x : f32\n\
             \x20   store %v, %b\n\
             \x20 }\n\
             \x20 op \"q\"(%x)\n\
             }\n",
        );
        let idx = UseIndex::build(&r);
        let a = r.args[0];
        let p = r.body[0];
        let lp = r.body[1];
        let q = r.body[2];
        let x = r.node(p).results[0];

        assert_eq!(idx.users(a), &[p]);
        assert_eq!(idx.users(x).len(), 3);
        assert_eq!(idx.top_level_users(x), vec![lp, q]);
        let inner = r.block(Some(lp))[0];
        assert_eq!(idx.top_level(inner), Some(lp));
        assert_eq!(idx.position(inner), Some(1));
        assert_eq!(idx.position(q), Some(2));
        assert!(idx.users(r.args[1]).len() == 1);
    }
}
