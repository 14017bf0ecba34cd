// id.rs — Stable arena identifiers for IR nodes and values
//
// Nodes and values live in per-region arenas and are referred to by index.
// Identity never depends on pointer addresses, so analysis maps keyed by
// these IDs stay valid across node moves and insertions.

use std::fmt;

/// Identifier of a node (operation) inside a region arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Identifier of an SSA value inside a region arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Allocator for arena IDs. Produces monotonically increasing IDs in
/// allocation order, so IDs double as a creation-order tiebreaker.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    next_node: u32,
    next_value: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_node(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }

    pub fn alloc_value(&mut self) -> ValueId {
        let id = ValueId(self.next_value);
        self.next_value += 1;
        id
    }

    /// Number of node IDs handed out so far.
    pub fn node_count(&self) -> usize {
        self.next_node as usize
    }

    /// Number of value IDs handed out so far.
    pub fn value_count(&self) -> usize {
        self.next_value as usize
    }
}
