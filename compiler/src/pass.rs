// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the legalization sub-passes (parse and resolve run before the
// runner), their dependency edges, and the artifacts they produce. Used by the
// pipeline runner to compute minimal pass subsets for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each legalization sub-pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    IndexMemory,
    BuildSuccessors,
    AssignLevels,
    PlanBypasses,
    Rewrite,
    Compact,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the region state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    MemoryFlow, // MemoryFlow
    UseIndex,   // UseIndex
    Successors, // SuccessorMap
    Levels,     // LevelMap
    Bypasses,   // BypassPlan
    Rewritten,  // RewriteStats (region mutated)
    Compacted,  // CompactStats (region mutated)
    Cert,       // LegalizeCert
}

impl std::fmt::Display for PassId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", descriptor(*self).name)
    }
}

// ── Machine-checkable postconditions ───────────────────────────────────────

/// Evidence that a stage's postconditions hold.
pub trait StageCert {
    /// True iff every obligation holds.
    fn all_pass(&self) -> bool;
    /// Named obligations with their outcome, in a stable order.
    fn obligations(&self) -> Vec<(&'static str, bool)>;

    /// Names of the failed obligations.
    fn failures(&self) -> Vec<&'static str> {
        self.obligations()
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name)
            .collect()
    }
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a sub-pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Whether the pass mutates the region.
    pub mutates: bool,
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::IndexMemory => PassDescriptor {
            name: "index_memory",
            inputs: &[],
            outputs: &[ArtifactId::MemoryFlow, ArtifactId::UseIndex],
            mutates: false,
            invariants: "loop write sets and reader sets cover every top-level loop",
        },
        PassId::BuildSuccessors => PassDescriptor {
            name: "build_successors",
            inputs: &[PassId::IndexMemory],
            outputs: &[ArtifactId::Successors],
            mutates: false,
            invariants: "only dataflow-eligible nodes are sources or consumers, no self edges",
        },
        PassId::AssignLevels => PassDescriptor {
            name: "assign_levels",
            inputs: &[PassId::BuildSuccessors],
            outputs: &[ArtifactId::Levels],
            mutates: false,
            invariants: "every dataflow node leveled, producer above each successor and not below any reader",
        },
        PassId::PlanBypasses => PassDescriptor {
            name: "plan_bypasses",
            inputs: &[PassId::AssignLevels],
            outputs: &[ArtifactId::Bypasses],
            mutates: false,
            invariants: "every bypass has a copy chain or a merge target",
        },
        PassId::Rewrite => PassDescriptor {
            name: "rewrite",
            inputs: &[PassId::PlanBypasses],
            outputs: &[ArtifactId::Rewritten],
            mutates: true,
            invariants: "levels written, copy chains inserted and consumers rewired",
        },
        PassId::Compact => PassDescriptor {
            name: "compact",
            inputs: &[PassId::Rewrite],
            outputs: &[ArtifactId::Compacted, ArtifactId::Cert],
            mutates: true,
            invariants: "D1-D6 obligations verified",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 6] = [
    PassId::IndexMemory,
    PassId::BuildSuccessors,
    PassId::AssignLevels,
    PassId::PlanBypasses,
    PassId::Rewrite,
    PassId::Compact,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
