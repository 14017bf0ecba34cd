// dot.rs — Graphviz DOT output for successor graphs
//
// Renders the top-level dataflow nodes of a region and the producer →
// consumer edges between them, suitable for `dot` and other Graphviz
// layout engines. Nodes of one level share a rank.
//
// Preconditions: `successors` (and `levels`, if given) were built from `region`.
// Postconditions: returns a valid DOT string representing the graph.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::collections::BTreeMap;
use std::fmt::{self, Write};

use crate::alap::LevelMap;
use crate::id::NodeId;
use crate::ir::{NodeKind, Region};
use crate::successors::SuccessorMap;

/// Emit the successor graph of `region` as a Graphviz DOT string.
///
/// With `levels`, each node shows its level and edges that skip a stage are
/// drawn dashed red.
pub fn emit_dot(region: &Region, successors: &SuccessorMap, levels: Option<&LevelMap>) -> String {
    let mut buf = String::new();
    // Writing into a String cannot fail.
    let _ = write_dot(&mut buf, region, successors, levels);
    buf
}

pub fn write_dot(
    out: &mut impl Write,
    region: &Region,
    successors: &SuccessorMap,
    levels: Option<&LevelMap>,
) -> fmt::Result {
    writeln!(out, "digraph {} {{", quote(&region.name))?;
    writeln!(out, "    rankdir=TB;")?;
    writeln!(out, "    node [fontname=\"Helvetica\", fontsize=10];")?;
    writeln!(out, "    edge [fontname=\"Helvetica\", fontsize=9];")?;
    writeln!(out)?;

    let mut ranks: BTreeMap<u32, Vec<NodeId>> = BTreeMap::new();
    for id in region.dataflow_nodes() {
        let level = levels.and_then(|l| l.get(id));
        let mut label = region.describe(id);
        if let Some(level) = level {
            label.push_str(&format!("\\nlevel {level}"));
            ranks.entry(level).or_default().push(id);
        }
        writeln!(
            out,
            "    {} [{}, label={}];",
            dot_node_id(id),
            node_style(&region.node(id).kind),
            quote(&label)
        )?;
    }

    if !ranks.is_empty() {
        writeln!(out)?;
        for (level, members) in ranks.iter().rev() {
            write!(out, "    {{ rank=same; /* level {level} */")?;
            for id in members {
                write!(out, " {};", dot_node_id(*id))?;
            }
            writeln!(out, " }}")?;
        }
    }

    if !successors.is_empty() {
        writeln!(out)?;
    }
    for (producer, succ) in successors.iter() {
        let carrier = format!("%{}", region.value(succ.carrier.value()).name);
        let skipped = levels.and_then(|l| {
            let p = l.get(producer)?;
            let c = l.get(succ.consumer)?;
            Some(p.saturating_sub(1) != c)
        });
        let style = match (skipped, succ.carrier.is_memory()) {
            (Some(true), _) => "style=dashed, color=red, penwidth=2",
            (_, true) => "style=bold, color=steelblue",
            (_, false) => "style=solid",
        };
        writeln!(
            out,
            "    {} -> {} [label={}, {style}];",
            dot_node_id(producer),
            dot_node_id(succ.consumer),
            quote(&carrier)
        )?;
    }

    writeln!(out, "}}")
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn dot_node_id(node: NodeId) -> String {
    format!("n{}", node.0)
}

/// Quote and escape a string as a DOT ID. Keeps `\n` line breaks.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn node_style(kind: &NodeKind) -> &'static str {
    match kind {
        NodeKind::Loop { .. } => "shape=box3d, style=filled, fillcolor=lightyellow",
        NodeKind::Copy => "shape=cds, style=filled, fillcolor=lightsalmon",
        _ => "shape=box, style=filled, fillcolor=lightblue",
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
