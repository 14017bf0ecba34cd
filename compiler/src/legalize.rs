// legalize.rs — Dataflow legalization entry point
//
// Runs the pass on one region in two phases. Planning (memory flow, successor
// graph, level assignment, bypass planning) only reads the region. The rewrite
// phase then writes levels, synthesizes copy chains, groups levels and
// renumbers them, and marks the region as legalized.
//
// Preconditions: `options` passed `LegalizeOptions::validate`.
// Postconditions: on success `verify_legalized` holds for the region.
// Failure modes: `LegalizeError` from planning; the region is left untouched.
// Side effects: mutates the region in place on success.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;
use tracing::info;

use crate::alap::{assign_levels, LevelMap};
use crate::bypass::{plan_bypasses, BypassPlan};
use crate::compact::{group_levels, renumber};
use crate::config::LegalizeOptions;
use crate::error::LegalizeError;
use crate::id::{NodeId, ValueId};
use crate::ir::{NodeKind, Region};
use crate::memflow::MemoryFlow;
use crate::pass::StageCert;
use crate::successors::{successor_map, SuccessorMap};
use crate::use_index::UseIndex;

/// Name prefix for values synthesized by copy chains.
pub const FORWARD_PREFIX: &str = "fwd";

// ── Planning ────────────────────────────────────────────────────────────────

/// Everything the rewrite phase needs, computed without touching the region.
#[derive(Debug, Clone)]
pub struct LegalizePlan {
    pub successors: SuccessorMap,
    pub levels: LevelMap,
    pub bypasses: BypassPlan,
}

pub fn plan(region: &Region, options: &LegalizeOptions) -> Result<LegalizePlan, LegalizeError> {
    let flow = MemoryFlow::build(region);
    let uses = UseIndex::build(region);
    let successors = SuccessorMap::build(region, &flow, &uses);
    let levels = assign_levels(region, &successors)?;
    let bypasses = plan_bypasses(region, &successors, &levels, options)?;
    Ok(LegalizePlan {
        successors,
        levels,
        bypasses,
    })
}

// ── Rewrite ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteStats {
    pub copies: usize,
    pub allocs: usize,
    /// Operand slots redirected to the end of a copy chain.
    pub rewired: usize,
}

/// Write the planned levels and materialize every copy chain.
///
/// Stale levels from an earlier run are cleared first. Copies go immediately
/// before their consumer; buffers for memref copies go at region entry.
pub fn rewrite(region: &mut Region, levels: &LevelMap, bypasses: &BypassPlan) -> RewriteStats {
    region.clear_levels();
    levels.apply_to(region);

    let mut stats = RewriteStats::default();
    let mut alloc_slot = 0;
    for chain in &bypasses.chains {
        let carrier = chain.carrier.value();
        let ty = region.value(carrier).ty.clone();
        let span = region.node(chain.producer).span;
        let mut current = carrier;

        for &level in &chain.levels {
            let name = region.fresh_name(FORWARD_PREFIX);
            let copy = if chain.needs_alloc {
                let alloc = region.create_node(
                    NodeKind::Alloc { stack: false },
                    vec![],
                    vec![(Some(name), ty.clone())],
                    span,
                );
                region.insert_at(None, alloc_slot, alloc);
                alloc_slot += 1;
                stats.allocs += 1;
                let buffer = region.node(alloc).results[0];
                let copy = region.create_node(NodeKind::Copy, vec![current, buffer], vec![], span);
                current = buffer;
                copy
            } else {
                let copy = region.create_node(
                    NodeKind::Copy,
                    vec![current],
                    vec![(Some(name), ty.clone())],
                    span,
                );
                current = region.node(copy).results[0];
                copy
            };
            region.node_mut(copy).level = Some(level);
            region.insert_before(chain.consumer, copy);
            stats.copies += 1;
        }

        stats.rewired += region.replace_uses_within(carrier, current, chain.consumer);
    }
    stats
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactStats {
    pub moved: usize,
    pub stages: u32,
}

/// Group levels, renumber when the options ask for it, mark the region.
pub fn compact(region: &mut Region, bypasses: &BypassPlan, options: &LegalizeOptions) -> CompactStats {
    let moved = group_levels(region);
    let stages = if options.renumbers() {
        renumber(region, &bypasses.merge_targets, options.min_gran)
    } else {
        max_level(region)
    };
    region.dataflow = true;
    CompactStats { moved, stages }
}

fn max_level(region: &Region) -> u32 {
    region
        .body
        .iter()
        .filter_map(|&n| region.node(n).level)
        .max()
        .unwrap_or(0)
}

// ── Report ──────────────────────────────────────────────────────────────────

/// Summary of one legalized region, serialized by `--emit report`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegalizeReport {
    pub region: String,
    pub input_fingerprint: String,
    pub output_fingerprint: String,
    pub nodes: usize,
    /// Levels assigned before renumbering.
    pub levels: u32,
    /// Stages after renumbering (equal to `levels` without renumbering).
    pub stages: u32,
    pub bypasses: usize,
    pub copies_inserted: usize,
    pub allocs_inserted: usize,
    pub merge_targets: BTreeMap<u32, u32>,
    pub options: LegalizeOptions,
}

impl LegalizeReport {
    pub fn new(
        region: &Region,
        input_fingerprint: String,
        levels: &LevelMap,
        bypasses: &BypassPlan,
        rewritten: &RewriteStats,
        compacted: &CompactStats,
        options: &LegalizeOptions,
    ) -> Self {
        LegalizeReport {
            region: region.name.clone(),
            input_fingerprint,
            output_fingerprint: region.fingerprint(),
            nodes: region.body.len(),
            levels: levels.max_level(),
            stages: compacted.stages,
            bypasses: bypasses.bypasses.len(),
            copies_inserted: rewritten.copies,
            allocs_inserted: rewritten.allocs,
            merge_targets: bypasses.merge_targets.clone(),
            options: *options,
        }
    }
}

// ── Entry point ─────────────────────────────────────────────────────────────

/// Legalize one region in place.
pub fn legalize_dataflow(
    region: &mut Region,
    options: &LegalizeOptions,
) -> Result<LegalizeReport, LegalizeError> {
    let input_fingerprint = region.fingerprint();
    let plan = plan(region, options)?;
    let rewritten = rewrite(region, &plan.levels, &plan.bypasses);
    let compacted = compact(region, &plan.bypasses, options);
    info!(
        region = %region.name,
        levels = plan.levels.max_level(),
        stages = compacted.stages,
        bypasses = plan.bypasses.bypasses.len(),
        copies = rewritten.copies,
        "region legalized"
    );
    Ok(LegalizeReport::new(
        region,
        input_fingerprint,
        &plan.levels,
        &plan.bypasses,
        &rewritten,
        &compacted,
        options,
    ))
}

// ── Verification ────────────────────────────────────────────────────────────

/// Machine-checkable evidence for legalization postconditions (D1-D6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegalizeCert {
    /// D1: every dataflow-eligible top-level node carries a level.
    pub d1_all_leveled: bool,
    /// D2: levels form the contiguous range `1..=max`.
    pub d2_levels_contiguous: bool,
    /// D3: no successor edge skips a stage or points upward.
    pub d3_no_skipped_stage: bool,
    /// D4: leveled nodes appear in non-increasing level order.
    pub d4_levels_grouped: bool,
    /// D5: every operand is defined before its use.
    pub d5_defs_before_uses: bool,
    /// D6: the region is marked `dataflow = true`.
    pub d6_marked: bool,
}

impl StageCert for LegalizeCert {
    fn all_pass(&self) -> bool {
        self.obligations().iter().all(|(_, ok)| *ok)
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("D1_all_leveled", self.d1_all_leveled),
            ("D2_levels_contiguous", self.d2_levels_contiguous),
            ("D3_no_skipped_stage", self.d3_no_skipped_stage),
            ("D4_levels_grouped", self.d4_levels_grouped),
            ("D5_defs_before_uses", self.d5_defs_before_uses),
            ("D6_marked", self.d6_marked),
        ]
    }
}

pub fn verify_legalized(region: &Region, options: &LegalizeOptions) -> LegalizeCert {
    LegalizeCert {
        d1_all_leveled: region
            .dataflow_nodes()
            .all(|n| region.node(n).level.is_some()),
        d2_levels_contiguous: levels_contiguous(region),
        d3_no_skipped_stage: no_skipped_stage(region, options),
        d4_levels_grouped: levels_grouped(region),
        d5_defs_before_uses: defs_before_uses(region),
        d6_marked: region.dataflow,
    }
}

fn levels_contiguous(region: &Region) -> bool {
    let levels: BTreeSet<u32> = region
        .body
        .iter()
        .filter_map(|&n| region.node(n).level)
        .collect();
    levels.iter().copied().eq(1..=levels.len() as u32)
}

fn no_skipped_stage(region: &Region, options: &LegalizeOptions) -> bool {
    let allowed = if options.renumbers() { 0..=1 } else { 1..=1 };
    successor_map(region).iter().all(|(producer, succ)| {
        match (region.node(producer).level, region.node(succ.consumer).level) {
            (Some(p), Some(c)) => allowed.contains(&(i64::from(p) - i64::from(c))),
            _ => false,
        }
    })
}

fn levels_grouped(region: &Region) -> bool {
    let levels: Vec<u32> = region
        .body
        .iter()
        .filter_map(|&n| region.node(n).level)
        .collect();
    levels.windows(2).all(|w| w[0] >= w[1])
}

fn defs_before_uses(region: &Region) -> bool {
    let mut defined: HashSet<ValueId> = region.args.iter().copied().collect();
    region
        .body
        .iter()
        .all(|&n| defined_in_order(region, n, &mut defined))
}

fn defined_in_order(region: &Region, id: NodeId, defined: &mut HashSet<ValueId>) -> bool {
    let node = region.node(id);
    if !node.operands.iter().all(|v| defined.contains(v)) {
        return false;
    }
    if let NodeKind::Loop { iv, body, .. } = &node.kind {
        defined.insert(*iv);
        for &child in body {
            if !defined_in_order(region, child, defined) {
                return false;
            }
        }
    }
    defined.extend(node.results.iter().copied());
    true
}

// ── Tests ───────────────────────────────────────────────────────────────────
