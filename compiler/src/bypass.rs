// bypass.rs — Detect bypass edges and plan their resolution
//
// A producer P at level `d + 1` whose deepest successor is at level `d` owns a
// bypass for every edge to a consumer at level `s < d`. With copy insertion
// each bypass becomes a chain of copies at levels `d, d-1, ..., s+1`;
// otherwise the span `s..=d` is recorded for merging during renumbering.
//
// Preconditions: `levels` came from `alap::assign_levels` on the same graph.
// Postconditions: the plan is complete; nothing in the region is mutated.
// Failure modes: a memref carrier with a dynamic dimension cannot be given a
//                fresh allocation and returns `LegalizeError::UnsupportedCarrier`.
// Side effects: none.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::alap::LevelMap;
use crate::config::LegalizeOptions;
use crate::error::LegalizeError;
use crate::id::NodeId;
use crate::ir::{Region, Type};
use crate::successors::{Carrier, SuccessorMap};

/// A producer → consumer edge that skips at least one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bypass {
    pub producer: NodeId,
    pub carrier: Carrier,
    pub consumer: NodeId,
    /// One level below the producer (`level(P) - 1`).
    pub from: u32,
    /// Level of the consumer.
    pub to: u32,
}

impl Bypass {
    /// Number of stages skipped.
    pub fn span(&self) -> u32 {
        self.from - self.to
    }
}

/// Copies to synthesize for one bypass, placed immediately before `consumer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyChain {
    pub producer: NodeId,
    pub carrier: Carrier,
    pub consumer: NodeId,
    /// Level of each copy, in chain order (strictly decreasing).
    pub levels: Vec<u32>,
    /// Memref carriers need a fresh buffer per copy.
    pub needs_alloc: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BypassPlan {
    #[serde(skip)]
    pub bypasses: Vec<Bypass>,
    #[serde(skip)]
    pub chains: Vec<CopyChain>,
    /// Consumer level → deepest producer-side level folded with it.
    pub merge_targets: BTreeMap<u32, u32>,
}

impl BypassPlan {
    pub fn copy_count(&self) -> usize {
        self.chains.iter().map(|c| c.levels.len()).sum()
    }

    pub fn alloc_count(&self) -> usize {
        self.chains
            .iter()
            .filter(|c| c.needs_alloc)
            .map(|c| c.levels.len())
            .sum()
    }

    /// Record a merge, keeping the longest bypass per consumer level.
    pub fn record_merge(&mut self, to: u32, from: u32) {
        let target = self.merge_targets.entry(to).or_insert(from);
        *target = (*target).max(from);
    }
}

/// Find every bypass and plan its resolution under `options`.
///
/// Producers are visited in reverse program order, so chains for one consumer
/// appear in the order their producers were leveled.
pub fn plan_bypasses(
    region: &Region,
    successors: &SuccessorMap,
    levels: &LevelMap,
    options: &LegalizeOptions,
) -> Result<BypassPlan, LegalizeError> {
    let mut plan = BypassPlan::default();

    for &producer in region.body.iter().rev() {
        let Some(level) = levels.get(producer) else {
            continue;
        };
        let from = level - 1;
        for succ in successors.successors(producer) {
            let Some(to) = levels.get(succ.consumer) else {
                continue;
            };
            if to == from {
                continue;
            }
            let bypass = Bypass {
                producer,
                carrier: succ.carrier,
                consumer: succ.consumer,
                from,
                to,
            };
            plan.bypasses.push(bypass);

            if options.insert_copy {
                let ty = &region.value(succ.carrier.value()).ty;
                if matches!(ty, Type::MemRef(shape) if !shape.is_static()) {
                    return Err(LegalizeError::UnsupportedCarrier {
                        producer,
                        carrier: succ.carrier.value(),
                        ty: ty.clone(),
                    });
                }
                plan.chains.push(CopyChain {
                    producer,
                    carrier: succ.carrier,
                    consumer: succ.consumer,
                    levels: (to + 1..=from).rev().collect(),
                    needs_alloc: ty.is_memref(),
                });
            } else {
                plan.record_merge(to, from);
            }
        }
    }

    debug!(
        region = %region.name,
        bypasses = plan.bypasses.len(),
        copies = plan.copy_count(),
        merges = plan.merge_targets.len(),
        "bypasses planned"
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alap::assign_levels;
    use crate::parser::parse;
    use crate::resolve::resolve;
    use crate::successors::successor_map;

    fn region(src: &str) -> Region {
        let program = parse(src).program.expect("parse");
        let mut result = resolve(&program);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        result.module.regions.remove(0)
    }

    fn plan(r: &Region, insert_copy: bool) -> Result<BypassPlan, LegalizeError> {
        let succ = successor_map(r);
        let levels = assign_levels(r, &succ).expect("topological");
        let opts = LegalizeOptions {
            insert_copy,
            min_gran: 1,
        };
        plan_bypasses(r, &succ, &levels, &opts)
    }

    // a(3) -> b(2) -> d(1), plus the bypass a -> d.
    const DIAMOND: &str = "func @k(%in: memref<4xf32>) {\n\
        \x20 %a = op \"a\"(%in) : memref<4xf32>\n\
        \x20 %b = op \"b\"(%a) : memref<4xf32>\n\
        \x20 op \"d\"(%a, %b)\n\
        }\n";

    #[test]
    fn chain_without_bypass_plans_nothing() {
        let r = region(
            "func @k(%in: memref<4xf32>) {\n\
             \x20 %a = op \"a\"(%in) : memref<4xf32>\n\
             \x20 %b = op \"b\"(%a) : memref<4xf32>\n\
             \x20 op \"c\"(%b)\n\
             }\n",
        );
        assert_eq!(plan(&r, true).expect("plan"), BypassPlan::default());
    }

    #[test]
    fn copy_chain_spans_skipped_levels() {
        let r = region(DIAMOND);
        let p = plan(&r, true).expect("plan");
        assert_eq!(p.bypasses.len(), 1);
        assert_eq!(p.bypasses[0].span(), 1);
        assert_eq!(p.chains.len(), 1);
        let chain = &p.chains[0];
        assert_eq!(chain.producer, r.body[0]);
        assert_eq!(chain.consumer, r.body[2]);
        assert_eq!(chain.levels, vec![2]);
        assert!(chain.needs_alloc);
        assert_eq!(p.copy_count(), 1);
        assert_eq!(p.alloc_count(), 1);
        assert!(p.merge_targets.is_empty());
    }

    #[test]
    fn long_bypass_gets_one_copy_per_level() {
        let r = region(
            "func @k(%in: tensor<4xf32>) {\n\
             \x20 %a = op \"a\"(%in) : tensor<4xf32>\n\
             \x20 %b = op \"b\"(%a) : tensor<4xf32>\n\
             \x20 %c = op \"c\"(%b) : tensor<4xf32>\n\
             \x20 op \"d\"(%a, %c)\n\
             }\n",
        );
        let p = plan(&r, true).expect("plan");
        assert_eq!(p.chains.len(), 1);
        assert_eq!(p.chains[0].levels, vec![3, 2]);
        assert!(!p.chains[0].needs_alloc);
        assert_eq!(p.alloc_count(), 0);
    }

    #[test]
    fn merge_keeps_longest_bypass() {
        let r = region(
            "func @k(%in: memref<4xf32>) {\n\
             \x20 %a = op \"a\"(%in) : memref<4xf32>\n\
             \x20 %b = op \"b\"(%a) : memref<4xf32>\n\
             \x20 %c = op \"c\"(%b) : memref<4xf32>\n\
             \x20 op \"d\"(%a, %b, %c)\n\
             }\n",
        );
        // a(4) -> b(3) -> c(2) -> d(1): a skips to d, b skips to d.
        let p = plan(&r, false).expect("plan");
        assert!(p.chains.is_empty());
        assert_eq!(p.bypasses.len(), 2);
        assert_eq!(p.merge_targets, BTreeMap::from([(1, 3)]));
    }

    #[test]
    fn dynamic_memref_cannot_be_copied() {
        let r = region(
            "func @k(%in: memref<?xf32>) {\n\
             \x20 %a = op \"a\"(%in) : memref<?xf32>\n\
             \x20 %b = op \"b\"(%a) : memref<?xf32>\n\
             \x20 op \"d\"(%a, %b)\n\
             }\n",
        );
        let err = plan(&r, true).expect_err("dynamic carrier");
        assert!(matches!(err, LegalizeError::UnsupportedCarrier { producer, .. } if producer == r.body[0]));
        // Merging needs no copies, so the same region is fine.
        assert!(plan(&r, false).is_ok());
    }
}
