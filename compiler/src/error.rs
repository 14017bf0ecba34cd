// error.rs — Fatal legalization errors
//
// The two ways the pass can abort a region. Both are detected during the
// read-only planning phase, before the region is mutated.

use thiserror::Error;

use crate::diag::{codes, Diagnostic};
use crate::id::{NodeId, ValueId};
use crate::ir::{Region, Type};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LegalizeError {
    /// A successor had no level when its producer was visited: the region is
    /// not in topological order.
    #[error("node {producer} has unexpected successor {successor}, legalization failed")]
    TopologyViolation {
        producer: NodeId,
        successor: NodeId,
        /// Total number of successor edges pointing backward in program order.
        backward_edges: usize,
    },

    /// A bypass carrier for which no copy can be synthesized.
    #[error("node {producer}: cannot forward {carrier} of type {ty} through a copy chain")]
    UnsupportedCarrier {
        producer: NodeId,
        carrier: ValueId,
        ty: Type,
    },
}

impl LegalizeError {
    /// Convert into a source-located diagnostic against `region`.
    pub fn to_diagnostic(&self, region: &Region) -> Diagnostic {
        match self {
            LegalizeError::TopologyViolation {
                producer,
                successor,
                backward_edges,
            } => Diagnostic::error(
                codes::E0200,
                region.node(*producer).span,
                format!(
                    "{} has unexpected successor, legalization failed",
                    region.describe(*producer)
                ),
            )
            .with_related(
                region.node(*successor).span,
                format!("successor {} appears before its producer", region.describe(*successor)),
            )
            .with_cause(
                format!("{backward_edges} successor edge(s) point backward in program order"),
                None,
            )
            .with_hint("reorder the region so every consumer follows its producers"),
            LegalizeError::UnsupportedCarrier { producer, carrier, ty } => Diagnostic::error(
                codes::E0201,
                region.node(*producer).span,
                format!(
                    "cannot forward %{} of type {ty} across pipeline stages",
                    region.value(*carrier).name
                ),
            )
            .with_hint("stage forwarding needs a statically shaped memref, or rerun with insert_copy = false"),
        }
    }
}
