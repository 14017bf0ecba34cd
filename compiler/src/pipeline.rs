// pipeline.rs — Region state and sub-pass orchestration
//
// Holds the artifacts of each legalization sub-pass for one region and runs
// the minimal set of sub-passes for a given terminal PassId. `run_module`
// drives every region of a module in parallel.
//
// Preconditions: the region came out of `resolve` without errors; options are validated.
// Postconditions: all artifacts for required passes are populated, or has_error is set.
// Failure modes: a sub-pass returning `LegalizeError`; certificate failure after Compact.
// Side effects: calls on_pass_complete callback after each pass for immediate display.

use std::time::{Duration, Instant};

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info};

use crate::alap::{assign_levels, LevelMap};
use crate::bypass::{plan_bypasses, BypassPlan};
use crate::config::LegalizeOptions;
use crate::diag::{codes, has_errors, DiagLevel, Diagnostic};
use crate::ir::{Module, Region};
use crate::legalize::{
    compact, rewrite, verify_legalized, CompactStats, LegalizeCert, LegalizeReport, RewriteStats,
};
use crate::memflow::MemoryFlow;
use crate::pass::{required_passes, ArtifactId, PassId, StageCert};
use crate::successors::SuccessorMap;
use crate::use_index::UseIndex;

// ── Front end ──────────────────────────────────────────────────────────────

/// A resolved module with the options its `set` directives select.
#[derive(Debug)]
pub struct LoadedSource {
    pub module: Module,
    pub options: LegalizeOptions,
    /// Non-fatal diagnostics (warnings) from parsing, settings and resolution.
    pub warnings: Vec<Diagnostic>,
}

/// Parse, read settings and resolve. Any error-level diagnostic fails the load.
pub fn load_source(source: &str) -> Result<LoadedSource, Vec<Diagnostic>> {
    let parsed = crate::parser::parse(source);
    let mut diagnostics: Vec<Diagnostic> = parsed
        .errors
        .iter()
        .map(|e| Diagnostic::new(DiagLevel::Error, *e.span(), format!("parse error: {e}")))
        .collect();
    let Some(program) = parsed.program else {
        return Err(diagnostics);
    };
    if has_errors(&diagnostics) {
        return Err(diagnostics);
    }

    let (options, setting_diags) = LegalizeOptions::from_program(&program);
    diagnostics.extend(setting_diags);
    let resolved = crate::resolve::resolve(&program);
    diagnostics.extend(resolved.diagnostics);
    if has_errors(&diagnostics) {
        return Err(diagnostics);
    }
    Ok(LoadedSource {
        module: resolved.module,
        options,
        warnings: diagnostics,
    })
}

// ── Artifact storage ───────────────────────────────────────────────────────

/// Sub-pass outputs. Each slot is filled by the pass that declares it.
#[derive(Debug, Default)]
pub struct RegionArtifacts {
    pub flow: Option<MemoryFlow>,
    pub uses: Option<UseIndex>,
    pub successors: Option<SuccessorMap>,
    pub levels: Option<LevelMap>,
    pub bypasses: Option<BypassPlan>,
    pub rewritten: Option<RewriteStats>,
    pub compacted: Option<CompactStats>,
    pub cert: Option<LegalizeCert>,
}

/// One region plus everything the pipeline learned about it.
#[derive(Debug)]
pub struct RegionState {
    pub region: Region,
    /// Fingerprint of the region as it entered the pipeline.
    pub input_fingerprint: String,
    pub artifacts: RegionArtifacts,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    /// Wall time per completed pass, in execution order.
    pub timings: Vec<(PassId, Duration)>,
}

impl RegionState {
    pub fn new(region: Region) -> Self {
        Self {
            input_fingerprint: region.fingerprint(),
            region,
            artifacts: RegionArtifacts::default(),
            diagnostics: Vec::new(),
            has_error: false,
            timings: Vec::new(),
        }
    }

    /// Summary of a fully legalized region. `None` until Compact has run.
    pub fn report(&self, options: &LegalizeOptions) -> Option<LegalizeReport> {
        let a = &self.artifacts;
        Some(LegalizeReport::new(
            &self.region,
            self.input_fingerprint.clone(),
            a.levels.as_ref()?,
            a.bypasses.as_ref()?,
            a.rewritten.as_ref()?,
            a.compacted.as_ref()?,
            options,
        ))
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution stopped. The specific diagnostics are available in
/// `RegionState.diagnostics`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("pass '{failing_pass}' reported errors")]
    PassFailed { failing_pass: PassId },
    #[error("pass '{failing_pass}' needs artifact {missing:?}, which was not produced")]
    MissingArtifact {
        failing_pass: PassId,
        missing: ArtifactId,
    },
}

impl PipelineError {
    /// The pass that produced the error.
    pub fn failing_pass(&self) -> PassId {
        match self {
            PipelineError::PassFailed { failing_pass }
            | PipelineError::MissingArtifact { failing_pass, .. } => *failing_pass,
        }
    }
}

fn need<T>(slot: &Option<T>, pass: PassId, missing: ArtifactId) -> Result<&T, PipelineError> {
    slot.as_ref().ok_or(PipelineError::MissingArtifact {
        failing_pass: pass,
        missing,
    })
}

/// Per-pass post-processing: callback, accumulate, timing, error check.
/// Takes split borrows so callers can keep artifacts borrowed.
fn finish_pass_core(
    all_diags: &mut Vec<Diagnostic>,
    has_error: &mut bool,
    timings: &mut Vec<(PassId, Duration)>,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_errors(&diags);
    all_diags.extend(diags);
    timings.push((pass_id, elapsed));
    debug!(
        pass = %pass_id,
        elapsed_ms = elapsed.as_secs_f64() * 1000.0,
        "pass complete"
    );
    if is_err {
        *has_error = true;
        return Err(PipelineError::PassFailed {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

/// Convenience wrapper for finish_pass_core with full RegionState access.
fn finish_pass(
    state: &mut RegionState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    finish_pass_core(
        &mut state.diagnostics,
        &mut state.has_error,
        &mut state.timings,
        pass_id,
        diags,
        elapsed,
        on_pass_complete,
    )
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of sub-passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → timing → error check.
/// The read-only passes never touch `state.region`, so stopping at
/// `AssignLevels` previews levels without legalizing.
pub fn run_pipeline(
    state: &mut RegionState,
    terminal: PassId,
    options: &LegalizeOptions,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        let t = Instant::now();
        let diags = match pass_id {
            PassId::IndexMemory => {
                state.artifacts.flow = Some(MemoryFlow::build(&state.region));
                state.artifacts.uses = Some(UseIndex::build(&state.region));
                Vec::new()
            }
            PassId::BuildSuccessors => {
                let flow = need(&state.artifacts.flow, pass_id, ArtifactId::MemoryFlow)?;
                let uses = need(&state.artifacts.uses, pass_id, ArtifactId::UseIndex)?;
                let successors = SuccessorMap::build(&state.region, flow, uses);
                state.artifacts.successors = Some(successors);
                Vec::new()
            }
            PassId::AssignLevels => {
                let successors =
                    need(&state.artifacts.successors, pass_id, ArtifactId::Successors)?;
                match assign_levels(&state.region, successors) {
                    Ok(levels) => {
                        state.artifacts.levels = Some(levels);
                        Vec::new()
                    }
                    Err(e) => vec![e.to_diagnostic(&state.region)],
                }
            }
            PassId::PlanBypasses => {
                let successors =
                    need(&state.artifacts.successors, pass_id, ArtifactId::Successors)?;
                let levels = need(&state.artifacts.levels, pass_id, ArtifactId::Levels)?;
                match plan_bypasses(&state.region, successors, levels, options) {
                    Ok(plan) => {
                        state.artifacts.bypasses = Some(plan);
                        Vec::new()
                    }
                    Err(e) => vec![e.to_diagnostic(&state.region)],
                }
            }
            PassId::Rewrite => {
                let levels = need(&state.artifacts.levels, pass_id, ArtifactId::Levels)?;
                let bypasses = need(&state.artifacts.bypasses, pass_id, ArtifactId::Bypasses)?;
                let stats = rewrite(&mut state.region, levels, bypasses);
                state.artifacts.rewritten = Some(stats);
                Vec::new()
            }
            PassId::Compact => {
                let bypasses = need(&state.artifacts.bypasses, pass_id, ArtifactId::Bypasses)?;
                let stats = compact(&mut state.region, bypasses, options);
                state.artifacts.compacted = Some(stats);
                // Verify legalization postconditions (D1-D6)
                let cert = verify_legalized(&state.region, options);
                let diags = if cert.all_pass() {
                    info!(
                        region = %state.region.name,
                        stages = stats.stages,
                        moved = stats.moved,
                        "region legalized"
                    );
                    Vec::new()
                } else {
                    vec![Diagnostic::error(
                        codes::E0300,
                        state.region.span,
                        format!(
                            "legalization verification failed for @{}: {}",
                            state.region.name,
                            cert.failures().join(", ")
                        ),
                    )]
                };
                state.artifacts.cert = Some(cert);
                diags
            }
        };
        let elapsed = t.elapsed();
        finish_pass(state, pass_id, diags, elapsed, &mut on_pass_complete)?;
    }
    Ok(())
}

// ── Module driver ──────────────────────────────────────────────────────────

/// Pipeline result for one region.
#[derive(Debug)]
pub struct RegionOutcome {
    pub state: RegionState,
    pub result: Result<(), PipelineError>,
}

/// Run the pipeline on every region independently. Regions share nothing,
/// so they are processed in parallel; outcomes keep source order.
pub fn run_module(module: Module, terminal: PassId, options: &LegalizeOptions) -> Vec<RegionOutcome> {
    module
        .regions
        .into_par_iter()
        .map(|region| {
            let mut state = RegionState::new(region);
            let result = run_pipeline(&mut state, terminal, options, |_, _| {});
            RegionOutcome { state, result }
        })
        .collect()
}

// ── Tests ──────────────────────────────────────────────────────────────────
