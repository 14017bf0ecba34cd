use clap::Parser;
use std::fmt::Write as _;
use std::path::PathBuf;

use dflow::config::{load_overrides, ConfigOverrides};
use dflow::diag::Diagnostic;
use dflow::ir::Module;
use dflow::pass::PassId;
use dflow::pipeline::{load_source, run_module, RegionOutcome};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EmitStage {
    /// Legalized IR
    Ir,
    /// Level assignment preview (region left unchanged)
    Levels,
    /// Leveled successor graph as Graphviz DOT
    Graph,
    /// JSON summary per region
    Report,
}

impl EmitStage {
    fn terminal(self) -> PassId {
        match self {
            EmitStage::Ir | EmitStage::Report => PassId::Compact,
            EmitStage::Levels | EmitStage::Graph => PassId::AssignLevels,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "dflow",
    version,
    about = "Dataflow legalization: assigns pipeline stages and legalizes stage-skipping edges"
)]
struct Cli {
    /// Input IR source file
    source: PathBuf,

    /// Output file path (stdout if omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Ir)]
    emit: EmitStage,

    /// Forward bypassed values through copies (false merges stages instead)
    #[arg(long, value_name = "BOOL")]
    insert_copy: Option<bool>,

    /// Minimum number of levels folded into one stage
    #[arg(long, value_name = "N")]
    min_gran: Option<u32>,

    /// JSON file with option overrides
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log pass phases and timing
    #[arg(long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_diagnostics(path: &str, source: &str, diags: &[Diagnostic]) {
    for diag in diags {
        eprintln!("dflow: {}", diag.render(path, source));
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    debug!(source = %cli.source.display(), emit = ?cli.emit, "starting");

    // ── Read and resolve source ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("dflow: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };
    let path = cli.source.display().to_string();

    let loaded = match load_source(&source) {
        Ok(l) => l,
        Err(diags) => {
            print_diagnostics(&path, &source, &diags);
            std::process::exit(1);
        }
    };
    print_diagnostics(&path, &source, &loaded.warnings);

    // ── Layer options: defaults < set directives < config file < flags ──
    let mut options = loaded.options;
    if let Some(config) = &cli.config {
        match load_overrides(config) {
            Ok(overrides) => options.apply(&overrides),
            Err(e) => {
                eprintln!("dflow: error: {}", e);
                std::process::exit(2);
            }
        }
    }
    options.apply(&ConfigOverrides {
        insert_copy: cli.insert_copy,
        min_gran: cli.min_gran,
    });
    if let Err(e) = options.validate() {
        eprintln!("dflow: error: {}", e);
        std::process::exit(2);
    }
    debug!(
        regions = loaded.module.regions.len(),
        insert_copy = options.insert_copy,
        min_gran = options.min_gran,
        "options resolved"
    );

    // ── Legalize ──
    let outcomes = run_module(loaded.module, cli.emit.terminal(), &options);
    let mut failed = false;
    for outcome in &outcomes {
        print_diagnostics(&path, &source, &outcome.state.diagnostics);
        if let Err(e) = &outcome.result {
            debug!(region = %outcome.state.region.name, error = %e, "region failed");
            failed = true;
        }
    }
    if failed {
        std::process::exit(1);
    }

    // ── Emit ──
    let text = match cli.emit {
        EmitStage::Ir => {
            let module = Module {
                regions: outcomes.into_iter().map(|o| o.state.region).collect(),
            };
            module.to_string()
        }
        EmitStage::Levels => format_levels(&outcomes),
        EmitStage::Graph => outcomes
            .iter()
            .filter_map(|o| {
                let artifacts = &o.state.artifacts;
                let successors = artifacts.successors.as_ref()?;
                Some(dflow::dot::emit_dot(
                    &o.state.region,
                    successors,
                    artifacts.levels.as_ref(),
                ))
            })
            .collect::<Vec<_>>()
            .join("\n"),
        EmitStage::Report => {
            let reports: Vec<_> = outcomes
                .iter()
                .filter_map(|o| o.state.report(&options))
                .collect();
            match serde_json::to_string_pretty(&reports) {
                Ok(json) => json + "\n",
                Err(e) => {
                    eprintln!("dflow: error: cannot serialize report: {}", e);
                    std::process::exit(2);
                }
            }
        }
    };

    match &cli.output {
        Some(out) => {
            if let Err(e) = std::fs::write(out, &text) {
                eprintln!("dflow: error: {}: {}", out.display(), e);
                std::process::exit(2);
            }
        }
        None => print!("{text}"),
    }
}

/// One block per region: the level of every dataflow node in program order.
fn format_levels(outcomes: &[RegionOutcome]) -> String {
    let mut out = String::new();
    for outcome in outcomes {
        let region = &outcome.state.region;
        let Some(levels) = outcome.state.artifacts.levels.as_ref() else {
            continue;
        };
        let _ = writeln!(out, "@{}: {} levels", region.name, levels.max_level());
        for id in region.dataflow_nodes() {
            if let Some(level) = levels.get(id) {
                let _ = writeln!(out, "  {level:>3}  {}", region.describe(id));
            }
        }
    }
    out
}
