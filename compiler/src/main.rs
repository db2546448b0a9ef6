use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use swpc::decompose::AnnotationUpkeep;
use swpc::pass::PassId;
use swpc::pipeline::{compute_provenance, run_pipeline, CompilationState, PassOptions};
use swpc::validate::ReconcilePolicy;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EmitStage {
    Pipelined,
    Lowered,
    Schedule,
    ScheduleJson,
    DepsDot,
    BuildInfo,
    Check,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum PolicyArg {
    Strict,
    ReconcileByOrigin,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum UpkeepArg {
    Stale,
    Update,
}

#[derive(Parser, Debug)]
#[command(
    name = "swpc",
    version,
    about = "Software pipeline compiler: injects prologue/steady/epilogue schedules into annotated block loops"
)]
struct Cli {
    /// Input .swp source file
    source: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Pipelined)]
    emit: EmitStage,

    /// How annotations shorter than the block list are treated
    #[arg(long, value_enum, default_value_t = PolicyArg::Strict)]
    policy: PolicyArg,

    /// Split reduction blocks before injection
    #[arg(long, value_enum)]
    decompose_reductions: Option<UpkeepArg>,

    /// Report loops left serial as errors
    #[arg(long)]
    deny_unpipelined: bool,

    /// Skip the structural certificate of emitted pipelines
    #[arg(long)]
    no_verify: bool,

    /// Input seed for --emit check
    #[arg(long, default_value_t = 0x5eed)]
    seed: u64,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

// ── Logging ──

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("error")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let options = PassOptions {
        policy: match cli.policy {
            PolicyArg::Strict => ReconcilePolicy::Strict,
            PolicyArg::ReconcileByOrigin => ReconcilePolicy::ReconcileByOrigin,
        },
        decompose_reductions: cli.decompose_reductions.map(|u| match u {
            UpkeepArg::Stale => AnnotationUpkeep::Stale,
            UpkeepArg::Update => AnnotationUpkeep::Update,
        }),
        verify: !cli.no_verify,
        deny_unpipelined: cli.deny_unpipelined,
        seed: cli.seed,
    };

    if cli.verbose {
        eprintln!("swpc: source = {}", cli.source.display());
        eprintln!("swpc: emit   = {:?}", cli.emit);
        match options.canonical_json() {
            Ok(json) => eprintln!("swpc: options = {json}"),
            Err(e) => eprintln!("swpc: options = <{e}>"),
        }
    }

    // ── Read and parse source ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("swpc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    let provenance = match compute_provenance(&source, &options) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("swpc: error: cannot fingerprint options: {e}");
            std::process::exit(2);
        }
    };
    if let EmitStage::BuildInfo = cli.emit {
        write_output(cli.output.as_ref(), &provenance.to_json());
        return;
    }

    let parse_result = swpc::parser::parse(&source);
    if !parse_result.errors.is_empty() {
        for err in &parse_result.errors {
            eprintln!("swpc: parse error: {}", err);
        }
        std::process::exit(1);
    }
    let Some(program) = parse_result.program else {
        eprintln!("swpc: parse failed with no output");
        std::process::exit(1);
    };

    if cli.verbose {
        eprintln!("swpc: parsed {} items", program.items.len());
    }

    // ── Passes ──
    let terminal = match cli.emit {
        EmitStage::Lowered => PassId::Lower,
        EmitStage::Check => PassId::CheckEquivalence,
        _ => PassId::InjectPipeline,
    };
    let mut state = CompilationState::new(program);
    state.provenance = Some(provenance);
    let outcome = run_pipeline(&mut state, terminal, &options, cli.verbose, |_, diags| {
        for diag in diags {
            eprintln!("swpc: {}", diag);
        }
    });
    if let Err(failure) = outcome {
        if cli.verbose {
            eprintln!(
                "swpc: stopped after {}",
                swpc::pass::descriptor(failure.failing_pass).name
            );
        }
        std::process::exit(1);
    }

    // ── Emit ──
    let text = match cli.emit {
        EmitStage::Pipelined => state
            .pipelined
            .as_ref()
            .map(swpc::print::print_program),
        EmitStage::Lowered => state.lowered.as_ref().map(swpc::print::print_program),
        EmitStage::Schedule => state.inject.as_ref().map(|r| {
            r.schedules
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join("\n")
        }),
        EmitStage::ScheduleJson => match state.inject.as_ref() {
            Some(r) => match serde_json::to_string_pretty(&r.schedules) {
                Ok(json) => Some(json + "\n"),
                Err(e) => {
                    eprintln!("swpc: error: {}", e);
                    std::process::exit(1);
                }
            },
            None => None,
        },
        EmitStage::DepsDot => match (state.pipelined.as_ref(), state.inject.as_ref()) {
            (Some(p), Some(r)) => Some(swpc::dot::emit_dot(p, &r.graphs)),
            _ => None,
        },
        EmitStage::Check => {
            let pipelined = state.inject.as_ref().map_or(0, |r| r.pipelined_count());
            Some(format!(
                "swpc: {} loop(s) pipelined, global buffers agree (seed {:#x})\n",
                pipelined, options.seed
            ))
        }
        EmitStage::BuildInfo => None,
    };
    let Some(text) = text else {
        eprintln!("swpc: nothing to emit");
        std::process::exit(1);
    };
    write_output(cli.output.as_ref(), &text);
    if state.has_error {
        std::process::exit(1);
    }
}

fn write_output(path: Option<&PathBuf>, text: &str) {
    let result = match path {
        Some(path) => std::fs::write(path, text),
        None => std::io::stdout().write_all(text.as_bytes()),
    };
    if let Err(e) = result {
        eprintln!("swpc: error: writing output: {}", e);
        std::process::exit(2);
    }
}
