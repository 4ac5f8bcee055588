//! `chpsim`: the command-line driver that wires a `ParsedProgram`, a
//! `DebugHooks` stub, and a `BuiltinRegistry` into `chp-core`'s
//! `init_core -> prepare_exec -> interact_instantiate -> prepare_chp ->
//! interact_chp -> term_exec` sequence.
//!
//! There is no CHP source parser in this workspace; the positional
//! argument instead names one of the demo programs `demo.rs` registers.

mod builtins;
mod debugger;
mod demo;
mod logging;

use builtins::FileRegistry;
use chp_core::collab::ParsedProgram;
use chp_core::context::init_core;
use chp_core::scheduler::SchedulingMode;
use clap::Parser;
use debugger::LineDebugger;
use std::path::PathBuf;
use std::process::ExitCode;

/// Arguments mirror the original tool's single-dash flags (`-main`, `-C`,
/// `-batch`, `-seed`, ...) translated to clap's conventional `--long`
/// form; see DESIGN.md for the full mapping.
#[derive(Parser)]
#[command(name = "chpsim")]
#[command(author = "chp-core")]
#[command(version)]
#[command(about = "Runs a communicating-hardware-processes program to completion or deadlock")]
struct Cli {
    /// Name of the demo program to run (see `--list`).
    demo: Option<String>,

    /// List the available demo programs and exit.
    #[arg(long)]
    list: bool,

    /// Module search path entries. Accepted for CLI compatibility; this
    /// driver has no source loader, so these are presently no-ops.
    #[arg(short = 'I', long = "search-path", value_name = "DIR")]
    search_path: Vec<PathBuf>,

    /// Queue a debugger command to run before the first statement.
    /// `quit` is the only command this stub recognises.
    #[arg(short = 'C', long = "pre-command", value_name = "CMD")]
    pre_command: Vec<String>,

    /// Run to completion without prompting (no interactive debug shell).
    #[arg(long, short)]
    batch: bool,

    /// Suppress non-essential debug/status output.
    #[arg(long, short)]
    quiet: bool,

    /// Redirect logging output to this file instead of stderr.
    #[arg(long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Echo every named trace event.
    #[arg(long)]
    traceall: bool,

    /// Echo every named trace event, including repeats on the same wire.
    #[arg(long)]
    watchall: bool,

    /// Fixed PRNG seed for randomised scheduling.
    #[arg(long, value_name = "N")]
    seed: Option<u64>,

    /// Seed randomised scheduling from system entropy instead of `--seed`.
    #[arg(long)]
    timeseed: bool,

    /// Use timed (deterministic priority-queue) scheduling. Default.
    #[arg(long)]
    timed: bool,

    /// Record critical-path breadcrumbs for each fired wire.
    #[arg(long)]
    critical: bool,

    /// Accepted for CLI compatibility with the original `-nohide`; this
    /// driver has no hidden/internal-state display to toggle.
    #[arg(long)]
    nohide: bool,

    /// Enable interference (parallel-conflict) checking.
    #[arg(long)]
    strict: bool,

    /// Promote tolerated-and-logged conditions (reads of an unassigned
    /// variable, an unknown assignment RHS) to fatal errors.
    #[arg(long)]
    warnings_as_errors: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.log.as_deref()) {
        eprintln!("failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    if cli.list {
        for entry in demo::all() {
            println!("{:<12} {}", entry.name, entry.description);
        }
        return ExitCode::SUCCESS;
    }

    let Some(demo_name) = cli.demo.as_deref() else {
        eprintln!("usage: chpsim <demo> (pass --list to see available demos)");
        return ExitCode::FAILURE;
    };

    let Some(entry) = demo::find(demo_name) else {
        eprintln!("unknown demo {demo_name:?} (pass --list to see available demos)");
        return ExitCode::FAILURE;
    };

    if !cli.search_path.is_empty() {
        tracing::debug!(paths = ?cli.search_path, "ignoring module search path: no source loader in this driver");
    }

    let mode = if let Some(seed) = cli.seed {
        SchedulingMode::Randomized { seed }
    } else if cli.timeseed {
        SchedulingMode::Randomized { seed: rand::random() }
    } else {
        let _ = cli.timed;
        SchedulingMode::Timed
    };

    match run(&cli, mode, (entry.build)()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            eprintln!("halted by debugger");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(true)` on a clean run, `Ok(false)` if the debugger halted
/// the run before it reached completion or deadlock.
fn run(cli: &Cli, mode: SchedulingMode, program: demo::DemoProgram) -> anyhow::Result<bool> {
    let mut ctx = init_core(mode, cli.strict, cli.critical, cli.warnings_as_errors);
    if cli.watchall {
        ctx.enable_watch_all();
    }

    for def in program.process_defs() {
        ctx.register_def((*def).clone());
    }

    ctx.set_debug_hooks(Box::new(LineDebugger::new(cli.pre_command.clone(), cli.batch, cli.quiet, cli.traceall, cli.watchall)));
    ctx.set_builtins(Box::new(FileRegistry::new()));

    ctx.prepare_exec(program.root_def_name())?;
    ctx.interact_instantiate()?;
    ctx.prepare_chp();
    ctx.interact_chp()?;

    let halted = ctx.halted;
    ctx.term_exec();
    Ok(!halted)
}
