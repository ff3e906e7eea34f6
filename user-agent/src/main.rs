// src/main.rs

//! Agent entry-point: stream minifilter port traffic to stdout.
//!
//! 1. Parse arguments, load configuration & set up structured logging
//! 2. Connect to the communication port (or an in-memory one with `--simulate`)
//! 3. Install a Ctrl-C handler that closes the port
//! 4. Run the dispatch loop until the port is closed or lost
//!
//! Exit code 0 on shutdown, 1 when the port cannot be opened.

// ───── std / 3rd-party imports ──────────────────────────────────────────────
use anyhow::Context;
use chrono::Local;
use clap::Parser;
use fern::Dispatch;
use log::LevelFilter;
use std::{
    path::{Path, PathBuf},
    process, thread,
};

// ───── local imports ────────────────────────────────────────────────────────
use agent::comms::channel::Channel;
use agent::comms::dispatch::{DispatchExit, Dispatcher};
use agent::comms::fltport;
use agent::comms::observe::ConsoleObserver;
use agent::comms::reply::StaticPolicy;
use agent::comms::simulate;
use agent::config::{self, Config};

// ───── helpers ──────────────────────────────────────────────────────────────

/// Print an error with context and terminate the process.
macro_rules! fatal {
    ($ctx:expr, $($arg:tt)+) => {{
        eprintln!(
            "[{}][ERROR][{}] {}",
            chrono::Local::now().to_rfc3339(),
            $ctx,
            format!($($arg)+)
        );
        std::process::exit(1);
    }};
}

#[derive(Debug, Parser)]
#[command(version, about = "Userland receiver for the minifilter communication port")]
struct Args {
    /// Configuration file [default: default.toml next to the executable]
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Replay canned driver traffic through an in-memory port
    #[arg(long)]
    simulate: bool,
}

/// Directory that contains the running executable.
fn exe_dir() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot determine exe path")?;
    exe.parent()
        .map(Path::to_path_buf)
        .context("executable must live in some directory")
}

/// An explicit `--config` must exist; the default file is optional.
fn load_config(args: &Args, exe_dir: &Path) -> anyhow::Result<Config> {
    match &args.config {
        Some(path) => config::load(path).with_context(|| format!("loading {}", path.display())),
        None => {
            let path = exe_dir.join("default.toml");
            config::load_or_default(&path).with_context(|| format!("loading {}", path.display()))
        }
    }
}

/// Configure global logging as requested in `cfg.logging`.
fn setup_logging(exe_dir: &Path, cfg: &Config) -> Result<(), fern::InitError> {
    let level = match cfg.logging.level.to_uppercase().as_str() {
        "ERROR" => LevelFilter::Error,
        "WARN" => LevelFilter::Warn,
        "DEBUG" => LevelFilter::Debug,
        "TRACE" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    let log_path = cfg
        .logging
        .enable
        .then(|| exe_dir.join(cfg.logging.file.as_deref().unwrap_or("agent.log")));

    // stdout carries observations only
    let mut dispatch = Dispatch::new()
        .format(|out, msg, record| {
            out.finish(format_args!(
                "[{}][{:5}][{}][pid={}][tid={:?}] {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                process::id(),
                thread::current().id(),
                msg
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    if let Some(path) = log_path {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}

// ───── run modes ────────────────────────────────────────────────────────────

fn run_port(cfg: &Config) {
    let port = fltport::connect(&cfg.port).unwrap_or_else(|e| fatal!("port", "{}", e));
    log::info!("Listening on {} ({:?})", port.name(), cfg.port.protocol);

    let closer = port.closer();
    if let Err(e) = ctrlc::set_handler(move || {
        log::warn!("Interrupt received, closing port");
        closer.close();
    }) {
        log::warn!("Ctrl-C handler not installed: {}", e);
    }

    let mut dispatcher = Dispatcher::new(
        port,
        cfg.port.protocol,
        Box::new(StaticPolicy { block: cfg.reply.block_by_default }),
        ConsoleObserver::stdout(cfg.output.format),
    )
    .with_retry_delay(cfg.port.retry_delay);
    let report = dispatcher.run();
    // Dropping the dispatcher releases the port handle.
    drop(dispatcher);

    match report.exit {
        DispatchExit::Closed => log::info!("Port closed after {} messages", report.stats.received),
        DispatchExit::Lost(e) => log::error!("Port lost after {} messages: {}", report.stats.received, e),
    }
}

fn run_simulation(cfg: &Config) {
    let mut observer = ConsoleObserver::stdout(cfg.output.format);
    for phase in simulate::all_phases() {
        let policy = Box::new(StaticPolicy { block: cfg.reply.block_by_default });
        let outcome = simulate::run_phase(&phase, policy, &mut observer);
        log::info!(
            "{:?} phase done: {} skipped, {} replies",
            outcome.protocol,
            outcome.report.stats.skipped,
            outcome.replies.len()
        );
    }
}

fn main() {
    let args = Args::parse();

    // 1 ─ Context
    let exe_dir = exe_dir().unwrap_or_else(|e| fatal!("main", "{:#}", e));
    let cfg = load_config(&args, &exe_dir).unwrap_or_else(|e| fatal!("config", "{:#}", e));

    // 2 ─ Logging
    if let Err(e) = setup_logging(&exe_dir, &cfg) {
        fatal!("logging", "{}", e);
    }
    log::info!("Agent started (pid {})", process::id());

    // 3 ─ Port
    if args.simulate {
        run_simulation(&cfg);
    } else {
        run_port(&cfg);
    }
    log::info!("Agent stopped");
}
