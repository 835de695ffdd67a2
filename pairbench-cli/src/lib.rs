#![warn(missing_docs)]
//! Pairbench CLI
//!
//! The `pairbench` binary: one-to-one IPC measurement between pairs of
//! processes pinned to CPU cores, communicating over a shared-memory
//! session. The same binary serves as supervisor (rank 0) and, behind the
//! hidden `--peer` flag, as a spawned peer.

mod config;
mod report;
#[cfg(unix)]
mod topology;

pub use config::{BenchConfig, ConfigError, FileConfig, ModeSetting, RunnerFileConfig};
pub use report::{render_report, RankResult};
#[cfg(unix)]
pub use topology::{core_for_rank, run_supervisor, TopologyError};

use clap::Parser;
use config::{
    DEFAULT_CORE, DEFAULT_CORE_OFFSET, DEFAULT_DELAY_AFTER, DEFAULT_NUM_MSGS, DEFAULT_NUM_PROCS,
};

/// Pairbench CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "pairbench")]
#[command(
    author,
    version,
    about = "pairbench - one-to-one IPC benchmark over shared memory"
)]
pub struct Cli {
    /// Number of processes (must be even; ranks pair 0-1, 2-3, ...)
    #[arg(long, default_value_t = DEFAULT_NUM_PROCS)]
    pub num_procs: usize,

    /// Number of messages to send per pair
    #[arg(long, default_value_t = DEFAULT_NUM_MSGS)]
    pub num_msgs: u64,

    /// How many cycles to pause after completing the run
    #[arg(long, default_value_t = DEFAULT_DELAY_AFTER)]
    pub delay_after: u64,

    /// On which core to put the first process pair
    #[arg(long, default_value_t = DEFAULT_CORE)]
    pub core: usize,

    /// Consecutive-core placement base for processes beyond the first pair
    #[arg(long, default_value_t = DEFAULT_CORE_OFFSET)]
    pub core_offset: usize,

    /// Measurement direction
    #[arg(long, value_enum, default_value = "oneway")]
    pub mode: ModeSetting,

    /// Reference clock in GHz for tick conversion (estimated when omitted)
    #[arg(long)]
    pub ref_ghz: Option<f64>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Internal: run as a spawned peer (used by the supervisor)
    #[arg(long, hide = true)]
    pub peer: bool,
}

/// Run the CLI and return the process exit code.
///
/// Exit codes: 0 on success or `--help`; 1 on invalid options,
/// configuration errors or a failed run.
pub fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version render through the same path but are not
            // errors.
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return code;
        }
    };

    // Peer mode comes first, before any logging setup: peers share the
    // supervisor's stderr and must stay quiet on stdout.
    if cli.peer {
        return run_peer_mode();
    }

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("pairbench_cli=debug,pairbench_ipc=debug,pairbench_core=debug")
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("pairbench_cli=info,pairbench_ipc=info,pairbench_core=info")
            .init();
    }

    let file = FileConfig::discover().unwrap_or_default();
    let config = match BenchConfig::resolve(&cli, &file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("pairbench: {e}");
            return 1;
        }
    };

    match run_benchmark(&config) {
        Ok(report_text) => {
            print!("{report_text}");
            0
        }
        Err(e) => {
            eprintln!("pairbench: {e:#}");
            1
        }
    }
}

#[cfg(unix)]
fn run_benchmark(config: &BenchConfig) -> anyhow::Result<String> {
    let (results, ref_hz) = topology::run_supervisor(config)?;
    Ok(render_report(config, ref_hz, &results))
}

#[cfg(not(unix))]
fn run_benchmark(_config: &BenchConfig) -> anyhow::Result<String> {
    anyhow::bail!("pairbench requires a Unix platform (process spawn + POSIX shared memory)")
}

#[cfg(unix)]
fn run_peer_mode() -> i32 {
    match topology::run_peer() {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("pairbench peer: {e}");
            1
        }
    }
}

#[cfg(not(unix))]
fn run_peer_mode() -> i32 {
    eprintln!("pairbench: peer mode requires a Unix platform");
    1
}
