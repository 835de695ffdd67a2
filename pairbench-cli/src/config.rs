//! Configuration loading and validation.
//!
//! A run is configured by CLI flags layered over an optional
//! `pairbench.toml` discovered by walking up from the current directory.
//! The resolved [`BenchConfig`] is immutable after parse and handed to every
//! component by value — no process-wide mutable state.

use crate::Cli;
use pairbench_core::protocol::Mode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Clap-level defaults, shared with the layering logic below.
pub(crate) const DEFAULT_NUM_PROCS: usize = 2;
pub(crate) const DEFAULT_NUM_MSGS: u64 = 10_000;
pub(crate) const DEFAULT_DELAY_AFTER: u64 = 0;
pub(crate) const DEFAULT_CORE: usize = 0;
pub(crate) const DEFAULT_CORE_OFFSET: usize = 0;

/// Configuration errors. All are fatal and reported before any topology is
/// built.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Odd counts cannot form complete send/receive pairs.
    #[error("process count must be even to form send/receive pairs (got {0})")]
    OddProcessCount(usize),

    /// The pairwise pattern needs at least one pair.
    #[error("at least 2 processes are required (got {0})")]
    TooFewProcesses(usize),

    /// With zero messages the sentinel never arrives and every receiver
    /// blocks forever.
    #[error("num-msgs must be at least 1 (a run with 0 messages never terminates)")]
    ZeroMessages,

    /// Non-positive reference clocks make every conversion meaningless.
    #[error("ref-ghz must be positive (got {0})")]
    InvalidRefClock(f64),
}

/// Measurement direction, CLI- and file-facing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ModeSetting {
    /// Single-direction delivery.
    #[default]
    Oneway,
    /// Send plus echo per exchange.
    Roundtrip,
}

impl ModeSetting {
    /// The protocol-level mode.
    pub fn to_mode(self) -> Mode {
        match self {
            ModeSetting::Oneway => Mode::Oneway,
            ModeSetting::Roundtrip => Mode::Roundtrip,
        }
    }
}

/// Resolved benchmark configuration, immutable after parse.
#[derive(Debug, Clone, Copy)]
pub struct BenchConfig {
    /// Participating processes; even, ranks paired consecutively.
    pub num_procs: usize,
    /// Messages per pair.
    pub num_msgs: u64,
    /// Cycles to idle after completing the run.
    pub delay_after: u64,
    /// Core for ranks 0 and 1.
    pub core: usize,
    /// Placement base for ranks ≥ 2.
    pub core_offset: usize,
    /// Measurement direction.
    pub mode: Mode,
    /// Reference clock override in GHz; estimated when `None`.
    pub ref_ghz: Option<f64>,
}

impl BenchConfig {
    /// Layer file values under CLI flags and validate the result.
    ///
    /// Clap has already filled defaults into `cli`, so "did the user pass
    /// this flag" is detected by comparing against the clap default: a CLI
    /// value that differs from the default always wins, otherwise a file
    /// value applies.
    pub fn resolve(cli: &Cli, file: &FileConfig) -> Result<Self, ConfigError> {
        let runner = &file.runner;

        let pick_usize = |cli_value: usize, default: usize, file_value: Option<usize>| {
            if cli_value != default {
                cli_value
            } else {
                file_value.unwrap_or(default)
            }
        };
        let pick_u64 = |cli_value: u64, default: u64, file_value: Option<u64>| {
            if cli_value != default {
                cli_value
            } else {
                file_value.unwrap_or(default)
            }
        };

        let mode = if cli.mode != ModeSetting::default() {
            cli.mode
        } else {
            runner.mode.unwrap_or_default()
        };

        let config = Self {
            num_procs: pick_usize(cli.num_procs, DEFAULT_NUM_PROCS, runner.num_procs),
            num_msgs: pick_u64(cli.num_msgs, DEFAULT_NUM_MSGS, runner.num_msgs),
            delay_after: pick_u64(cli.delay_after, DEFAULT_DELAY_AFTER, runner.delay_after),
            core: pick_usize(cli.core, DEFAULT_CORE, runner.core),
            core_offset: pick_usize(cli.core_offset, DEFAULT_CORE_OFFSET, runner.core_offset),
            mode: mode.to_mode(),
            ref_ghz: cli.ref_ghz.or(runner.ref_ghz),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a valid measurement.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_procs < 2 {
            return Err(ConfigError::TooFewProcesses(self.num_procs));
        }
        if self.num_procs % 2 != 0 {
            return Err(ConfigError::OddProcessCount(self.num_procs));
        }
        if self.num_msgs == 0 {
            return Err(ConfigError::ZeroMessages);
        }
        if let Some(ghz) = self.ref_ghz {
            if ghz <= 0.0 {
                return Err(ConfigError::InvalidRefClock(ghz));
            }
        }
        Ok(())
    }
}

/// `pairbench.toml` contents.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    /// Runner table.
    #[serde(default)]
    pub runner: RunnerFileConfig,
}

/// The `[runner]` table; every field optional so the file only states what
/// it overrides.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunnerFileConfig {
    /// Participating processes.
    #[serde(default)]
    pub num_procs: Option<usize>,
    /// Messages per pair.
    #[serde(default)]
    pub num_msgs: Option<u64>,
    /// Post-completion delay cycles.
    #[serde(default)]
    pub delay_after: Option<u64>,
    /// Core for the first pair.
    #[serde(default)]
    pub core: Option<usize>,
    /// Placement base for ranks ≥ 2.
    #[serde(default)]
    pub core_offset: Option<usize>,
    /// Measurement direction.
    #[serde(default)]
    pub mode: Option<ModeSetting>,
    /// Reference clock in GHz.
    #[serde(default)]
    pub ref_ghz: Option<f64>,
}

impl FileConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Discover and load configuration by walking up from the current
    /// directory.
    pub fn discover() -> Option<Self> {
        let mut dir = std::env::current_dir().ok()?;
        loop {
            let config_path = dir.join("pairbench.toml");
            if config_path.exists() {
                return Self::load(&config_path).ok();
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }
}
