#![warn(missing_docs)]
//! Pairbench Core - Measurement Runtime
//!
//! This crate provides the measurement side of the one-to-one IPC benchmark:
//! - High-precision cycle counting (RDTSCP / CNTVCT_EL0) with calibration
//! - The cache-line `PingMessage` record exchanged between rank pairs
//! - The ping protocol state machine (roles fixed by rank parity)
//! - Per-process timing statistics
//! - CPU affinity pinning for stable counter readings
//!
//! The messaging transport itself is a collaborator: the engine consumes it
//! only through the [`session::Session`] trait, implemented in
//! `pairbench-ipc`.

pub mod measure;
pub mod message;
pub mod protocol;
pub mod session;
pub mod stats;

pub use measure::{
    estimate_ref_hz, pin_to_core, read_cycles, MeasureError, Stopwatch, TickCorrection,
    HAS_CYCLE_COUNTER,
};
pub use message::{PingMessage, CACHE_LINE_SIZE};
pub use protocol::{partner_of, run_rank, Mode, Role, RunOutcome, RunParams};
pub use session::{Session, SessionError, BARRIER_END, BARRIER_START, NUM_BARRIERS};
pub use stats::RegionTotal;
