//! Control-Plane Message Types
//!
//! Frames exchanged between the supervisor (rank 0) and its spawned peers
//! over the inherited pipe pair. These carry setup and results only — the
//! measured data plane is the shared-memory session, never these pipes.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};

/// Handshake a peer sends immediately after startup, before it knows its
/// run assignment.
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct PeerHello {
    /// Protocol version for compatibility checking.
    pub protocol_version: u32,
    /// Whether the peer's platform has a hardware cycle counter.
    pub has_cycle_counter: bool,
    /// Peer process id, for log correlation.
    pub pid: u32,
}

impl PeerHello {
    /// Hello describing the current process.
    pub fn current() -> Self {
        Self {
            protocol_version: crate::PROTOCOL_VERSION,
            has_cycle_counter: pairbench_core::HAS_CYCLE_COUNTER,
            pid: std::process::id(),
        }
    }
}

/// Everything a spawned peer needs to join the run.
///
/// The tick correction and reference clock are computed once by the
/// supervisor before any peer exists; shipping them here is what guarantees
/// every rank observes identical values.
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct RunSpec {
    /// Rank assigned to this peer, fixed for its lifetime.
    pub rank: u32,
    /// Total participating ranks.
    pub num_ranks: u32,
    /// Name of the shared-memory session to attach to.
    pub session: String,
    /// Messages per pair.
    pub num_msgs: u64,
    /// Post-completion delay in cycles.
    pub delay_after: u64,
    /// Round-trip mode (false = one-way).
    pub roundtrip: bool,
    /// Base core for ranks 0 and 1.
    pub core: u32,
    /// Placement base for ranks ≥ 2.
    pub core_offset: u32,
    /// Tick correction constant, inherited from the supervisor.
    pub tick_correction: u64,
}

/// Messages sent from a peer back to the supervisor.
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum PeerMessage {
    /// Initial handshake.
    Hello(PeerHello),

    /// Final result of the peer's protocol run.
    Report(PeerReport),

    /// The peer could not complete its run. The whole benchmark is
    /// invalidated; partial results are not meaningful.
    Failure {
        /// Rank that failed.
        rank: u32,
        /// Human-readable error text.
        message: String,
    },
}

/// Per-rank result collected by the supervisor at the end of a run.
#[derive(Debug, Clone, Copy, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct PeerReport {
    /// Reporting rank.
    pub rank: u32,
    /// Transfers counted (zero for sender ranks).
    pub transfers: u64,
    /// Corrected tick total (zero for sender ranks).
    pub corrected_ticks: u64,
}
