//! The narrow interface the protocol engine consumes from the messaging
//! transport.
//!
//! The transport itself — mailbox allocation, delivery, the barrier — is a
//! collaborator implemented in `pairbench-ipc`; the engine only ever sees
//! this trait.

use crate::message::PingMessage;
use thiserror::Error;

/// Barrier slots a session must provide.
pub const NUM_BARRIERS: usize = 2;

/// Barrier index all ranks cross before the measured region begins.
///
/// Without it, early starters would record artificially low latencies.
pub const BARRIER_START: usize = 0;

/// Barrier index all ranks cross after their protocol loop (and the
/// post-completion delay) ends.
pub const BARRIER_END: usize = 1;

/// Errors surfaced by a messaging session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The peer at the given rank went away mid-session.
    #[error("rank {rank} disconnected")]
    Disconnected {
        /// Rank of the vanished peer.
        rank: usize,
    },

    /// A rank outside `0..num_ranks` was addressed.
    #[error("rank {rank} out of range (session has {num_ranks} ranks)")]
    InvalidRank {
        /// The offending rank.
        rank: usize,
        /// Size of the session.
        num_ranks: usize,
    },

    /// A barrier index outside `0..NUM_BARRIERS` was used.
    #[error("barrier index {index} out of range")]
    InvalidBarrier {
        /// The offending index.
        index: usize,
    },

    /// An OS-level operation on the session failed.
    #[error("{op} failed: {source}")]
    Os {
        /// The operation that failed (e.g. `"shm_open"`).
        op: &'static str,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The session region exists but is not one of ours (bad magic, size or
    /// rank count).
    #[error("invalid session region: {0}")]
    InvalidRegion(String),
}

/// A per-rank handle onto the shared messaging session.
///
/// `recv_from` is a specific-source receive: it blocks until a message from
/// exactly `from` is available, preserving pairwise ordering. `barrier_wait`
/// blocks until every participant has arrived. Teardown happens on drop.
pub trait Session {
    /// This process's rank, fixed for the session lifetime.
    fn self_rank(&self) -> usize;

    /// Number of participating ranks.
    fn num_ranks(&self) -> usize;

    /// Deliver `msg` to rank `to`. Blocks while the destination mailbox is
    /// still occupied by an unconsumed message.
    fn send(&mut self, to: usize, msg: &PingMessage) -> Result<(), SessionError>;

    /// Block until a message from rank `from` arrives, then copy it into
    /// `msg`.
    fn recv_from(&mut self, from: usize, msg: &mut PingMessage) -> Result<(), SessionError>;

    /// Block until all ranks have reached barrier `index`.
    fn barrier_wait(&mut self, index: usize) -> Result<(), SessionError>;
}
