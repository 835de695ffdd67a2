//! In-Process Channel Session
//!
//! A mesh of per-pair mpsc channels plus shared barriers, giving every
//! simulated rank the same `Session` surface as the shared-memory transport.
//! Ranks become independently scheduled threads that communicate only
//! through explicit channels — used by the test suite, where spawning real
//! pinned processes would be slow and environment-dependent.

use pairbench_core::message::PingMessage;
use pairbench_core::session::{Session, SessionError, NUM_BARRIERS};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Barrier};

/// One rank's handle onto an in-process mesh.
pub struct ChannelSession {
    rank: usize,
    num_ranks: usize,
    /// Sender for each destination rank (`outgoing[to]`).
    outgoing: Vec<Sender<PingMessage>>,
    /// Receiver for each source rank (`incoming[from]`).
    incoming: Vec<Receiver<PingMessage>>,
    barriers: Arc<Vec<Barrier>>,
}

/// Build a fully-connected mesh, one session per rank.
pub fn channel_mesh(num_ranks: usize) -> Vec<ChannelSession> {
    // One directed channel per ordered pair, including self-loops so the
    // vectors index directly by rank.
    let mut txs: Vec<Vec<Sender<PingMessage>>> = Vec::with_capacity(num_ranks);
    let mut rxs: Vec<Vec<Option<Receiver<PingMessage>>>> = Vec::with_capacity(num_ranks);
    for _ in 0..num_ranks {
        let mut tx_row = Vec::with_capacity(num_ranks);
        let mut rx_row = Vec::with_capacity(num_ranks);
        for _ in 0..num_ranks {
            let (tx, rx) = channel();
            tx_row.push(tx);
            rx_row.push(Some(rx));
        }
        txs.push(tx_row);
        rxs.push(rx_row);
    }

    let barriers = Arc::new(
        (0..NUM_BARRIERS)
            .map(|_| Barrier::new(num_ranks))
            .collect::<Vec<_>>(),
    );

    (0..num_ranks)
        .map(|rank| ChannelSession {
            rank,
            num_ranks,
            outgoing: txs[rank].clone(),
            incoming: rxs
                .iter_mut()
                .map(|row| row[rank].take().expect("receiver taken once"))
                .collect(),
            barriers: Arc::clone(&barriers),
        })
        .collect()
}

impl ChannelSession {
    fn check_rank(&self, rank: usize) -> Result<(), SessionError> {
        if rank >= self.num_ranks {
            return Err(SessionError::InvalidRank {
                rank,
                num_ranks: self.num_ranks,
            });
        }
        Ok(())
    }
}

impl Session for ChannelSession {
    fn self_rank(&self) -> usize {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    fn send(&mut self, to: usize, msg: &PingMessage) -> Result<(), SessionError> {
        self.check_rank(to)?;
        self.outgoing[to]
            .send(*msg)
            .map_err(|_| SessionError::Disconnected { rank: to })
    }

    fn recv_from(&mut self, from: usize, msg: &mut PingMessage) -> Result<(), SessionError> {
        self.check_rank(from)?;
        *msg = self.incoming[from]
            .recv()
            .map_err(|_| SessionError::Disconnected { rank: from })?;
        Ok(())
    }

    fn barrier_wait(&mut self, index: usize) -> Result<(), SessionError> {
        if index >= NUM_BARRIERS {
            return Err(SessionError::InvalidBarrier { index });
        }
        self.barriers[index].wait();
        Ok(())
    }
}
