//! The ping protocol state machine.
//!
//! One instance runs per process; the role is fixed by rank parity. Ranks
//! are paired consecutively (0-1, 2-3, …), a topology invariant the builder
//! preserves, so the partner is always `rank ^ 1`.

use crate::measure::{spin_for_cycles, Stopwatch, TickCorrection};
use crate::message::PingMessage;
use crate::session::{Session, SessionError, BARRIER_END, BARRIER_START};

/// Measurement direction for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Single-direction delivery; each exchange is one transfer.
    Oneway,
    /// Each message is echoed back; each exchange counts as two transfers.
    Roundtrip,
}

impl Mode {
    /// Header printed in the run report.
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Oneway => "ONEWAY",
            Mode::Roundtrip => "ROUNDTRIP",
        }
    }
}

/// Protocol role, derived from rank parity and fixed for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Even ranks block on `recv_from` and measure the full span.
    Receiver,
    /// Odd ranks drive the sequence `0..num_msgs`.
    Sender,
}

impl Role {
    /// Role of the given rank.
    pub fn of_rank(rank: usize) -> Self {
        if rank % 2 == 0 {
            Role::Receiver
        } else {
            Role::Sender
        }
    }
}

/// The pair partner of a rank.
#[inline]
pub fn partner_of(rank: usize) -> usize {
    rank ^ 1
}

/// Per-run parameters, immutable once built.
#[derive(Debug, Clone, Copy)]
pub struct RunParams {
    /// Messages the sender will emit. A value of 0 makes the receiver block
    /// forever (the sentinel wraps and never arrives) — callers must reject
    /// it up front.
    pub num_msgs: u64,
    /// Measurement direction.
    pub mode: Mode,
    /// Cycles to idle after the protocol loop, before the end barrier.
    pub delay_after: u64,
}

/// What a rank observed during its run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOutcome {
    /// Transfers implied by the sentinel: `sentinel + 1` one-way, doubled in
    /// round-trip mode (two one-way legs per exchange). Zero for senders,
    /// which do not measure.
    pub transfers: u64,
    /// Corrected ticks spanning the receive loop. Zero for senders.
    pub corrected_ticks: u64,
}

/// Run the protocol for this rank: start barrier, role loop, post-completion
/// delay, end barrier.
pub fn run_rank<S: Session>(
    session: &mut S,
    params: &RunParams,
    correction: TickCorrection,
) -> Result<RunOutcome, SessionError> {
    let rank = session.self_rank();
    let partner = partner_of(rank);

    // One message buffer for the process lifetime; reused for every
    // transfer.
    let mut msg = PingMessage::new();

    session.barrier_wait(BARRIER_START)?;

    let outcome = match Role::of_rank(rank) {
        Role::Receiver => run_receiver(session, params, correction, partner, &mut msg)?,
        Role::Sender => run_sender(session, params, partner, &mut msg)?,
    };

    spin_for_cycles(params.delay_after);
    session.barrier_wait(BARRIER_END)?;

    Ok(outcome)
}

/// Receiver loop: yield, block on the partner, echo in round-trip mode,
/// stop at the sentinel. The whole loop runs under one measured region.
fn run_receiver<S: Session>(
    session: &mut S,
    params: &RunParams,
    correction: TickCorrection,
    partner: usize,
    msg: &mut PingMessage,
) -> Result<RunOutcome, SessionError> {
    let sentinel = params.num_msgs.wrapping_sub(1);

    let watch = Stopwatch::start();
    let last = loop {
        std::thread::yield_now();
        session.recv_from(partner, msg)?;

        if params.mode == Mode::Roundtrip {
            session.send(partner, msg)?;
        }

        if msg.seq == sentinel {
            break msg.seq;
        }
    };
    let corrected_ticks = watch.stop(correction);

    let transfers = match params.mode {
        Mode::Oneway => last + 1,
        Mode::Roundtrip => 2 * (last + 1),
    };

    Ok(RunOutcome {
        transfers,
        corrected_ticks,
    })
}

/// Sender loop: write the sequence, send, wait for the echo in round-trip
/// mode, yield. The final value sent is the sentinel.
fn run_sender<S: Session>(
    session: &mut S,
    params: &RunParams,
    partner: usize,
    msg: &mut PingMessage,
) -> Result<RunOutcome, SessionError> {
    for seq in 0..params.num_msgs {
        msg.seq = seq;
        session.send(partner, msg)?;

        if params.mode == Mode::Roundtrip {
            session.recv_from(partner, msg)?;
        }

        std::thread::yield_now();
    }

    Ok(RunOutcome::default())
}
