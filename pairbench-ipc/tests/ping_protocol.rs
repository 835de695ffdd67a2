//! End-to-end protocol runs over the in-process channel mesh.
//!
//! Ranks become threads; the engine under test is the real
//! `pairbench_core::run_rank` state machine.

use pairbench_core::message::PingMessage;
use pairbench_core::protocol::{partner_of, run_rank, Mode, Role, RunParams};
use pairbench_core::session::{Session, BARRIER_END, BARRIER_START};
use pairbench_core::TickCorrection;
use pairbench_ipc::channel_mesh;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn params(num_msgs: u64, mode: Mode) -> RunParams {
    RunParams {
        num_msgs,
        mode,
        delay_after: 0,
    }
}

/// Run every rank of a mesh through the protocol and return outcomes by
/// rank.
fn run_mesh(num_ranks: usize, run: RunParams) -> Vec<pairbench_core::RunOutcome> {
    let correction = TickCorrection::from_raw(0);
    let mut handles = Vec::new();
    for mut session in channel_mesh(num_ranks) {
        handles.push(std::thread::spawn(move || {
            run_rank(&mut session, &run, correction).unwrap()
        }));
    }
    handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect()
}

#[test]
fn test_oneway_pair_stops_at_sentinel() {
    let outcomes = run_mesh(2, params(1000, Mode::Oneway));

    // Receiver (rank 0) counted exactly M transfers; the sender measures
    // nothing.
    assert_eq!(outcomes[0].transfers, 1000);
    assert_eq!(outcomes[1].transfers, 0);
    assert_eq!(outcomes[1].corrected_ticks, 0);
}

#[test]
fn test_roundtrip_pair_doubles_count_basis() {
    let outcomes = run_mesh(2, params(1000, Mode::Roundtrip));
    assert_eq!(outcomes[0].transfers, 2000);
}

#[test]
fn test_single_message_run() {
    // M = 1: the first message is already the sentinel.
    let outcomes = run_mesh(2, params(1, Mode::Oneway));
    assert_eq!(outcomes[0].transfers, 1);
}

#[test]
fn test_four_ranks_form_independent_pairs() {
    let outcomes = run_mesh(4, params(500, Mode::Oneway));
    assert_eq!(outcomes[0].transfers, 500);
    assert_eq!(outcomes[2].transfers, 500);
    assert_eq!(outcomes[1].transfers, 0);
    assert_eq!(outcomes[3].transfers, 0);
}

#[test]
fn test_receiver_observes_contiguous_sequences() {
    const M: u64 = 256;
    let mut mesh = channel_mesh(2);
    let mut receiver_side = mesh.remove(0);
    let mut sender_side = mesh.remove(0);

    assert_eq!(Role::of_rank(receiver_side.self_rank()), Role::Receiver);

    let sender = std::thread::spawn(move || {
        run_rank(
            &mut sender_side,
            &params(M, Mode::Oneway),
            TickCorrection::from_raw(0),
        )
        .unwrap();
    });

    // Drive the receiver side by hand to observe each payload. Mirrors the
    // engine's own sequence: start barrier, receive loop, end barrier.
    let partner = partner_of(receiver_side.self_rank());
    receiver_side.barrier_wait(BARRIER_START).unwrap();
    let mut seen = Vec::new();
    let mut msg = PingMessage::new();
    loop {
        receiver_side.recv_from(partner, &mut msg).unwrap();
        seen.push(msg.seq);
        if msg.seq == M - 1 {
            break;
        }
    }
    receiver_side.barrier_wait(BARRIER_END).unwrap();
    sender.join().unwrap();

    // No loss, no reordering: exactly 0..M in send order.
    let expected: Vec<u64> = (0..M).collect();
    assert_eq!(seen, expected);
}

#[test]
fn test_zero_messages_blocks_receiver() {
    // M = 0 is a degenerate configuration the CLI rejects. Handed directly
    // to the engine, the receiver must stay blocked (the sentinel never
    // arrives) rather than terminate or crash.
    let mut mesh = channel_mesh(2);
    let mut receiver_side = mesh.remove(0);
    let sender_side = mesh.remove(0);

    let finished = Arc::new(AtomicBool::new(false));
    let finished_flag = Arc::clone(&finished);
    let receiver = std::thread::spawn(move || {
        let _ = run_rank(
            &mut receiver_side,
            &params(0, Mode::Oneway),
            TickCorrection::from_raw(0),
        );
        finished_flag.store(true, Ordering::SeqCst);
    });

    // Release the start barrier as rank 1, then send nothing.
    let mut sender_side = sender_side;
    sender_side.barrier_wait(BARRIER_START).unwrap();

    std::thread::sleep(Duration::from_millis(200));
    assert!(
        !finished.load(Ordering::SeqCst),
        "receiver terminated without a sentinel"
    );

    // Dropping the sender's session closes the channel; the blocked recv
    // surfaces a disconnect and the thread can be reaped.
    drop(sender_side);
    receiver.join().unwrap();
    assert!(finished.load(Ordering::SeqCst));
}
