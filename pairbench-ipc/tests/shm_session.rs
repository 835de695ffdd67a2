//! Protocol runs over a real shared-memory session.
//!
//! Both rank handles live in one process here (threads instead of spawned
//! peers) — the region, mailboxes and barriers are exactly the ones a
//! multi-process run uses.

#![cfg(unix)]

use pairbench_core::protocol::{run_rank, Mode, RunParams};
use pairbench_core::TickCorrection;
use pairbench_ipc::ShmSession;
use std::sync::atomic::{AtomicUsize, Ordering};

static NAME_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name() -> String {
    format!(
        "/pairbench-it-{}-{}",
        std::process::id(),
        NAME_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

#[test]
fn test_oneway_run_over_shared_memory() {
    let name = unique_name();
    let mut rank0 = ShmSession::create(&name, 2).unwrap();
    let mut rank1 = ShmSession::attach(&name, 1, 2).unwrap();

    let params = RunParams {
        num_msgs: 200,
        mode: Mode::Oneway,
        delay_after: 0,
    };
    let correction = TickCorrection::from_raw(0);

    let sender = std::thread::spawn(move || {
        run_rank(&mut rank1, &params, correction).unwrap();
    });
    let outcome = run_rank(&mut rank0, &params, correction).unwrap();
    sender.join().unwrap();

    assert_eq!(outcome.transfers, 200);
}

#[test]
fn test_roundtrip_run_over_shared_memory() {
    let name = unique_name();
    let mut rank0 = ShmSession::create(&name, 2).unwrap();
    let mut rank1 = ShmSession::attach(&name, 1, 2).unwrap();

    let params = RunParams {
        num_msgs: 100,
        mode: Mode::Roundtrip,
        delay_after: 0,
    };
    let correction = TickCorrection::from_raw(0);

    let sender = std::thread::spawn(move || {
        run_rank(&mut rank1, &params, correction).unwrap();
    });
    let outcome = run_rank(&mut rank0, &params, correction).unwrap();
    sender.join().unwrap();

    assert_eq!(outcome.transfers, 200);
}
