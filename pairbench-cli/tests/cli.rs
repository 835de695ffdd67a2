//! End-to-end runs of the built `pairbench` binary.

#![cfg(unix)]

use std::process::{Command, Output};

fn pairbench(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pairbench"))
        .args(args)
        .output()
        .expect("failed to run pairbench binary")
}

#[test]
fn test_help_exits_zero() {
    let output = pairbench(&["--help"]);
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("--num-msgs"));
    assert!(text.contains("--core-offset"));
}

#[test]
fn test_unknown_flag_exits_one() {
    let output = pairbench(&["--definitely-not-a-flag"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_odd_process_count_rejected_before_topology() {
    let output = pairbench(&["--num-procs", "3"]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("even"), "stderr was: {stderr}");
}

#[test]
fn test_zero_messages_rejected() {
    let output = pairbench(&["--num-msgs", "0"]);
    assert_eq!(output.status.code(), Some(1));
}

// Real measured runs need a cycle counter and POSIX shared memory; both are
// present on the platforms the benchmark targets.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
mod measured {
    use super::pairbench;

    #[test]
    fn test_oneway_run_reports_receiver_throughput() {
        let output = pairbench(&["--num-msgs", "2000"]);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(
            output.status.success(),
            "run failed\nstdout: {stdout}\nstderr: {stderr}"
        );

        assert!(stdout.contains("processes: 2"));
        assert!(stdout.contains("ONEWAY"));
        assert!(stdout.contains("[00] Throughput (core):"));
        assert!(stdout.contains("CS/s"));
        // The sender rank must not report.
        assert!(!stdout.contains("[01]"));
    }

    #[test]
    fn test_roundtrip_run_prints_mode() {
        let output = pairbench(&["--num-msgs", "1000", "--mode", "roundtrip"]);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(
            output.status.success(),
            "run failed\nstdout: {stdout}\nstderr: {stderr}"
        );
        assert!(stdout.contains("ROUNDTRIP"));
        assert!(stdout.contains("[00] Throughput (core):"));
    }
}
