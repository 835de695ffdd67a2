//! Process Topology
//!
//! Builds the rank topology and supervises spawned peers. The original
//! process keeps rank 0, creates the shared-memory session, then spawns
//! ranks 1..N by re-executing itself with the hidden `--peer` flag and an
//! inherited pipe pair on fds 3/4 (`PAIRBENCH_IPC_FD`). Setup and results
//! travel over those pipes; the measured traffic never does.
//!
//! A peer pins itself after startup — the supervisor never pins a child, so
//! there is no race on shared scheduler state. Any spawn or handshake
//! failure aborts the whole run: a partially-formed topology cannot produce
//! valid measurements.

use crate::config::BenchConfig;
use crate::report::RankResult;
use pairbench_core::measure::{estimate_ref_hz, pin_to_core, MeasureError, TickCorrection};
use pairbench_core::protocol::{run_rank, Mode, RunOutcome, RunParams};
use pairbench_core::session::SessionError;
use pairbench_core::stats::RegionTotal;
use pairbench_ipc::{
    FrameError, FrameReader, FrameWriter, PeerHello, PeerMessage, PeerReport, RunSpec, ShmSession,
    PROTOCOL_VERSION,
};
use std::env;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Env var carrying the peer's inherited pipe fds (`"<read>,<write>"`).
pub const IPC_FD_ENV: &str = "PAIRBENCH_IPC_FD";

/// Errors while building or running the topology.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("failed to spawn peer: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("control-plane error: {0}")]
    Frame(#[from] FrameError),

    #[error("peer protocol error: expected {expected}, got {got}")]
    Protocol { expected: String, got: String },

    #[error("rank {rank} failed: {message}")]
    PeerFailed { rank: u32, message: String },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Measure(#[from] MeasureError),

    #[error("{0}")]
    PeerSetup(String),
}

/// Placement policy: ranks 0 and 1 share the base core; rank r ≥ 2 goes on
/// consecutive cores starting at the offset.
pub fn core_for_rank(rank: usize, core: usize, core_offset: usize) -> usize {
    if rank < 2 {
        core
    } else {
        core_offset + (rank - 2)
    }
}

/// Create a pipe pair, returning (read_fd, write_fd).
fn create_pipe() -> Result<(RawFd, RawFd), std::io::Error> {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // Close-on-exec by default; pre_exec clears it on the two fds handed to
    // the child.
    for &fd in &fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
    Ok((fds[0], fds[1]))
}

/// Close a raw file descriptor.
fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Send SIGTERM to a process.
fn send_sigterm(pid: u32) -> Result<(), std::io::Error> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// A spawned peer process and its control-plane endpoints.
pub struct PeerHandle {
    child: Child,
    rank: u32,
    reader: FrameReader<std::fs::File>,
    writer: FrameWriter<std::fs::File>,
}

impl PeerHandle {
    /// Spawn the peer for `rank`, wiring fds 3/4 for the control plane.
    pub fn spawn(rank: u32) -> Result<Self, TopologyError> {
        let binary = env::current_exe().map_err(TopologyError::SpawnFailed)?;

        // cmd_pipe: supervisor writes the run spec → peer reads from fd 3
        let (cmd_read, cmd_write) = create_pipe()?;
        // msg_pipe: peer writes hello/report from fd 4 → supervisor reads
        let (msg_read, msg_write) = match create_pipe() {
            Ok(fds) => fds,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                return Err(TopologyError::SpawnFailed(e));
            }
        };

        let mut command = Command::new(&binary);
        command
            .arg("--peer")
            .env(IPC_FD_ENV, "3,4")
            .stdin(Stdio::null())
            // Peers never write stdout; report ordering belongs to the
            // supervisor alone.
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        // In the child: dup cmd_read→3, msg_write→4, close originals.
        unsafe {
            command.pre_exec(move || {
                if cmd_read != 3 {
                    libc::dup2(cmd_read, 3);
                    libc::close(cmd_read);
                }
                let flags = libc::fcntl(3, libc::F_GETFD);
                libc::fcntl(3, libc::F_SETFD, flags & !libc::FD_CLOEXEC);

                if msg_write != 4 {
                    libc::dup2(msg_write, 4);
                    libc::close(msg_write);
                }
                let flags = libc::fcntl(4, libc::F_GETFD);
                libc::fcntl(4, libc::F_SETFD, flags & !libc::FD_CLOEXEC);

                // Close the parent-side ends that leaked into the child.
                libc::close(cmd_write);
                libc::close(msg_read);

                Ok(())
            });
        }

        let child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                close_fd(msg_read);
                close_fd(msg_write);
                return Err(TopologyError::SpawnFailed(e));
            }
        };

        // Close the child-side ends in the parent.
        close_fd(cmd_read);
        close_fd(msg_write);

        let writer_file = unsafe { std::fs::File::from_raw_fd(cmd_write) };
        let reader_file = unsafe { std::fs::File::from_raw_fd(msg_read) };

        debug!(rank, pid = child.id(), "spawned peer");

        Ok(Self {
            child,
            rank,
            reader: FrameReader::new(reader_file),
            writer: FrameWriter::new(writer_file),
        })
    }

    /// Rank this handle supervises.
    pub fn rank(&self) -> u32 {
        self.rank
    }

    /// Wait for the peer's Hello and validate the protocol version.
    pub fn wait_for_hello(&mut self) -> Result<PeerHello, TopologyError> {
        match self.reader.read::<PeerMessage>()? {
            PeerMessage::Hello(hello) => {
                if hello.protocol_version != PROTOCOL_VERSION {
                    return Err(TopologyError::Protocol {
                        expected: format!("protocol version {PROTOCOL_VERSION}"),
                        got: format!("protocol version {}", hello.protocol_version),
                    });
                }
                Ok(hello)
            }
            other => Err(TopologyError::Protocol {
                expected: "Hello".to_string(),
                got: format!("{other:?}"),
            }),
        }
    }

    /// Hand the peer its run assignment.
    pub fn dispatch(&mut self, spec: &RunSpec) -> Result<(), TopologyError> {
        self.writer.write(spec)?;
        Ok(())
    }

    /// Block until the peer reports its result. There is no timeout: a hung
    /// partner hangs the collector too, by design.
    pub fn collect_report(&mut self) -> Result<PeerReport, TopologyError> {
        match self.reader.read::<PeerMessage>()? {
            PeerMessage::Report(report) => Ok(report),
            PeerMessage::Failure { rank, message } => {
                Err(TopologyError::PeerFailed { rank, message })
            }
            other => Err(TopologyError::Protocol {
                expected: "Report".to_string(),
                got: format!("{other:?}"),
            }),
        }
    }

    /// Reap the peer process.
    pub fn wait(&mut self) -> Result<(), TopologyError> {
        self.child.wait().map_err(TopologyError::SpawnFailed)?;
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

impl Drop for PeerHandle {
    fn drop(&mut self) {
        if self.is_alive() {
            // Graceful first: SIGTERM, brief wait, then SIGKILL.
            let _ = send_sigterm(self.child.id());
            std::thread::sleep(Duration::from_millis(50));
            if self.is_alive() {
                let _ = self.child.kill();
            }
            let _ = self.child.wait();
        }
    }
}

/// Build the topology, run rank 0's share of the protocol, and gather every
/// rank's result in rank order.
///
/// Returns the per-rank results plus the reference clock used for
/// conversions.
pub fn run_supervisor(config: &BenchConfig) -> Result<(Vec<RankResult>, f64), TopologyError> {
    // Calibrate before anything is spawned so all ranks inherit one
    // constant.
    let correction = TickCorrection::calibrate()?;
    let ref_hz = match config.ref_ghz {
        Some(ghz) => ghz * 1e9,
        None => estimate_ref_hz()?,
    };
    debug!(
        correction = correction.ticks(),
        ref_hz, "calibrated timing pipeline"
    );

    let session_name = format!("/pairbench-{}", std::process::id());
    let mut session = ShmSession::create(&session_name, config.num_procs)?;

    let mut peers: Vec<PeerHandle> = Vec::with_capacity(config.num_procs - 1);
    for rank in 1..config.num_procs {
        peers.push(PeerHandle::spawn(rank as u32)?);
    }

    for peer in &mut peers {
        let hello = peer.wait_for_hello()?;
        debug!(rank = peer.rank(), pid = hello.pid, "peer ready");
        peer.dispatch(&RunSpec {
            rank: peer.rank(),
            num_ranks: config.num_procs as u32,
            session: session_name.clone(),
            num_msgs: config.num_msgs,
            delay_after: config.delay_after,
            roundtrip: config.mode == Mode::Roundtrip,
            core: config.core as u32,
            core_offset: config.core_offset as u32,
            tick_correction: correction.ticks(),
        })?;
    }

    // The supervisor participates as rank 0 and, like every rank, pins
    // itself only after all replication is done.
    let own_core = core_for_rank(0, config.core, config.core_offset);
    if let Err(e) = pin_to_core(own_core) {
        warn!(core = own_core, error = %e, "could not pin rank 0");
    }

    let params = RunParams {
        num_msgs: config.num_msgs,
        mode: config.mode,
        delay_after: config.delay_after,
    };
    let outcome = run_rank(&mut session, &params, correction)?;

    let mut results = vec![rank_result(0, &outcome)];
    for peer in &mut peers {
        let report = peer.collect_report()?;
        results.push(rank_result(
            report.rank as usize,
            &RunOutcome {
                transfers: report.transfers,
                corrected_ticks: report.corrected_ticks,
            },
        ));
    }
    for peer in &mut peers {
        peer.wait()?;
    }

    results.sort_by_key(|result| result.rank);
    Ok((results, ref_hz))
}

fn rank_result(rank: usize, outcome: &RunOutcome) -> RankResult {
    let mut total = RegionTotal::new();
    total.record(outcome);
    RankResult { rank, total }
}

// ─── Peer side ───────────────────────────────────────────────────────────────

/// Entry point for a process started with `--peer`.
///
/// Reads the run spec from fd 3, attaches to the session, pins itself, runs
/// its rank and writes the result to fd 4. Failures are reported as a frame
/// before the non-zero exit so the supervisor can name the failing rank.
pub fn run_peer() -> Result<(), TopologyError> {
    let (read_fd, write_fd) = peer_fds()?;

    let reader_file = unsafe { std::fs::File::from_raw_fd(read_fd) };
    let writer_file = unsafe { std::fs::File::from_raw_fd(write_fd) };
    let mut reader = FrameReader::new(reader_file);
    let mut writer = FrameWriter::new(writer_file);

    writer.write(&PeerMessage::Hello(PeerHello::current()))?;

    let spec: RunSpec = reader.read()?;

    match run_assigned(&spec) {
        Ok(outcome) => {
            writer.write(&PeerMessage::Report(PeerReport {
                rank: spec.rank,
                transfers: outcome.transfers,
                corrected_ticks: outcome.corrected_ticks,
            }))?;
            Ok(())
        }
        Err(e) => {
            let _ = writer.write(&PeerMessage::Failure {
                rank: spec.rank,
                message: e.to_string(),
            });
            Err(e)
        }
    }
}

fn run_assigned(spec: &RunSpec) -> Result<RunOutcome, TopologyError> {
    let rank = spec.rank as usize;
    let mut session = ShmSession::attach(&spec.session, rank, spec.num_ranks as usize)?;

    let core = core_for_rank(rank, spec.core as usize, spec.core_offset as usize);
    if let Err(e) = pin_to_core(core) {
        // No subscriber in peers; stderr is inherited from the supervisor.
        eprintln!("pairbench: warning: could not pin rank {rank} to core {core}: {e}");
    }

    let params = RunParams {
        num_msgs: spec.num_msgs,
        mode: if spec.roundtrip {
            Mode::Roundtrip
        } else {
            Mode::Oneway
        },
        delay_after: spec.delay_after,
    };

    Ok(run_rank(
        &mut session,
        &params,
        TickCorrection::from_raw(spec.tick_correction),
    )?)
}

fn peer_fds() -> Result<(RawFd, RawFd), TopologyError> {
    let value = env::var(IPC_FD_ENV)
        .map_err(|_| TopologyError::PeerSetup(format!("{IPC_FD_ENV} not set")))?;
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() == 2 {
        if let (Ok(read_fd), Ok(write_fd)) = (parts[0].parse::<i32>(), parts[1].parse::<i32>()) {
            return Ok((read_fd, write_fd));
        }
    }
    Err(TopologyError::PeerSetup(format!(
        "invalid {IPC_FD_ENV}={value:?} (expected format: <read_fd>,<write_fd>)"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placement_policy() {
        // Ranks 0 and 1 share the base core.
        assert_eq!(core_for_rank(0, 3, 10), 3);
        assert_eq!(core_for_rank(1, 3, 10), 3);
        // Ranks ≥ 2 are consecutive from the offset.
        assert_eq!(core_for_rank(2, 3, 10), 10);
        assert_eq!(core_for_rank(3, 3, 10), 11);
        assert_eq!(core_for_rank(5, 3, 10), 13);
    }

    #[test]
    fn test_placement_default_offsets() {
        assert_eq!(core_for_rank(2, 0, 0), 0);
        assert_eq!(core_for_rank(4, 0, 0), 2);
    }
}
