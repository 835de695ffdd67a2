//! Shared-Memory Messaging Session
//!
//! A POSIX shared-memory region holding one single-slot mailbox per ordered
//! rank pair plus a bank of sense-reversing barriers. The supervisor
//! (rank 0) creates and unlinks the region; spawned peers attach by name.
//!
//! Region layout, all cells one cache line wide:
//!
//! ```text
//! +----------+----------------------+--------------------------------+
//! | header   | barriers (NUM_BARRIERS) | mailboxes (num_ranks²)      |
//! +----------+----------------------+--------------------------------+
//! ```
//!
//! A mailbox holds at most one in-flight message. The state word is the
//! synchronization point: the sender publishes the payload with a release
//! store, the receiver consumes it with an acquire load and releases the
//! slot back. Delivery between a fixed pair is therefore strictly ordered.
//! Receives block by spinning with periodic scheduler yields — there are no
//! timeouts, so a hung partner blocks its peer forever (accepted limitation
//! of the benchmark).

use pairbench_core::message::PingMessage;
use pairbench_core::session::{Session, SessionError, NUM_BARRIERS};
use std::ffi::CString;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Identifies a pairbench region. Written last during creation.
const SHM_MAGIC: u64 = 0x5041_4952_424e_4348;

/// Mailbox state: empty, ready for a sender.
const SLOT_FREE: u32 = 0;
/// Mailbox state: holds an unconsumed message.
const SLOT_OCCUPIED: u32 = 1;

/// Spin iterations between scheduler yields while blocked.
const YIELD_INTERVAL: u32 = 128;

#[repr(C, align(64))]
struct Header {
    magic: AtomicU64,
    num_ranks: AtomicU32,
}

#[repr(C, align(64))]
struct BarrierCell {
    waiting: AtomicU32,
    sense: AtomicU32,
}

#[repr(C, align(64))]
struct Mailbox {
    state: AtomicU32,
    payload: AtomicU64,
}

const CELL: usize = 64;

fn region_len(num_ranks: usize) -> usize {
    CELL + NUM_BARRIERS * CELL + num_ranks * num_ranks * CELL
}

/// A per-rank handle onto a shared-memory session.
#[derive(Debug)]
pub struct ShmSession {
    name: CString,
    map: *mut u8,
    len: usize,
    rank: usize,
    num_ranks: usize,
    /// The creator unlinks the region on drop.
    owner: bool,
    local_sense: [u32; NUM_BARRIERS],
}

// SAFETY: the handle owns its mapping; all shared cells are accessed through
// atomics.
unsafe impl Send for ShmSession {}

impl ShmSession {
    /// Create the session region and join it as rank 0.
    ///
    /// Must complete before any peer is spawned; peers attach to a fully
    /// initialized region.
    pub fn create(name: &str, num_ranks: usize) -> Result<Self, SessionError> {
        let c_name = session_cstring(name)?;
        let len = region_len(num_ranks);

        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            )
        };
        if fd < 0 {
            return Err(os_err("shm_open"));
        }

        if unsafe { libc::ftruncate(fd, len as libc::off_t) } != 0 {
            let err = os_err("ftruncate");
            unsafe {
                libc::close(fd);
                libc::shm_unlink(c_name.as_ptr());
            }
            return Err(err);
        }

        let map = map_region(fd, len);
        unsafe { libc::close(fd) };
        let map = match map {
            Ok(map) => map,
            Err(err) => {
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                return Err(err);
            }
        };

        let session = Self {
            name: c_name,
            map,
            len,
            rank: 0,
            num_ranks,
            owner: true,
            local_sense: [0; NUM_BARRIERS],
        };

        // ftruncate zero-fills: mailboxes start FREE, barriers at sense 0.
        // Publishing the magic last makes a visible region a complete one.
        session.header().num_ranks.store(num_ranks as u32, Ordering::Relaxed);
        session.header().magic.store(SHM_MAGIC, Ordering::Release);

        Ok(session)
    }

    /// Attach to an existing session region as the given rank.
    pub fn attach(name: &str, rank: usize, num_ranks: usize) -> Result<Self, SessionError> {
        if rank >= num_ranks {
            return Err(SessionError::InvalidRank { rank, num_ranks });
        }

        let c_name = session_cstring(name)?;
        let len = region_len(num_ranks);

        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0o600) };
        if fd < 0 {
            return Err(os_err("shm_open"));
        }

        let map = map_region(fd, len);
        unsafe { libc::close(fd) };
        let map = map?;

        let session = Self {
            name: c_name,
            map,
            len,
            rank,
            num_ranks,
            owner: false,
            local_sense: [0; NUM_BARRIERS],
        };

        if session.header().magic.load(Ordering::Acquire) != SHM_MAGIC {
            return Err(SessionError::InvalidRegion(
                "bad magic (not a pairbench session)".to_string(),
            ));
        }
        let found = session.header().num_ranks.load(Ordering::Relaxed) as usize;
        if found != num_ranks {
            return Err(SessionError::InvalidRegion(format!(
                "session has {found} ranks, expected {num_ranks}"
            )));
        }

        Ok(session)
    }

    fn header(&self) -> &Header {
        // SAFETY: the mapping is at least `region_len` bytes and the header
        // cell lives at its start for the mapping's lifetime.
        unsafe { &*(self.map as *const Header) }
    }

    fn barrier(&self, index: usize) -> &BarrierCell {
        debug_assert!(index < NUM_BARRIERS);
        // SAFETY: barrier cells follow the header; `index` is bounds-checked
        // by the caller.
        unsafe { &*(self.map.add(CELL + index * CELL) as *const BarrierCell) }
    }

    /// Mailbox for the ordered direction `from → to`.
    fn mailbox(&self, from: usize, to: usize) -> &Mailbox {
        debug_assert!(from < self.num_ranks && to < self.num_ranks);
        let offset = CELL + NUM_BARRIERS * CELL + (from * self.num_ranks + to) * CELL;
        // SAFETY: offset stays inside the mapping for bounds-checked ranks.
        unsafe { &*(self.map.add(offset) as *const Mailbox) }
    }

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

impl Session for ShmSession {
    fn self_rank(&self) -> usize {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    fn send(&mut self, to: usize, msg: &PingMessage) -> Result<(), SessionError> {
        self.check_rank(to)?;
        let slot = self.mailbox(self.rank, to);

        spin_until(|| slot.state.load(Ordering::Acquire) == SLOT_FREE);
        slot.payload.store(msg.seq, Ordering::Relaxed);
        slot.state.store(SLOT_OCCUPIED, Ordering::Release);
        Ok(())
    }

    fn recv_from(&mut self, from: usize, msg: &mut PingMessage) -> Result<(), SessionError> {
        self.check_rank(from)?;
        let slot = self.mailbox(from, self.rank);

        spin_until(|| slot.state.load(Ordering::Acquire) == SLOT_OCCUPIED);
        msg.seq = slot.payload.load(Ordering::Relaxed);
        slot.state.store(SLOT_FREE, Ordering::Release);
        Ok(())
    }

    fn barrier_wait(&mut self, index: usize) -> Result<(), SessionError> {
        if index >= NUM_BARRIERS {
            return Err(SessionError::InvalidBarrier { index });
        }

        let sense = 1 - self.local_sense[index];
        self.local_sense[index] = sense;

        let cell = self.barrier(index);
        let arrived = cell.waiting.fetch_add(1, Ordering::AcqRel) + 1;
        if arrived == self.num_ranks as u32 {
            // Last arrival resets the counter and flips the shared sense,
            // releasing everyone spinning below.
            cell.waiting.store(0, Ordering::Relaxed);
            cell.sense.store(sense, Ordering::Release);
        } else {
            spin_until(|| cell.sense.load(Ordering::Acquire) == sense);
        }
        Ok(())
    }
}

impl Drop for ShmSession {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.map as *mut libc::c_void, self.len);
            if self.owner {
                libc::shm_unlink(self.name.as_ptr());
            }
        }
    }
}

/// Spin until `ready`, yielding the scheduler periodically so oversubscribed
/// cores still make progress.
fn spin_until(mut ready: impl FnMut() -> bool) {
    let mut spins: u32 = 0;
    while !ready() {
        spins = spins.wrapping_add(1);
        if spins % YIELD_INTERVAL == 0 {
            std::thread::yield_now();
        } else {
            std::hint::spin_loop();
        }
    }
}

fn map_region(fd: libc::c_int, len: usize) -> Result<*mut u8, SessionError> {
    let map = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    if map == libc::MAP_FAILED {
        return Err(os_err("mmap"));
    }
    Ok(map as *mut u8)
}

/// POSIX shm names must be a single `/`-rooted path component.
fn session_cstring(name: &str) -> Result<CString, SessionError> {
    let rooted = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    };
    CString::new(rooted)
        .map_err(|_| SessionError::InvalidRegion("session name contains NUL".to_string()))
}

fn os_err(op: &'static str) -> SessionError {
    SessionError::Os {
        op,
        source: std::io::Error::last_os_error(),
    }
}
