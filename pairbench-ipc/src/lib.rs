#![warn(missing_docs)]
//! Pairbench IPC
//!
//! Messaging sessions and the supervisor↔peer control plane:
//! - [`ShmSession`]: POSIX shared-memory mailboxes + barriers, the transport
//!   real runs measure over
//! - [`ChannelSession`]: in-process channel mesh for tests
//! - rkyv length-prefixed framing and the handshake/report message types
//!   carried over inherited pipes
//!
//! Both sessions implement `pairbench_core::Session`; the protocol engine
//! never sees anything else.

#[cfg(unix)]
mod shm;

mod channel;
mod framing;
mod messages;

pub use channel::{channel_mesh, ChannelSession};
pub use framing::{read_frame, write_frame, FrameError, FrameReader, FrameWriter, MAX_FRAME_SIZE};
pub use messages::{PeerHello, PeerMessage, PeerReport, RunSpec};
#[cfg(unix)]
pub use shm::ShmSession;

/// Control-plane protocol version for compatibility checking.
pub const PROTOCOL_VERSION: u32 = 1;
