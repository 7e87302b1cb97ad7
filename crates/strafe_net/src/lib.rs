//! # STRAFE Net
//!
//! Unreliable-datagram transport and delta-snapshot synchronization for a
//! fast-paced multiplayer shooter.
//!
//! ## Architecture
//!
//! - **Protocol**: bit-packed [`Message`] buffers and adaptive Huffman coding
//! - **Netchan**: sequencing, spoof checks and fragmentation over UDP
//! - **Delta**: field-table diffs of entity, player and input records
//! - **Snapshot**: 32-deep acknowledgment window, full-snapshot fallback
//! - **Session**: both ends of one connection, reliable string commands
//!
//! ## Data Flow
//!
//! ```text
//! SERVER                                              CLIENT
//!   Snapshot ──> SnapshotWindow ──> payload            payload ──> SnapshotHistory
//!                 (pick baseline)      │                  ^         (check baseline)
//!                                  Huffman               Huffman
//!                                      │                  │
//!                                  Netchan ── UDP ──> Netchan
//!                                   (fragment)         (reassemble)
//!   ClientInput <── Netchan <────────── UDP ─────────── usercmds + ack
//! ```
//!
//! Nothing is retransmitted. Lost snapshots are simply superseded; the ack
//! carried by every client packet tells the server which snapshot the
//! client holds, and the next one is deltaed against it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use strafe_net::{NetConfig, ServerSession, UdpTransport};
//!
//! let config = NetConfig::load("net.toml")?;
//! let mut socket = UdpTransport::bind(config.transport.bind)?;
//! let mut session = ServerSession::new(client_addr, qport, challenge, &config);
//! loop {
//!     while let Some((packet, _from)) = socket.recv() {
//!         let packet = packet.to_vec();
//!         if let Some(input) = session.handle_packet(&packet, Instant::now())? {
//!             game.run_commands(&input.usercmds);
//!         }
//!     }
//!     session.send_snapshot(&mut socket, &game.snapshot(), Instant::now())?;
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod delta;
pub mod error;
pub mod netchan;
pub mod protocol;
pub mod session;
pub mod snapshot;
pub mod transport;

// Re-exports for convenience
pub use config::{ChannelConfig, CompressionMode, NetConfig, SnapshotConfig, TransportConfig};
pub use error::{NetError, NetResult};
pub use netchan::{NetSource, Netchan, ProcessOutcome, RejectReason};
pub use protocol::{Huffman, Message};
pub use session::{ClientInput, ClientSession, SendOutcome, ServerSession, ServerUpdate};
pub use snapshot::{ReceivedSnapshot, Snapshot, SnapshotHistory, SnapshotParse, SnapshotWindow};
pub use transport::{
    loopback_pair, LoopbackEndpoint, NetworkConditions, PacketSink, SimulatedLink, UdpTransport,
};

/// Installs a `tracing` subscriber filtered by `RUST_LOG`, defaulting to `default_filter`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
