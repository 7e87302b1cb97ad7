//! # Sessions
//!
//! One connected client as seen from each end of the wire.
//!
//! ## Payloads
//!
//! ```text
//! client -> server                      server -> client
//! ────────────────────────────          ────────────────────────────
//! long  message_acknowledge             long  reliable_acknowledge
//! long  reliable_acknowledge            [svc_serverCommand seq text]*
//! [clc_clientCommand seq text]*         svc_snapshot ...
//! clc_move | clc_moveNoDelta            svc_EOF
//!   byte count, usercmd deltas
//! clc_EOF
//! ```
//!
//! `message_acknowledge` is the last server message the client received;
//! with `clc_move` the server may delta the next snapshot from it, with
//! `clc_moveNoDelta` it must send a full one. String commands are repeated
//! in every payload until the peer acknowledges them.
//!
//! The whole payload is Huffman-coded according to
//! [`CompressionMode`](crate::config::CompressionMode); the netchan header
//! never is.

mod client;
mod codec;
mod commands;
mod server;

use std::time::Duration;

use rand::Rng;
use strafe_shared::usercmd::UserCmd;

pub use client::ClientSession;
pub use commands::MAX_RELIABLE_COMMANDS;
pub use server::ServerSession;

use crate::snapshot::SnapshotParse;

/// Older commands repeated in each client packet to ride out loss.
pub const PACKET_DUP: i32 = 1;

/// Commands the client remembers for resending.
pub const CMD_BACKUP: usize = 64;

/// Per-packet overhead charged against the rate budget (IP + UDP).
pub const HEADER_RATE_BYTES: usize = 48;

/// What a delivered client packet carried.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientInput {
    /// Netchan sequence of the packet.
    pub message_num: i32,
    /// Commands not executed before, oldest first.
    pub usercmds: Vec<UserCmd>,
    /// Baseline the client will accept for the next snapshot.
    pub delta_message: Option<i32>,
    /// Round trip of the acknowledged snapshot, first ack only.
    pub rtt: Option<Duration>,
    /// Client packets lost before this one.
    pub dropped: i32,
}

/// What a delivered server packet carried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerUpdate {
    /// Netchan sequence of the message.
    pub message_num: i32,
    /// Outcome of the snapshot, if the message had one.
    pub snapshot: Option<SnapshotParse>,
    /// Server messages lost before this one.
    pub dropped: i32,
}

/// Result of [`ServerSession::send_snapshot`] and [`ClientSession::send_input`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// A new message went out.
    Sent {
        /// Payload size after compression.
        bytes: usize,
        /// Snapshot baseline used, `None` for a full snapshot and for
        /// client messages.
        delta_from: Option<i32>,
        /// The message was fragmented and more fragments follow.
        fragmented: bool,
    },
    /// A fragment of the previous message went out instead.
    FragmentSent,
    /// The rate budget is spent; nothing was sent.
    RateLimited,
}

/// Random nonzero value for the connect handshake.
#[must_use]
pub fn random_challenge() -> i32 {
    rand::thread_rng().gen_range(1..=i32::MAX)
}

/// Random port tag a client stamps on every packet.
///
/// Lets the server find the client again after a NAT rebinds its port.
#[must_use]
pub fn random_qport() -> u16 {
    rand::thread_rng().gen()
}
