//! # Snapshot System
//!
//! Delta-compressed world snapshots against a 32-deep acknowledgment window.
//!
//! ## Acknowledgment Window
//!
//! The server keeps the last [`PACKET_BACKUP`] snapshots it sent to each
//! client, indexed by `sequence & PACKET_MASK`. Every client packet names
//! the last server message it received; that snapshot becomes the baseline
//! for the next one.
//!
//! ```text
//! outgoing:   ... 61  62  63  64  65  66 [67]
//! acked:               ^62
//!                       └──── delta_num = 67 - 62 = 5
//!
//! outgoing:   ... 91  92  93  94  95  96 [97]
//! acked:       ^62 (35 behind, slot reused) -> full snapshot
//! ```
//!
//! A baseline older than `PACKET_BACKUP - 3` messages is never used: its
//! slot may already hold a newer frame. Without a baseline the snapshot is
//! written against zeroed records, which the client can always decode.
//!
//! ## Wire Format
//!
//! ```text
//! byte  svc_snapshot
//! long  server_time
//! byte  delta_num        0 = full, else messages back to the baseline
//! byte  snap_flags
//! ....  player state delta
//! ....  packet entities, ended by [1][ENTITYNUM_NONE]
//! ```

mod client;
mod entities;
mod server;

pub use client::{ReceivedSnapshot, SnapshotHistory, SnapshotParse};
pub use entities::{read_packet_entities, write_packet_entities};
pub use server::{ClientFrame, SnapshotWindow, SnapshotWritten};

use strafe_shared::constants::PACKET_BACKUP;
use strafe_shared::state::{EntityState, PlayerState};

/// Default age limit for a delta baseline, in messages.
pub const MAX_DELTA_AGE: i32 = PACKET_BACKUP as i32 - 3;

/// One point-in-time capture of what a client may see.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    /// Server time of the frame.
    pub server_time: i32,
    /// The client's own player state.
    pub player: PlayerState,
    /// Visible entities, sorted by number.
    pub entities: Vec<EntityState>,
}

impl Snapshot {
    /// Builds a snapshot, sorting the entities by number.
    #[must_use]
    pub fn new(server_time: i32, player: PlayerState, mut entities: Vec<EntityState>) -> Self {
        entities.sort_unstable_by_key(|e| e.number);
        Self {
            server_time,
            player,
            entities,
        }
    }

    /// Entity with the given number, if visible.
    #[must_use]
    pub fn entity(&self, number: i32) -> Option<&EntityState> {
        self.entities
            .binary_search_by_key(&number, |e| e.number)
            .ok()
            .map(|i| &self.entities[i])
    }
}
