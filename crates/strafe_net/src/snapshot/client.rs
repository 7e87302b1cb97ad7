//! Client side: received snapshots and their validity.

use strafe_shared::constants::{PACKET_BACKUP, PACKET_MASK};
use strafe_shared::state::{EntityState, PlayerState};

use super::entities::read_packet_entities;
use crate::delta::read_delta_playerstate;
use crate::error::{NetError, NetResult};
use crate::netchan::{sequence_distance, SEQUENCE_MASK};
use crate::protocol::Message;

/// A snapshot as decoded by the client.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReceivedSnapshot {
    /// False once it can no longer serve as a baseline.
    pub valid: bool,
    /// Netchan sequence of the message that carried it.
    pub message_num: i32,
    /// Message the server deltaed from, `None` for a full snapshot.
    pub delta_num: Option<i32>,
    /// Server time of the snapshot.
    pub server_time: i32,
    /// Flags passed through from the server.
    pub snap_flags: u8,
    /// Decoded player state.
    pub player: PlayerState,
    /// Decoded entities, sorted by number.
    pub entities: Vec<EntityState>,
}

/// Result of [`SnapshotHistory::parse_snapshot`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotParse {
    /// Decoded and stored.
    Valid,
    /// The baseline is gone; the rest of the message was skipped.
    Discarded {
        /// Message the server deltaed from.
        delta_num: i32,
    },
}

/// Last [`PACKET_BACKUP`] snapshots received.
pub struct SnapshotHistory {
    frames: Vec<Option<ReceivedSnapshot>>,
    latest: Option<i32>,
    last_parse_discarded: bool,
    discarded: u64,
}

impl Default for SnapshotHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: vec![None; PACKET_BACKUP],
            latest: None,
            last_parse_discarded: false,
            discarded: 0,
        }
    }

    #[inline]
    const fn slot(message_num: i32) -> usize {
        (message_num as usize) & PACKET_MASK
    }

    /// Snapshot carried by `message_num`, if still held.
    #[must_use]
    pub fn get(&self, message_num: i32) -> Option<&ReceivedSnapshot> {
        self.frames[Self::slot(message_num)]
            .as_ref()
            .filter(|s| s.message_num == message_num)
    }

    /// Most recent valid snapshot.
    #[must_use]
    pub fn latest(&self) -> Option<&ReceivedSnapshot> {
        self.latest.and_then(|n| self.get(n)).filter(|s| s.valid)
    }

    /// Snapshots dropped because their baseline was gone.
    #[must_use]
    pub const fn discarded(&self) -> u64 {
        self.discarded
    }

    /// True when the next command should ask for a full snapshot.
    #[must_use]
    pub fn wants_full_snapshot(&self) -> bool {
        self.last_parse_discarded || self.latest().is_none()
    }

    /// Drops everything; the client will ask for a full snapshot.
    pub fn clear(&mut self) {
        self.frames.iter_mut().for_each(|f| *f = None);
        self.latest = None;
        self.last_parse_discarded = false;
    }

    /// Parses a snapshot body; the `svc_snapshot` byte is already consumed.
    ///
    /// # Errors
    ///
    /// [`NetError::ReadPastEnd`] or any decoding error.
    pub fn parse_snapshot(&mut self, msg: &mut Message, message_num: i32) -> NetResult<SnapshotParse> {
        let server_time = msg.read_long();
        let delta_distance = msg.read_byte();
        let snap_flags = msg.read_byte();
        if msg.is_past_end() {
            return Err(NetError::ReadPastEnd);
        }

        let delta_num = (delta_distance != 0)
            .then(|| message_num.wrapping_sub(delta_distance) & SEQUENCE_MASK);

        if let Some(n) = delta_num {
            if self.get(n).map_or(true, |s| !s.valid) {
                tracing::warn!(message_num, delta_num = n, "delta from invalid frame");
                self.discarded += 1;
                self.last_parse_discarded = true;
                msg.set_readcount(msg.cursize());
                return Ok(SnapshotParse::Discarded { delta_num: n });
            }
        }
        let baseline = delta_num.and_then(|n| self.get(n));

        let player = read_delta_playerstate(msg, baseline.map(|b| &b.player))?;
        let old_entities = baseline.map_or(&[][..], |b| b.entities.as_slice());
        let entities = read_packet_entities(msg, old_entities)?;

        self.invalidate_skipped(message_num);
        self.frames[Self::slot(message_num)] = Some(ReceivedSnapshot {
            valid: true,
            message_num,
            delta_num,
            server_time,
            snap_flags: snap_flags as u8,
            player,
            entities,
        });
        self.latest = Some(message_num);
        self.last_parse_discarded = false;
        Ok(SnapshotParse::Valid)
    }

    /// Slots between the previous snapshot and `message_num` hold frames the
    /// server can no longer be deltaing from.
    fn invalidate_skipped(&mut self, message_num: i32) {
        let Some(previous) = self.latest else {
            return;
        };
        let gap = sequence_distance(previous, message_num);
        if gap == 0 || gap > SEQUENCE_MASK / 2 {
            return;
        }
        let skipped = (gap - 1).min(PACKET_BACKUP as i32 - 1);
        for back in 1..=skipped {
            let n = message_num.wrapping_sub(back) & SEQUENCE_MASK;
            if let Some(frame) = self.frames[Self::slot(n)].as_mut() {
                frame.valid = false;
            }
        }
    }
}
