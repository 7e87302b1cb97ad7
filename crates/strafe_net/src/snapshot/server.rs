//! Server side of the acknowledgment window.

use std::time::{Duration, Instant};

use strafe_shared::constants::{PACKET_BACKUP, PACKET_MASK};
use strafe_shared::protocol::ServerOp;
use strafe_shared::state::{EntityState, PlayerState};

use super::entities::write_packet_entities;
use super::{Snapshot, MAX_DELTA_AGE};
use crate::delta::write_delta_playerstate;
use crate::error::NetResult;
use crate::netchan::{sequence_distance, SEQUENCE_MASK};
use crate::protocol::Message;

/// A snapshot as sent to one client.
#[derive(Clone, Debug, Default)]
pub struct ClientFrame {
    /// Netchan sequence of the message that carried it.
    pub message_sequence: i32,
    /// Server time of the snapshot.
    pub server_time: i32,
    /// Player state sent.
    pub player: PlayerState,
    /// Entities sent, sorted by number.
    pub entities: Vec<EntityState>,
    /// When the carrying message left.
    pub sent_at: Option<Instant>,
    /// Size of the carrying message.
    pub message_size: usize,
    /// When the client acknowledged it.
    pub acked_at: Option<Instant>,
}

/// What [`SnapshotWindow::write_snapshot`] chose.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SnapshotWritten {
    /// Message sequence of the baseline, `None` for a full snapshot.
    pub delta_from: Option<i32>,
    /// Bytes added to the message.
    pub bytes: usize,
}

/// Last [`PACKET_BACKUP`] snapshots sent to one client.
pub struct SnapshotWindow {
    frames: Vec<Option<ClientFrame>>,
    max_delta_age: i32,
    full_snapshots: u64,
    delta_snapshots: u64,
}

impl Default for SnapshotWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotWindow {
    /// Creates an empty window.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: vec![None; PACKET_BACKUP],
            max_delta_age: MAX_DELTA_AGE,
            full_snapshots: 0,
            delta_snapshots: 0,
        }
    }

    /// Caps how old a baseline may be; clamped to `1..=MAX_DELTA_AGE`.
    #[must_use]
    pub fn with_max_delta_age(mut self, age: i32) -> Self {
        self.max_delta_age = age.clamp(1, MAX_DELTA_AGE);
        self
    }

    #[inline]
    const fn slot(sequence: i32) -> usize {
        (sequence as usize) & PACKET_MASK
    }

    /// Frame sent with `sequence`, if still in the window.
    #[must_use]
    pub fn frame(&self, sequence: i32) -> Option<&ClientFrame> {
        self.frames[Self::slot(sequence)]
            .as_ref()
            .filter(|f| f.message_sequence == sequence)
    }

    /// Snapshots sent without a baseline.
    #[must_use]
    pub const fn full_snapshots(&self) -> u64 {
        self.full_snapshots
    }

    /// Snapshots sent as deltas.
    #[must_use]
    pub const fn delta_snapshots(&self) -> u64 {
        self.delta_snapshots
    }

    /// Picks the baseline for a snapshot going out with `outgoing`.
    ///
    /// `acknowledged` is the last server message the client reported, or
    /// `None` when it asked for a full snapshot.
    #[must_use]
    pub fn baseline(&self, outgoing: i32, acknowledged: Option<i32>) -> Option<&ClientFrame> {
        let acked = acknowledged?;
        let age = sequence_distance(acked, outgoing);
        if age == 0 || age > SEQUENCE_MASK / 2 {
            tracing::warn!(outgoing, acked, "acknowledgment from the future");
            return None;
        }
        if age >= self.max_delta_age {
            tracing::warn!(outgoing, acked, age, "delta request too old, sending full snapshot");
            return None;
        }
        let frame = self.frame(acked);
        if frame.is_none() {
            tracing::warn!(outgoing, acked, "baseline frame missing, sending full snapshot");
        }
        frame
    }

    /// Writes `snapshot` into `msg` and remembers it under `outgoing`.
    ///
    /// # Errors
    ///
    /// Any encoding error.
    pub fn write_snapshot(
        &mut self,
        msg: &mut Message,
        outgoing: i32,
        acknowledged: Option<i32>,
        snapshot: &Snapshot,
        snap_flags: u8,
    ) -> NetResult<SnapshotWritten> {
        let start = msg.cursize();
        let baseline = self.baseline(outgoing, acknowledged);
        let delta_from = baseline.map(|f| f.message_sequence);
        let delta_num = delta_from.map_or(0, |acked| sequence_distance(acked, outgoing));

        msg.write_byte(ServerOp::Snapshot as i32)?;
        msg.write_long(snapshot.server_time)?;
        msg.write_byte(delta_num)?;
        msg.write_byte(i32::from(snap_flags))?;
        write_delta_playerstate(msg, baseline.map(|f| &f.player), &snapshot.player)?;
        let old_entities = baseline.map_or(&[][..], |f| f.entities.as_slice());
        write_packet_entities(msg, old_entities, &snapshot.entities)?;

        if delta_from.is_some() {
            self.delta_snapshots += 1;
        } else {
            self.full_snapshots += 1;
        }

        self.frames[Self::slot(outgoing)] = Some(ClientFrame {
            message_sequence: outgoing,
            server_time: snapshot.server_time,
            player: snapshot.player,
            entities: snapshot.entities.clone(),
            sent_at: None,
            message_size: 0,
            acked_at: None,
        });

        Ok(SnapshotWritten {
            delta_from,
            bytes: msg.cursize() - start,
        })
    }

    /// Stamps the frame stored under `sequence` with its send time and size.
    pub fn record_send(&mut self, sequence: i32, size: usize, at: Instant) {
        if let Some(frame) = self.frames[Self::slot(sequence)]
            .as_mut()
            .filter(|f| f.message_sequence == sequence)
        {
            frame.sent_at = Some(at);
            frame.message_size = size;
        }
    }

    /// Marks `sequence` acknowledged and returns the round trip time the
    /// first time it is seen.
    pub fn acknowledge(&mut self, sequence: i32, now: Instant) -> Option<Duration> {
        let frame = self.frames[Self::slot(sequence)]
            .as_mut()
            .filter(|f| f.message_sequence == sequence)?;
        if frame.acked_at.is_some() {
            return None;
        }
        frame.acked_at = Some(now);
        frame.sent_at.map(|sent| now.saturating_duration_since(sent))
    }

    /// Forgets every frame; the next snapshot goes out full.
    pub fn clear(&mut self) {
        self.frames.iter_mut().for_each(|f| *f = None);
    }
}
