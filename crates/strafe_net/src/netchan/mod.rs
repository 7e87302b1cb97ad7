//! # Netchan
//!
//! Sequenced, fragmenting datagram channel between two peers.
//!
//! ## Design
//!
//! Each direction is independent. The sender numbers every message and
//! splits anything of [`FRAGMENT_SIZE`] bytes or more into fragments that
//! the caller drains one per send opportunity. The receiver accepts only
//! sequences newer than the last one it delivered, reassembles fragments in
//! order and reports how many messages went missing in between.
//!
//! ```text
//!            transmit()                         process()
//!  Idle ──────────────────> Fragmenting    any packet ──> checksum/qport ok?
//!   ^    len >= FRAGMENT_SIZE     │                          │ no -> Rejected
//!   │                             │ transmit_next_fragment() │
//!   └──── short final fragment ───┘                    newer sequence?
//!                                                           │ no -> Rejected
//!                                                     fragment? ──> append,
//!                                                           │   short one -> Delivered
//!                                                           └─> Delivered
//! ```
//!
//! ## Wire Header
//!
//! ```text
//! long  sequence          bit 31 set on every fragment of a message
//! short fragment_offset   fragments only
//! short fragment_length   fragments only
//! short qport             client -> server only
//! long  checksum          challenge ^ (sequence * challenge)
//! ```
//!
//! Every fragment of a message carries the fragment bit and the message's
//! sequence, the last one included: the end is marked by length, not by a
//! cleared bit. A fragment shorter than [`FRAGMENT_SIZE`] ends the message,
//! so a message whose length is an exact multiple ends with an empty fragment.
//!
//! The checksum only proves knowledge of the challenge from sequence 2 on.
//! At sequence 1 it is `c ^ c = 0` for every challenge, so a forged first
//! packet passes the check and reaches the payload parser.
//!
//! Sequence numbers are 31 bits wide and compared modulo 2^31, so a channel
//! keeps working across wraparound.

use std::net::SocketAddr;
use std::time::Instant;

use strafe_shared::constants::{FRAGMENT_SIZE, MAX_MSGLEN, MAX_PACKETLEN};

use crate::error::{NetError, NetResult};
use crate::protocol::Message;
use crate::transport::PacketSink;

/// Marks a packet as one fragment of a larger message.
pub const FRAGMENT_BIT: u32 = 1 << 31;

/// Valid bits of a sequence number.
pub const SEQUENCE_MASK: i32 = 0x7FFF_FFFF;

/// Largest header: sequence, fragment fields, qport, checksum.
pub const MAX_HEADER_LEN: usize = 4 + 4 + 2 + 4;

/// Anti-spoofing tag for a packet.
#[inline]
#[must_use]
pub const fn checksum(challenge: i32, sequence: i32) -> i32 {
    challenge ^ sequence.wrapping_mul(challenge)
}

/// True if `a` comes after `b` in modulo-2^31 sequence space.
#[inline]
#[must_use]
pub const fn sequence_newer(a: i32, b: i32) -> bool {
    let diff = a.wrapping_sub(b) & SEQUENCE_MASK;
    diff != 0 && diff < (1 << 30)
}

/// Forward distance from `from` to `to` in sequence space.
#[inline]
#[must_use]
pub const fn sequence_distance(from: i32, to: i32) -> i32 {
    to.wrapping_sub(from) & SEQUENCE_MASK
}

/// Reads the qport of a client packet without touching any channel.
///
/// Lets a server find the connection a packet belongs to when several
/// clients share one address.
#[must_use]
pub fn peek_qport(packet: &[u8]) -> Option<u16> {
    let raw = u32::from_le_bytes(packet.get(..4)?.try_into().ok()?);
    let at = if raw & FRAGMENT_BIT != 0 { 8 } else { 4 };
    let bytes = packet.get(at..at + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
const fn next_sequence(sequence: i32) -> i32 {
    sequence.wrapping_add(1) & SEQUENCE_MASK
}

/// Which end of the connection a channel lives on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetSource {
    /// Sends qport, receives none.
    Client,
    /// Expects qport on every incoming packet.
    Server,
}

/// Why [`Netchan::process`] discarded a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// Shorter than the header.
    Truncated,
    /// Checksum does not match the connection challenge.
    BadChecksum {
        /// Checksum derived from the challenge.
        expected: i32,
        /// Checksum on the wire.
        got: i32,
    },
    /// qport belongs to another client behind the same address.
    QportMismatch {
        /// This channel's qport.
        expected: u16,
        /// qport on the wire.
        got: u16,
    },
    /// Sequence already delivered or older.
    Stale {
        /// Sequence on the wire.
        sequence: i32,
        /// Last delivered sequence.
        incoming: i32,
    },
    /// Fragment does not continue the message being reassembled.
    FragmentOutOfOrder {
        /// Offset the reassembly expects next.
        expected: usize,
        /// Offset on the wire.
        got: usize,
    },
    /// Fragment longer than a fragment or past the reassembly buffer.
    FragmentOverflow,
}

/// Result of feeding one packet to [`Netchan::process`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// A complete message is in the buffer, read cursor at its payload.
    Delivered,
    /// A fragment was stored; the message is not complete yet.
    FragmentPending,
    /// The packet was discarded and no state changed.
    Rejected(RejectReason),
}

impl ProcessOutcome {
    /// True if a message is ready to parse.
    #[must_use]
    pub const fn is_delivered(self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Channel counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChannelStats {
    /// Datagrams handed to the sink.
    pub packets_sent: u64,
    /// Bytes handed to the sink.
    pub bytes_sent: u64,
    /// Fragment datagrams among `packets_sent`.
    pub fragments_sent: u64,
    /// Complete messages delivered.
    pub messages_delivered: u64,
    /// Fragments accepted into reassembly.
    pub fragments_received: u64,
    /// Sum of sequence gaps seen on delivery.
    pub messages_dropped: u64,
    /// Packets rejected.
    pub packets_rejected: u64,
}

/// One side of a sequenced connection.
pub struct Netchan {
    source: NetSource,
    remote_address: SocketAddr,
    qport: u16,
    challenge: i32,

    incoming_sequence: i32,
    outgoing_sequence: i32,
    dropped: i32,

    fragment_sequence: i32,
    fragment_length: usize,
    fragment_buffer: Vec<u8>,

    unsent_fragments: bool,
    unsent_fragment_start: usize,
    unsent_length: usize,
    unsent_buffer: Vec<u8>,

    last_sent_time: Option<Instant>,
    last_sent_size: usize,

    show_packets: bool,
    show_drop: bool,
    stats: ChannelStats,
}

impl Netchan {
    /// Sets up a channel after the connection handshake.
    #[must_use]
    pub fn new(source: NetSource, remote_address: SocketAddr, qport: u16, challenge: i32) -> Self {
        Self {
            source,
            remote_address,
            qport,
            challenge,
            incoming_sequence: 0,
            outgoing_sequence: 1,
            dropped: 0,
            fragment_sequence: 0,
            fragment_length: 0,
            fragment_buffer: vec![0; MAX_MSGLEN],
            unsent_fragments: false,
            unsent_fragment_start: 0,
            unsent_length: 0,
            unsent_buffer: vec![0; MAX_MSGLEN],
            last_sent_time: None,
            last_sent_size: 0,
            show_packets: false,
            show_drop: false,
            stats: ChannelStats::default(),
        }
    }

    /// Enables per-packet and per-drop debug logging.
    #[must_use]
    pub const fn with_logging(mut self, show_packets: bool, show_drop: bool) -> Self {
        self.show_packets = show_packets;
        self.show_drop = show_drop;
        self
    }

    /// Starts numbering outgoing messages at `sequence`.
    #[must_use]
    pub const fn with_outgoing_sequence(mut self, sequence: i32) -> Self {
        self.outgoing_sequence = sequence & SEQUENCE_MASK;
        self
    }

    /// Role of this end.
    #[must_use]
    pub const fn source(&self) -> NetSource {
        self.source
    }

    /// Peer address.
    #[must_use]
    pub const fn remote_address(&self) -> SocketAddr {
        self.remote_address
    }

    /// qport of the client side.
    #[must_use]
    pub const fn qport(&self) -> u16 {
        self.qport
    }

    /// Last delivered sequence.
    #[must_use]
    pub const fn incoming_sequence(&self) -> i32 {
        self.incoming_sequence
    }

    /// Sequence the next message will carry.
    #[must_use]
    pub const fn outgoing_sequence(&self) -> i32 {
        self.outgoing_sequence
    }

    /// Messages missed right before the last delivered one.
    #[must_use]
    pub const fn dropped(&self) -> i32 {
        self.dropped
    }

    /// True while a fragmented message is being paced out.
    #[must_use]
    pub const fn has_unsent_fragments(&self) -> bool {
        self.unsent_fragments
    }

    /// Bytes of the current fragmented message not yet sent.
    #[must_use]
    pub const fn unsent_bytes(&self) -> usize {
        if self.unsent_fragments {
            self.unsent_length - self.unsent_fragment_start
        } else {
            0
        }
    }

    /// When the last datagram left.
    #[must_use]
    pub const fn last_sent_time(&self) -> Option<Instant> {
        self.last_sent_time
    }

    /// Size of the last datagram, header included.
    #[must_use]
    pub const fn last_sent_size(&self) -> usize {
        self.last_sent_size
    }

    /// Counters.
    #[must_use]
    pub const fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    fn write_header(
        &self,
        packet: &mut Message,
        fragment: Option<(usize, usize)>,
    ) -> NetResult<()> {
        let mut raw = self.outgoing_sequence;
        if fragment.is_some() {
            raw |= FRAGMENT_BIT as i32;
        }
        packet.write_long(raw)?;
        if let Some((offset, len)) = fragment {
            packet.write_short(offset as i32)?;
            packet.write_short(len as i32)?;
        }
        if self.source == NetSource::Client {
            packet.write_short(i32::from(self.qport))?;
        }
        packet.write_long(checksum(self.challenge, self.outgoing_sequence))
    }

    fn send<S: PacketSink + ?Sized>(&mut self, sink: &mut S, packet: &Message) -> NetResult<()> {
        self.last_sent_time = Some(Instant::now());
        self.last_sent_size = packet.cursize();
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += packet.cursize() as u64;
        sink.send_packet(self.remote_address, packet.data())
    }

    /// Sends a message, fragmenting it when it is too large for one packet.
    ///
    /// Only the first fragment is sent here; call
    /// [`Netchan::transmit_next_fragment`] once per send opportunity until
    /// [`Netchan::has_unsent_fragments`] turns false.
    ///
    /// # Errors
    ///
    /// [`NetError::MessageTooLarge`] above `MAX_MSGLEN`,
    /// [`NetError::FragmentsPending`] while a previous message is still
    /// being fragmented, or a sink failure.
    pub fn transmit<S: PacketSink + ?Sized>(&mut self, sink: &mut S, data: &[u8]) -> NetResult<()> {
        if data.len() > MAX_MSGLEN {
            return Err(NetError::MessageTooLarge(data.len()));
        }
        if self.unsent_fragments {
            return Err(NetError::FragmentsPending {
                remaining: self.unsent_bytes(),
            });
        }

        if data.len() >= FRAGMENT_SIZE {
            self.unsent_buffer[..data.len()].copy_from_slice(data);
            self.unsent_length = data.len();
            self.unsent_fragment_start = 0;
            self.unsent_fragments = true;
            return self.transmit_next_fragment(sink);
        }

        let mut packet = Message::new(MAX_PACKETLEN);
        self.write_header(&mut packet, None)?;
        packet.write_data(data)?;

        if self.show_packets {
            tracing::debug!(
                source = ?self.source,
                size = packet.cursize(),
                sequence = self.outgoing_sequence,
                ack = self.incoming_sequence,
                "send"
            );
        }
        self.outgoing_sequence = next_sequence(self.outgoing_sequence);
        self.send(sink, &packet)
    }

    /// Sends the next fragment of the pending message, if any.
    ///
    /// # Errors
    ///
    /// Sink failures.
    pub fn transmit_next_fragment<S: PacketSink + ?Sized>(&mut self, sink: &mut S) -> NetResult<()> {
        if !self.unsent_fragments {
            return Ok(());
        }

        let start = self.unsent_fragment_start;
        let len = FRAGMENT_SIZE.min(self.unsent_length - start);

        let mut packet = Message::new(MAX_PACKETLEN);
        self.write_header(&mut packet, Some((start, len)))?;
        packet.write_data(&self.unsent_buffer[start..start + len])?;

        if self.show_packets {
            tracing::debug!(
                source = ?self.source,
                size = packet.cursize(),
                sequence = self.outgoing_sequence,
                fragment_start = start,
                fragment_len = len,
                "send fragment"
            );
        }

        self.unsent_fragment_start += len;
        // An exact multiple of FRAGMENT_SIZE still needs a short (empty) tail.
        if self.unsent_fragment_start == self.unsent_length && len != FRAGMENT_SIZE {
            self.outgoing_sequence = next_sequence(self.outgoing_sequence);
            self.unsent_fragments = false;
        }

        self.stats.fragments_sent += 1;
        self.send(sink, &packet)
    }

    fn reject(&mut self, reason: RejectReason) -> ProcessOutcome {
        self.stats.packets_rejected += 1;
        if self.show_drop {
            tracing::debug!(source = ?self.source, remote = %self.remote_address, ?reason, "packet rejected");
        }
        ProcessOutcome::Rejected(reason)
    }

    /// Validates and sequences a received packet.
    ///
    /// On [`ProcessOutcome::Delivered`] the read cursor of `msg` sits at the
    /// payload. A completed reassembly replaces `msg` with
    /// `[long sequence][payload]`. Rejected packets change nothing.
    pub fn process(&mut self, msg: &mut Message) -> ProcessOutcome {
        msg.begin_reading();
        let raw = msg.read_long();
        let fragmented = (raw as u32) & FRAGMENT_BIT != 0;
        let sequence = raw & SEQUENCE_MASK;

        let fragment = if fragmented {
            let offset = msg.read_short();
            let len = msg.read_short();
            Some((offset, len))
        } else {
            None
        };

        let wire_qport = if self.source == NetSource::Server {
            Some(msg.read_short() as u16)
        } else {
            None
        };
        let wire_checksum = msg.read_long();

        if msg.is_past_end() {
            return self.reject(RejectReason::Truncated);
        }

        if let Some(got) = wire_qport {
            if got != self.qport {
                return self.reject(RejectReason::QportMismatch {
                    expected: self.qport,
                    got,
                });
            }
        }

        let expected = checksum(self.challenge, sequence);
        if wire_checksum != expected {
            return self.reject(RejectReason::BadChecksum {
                expected,
                got: wire_checksum,
            });
        }

        if !sequence_newer(sequence, self.incoming_sequence) {
            if self.show_drop {
                tracing::debug!(
                    remote = %self.remote_address,
                    sequence,
                    incoming = self.incoming_sequence,
                    "out of order packet"
                );
            }
            return self.reject(RejectReason::Stale {
                sequence,
                incoming: self.incoming_sequence,
            });
        }

        let dropped = sequence_distance(self.incoming_sequence, sequence) - 1;

        let Some((offset, len)) = fragment else {
            self.accept(sequence, dropped);
            return ProcessOutcome::Delivered;
        };

        if offset < 0 || len < 0 {
            return self.reject(RejectReason::Truncated);
        }
        let (offset, len) = (offset as usize, len as usize);

        let expected_offset = if sequence == self.fragment_sequence {
            self.fragment_length
        } else {
            0
        };
        if offset != expected_offset {
            return self.reject(RejectReason::FragmentOutOfOrder {
                expected: expected_offset,
                got: offset,
            });
        }

        let payload_start = msg.readcount();
        if len > FRAGMENT_SIZE
            || payload_start + len > msg.cursize()
            || expected_offset + len > self.fragment_buffer.len()
        {
            return self.reject(RejectReason::FragmentOverflow);
        }

        self.fragment_sequence = sequence;
        self.fragment_buffer[expected_offset..expected_offset + len]
            .copy_from_slice(&msg.data()[payload_start..payload_start + len]);
        self.fragment_length = expected_offset + len;
        self.stats.fragments_received += 1;

        if len == FRAGMENT_SIZE {
            return ProcessOutcome::FragmentPending;
        }

        let total = self.fragment_length;
        let mut assembled = Message::new(msg.maxsize().max(total + 4));
        // Capacity covers both writes.
        if assembled.write_long(sequence).is_err()
            || assembled.write_data(&self.fragment_buffer[..total]).is_err()
        {
            return self.reject(RejectReason::FragmentOverflow);
        }
        assembled.set_readcount(4);
        *msg = assembled;

        self.fragment_length = 0;
        self.accept(sequence, dropped);
        ProcessOutcome::Delivered
    }

    fn accept(&mut self, sequence: i32, dropped: i32) {
        self.dropped = dropped;
        if dropped > 0 {
            self.stats.messages_dropped += dropped as u64;
            if self.show_drop {
                tracing::debug!(
                    remote = %self.remote_address,
                    dropped,
                    sequence,
                    "dropped packets"
                );
            }
        }
        self.incoming_sequence = sequence;
        self.stats.messages_delivered += 1;
        if self.show_packets {
            tracing::debug!(source = ?self.source, sequence, "recv");
        }
    }
}
