//! Server end of a client connection.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use strafe_shared::constants::{MAX_MSGLEN, MAX_PACKET_USERCMDS};
use strafe_shared::protocol::{ClientOp, ServerOp};
use strafe_shared::usercmd::UserCmd;

use super::codec::PayloadCodec;
use super::commands::{CommandInbox, CommandOutbox};
use super::{ClientInput, SendOutcome, HEADER_RATE_BYTES};
use crate::config::{NetConfig, MAX_RATE, MIN_RATE};
use crate::delta::read_delta_usercmd;
use crate::error::{NetError, NetResult};
use crate::netchan::{NetSource, Netchan, ProcessOutcome};
use crate::protocol::Message;
use crate::snapshot::{Snapshot, SnapshotWindow};
use crate::transport::PacketSink;

/// Everything the server tracks for one client.
pub struct ServerSession {
    netchan: Netchan,
    codec: PayloadCodec,
    window: SnapshotWindow,
    outbox: CommandOutbox,
    inbox: CommandInbox,
    delta_message: Option<i32>,
    last_usercmd_time: i32,
    rate: u32,
    next_send: Option<Instant>,
    ping: Option<Duration>,
}

impl ServerSession {
    /// Session for a client that completed the handshake.
    #[must_use]
    pub fn new(remote: SocketAddr, qport: u16, challenge: i32, config: &NetConfig) -> Self {
        tracing::info!(%remote, qport, compression = ?config.channel.compression, "client connected");
        Self {
            netchan: Netchan::new(NetSource::Server, remote, qport, challenge)
                .with_logging(config.channel.show_packets, config.channel.show_drop),
            codec: PayloadCodec::new(config.channel.compression),
            window: SnapshotWindow::new().with_max_delta_age(config.snapshot.max_delta_age),
            outbox: CommandOutbox::default(),
            inbox: CommandInbox::default(),
            delta_message: None,
            last_usercmd_time: i32::MIN,
            rate: config.snapshot.rate.clamp(MIN_RATE, MAX_RATE),
            next_send: None,
            ping: None,
        }
    }

    /// The underlying channel.
    #[must_use]
    pub const fn netchan(&self) -> &Netchan {
        &self.netchan
    }

    /// Snapshots sent to this client.
    #[must_use]
    pub const fn window(&self) -> &SnapshotWindow {
        &self.window
    }

    /// Last measured round trip.
    #[must_use]
    pub const fn ping(&self) -> Option<Duration> {
        self.ping
    }

    /// Send budget in bytes per second.
    #[must_use]
    pub const fn rate(&self) -> u32 {
        self.rate
    }

    /// Changes the send budget, clamped to the accepted range.
    pub fn set_rate(&mut self, rate: u32) {
        self.rate = rate.clamp(MIN_RATE, MAX_RATE);
    }

    /// Baseline the next snapshot may delta from.
    #[must_use]
    pub const fn delta_message(&self) -> Option<i32> {
        self.delta_message
    }

    /// String commands not yet acknowledged by the client.
    #[must_use]
    pub fn pending_commands(&self) -> usize {
        self.outbox.len()
    }

    /// Queues a reliable command for the client.
    ///
    /// # Errors
    ///
    /// [`NetError::CommandOverflow`] when the client stopped acknowledging.
    pub fn queue_command(&mut self, text: &str) -> NetResult<i32> {
        self.outbox.push(text)
    }

    /// Commands received from the client since the last call.
    pub fn take_commands(&mut self) -> Vec<String> {
        self.inbox.drain()
    }

    /// True once the rate budget allows another packet.
    #[must_use]
    pub fn ready_to_send(&self, now: Instant) -> bool {
        self.next_send.map_or(true, |at| now >= at)
    }

    fn charge(&mut self, bytes: usize, now: Instant) {
        let millis = (bytes + HEADER_RATE_BYTES) as u64 * 1000 / u64::from(self.rate);
        self.next_send = Some(now + Duration::from_millis(millis));
    }

    /// Sends `snapshot` unless the rate budget or a pending fragment
    /// takes precedence.
    ///
    /// # Errors
    ///
    /// Encoding, compression or sink failures.
    pub fn send_snapshot<S: PacketSink + ?Sized>(
        &mut self,
        sink: &mut S,
        snapshot: &Snapshot,
        now: Instant,
    ) -> NetResult<SendOutcome> {
        if !self.ready_to_send(now) {
            return Ok(SendOutcome::RateLimited);
        }
        if self.netchan.has_unsent_fragments() {
            self.netchan.transmit_next_fragment(sink)?;
            self.charge(self.netchan.last_sent_size(), now);
            return Ok(SendOutcome::FragmentSent);
        }

        let sequence = self.netchan.outgoing_sequence();
        let mut msg = Message::new(MAX_MSGLEN);
        msg.write_long(self.inbox.executed())?;
        self.outbox.write(&mut msg, ServerOp::ServerCommand as u8)?;
        let written = self
            .window
            .write_snapshot(&mut msg, sequence, self.delta_message, snapshot, 0)?;
        msg.write_byte(ServerOp::Eof as i32)?;
        let netchan = &mut self.netchan;
        self.codec.encode_and_send(&mut msg, |data| netchan.transmit(sink, data))?;

        self.window.record_send(sequence, msg.cursize(), now);
        self.charge(self.netchan.last_sent_size(), now);

        Ok(SendOutcome::Sent {
            bytes: msg.cursize(),
            delta_from: written.delta_from,
            fragmented: self.netchan.has_unsent_fragments(),
        })
    }

    /// Processes one datagram from this client.
    ///
    /// Late, duplicated or spoofed packets yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Any malformed payload; the connection should be dropped.
    pub fn handle_packet(&mut self, packet: &[u8], now: Instant) -> NetResult<Option<ClientInput>> {
        let mut msg = Message::from_bytes(packet, MAX_MSGLEN);
        match self.netchan.process(&mut msg) {
            ProcessOutcome::Delivered => {}
            ProcessOutcome::FragmentPending | ProcessOutcome::Rejected(_) => return Ok(None),
        }
        let dropped = self.netchan.dropped();
        self.codec.decode(&mut msg, dropped)?;

        let message_ack = msg.read_long();
        let reliable_ack = msg.read_long();
        if msg.is_past_end() {
            return Err(NetError::ReadPastEnd);
        }
        self.outbox.acknowledge(reliable_ack);

        let mut input = ClientInput {
            message_num: self.netchan.incoming_sequence(),
            dropped,
            ..ClientInput::default()
        };

        loop {
            let op = msg.read_byte();
            if msg.is_past_end() {
                return Err(NetError::ReadPastEnd);
            }
            match ClientOp::from_byte(op) {
                Some(ClientOp::Eof) => break,
                Some(ClientOp::Nop) => {}
                Some(ClientOp::ClientCommand) => self.inbox.read(&mut msg)?,
                Some(ClientOp::Move) => {
                    self.delta_message = Some(message_ack);
                    input.rtt = self.window.acknowledge(message_ack, now);
                    self.read_moves(&mut msg, &mut input.usercmds)?;
                }
                Some(ClientOp::MoveNoDelta) => {
                    self.delta_message = None;
                    input.rtt = self.window.acknowledge(message_ack, now);
                    self.read_moves(&mut msg, &mut input.usercmds)?;
                }
                _ => return Err(NetError::IllegibleMessage(op)),
            }
        }

        if input.rtt.is_some() {
            self.ping = input.rtt;
        }
        input.delta_message = self.delta_message;
        Ok(Some(input))
    }

    fn read_moves(&mut self, msg: &mut Message, out: &mut Vec<UserCmd>) -> NetResult<()> {
        let count = msg.read_byte();
        if !(1..=MAX_PACKET_USERCMDS as i32).contains(&count) {
            return Err(NetError::BadCommandCount(count));
        }
        let mut previous = UserCmd::default();
        for _ in 0..count {
            let cmd = read_delta_usercmd(msg, &previous);
            previous = cmd;
            // Commands repeat across packets; run each once.
            if cmd.server_time > self.last_usercmd_time {
                self.last_usercmd_time = cmd.server_time;
                out.push(cmd);
            }
        }
        if msg.is_past_end() {
            return Err(NetError::ReadPastEnd);
        }
        Ok(())
    }
}
