//! Client end of the connection.

use std::net::SocketAddr;

use strafe_shared::constants::{MAX_MSGLEN, MAX_PACKET_USERCMDS, PACKET_BACKUP, PACKET_MASK};
use strafe_shared::protocol::{ClientOp, ServerOp};
use strafe_shared::usercmd::UserCmd;

use super::codec::PayloadCodec;
use super::commands::{CommandInbox, CommandOutbox};
use super::{SendOutcome, ServerUpdate, CMD_BACKUP, PACKET_DUP};
use crate::config::NetConfig;
use crate::delta::write_delta_usercmd;
use crate::error::{NetError, NetResult};
use crate::netchan::{NetSource, Netchan};
use crate::protocol::Message;
use crate::snapshot::{SnapshotHistory, SnapshotParse};
use crate::transport::PacketSink;

/// Client connection state.
pub struct ClientSession {
    netchan: Netchan,
    codec: PayloadCodec,
    history: SnapshotHistory,
    outbox: CommandOutbox,
    inbox: CommandInbox,
    cmds: Vec<UserCmd>,
    cmd_number: i32,
    /// Newest command number sent in each outgoing packet.
    packet_cmd_numbers: [i32; PACKET_BACKUP],
}

impl ClientSession {
    /// Session for a server that accepted the handshake.
    #[must_use]
    pub fn new(server: SocketAddr, qport: u16, challenge: i32, config: &NetConfig) -> Self {
        tracing::info!(%server, qport, "connected to server");
        Self {
            netchan: Netchan::new(NetSource::Client, server, qport, challenge)
                .with_logging(config.channel.show_packets, config.channel.show_drop),
            codec: PayloadCodec::new(config.channel.compression),
            history: SnapshotHistory::new(),
            outbox: CommandOutbox::default(),
            inbox: CommandInbox::default(),
            cmds: vec![UserCmd::default(); CMD_BACKUP],
            cmd_number: 0,
            packet_cmd_numbers: [0; PACKET_BACKUP],
        }
    }

    /// The underlying channel.
    #[must_use]
    pub const fn netchan(&self) -> &Netchan {
        &self.netchan
    }

    /// Snapshots received so far.
    #[must_use]
    pub const fn history(&self) -> &SnapshotHistory {
        &self.history
    }

    /// Number of the newest command.
    #[must_use]
    pub const fn cmd_number(&self) -> i32 {
        self.cmd_number
    }

    /// String commands not yet acknowledged by the server.
    #[must_use]
    pub fn pending_commands(&self) -> usize {
        self.outbox.len()
    }

    /// Queues a reliable command for the server.
    ///
    /// # Errors
    ///
    /// [`NetError::CommandOverflow`] when the server stopped acknowledging.
    pub fn queue_command(&mut self, text: &str) -> NetResult<i32> {
        self.outbox.push(text)
    }

    /// Commands received from the server since the last call.
    pub fn take_commands(&mut self) -> Vec<String> {
        self.inbox.drain()
    }

    /// Records this frame's input.
    pub fn push_usercmd(&mut self, cmd: UserCmd) {
        self.cmd_number += 1;
        self.cmds[self.cmd_number as usize % CMD_BACKUP] = cmd;
    }

    /// Sends new commands plus the ones of the last [`PACKET_DUP`] packets.
    ///
    /// While a large message is still being fragmented, the send
    /// opportunity goes to its next fragment instead.
    ///
    /// # Errors
    ///
    /// Encoding, compression or sink failures.
    pub fn send_input<S: PacketSink + ?Sized>(&mut self, sink: &mut S) -> NetResult<SendOutcome> {
        if self.netchan.has_unsent_fragments() {
            self.netchan.transmit_next_fragment(sink)?;
            return Ok(SendOutcome::FragmentSent);
        }

        let sequence = self.netchan.outgoing_sequence();
        let mut msg = Message::new(MAX_MSGLEN);
        msg.write_long(self.netchan.incoming_sequence())?;
        msg.write_long(self.inbox.executed())?;
        self.outbox.write(&mut msg, ClientOp::ClientCommand as u8)?;

        let old_packet = sequence.wrapping_sub(1 + PACKET_DUP) as usize & PACKET_MASK;
        let oldest_sent = self.packet_cmd_numbers[old_packet];
        let count = (self.cmd_number - oldest_sent).clamp(0, MAX_PACKET_USERCMDS as i32);
        if count > 0 {
            let op = if self.history.wants_full_snapshot() {
                ClientOp::MoveNoDelta
            } else {
                ClientOp::Move
            };
            msg.write_byte(op as i32)?;
            msg.write_byte(count)?;
            let mut previous = UserCmd::default();
            for number in self.cmd_number - count + 1..=self.cmd_number {
                let cmd = self.cmds[number as usize % CMD_BACKUP];
                write_delta_usercmd(&mut msg, &previous, &cmd)?;
                previous = cmd;
            }
        }
        msg.write_byte(ClientOp::Eof as i32)?;
        let netchan = &mut self.netchan;
        self.codec.encode_and_send(&mut msg, |data| netchan.transmit(sink, data))?;
        self.packet_cmd_numbers[sequence as usize & PACKET_MASK] = self.cmd_number;

        Ok(SendOutcome::Sent {
            bytes: msg.cursize(),
            delta_from: None,
            fragmented: self.netchan.has_unsent_fragments(),
        })
    }

    /// Processes one datagram from the server.
    ///
    /// Late, duplicated or spoofed packets and incomplete fragments yield
    /// `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Any malformed payload; the connection should be dropped.
    pub fn handle_packet(&mut self, packet: &[u8]) -> NetResult<Option<ServerUpdate>> {
        let mut msg = Message::from_bytes(packet, MAX_MSGLEN);
        if !self.netchan.process(&mut msg).is_delivered() {
            return Ok(None);
        }
        let dropped = self.netchan.dropped();
        self.codec.decode(&mut msg, dropped)?;

        let message_num = self.netchan.incoming_sequence();
        let reliable_ack = msg.read_long();
        if msg.is_past_end() {
            return Err(NetError::ReadPastEnd);
        }
        self.outbox.acknowledge(reliable_ack);

        let mut update = ServerUpdate {
            message_num,
            snapshot: None,
            dropped,
        };
        loop {
            let op = msg.read_byte();
            if msg.is_past_end() {
                return Err(NetError::ReadPastEnd);
            }
            match ServerOp::from_byte(op) {
                Some(ServerOp::Eof) => break,
                Some(ServerOp::Nop) => {}
                Some(ServerOp::ServerCommand) => self.inbox.read(&mut msg)?,
                Some(ServerOp::Snapshot) => {
                    let parsed = self.history.parse_snapshot(&mut msg, message_num)?;
                    update.snapshot = Some(parsed);
                    // The rest of the message was skipped.
                    if matches!(parsed, SnapshotParse::Discarded { .. }) {
                        break;
                    }
                }
                _ => return Err(NetError::IllegibleMessage(op)),
            }
        }
        Ok(Some(update))
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use strafe_shared::state::{EntityState, PlayerState};

    use super::*;
    use crate::config::{CompressionMode, MAX_RATE};
    use crate::session::{SendOutcome, ServerSession};
    use crate::snapshot::Snapshot;

    const CHALLENGE: i32 = 0x1234_5678;
    const QPORT: u16 = 4321;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn config(compression: CompressionMode) -> NetConfig {
        let mut config = NetConfig::default();
        config.channel.compression = compression;
        config.snapshot.rate = MAX_RATE;
        config
    }

    fn pair(compression: CompressionMode) -> (ServerSession, ClientSession) {
        let config = config(compression);
        (
            ServerSession::new(addr(27901), QPORT, CHALLENGE, &config),
            ClientSession::new(addr(27960), QPORT, CHALLENGE, &config),
        )
    }

    fn world(time: i32, count: i32) -> Snapshot {
        let entities = (0..count)
            .map(|n| {
                let mut e = EntityState::baseline(n * 3);
                e.e_type = 2;
                e.origin = [n as f32 * 16.0, time as f32, 64.0];
                e.modelindex = n % 7;
                e
            })
            .collect();
        let player = PlayerState {
            command_time: time,
            origin: [time as f32, 0.5, -3.0],
            ..PlayerState::default()
        };
        Snapshot::new(time, player, entities)
    }

    fn cmd(time: i32) -> UserCmd {
        UserCmd {
            server_time: time,
            angles: [time, 0, -time],
            forwardmove: 127,
            ..UserCmd::default()
        }
    }

    #[test]
    fn test_snapshot_and_input_exchange() {
        let (mut server, mut client) = pair(CompressionMode::Packet);
        let start = Instant::now();
        let mut to_client: Vec<Vec<u8>> = Vec::new();
        let mut to_server: Vec<Vec<u8>> = Vec::new();
        let mut executed = Vec::new();

        for frame in 1..=10 {
            let now = start + Duration::from_millis(frame * 50);
            let time = frame as i32 * 50;
            let snap = world(time, 5);
            let sent = server.send_snapshot(&mut to_client, &snap, now).unwrap();
            assert!(matches!(sent, SendOutcome::Sent { .. }));
            for packet in to_client.drain(..) {
                let update = client.handle_packet(&packet).unwrap().unwrap();
                assert_eq!(update.snapshot, Some(SnapshotParse::Valid));
            }
            let latest = client.history().latest().unwrap();
            assert_eq!(latest.entities, snap.entities);
            assert_eq!(latest.player, snap.player);

            client.push_usercmd(cmd(time));
            client.send_input(&mut to_server).unwrap();
            for packet in to_server.drain(..) {
                let input = server.handle_packet(&packet, now).unwrap().unwrap();
                executed.extend(input.usercmds);
            }
        }

        let times: Vec<i32> = executed.iter().map(|c| c.server_time).collect();
        assert_eq!(times, (1..=10).map(|f| f * 50).collect::<Vec<_>>());
        assert_eq!(server.window().full_snapshots(), 1);
        assert_eq!(server.window().delta_snapshots(), 9);
        assert!(server.ping().is_some());
    }

    #[test]
    fn test_lost_input_recovered_by_duplicates() {
        let (mut server, mut client) = pair(CompressionMode::Off);
        let now = Instant::now();
        let mut lost: Vec<Vec<u8>> = Vec::new();
        let mut delivered: Vec<Vec<u8>> = Vec::new();

        client.push_usercmd(cmd(10));
        client.send_input(&mut delivered).unwrap();
        client.push_usercmd(cmd(20));
        client.send_input(&mut lost).unwrap();
        client.push_usercmd(cmd(30));
        client.send_input(&mut delivered).unwrap();

        let mut times = Vec::new();
        for packet in &delivered {
            let input = server.handle_packet(packet, now).unwrap().unwrap();
            times.extend(input.usercmds.iter().map(|c| c.server_time));
        }
        assert_eq!(times, [10, 20, 30]);
    }

    #[test]
    fn test_reliable_commands_both_ways() {
        let (mut server, mut client) = pair(CompressionMode::Packet);
        let start = Instant::now();
        let mut wire: Vec<Vec<u8>> = Vec::new();

        client.queue_command("say hello").unwrap();
        server.queue_command("print welcome").unwrap();
        server.queue_command("cs 5 map").unwrap();

        let mut client_got = Vec::new();
        let mut server_got = Vec::new();
        for frame in 1..=3u64 {
            let now = start + Duration::from_millis(frame * 100);
            server.send_snapshot(&mut wire, &world(frame as i32, 1), now).unwrap();
            for packet in wire.drain(..) {
                client.handle_packet(&packet).unwrap();
            }
            client_got.extend(client.take_commands());

            client.push_usercmd(cmd(frame as i32));
            client.send_input(&mut wire).unwrap();
            for packet in wire.drain(..) {
                server.handle_packet(&packet, now).unwrap();
            }
            server_got.extend(server.take_commands());
        }

        assert_eq!(client_got, ["print welcome", "cs 5 map"]);
        assert_eq!(server_got, ["say hello"]);
        assert_eq!(server.pending_commands(), 0);
        assert_eq!(client.pending_commands(), 0);
    }

    #[test]
    fn test_large_snapshot_fragments() {
        let (mut server, mut client) = pair(CompressionMode::Off);
        let mut wire: Vec<Vec<u8>> = Vec::new();
        let start = Instant::now();
        let snap = world(100, 300);

        let sent = server.send_snapshot(&mut wire, &snap, start).unwrap();
        assert!(matches!(sent, SendOutcome::Sent { fragmented: true, .. }));

        let mut frame = 1;
        while server.netchan().has_unsent_fragments() {
            let now = start + Duration::from_millis(frame * 50);
            let next = server.send_snapshot(&mut wire, &world(150, 300), now).unwrap();
            assert_eq!(next, SendOutcome::FragmentSent);
            frame += 1;
        }

        let mut updates = Vec::new();
        for packet in wire.drain(..) {
            if let Some(update) = client.handle_packet(&packet).unwrap() {
                updates.push(update);
            }
        }
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].snapshot, Some(SnapshotParse::Valid));
        assert_eq!(client.history().latest().unwrap().entities, snap.entities);
    }

    #[test]
    fn test_rate_limit() {
        let mut config = config(CompressionMode::Off);
        config.snapshot.rate = 1000;
        let mut server = ServerSession::new(addr(1), QPORT, CHALLENGE, &config);
        let mut wire: Vec<Vec<u8>> = Vec::new();
        let now = Instant::now();

        assert!(matches!(
            server.send_snapshot(&mut wire, &world(1, 4), now).unwrap(),
            SendOutcome::Sent { .. }
        ));
        assert_eq!(
            server.send_snapshot(&mut wire, &world(2, 4), now + Duration::from_millis(1)).unwrap(),
            SendOutcome::RateLimited
        );
        assert!(server.ready_to_send(now + Duration::from_secs(2)));
        assert_eq!(wire.len(), 1);
    }

    #[test]
    fn test_lost_snapshot_requests_still_delta_from_acked() {
        let (mut server, mut client) = pair(CompressionMode::Packet);
        let start = Instant::now();
        let mut wire: Vec<Vec<u8>> = Vec::new();
        let mut lost: Vec<Vec<u8>> = Vec::new();

        for frame in 1..=6u64 {
            let now = start + Duration::from_millis(frame * 50);
            let snap = world(frame as i32 * 50, 3);
            // server messages 3 and 4 never arrive
            if frame == 3 || frame == 4 {
                server.send_snapshot(&mut lost, &snap, now).unwrap();
            } else {
                server.send_snapshot(&mut wire, &snap, now).unwrap();
            }
            for packet in wire.drain(..) {
                let update = client.handle_packet(&packet).unwrap().unwrap();
                assert_eq!(update.snapshot, Some(SnapshotParse::Valid));
                if frame == 5 {
                    assert_eq!(update.dropped, 2);
                }
            }
            if frame != 3 && frame != 4 {
                assert_eq!(client.history().latest().unwrap().entities, snap.entities);
            }

            client.push_usercmd(cmd(frame as i32 * 50));
            client.send_input(&mut wire).unwrap();
            for packet in wire.drain(..) {
                server.handle_packet(&packet, now).unwrap();
            }
        }
        assert_eq!(server.window().full_snapshots(), 1);
    }

    #[test]
    fn test_garbage_payload_is_fatal() {
        let (mut server, _) = pair(CompressionMode::Off);
        let mut peer = Netchan::new(NetSource::Client, addr(1), QPORT, CHALLENGE);
        let mut wire: Vec<Vec<u8>> = Vec::new();
        peer.transmit(&mut wire, &[0, 0, 0, 0, 0, 0, 0, 0, 99]).unwrap();
        let result = server.handle_packet(&wire[0], Instant::now());
        assert!(matches!(result, Err(NetError::IllegibleMessage(99))));

        peer.transmit(&mut wire, &[0, 0, 0, 0]).unwrap();
        let result = server.handle_packet(&wire[1], Instant::now());
        assert!(matches!(result, Err(NetError::ReadPastEnd)));
    }

    #[test]
    fn test_spoofed_packet_ignored() {
        let (mut server, _) = pair(CompressionMode::Off);
        let mut spoofer = Netchan::new(NetSource::Client, addr(1), QPORT, CHALLENGE + 1);
        let mut wire: Vec<Vec<u8>> = Vec::new();
        spoofer.transmit(&mut wire, &[0; 9]).unwrap();
        spoofer.transmit(&mut wire, &[0; 9]).unwrap();
        assert!(server.handle_packet(&wire[1], Instant::now()).unwrap().is_none());
        assert_eq!(server.netchan().incoming_sequence(), 0);
    }

    #[test]
    fn test_forged_first_packet_reaches_parser() {
        let (mut server, _) = pair(CompressionMode::Off);
        let mut spoofer = Netchan::new(NetSource::Client, addr(1), QPORT, CHALLENGE + 1);
        let mut wire: Vec<Vec<u8>> = Vec::new();
        spoofer.transmit(&mut wire, &[0; 9]).unwrap();
        // sequence 1 checksums to zero under any challenge
        let result = server.handle_packet(&wire[0], Instant::now());
        assert!(matches!(result, Err(NetError::IllegibleMessage(0))));
    }

    #[test]
    fn test_large_reliable_commands_reach_server() {
        let (mut server, mut client) = pair(CompressionMode::Off);
        let now = Instant::now();
        let mut wire: Vec<Vec<u8>> = Vec::new();
        let first = "a".repeat(900);
        let second = "b".repeat(900);
        client.queue_command(&first).unwrap();
        client.queue_command(&second).unwrap();

        let mut outcomes = Vec::new();
        for time in 1..=3 {
            client.push_usercmd(cmd(time * 10));
            outcomes.push(client.send_input(&mut wire).unwrap());
        }
        assert!(matches!(outcomes[0], SendOutcome::Sent { fragmented: true, .. }));
        assert_eq!(outcomes[1], SendOutcome::FragmentSent);
        // commands are still unacknowledged, so the next message fragments too
        assert!(matches!(outcomes[2], SendOutcome::Sent { fragmented: true, .. }));

        let mut executed = Vec::new();
        for packet in wire.drain(..) {
            if let Some(input) = server.handle_packet(&packet, now).unwrap() {
                executed.extend(input.usercmds.iter().map(|c| c.server_time));
            }
        }
        assert_eq!(server.take_commands(), vec![first, second]);
        assert_eq!(executed, [10]);

        assert_eq!(client.send_input(&mut wire).unwrap(), SendOutcome::FragmentSent);
        for packet in wire.drain(..) {
            let input = server.handle_packet(&packet, now).unwrap().unwrap();
            executed.extend(input.usercmds.iter().map(|c| c.server_time));
        }
        assert_eq!(executed, [10, 20, 30]);
        assert!(server.take_commands().is_empty());
        assert!(!client.netchan().has_unsent_fragments());
    }
}
