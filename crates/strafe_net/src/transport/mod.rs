//! # Transport Layer
//!
//! Where finished datagrams leave the process.
//!
//! ## Design
//!
//! - [`PacketSink`] is the only thing the netchan knows about I/O
//! - [`UdpTransport`]: non-blocking UDP socket polled once per frame
//! - [`LoopbackEndpoint`]: bounded in-process queue pair for listen servers
//!   and tests; a full queue drops the packet like a full socket buffer
//! - [`SimulatedLink`]: wraps any sink with loss, duplication and reordering

use std::io;
use std::net::SocketAddr;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use rand::{rngs::StdRng, Rng, SeedableRng};
use strafe_shared::constants::MAX_PACKETLEN;

use crate::error::{NetError, NetResult};

/// Packets a loopback queue holds before dropping.
pub const LOOPBACK_QUEUE: usize = 16;

/// Destination for outgoing datagrams.
pub trait PacketSink {
    /// Sends one datagram to `to`.
    ///
    /// # Errors
    ///
    /// Implementations return [`NetError::Io`] for hard socket failures.
    fn send_packet(&mut self, to: SocketAddr, data: &[u8]) -> NetResult<()>;
}

/// Captures payloads in order and discards addresses.
impl PacketSink for Vec<Vec<u8>> {
    fn send_packet(&mut self, _to: SocketAddr, data: &[u8]) -> NetResult<()> {
        self.push(data.to_vec());
        Ok(())
    }
}

impl<S: PacketSink + ?Sized> PacketSink for &mut S {
    fn send_packet(&mut self, to: SocketAddr, data: &[u8]) -> NetResult<()> {
        (**self).send_packet(to, data)
    }
}

// =============================================================================
// UDP
// =============================================================================

/// UDP socket wrapper for game traffic.
///
/// This is a thin wrapper around std UDP with:
/// - Non-blocking mode
/// - A receive buffer sized for the largest datagram
/// - Packet statistics
pub struct UdpTransport {
    /// The underlying socket.
    socket: std::net::UdpSocket,
    /// Local address.
    local_addr: SocketAddr,
    /// Receive buffer.
    recv_buffer: [u8; MAX_PACKETLEN],
    /// Statistics.
    stats: TransportStats,
}

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransportStats {
    /// Packets sent.
    pub packets_sent: u64,
    /// Packets received.
    pub packets_received: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Bytes received.
    pub bytes_received: u64,
    /// Send errors.
    pub send_errors: u64,
    /// Receive errors.
    pub recv_errors: u64,
}

impl UdpTransport {
    /// Creates a new non-blocking transport bound to `addr`.
    ///
    /// # Errors
    ///
    /// Fails if the socket cannot be bound or configured.
    pub fn bind(addr: SocketAddr) -> NetResult<Self> {
        let socket = std::net::UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;
        tracing::info!(%local_addr, "udp transport bound");

        Ok(Self {
            socket,
            local_addr,
            recv_buffer: [0u8; MAX_PACKETLEN],
            stats: TransportStats::default(),
        })
    }

    /// Returns the local address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receives one datagram, or `None` if nothing is waiting.
    pub fn recv(&mut self) -> Option<(&[u8], SocketAddr)> {
        match self.socket.recv_from(&mut self.recv_buffer) {
            Ok((len, addr)) => {
                self.stats.packets_received += 1;
                self.stats.bytes_received += len as u64;
                Some((&self.recv_buffer[..len], addr))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => None,
            Err(e) => {
                tracing::warn!(error = %e, "udp receive failed");
                self.stats.recv_errors += 1;
                None
            }
        }
    }

    /// Returns statistics.
    #[must_use]
    pub const fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Resets statistics.
    pub fn reset_stats(&mut self) {
        self.stats = TransportStats::default();
    }
}

impl PacketSink for UdpTransport {
    fn send_packet(&mut self, to: SocketAddr, data: &[u8]) -> NetResult<()> {
        match self.socket.send_to(data, to) {
            Ok(n) => {
                self.stats.packets_sent += 1;
                self.stats.bytes_sent += n as u64;
                Ok(())
            }
            // A full send buffer is packet loss, not a broken connection.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.stats.send_errors += 1;
                tracing::debug!(%to, "udp send would block, packet dropped");
                Ok(())
            }
            Err(e) => {
                self.stats.send_errors += 1;
                Err(NetError::Io(e))
            }
        }
    }
}

// =============================================================================
// LOOPBACK
// =============================================================================

/// One end of an in-process datagram pipe.
pub struct LoopbackEndpoint {
    local_addr: SocketAddr,
    tx: Sender<(SocketAddr, Vec<u8>)>,
    rx: Receiver<(SocketAddr, Vec<u8>)>,
    dropped: u64,
}

/// Creates two connected endpoints, each queue holding [`LOOPBACK_QUEUE`] packets.
#[must_use]
pub fn loopback_pair(a: SocketAddr, b: SocketAddr) -> (LoopbackEndpoint, LoopbackEndpoint) {
    let (to_b, from_a) = bounded(LOOPBACK_QUEUE);
    let (to_a, from_b) = bounded(LOOPBACK_QUEUE);
    (
        LoopbackEndpoint {
            local_addr: a,
            tx: to_b,
            rx: from_b,
            dropped: 0,
        },
        LoopbackEndpoint {
            local_addr: b,
            tx: to_a,
            rx: from_a,
            dropped: 0,
        },
    )
}

impl LoopbackEndpoint {
    /// Address the peer sees packets coming from.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Takes the next queued datagram and its sender.
    #[must_use]
    pub fn recv(&self) -> Option<(SocketAddr, Vec<u8>)> {
        self.rx.try_recv().ok()
    }

    /// Packets dropped because the peer's queue was full.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl PacketSink for LoopbackEndpoint {
    fn send_packet(&mut self, _to: SocketAddr, data: &[u8]) -> NetResult<()> {
        match self.tx.try_send((self.local_addr, data.to_vec())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                tracing::debug!(from = %self.local_addr, "loopback queue full, packet dropped");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(NetError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "loopback peer gone",
            ))),
        }
    }
}

// =============================================================================
// SIMULATION
// =============================================================================

/// Impairments applied by a [`SimulatedLink`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NetworkConditions {
    /// Packet loss percentage (0-100).
    pub packet_loss_percent: u8,
    /// Duplicate packet percentage (0-100).
    pub duplicate_percent: u8,
    /// Percentage of packets held back and sent after the next one (0-100).
    pub out_of_order_percent: u8,
}

impl NetworkConditions {
    /// No impairment.
    pub const PERFECT: Self = Self {
        packet_loss_percent: 0,
        duplicate_percent: 0,
        out_of_order_percent: 0,
    };

    /// A bad wireless link.
    pub const POOR: Self = Self {
        packet_loss_percent: 5,
        duplicate_percent: 2,
        out_of_order_percent: 5,
    };
}

/// Wraps a sink and degrades its traffic deterministically from a seed.
pub struct SimulatedLink<S> {
    inner: S,
    conditions: NetworkConditions,
    rng: StdRng,
    held: Option<(SocketAddr, Vec<u8>)>,
    lost: u64,
}

impl<S: PacketSink> SimulatedLink<S> {
    /// Creates a link with the given impairments.
    pub fn new(inner: S, conditions: NetworkConditions, seed: u64) -> Self {
        Self {
            inner,
            conditions,
            rng: StdRng::seed_from_u64(seed),
            held: None,
            lost: 0,
        }
    }

    fn roll(&mut self, percent: u8) -> bool {
        percent > 0 && self.rng.gen_range(0..100u8) < percent
    }

    /// Packets deliberately discarded so far.
    #[must_use]
    pub const fn lost(&self) -> u64 {
        self.lost
    }

    /// The wrapped sink.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Sends any packet still held back for reordering.
    ///
    /// # Errors
    ///
    /// Propagates errors of the wrapped sink.
    pub fn flush(&mut self) -> NetResult<()> {
        if let Some((to, data)) = self.held.take() {
            self.inner.send_packet(to, &data)?;
        }
        Ok(())
    }
}

impl<S: PacketSink> PacketSink for SimulatedLink<S> {
    fn send_packet(&mut self, to: SocketAddr, data: &[u8]) -> NetResult<()> {
        if self.roll(self.conditions.packet_loss_percent) {
            self.lost += 1;
            return Ok(());
        }
        if self.held.is_none() && self.roll(self.conditions.out_of_order_percent) {
            self.held = Some((to, data.to_vec()));
            return Ok(());
        }
        self.inner.send_packet(to, data)?;
        if self.roll(self.conditions.duplicate_percent) {
            self.inner.send_packet(to, data)?;
        }
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_loopback_delivers_in_order() {
        let (mut server, client) = loopback_pair(addr(27960), addr(27961));
        server.send_packet(client.local_addr(), b"one").unwrap();
        server.send_packet(client.local_addr(), b"two").unwrap();

        assert_eq!(client.recv(), Some((addr(27960), b"one".to_vec())));
        assert_eq!(client.recv(), Some((addr(27960), b"two".to_vec())));
        assert_eq!(client.recv(), None);
        assert_eq!(server.recv(), None);
    }

    #[test]
    fn test_loopback_full_queue_drops() {
        let (mut server, client) = loopback_pair(addr(1), addr(2));
        for i in 0..LOOPBACK_QUEUE + 3 {
            server.send_packet(addr(2), &[i as u8]).unwrap();
        }
        assert_eq!(server.dropped(), 3);
        let mut received = 0;
        while client.recv().is_some() {
            received += 1;
        }
        assert_eq!(received, LOOPBACK_QUEUE);
    }

    #[test]
    fn test_loopback_disconnected_peer() {
        let (mut server, client) = loopback_pair(addr(1), addr(2));
        drop(client);
        assert!(matches!(server.send_packet(addr(2), b"x"), Err(NetError::Io(_))));
    }

    #[test]
    fn test_simulated_loss_is_deterministic() {
        let conditions = NetworkConditions {
            packet_loss_percent: 50,
            ..NetworkConditions::PERFECT
        };
        let run = || {
            let mut link = SimulatedLink::new(Vec::<Vec<u8>>::new(), conditions, 42);
            for i in 0..100u8 {
                link.send_packet(addr(1), &[i]).unwrap();
            }
            (link.lost(), link.inner_mut().clone())
        };
        let (lost_a, sent_a) = run();
        let (lost_b, sent_b) = run();
        assert_eq!(lost_a, lost_b);
        assert_eq!(sent_a, sent_b);
        assert_eq!(lost_a as usize + sent_a.len(), 100);
        assert!(lost_a > 20 && lost_a < 80);
    }

    #[test]
    fn test_simulated_reorder_swaps_neighbours() {
        let conditions = NetworkConditions {
            out_of_order_percent: 100,
            ..NetworkConditions::PERFECT
        };
        let mut link = SimulatedLink::new(Vec::<Vec<u8>>::new(), conditions, 1);
        link.send_packet(addr(1), b"a").unwrap();
        link.send_packet(addr(1), b"b").unwrap();
        link.flush().unwrap();
        assert_eq!(link.inner_mut().as_slice(), &[b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn test_udp_round_trip() {
        let mut a = UdpTransport::bind(addr(0)).unwrap();
        let mut b = UdpTransport::bind(addr(0)).unwrap();
        let to = b.local_addr();
        a.send_packet(to, b"ping").unwrap();

        let mut got = None;
        for _ in 0..200 {
            if let Some((data, from)) = b.recv() {
                got = Some((data.to_vec(), from));
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let (data, from) = got.expect("datagram should arrive on localhost");
        assert_eq!(data, b"ping");
        assert_eq!(from, a.local_addr());
        assert_eq!(a.stats().packets_sent, 1);
        assert_eq!(b.stats().packets_received, 1);
    }
}
