//! Message opcodes shared between client and server.
//!
//! Every operation inside a netchan payload starts with one of these bytes.
//! Both client and server must agree on these definitions.

/// Operations the server sends to a client.
///
/// Byte values 2..=4 and 6 belong to connection setup and downloads, which
/// never travel inside a session payload; they decode to `None`.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ServerOp {
    /// Never sent; catches zeroed buffers.
    Bad = 0,
    /// Keepalive with no content.
    Nop = 1,
    /// `long sequence` then a command string.
    ServerCommand = 5,
    /// Delta-compressed world snapshot.
    Snapshot = 7,
    /// End of the payload.
    Eof = 8,
}

impl ServerOp {
    /// Decodes an opcode byte.
    #[must_use]
    pub const fn from_byte(byte: i32) -> Option<Self> {
        Some(match byte {
            0 => Self::Bad,
            1 => Self::Nop,
            5 => Self::ServerCommand,
            7 => Self::Snapshot,
            8 => Self::Eof,
            _ => return None,
        })
    }
}

/// Operations a client sends to the server.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClientOp {
    /// Never sent; catches zeroed buffers.
    Bad = 0,
    /// Keepalive with no content.
    Nop = 1,
    /// User commands; the server may delta the next snapshot.
    Move = 2,
    /// User commands; the next snapshot must be a full one.
    MoveNoDelta = 3,
    /// `long sequence` then a command string.
    ClientCommand = 4,
    /// End of the payload.
    Eof = 5,
}

impl ClientOp {
    /// Decodes an opcode byte.
    #[must_use]
    pub const fn from_byte(byte: i32) -> Option<Self> {
        Some(match byte {
            0 => Self::Bad,
            1 => Self::Nop,
            2 => Self::Move,
            3 => Self::MoveNoDelta,
            4 => Self::ClientCommand,
            5 => Self::Eof,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_op_bytes() {
        for op in [ServerOp::Nop, ServerOp::ServerCommand, ServerOp::Snapshot, ServerOp::Eof] {
            assert_eq!(ServerOp::from_byte(i32::from(op as u8)), Some(op));
        }
        for byte in [2, 3, 4, 6, 9] {
            assert_eq!(ServerOp::from_byte(byte), None);
        }
        assert_eq!(ServerOp::from_byte(-1), None);
    }

    #[test]
    fn test_client_op_bytes() {
        for op in [ClientOp::Move, ClientOp::MoveNoDelta, ClientOp::ClientCommand, ClientOp::Eof] {
            assert_eq!(ClientOp::from_byte(i32::from(op as u8)), Some(op));
        }
        assert_eq!(ClientOp::from_byte(200), None);
    }
}
