//! # Network Error Types
//!
//! Every error here is fatal for the connection that raised it. Packets
//! that are merely late, duplicated or spoofed never surface as errors;
//! the netchan reports them through `ProcessOutcome::Rejected` instead.

use thiserror::Error;

/// Errors that tear down a connection.
#[derive(Error, Debug)]
pub enum NetError {
    /// A write did not fit and the message does not allow overflow.
    #[error("message overflow: {needed} bits requested, {available} bits left")]
    Overflow {
        /// Bits the write needed.
        needed: usize,
        /// Bits left before `maxsize`.
        available: usize,
    },

    /// Bit width outside `1..=32` and `-31..=-1`.
    #[error("bad bit count: {0}")]
    BadBitCount(i32),

    /// `Message::copy` target smaller than the data written so far.
    #[error("copy target of {capacity} bytes cannot hold {cursize} bytes")]
    CopyTooSmall {
        /// Requested capacity.
        capacity: usize,
        /// Bytes in the source message.
        cursize: usize,
    },

    /// Transmit called with more than `MAX_MSGLEN` bytes.
    #[error("message of {0} bytes exceeds MAX_MSGLEN")]
    MessageTooLarge(usize),

    /// Transmit called while fragments of the previous message are unsent.
    #[error("{remaining} bytes of a fragmented message are still unsent")]
    FragmentsPending {
        /// Bytes not yet handed to the sink.
        remaining: usize,
    },

    /// Entity number outside `0..MAX_GENTITIES`.
    #[error("bad entity number: {0}")]
    BadEntityNumber(i32),

    /// Field count in a delta larger than the field table.
    #[error("invalid field count {count} for a table of {fields} fields")]
    InvalidFieldCount {
        /// Count read from the wire.
        count: i32,
        /// Size of the table.
        fields: usize,
    },

    /// Packet-entities stream out of order or inconsistent with the baseline.
    #[error("corrupt packet entities: {0}")]
    CorruptEntities(&'static str),

    /// Unknown or unexpected opcode in a payload.
    #[error("illegible message: opcode {0}")]
    IllegibleMessage(i32),

    /// A move op announced more commands than a packet may carry.
    #[error("bad user command count: {0}")]
    BadCommandCount(i32),

    /// Too many string commands are waiting for acknowledgment.
    #[error("command queue overflow: {pending} commands unacknowledged")]
    CommandOverflow {
        /// Commands queued.
        pending: usize,
    },

    /// A string command sequence skipped ahead.
    #[error("lost string commands: expected {expected}, got {got}")]
    LostCommands {
        /// Next sequence the receiver can execute.
        expected: i32,
        /// Sequence on the wire.
        got: i32,
    },

    /// A message ended before its terminator.
    #[error("read past end of message")]
    ReadPastEnd,

    /// A dropped packet with stream compression leaves the peer trees diverged.
    #[error("compression stream desync after {dropped} dropped packets")]
    CompressionDesync {
        /// Packets missed.
        dropped: i32,
    },

    /// Compressed output did not fit into the message.
    #[error("compressed payload of {needed} bytes exceeds {maxsize} bytes")]
    CompressionOverflow {
        /// Bytes required.
        needed: usize,
        /// Message capacity.
        maxsize: usize,
    },

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Socket or file failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for network operations.
pub type NetResult<T> = Result<T, NetError>;
