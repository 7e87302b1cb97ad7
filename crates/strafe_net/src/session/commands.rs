//! Reliable string commands.
//!
//! The sender repeats every unacknowledged command in each packet until
//! the peer reports it executed; the receiver runs each sequence once.

use std::collections::VecDeque;

use crate::error::{NetError, NetResult};
use crate::protocol::Message;

/// Commands that may be in flight at once.
pub const MAX_RELIABLE_COMMANDS: usize = 64;

/// Outgoing commands awaiting acknowledgment.
#[derive(Debug, Default)]
pub(crate) struct CommandOutbox {
    sequence: i32,
    pending: VecDeque<(i32, String)>,
}

impl CommandOutbox {
    /// Queues `text` and returns its sequence.
    pub fn push(&mut self, text: &str) -> NetResult<i32> {
        if self.pending.len() >= MAX_RELIABLE_COMMANDS {
            return Err(NetError::CommandOverflow {
                pending: self.pending.len(),
            });
        }
        self.sequence += 1;
        self.pending.push_back((self.sequence, text.to_owned()));
        Ok(self.sequence)
    }

    /// Drops everything up to and including `sequence`.
    pub fn acknowledge(&mut self, sequence: i32) {
        while self.pending.front().is_some_and(|(s, _)| *s <= sequence) {
            self.pending.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Writes every pending command under `op`.
    pub fn write(&self, msg: &mut Message, op: u8) -> NetResult<()> {
        for (sequence, text) in &self.pending {
            msg.write_byte(i32::from(op))?;
            msg.write_long(*sequence)?;
            msg.write_string(text)?;
        }
        Ok(())
    }
}

/// Incoming commands, deduplicated.
#[derive(Debug, Default)]
pub(crate) struct CommandInbox {
    executed: i32,
    ready: VecDeque<String>,
}

impl CommandInbox {
    /// Last sequence accepted; sent back as the acknowledgment.
    pub const fn executed(&self) -> i32 {
        self.executed
    }

    /// Accepts a command read from the wire.
    pub fn accept(&mut self, sequence: i32, text: String) -> NetResult<()> {
        if sequence <= self.executed {
            return Ok(());
        }
        if sequence != self.executed + 1 {
            return Err(NetError::LostCommands {
                expected: self.executed + 1,
                got: sequence,
            });
        }
        self.executed = sequence;
        self.ready.push_back(text);
        Ok(())
    }

    /// Reads one `[long sequence][string]` record.
    pub fn read(&mut self, msg: &mut Message) -> NetResult<()> {
        let sequence = msg.read_long();
        let text = msg.read_string();
        if msg.is_past_end() {
            return Err(NetError::ReadPastEnd);
        }
        self.accept(sequence, text)
    }

    pub fn drain(&mut self) -> Vec<String> {
        self.ready.drain(..).collect()
    }
}
