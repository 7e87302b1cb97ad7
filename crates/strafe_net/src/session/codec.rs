//! Payload compression per [`CompressionMode`].

use crate::config::CompressionMode;
use crate::error::{NetError, NetResult};
use crate::protocol::{Huffman, Message};

pub(crate) struct PayloadCodec {
    mode: CompressionMode,
    huffman: Huffman,
}

impl PayloadCodec {
    pub fn new(mode: CompressionMode) -> Self {
        Self {
            mode,
            huffman: Huffman::new(),
        }
    }

    /// Compresses `payload` and hands the result to `send`.
    ///
    /// In stream mode the trees roll back if compression or `send` fails,
    /// so a message that never left does not count toward the peer's model.
    pub fn encode_and_send<F>(&mut self, payload: &mut Message, send: F) -> NetResult<()>
    where
        F: FnOnce(&[u8]) -> NetResult<()>,
    {
        if self.mode != CompressionMode::Stream {
            self.encode(payload)?;
            return send(payload.data());
        }
        let saved = self.huffman.clone();
        let result = self.encode(payload).and_then(|()| send(payload.data()));
        if result.is_err() {
            self.huffman = saved;
        }
        result
    }

    fn encode(&mut self, payload: &mut Message) -> NetResult<()> {
        match self.mode {
            CompressionMode::Off => Ok(()),
            CompressionMode::Packet => {
                self.huffman.reset();
                self.huffman.compress(payload, 0)
            }
            CompressionMode::Stream => self.huffman.compress(payload, 0),
        }
    }

    /// Decompresses a delivered message from its read cursor on.
    ///
    /// `dropped` comes from the netchan; stream mode cannot survive a gap.
    pub fn decode(&mut self, msg: &mut Message, dropped: i32) -> NetResult<()> {
        let offset = msg.readcount();
        match self.mode {
            CompressionMode::Off => Ok(()),
            CompressionMode::Packet => {
                self.huffman.reset();
                self.huffman.decompress(msg, offset);
                Ok(())
            }
            CompressionMode::Stream => {
                if dropped > 0 {
                    return Err(NetError::CompressionDesync { dropped });
                }
                self.huffman.decompress(msg, offset);
                Ok(())
            }
        }
    }
}
