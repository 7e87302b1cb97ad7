//! # Wire Encoding
//!
//! The bit-level building blocks every packet is made of.
//!
//! ## Packet Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Netchan header (8-14 bytes, never compressed)                │
//! ├──────────────────────────────────────────────────────────────┤
//! │ sequence (4) │ [frag offset (2) │ frag len (2)] │ [qport (2)] │
//! │ checksum (4)                                                 │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Payload: bit-packed ops, optionally Huffman-compressed       │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod huffman;
mod message;

pub use huffman::{Huffman, HuffmanTree};
pub use message::{angle_to_short, short_to_angle, Message};
