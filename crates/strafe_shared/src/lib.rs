//! # STRAFE Shared
//!
//! Common types used by both client and server.
//!
//! ## Contents
//!
//! - [`constants`]: wire limits every peer must agree on
//! - [`state`]: the entity and player records that get delta-encoded
//! - [`usercmd`]: per-frame client input
//! - [`protocol`]: message opcodes
//!
//! ## CRITICAL RULE
//!
//! Every record in [`state`] is `#[repr(C)]` and built only from 4-byte
//! fields. The delta codecs index them as `[i32]` through `bytemuck`;
//! adding a field of another width breaks the field tables.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod constants;
pub mod protocol;
pub mod state;
pub mod usercmd;

pub use constants::{
    ENTITYNUM_NONE, GENTITYNUM_BITS, MAX_GENTITIES, MAX_MSGLEN, PACKET_BACKUP, PACKET_MASK,
    PROTOCOL_VERSION,
};
pub use protocol::{ClientOp, ServerOp};
pub use state::{EntityState, PlayerState, Trajectory, TrajectoryType};
pub use usercmd::UserCmd;
