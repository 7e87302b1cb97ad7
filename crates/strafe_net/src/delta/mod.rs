//! # Delta Codecs
//!
//! Field-table driven diffs of game records against a baseline.
//!
//! ## Design
//!
//! ```text
//! baseline ──┐
//!            ├─> compare word by word ─> presence bits ─> changed values
//! current ───┘        (floats by bit pattern)
//! ```
//!
//! Each record is viewed as a slice of 4-byte words through `bytemuck`;
//! the static tables in [`fields`] say which word goes on the wire, in what
//! order and at what width. The reader starts from a copy of the baseline
//! and overwrites only the words flagged present.
//!
//! ## Float Encoding
//!
//! Integral floats in `-4096..4096` take 13 bits, anything else 32:
//!
//! ```text
//! 0 │ trunc + 4096 : 13        1 │ raw IEEE bits : 32
//! ```

pub mod entity;
pub mod fields;
pub mod player;
pub mod usercmd;

pub use entity::{
    entity_changed, read_delta_entity, read_entity_delta, read_entity_header, write_delta_entity,
    EntityDelta,
};
pub use fields::{NetField, ENTITY_FIELDS, PLAYER_FIELDS};
pub use player::{read_delta_playerstate, write_delta_playerstate};
pub use usercmd::{read_delta_usercmd, write_delta_usercmd};

use crate::error::NetResult;
use crate::protocol::Message;

/// Width of the small-integer float form.
pub const FLOAT_INT_BITS: i32 = 13;

/// Bias that makes small-integer floats non-negative.
pub const FLOAT_INT_BIAS: i32 = 1 << (FLOAT_INT_BITS - 1);

/// Returns the biased 13-bit form of `value` if it has one.
///
/// `-0.0` has none, so it survives the trip.
#[inline]
fn small_integral(value: f32) -> Option<i32> {
    let trunc = value as i32;
    let biased = trunc.wrapping_add(FLOAT_INT_BIAS);
    let fits = (0..1 << FLOAT_INT_BITS).contains(&biased);
    (fits && (trunc as f32).to_bits() == value.to_bits()).then_some(biased)
}

/// Writes a float word in its 13- or 32-bit form.
pub(crate) fn write_float_value(msg: &mut Message, raw: i32) -> NetResult<()> {
    match small_integral(f32::from_bits(raw as u32)) {
        Some(biased) => {
            msg.write_bits(0, 1)?;
            msg.write_bits(biased, FLOAT_INT_BITS)
        }
        None => {
            msg.write_bits(1, 1)?;
            msg.write_bits(raw, 32)
        }
    }
}

/// Mirror of [`write_float_value`]; returns the raw word.
pub(crate) fn read_float_value(msg: &mut Message) -> i32 {
    if msg.read_bits(1) == 0 {
        let trunc = msg.read_bits(FLOAT_INT_BITS) - FLOAT_INT_BIAS;
        (trunc as f32).to_bits() as i32
    } else {
        msg.read_bits(32)
    }
}
