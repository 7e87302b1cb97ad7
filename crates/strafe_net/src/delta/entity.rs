//! Entity state delta.
//!
//! ```text
//! unchanged   0
//! removed     1 │ number:10 │ 1
//! delta       1 │ number:10 │ 0 │ lc:8 │ present[0..lc] │ values
//! ```
//!
//! `lc` is one past the last changed field. Integer values are sent as a
//! zero flag followed by the value; floats as a zero flag followed by the
//! 13/32-bit form.

use strafe_shared::constants::{GENTITYNUM_BITS, MAX_GENTITIES};
use strafe_shared::state::EntityState;

use super::fields::{words, words_mut, ENTITY_FIELDS, ENTITY_FIELD_COUNT, ENTITY_NUMBER_INDEX};
use super::{read_float_value, write_float_value};
use crate::error::{NetError, NetResult};
use crate::protocol::Message;

const NUMBER_BITS: i32 = GENTITYNUM_BITS as i32;

/// Outcome of reading one entity against a known baseline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EntityDelta {
    /// The "no delta" bit: the baseline still holds.
    Unchanged,
    /// The entity left the snapshot.
    Removed(i32),
    /// New state for the entity.
    Updated(EntityState),
}

#[inline]
fn check_number(number: i32) -> NetResult<()> {
    if (0..MAX_GENTITIES as i32).contains(&number) {
        Ok(())
    } else {
        Err(NetError::BadEntityNumber(number))
    }
}

/// Number of leading table fields needed to carry every change.
fn last_changed(from: &[i32], to: &[i32]) -> usize {
    ENTITY_FIELDS
        .iter()
        .rposition(|f| from[f.index()] != to[f.index()])
        .map_or(0, |i| i + 1)
}

/// True if any wire field differs between `from` and `to`.
#[must_use]
pub fn entity_changed(from: &EntityState, to: &EntityState) -> bool {
    last_changed(words(from), words(to)) != 0
}

/// Writes the delta from `from` to `to`.
///
/// - `to == None` writes a removal of `from`; nothing if both are `None`
/// - `from == None` deltas against [`EntityState::baseline`]
/// - unchanged and not `force` writes the single "no delta" bit
///
/// # Errors
///
/// [`NetError::BadEntityNumber`] for a number outside `0..MAX_GENTITIES`,
/// or any write failure.
pub fn write_delta_entity(
    msg: &mut Message,
    from: Option<&EntityState>,
    to: Option<&EntityState>,
    force: bool,
) -> NetResult<()> {
    let Some(to) = to else {
        if let Some(from) = from {
            check_number(from.number)?;
            msg.write_bits(1, 1)?;
            msg.write_bits(from.number, NUMBER_BITS)?;
            msg.write_bits(1, 1)?;
        }
        return Ok(());
    };
    check_number(to.number)?;

    let zeroed;
    let from = match from {
        Some(from) => from,
        None => {
            zeroed = EntityState::baseline(to.number);
            &zeroed
        }
    };

    let (old, new) = (words(from), words(to));
    let lc = last_changed(old, new);
    if lc == 0 && !force {
        return msg.write_bits(0, 1);
    }

    msg.write_bits(1, 1)?;
    msg.write_bits(to.number, NUMBER_BITS)?;
    msg.write_bits(0, 1)?;
    msg.write_byte(lc as i32)?;

    for field in &ENTITY_FIELDS[..lc] {
        let changed = old[field.index()] != new[field.index()];
        msg.write_bits(i32::from(changed), 1)?;
    }

    for field in &ENTITY_FIELDS[..lc] {
        let value = new[field.index()];
        if value == old[field.index()] {
            continue;
        }
        if value == 0 {
            msg.write_bits(0, 1)?;
            continue;
        }
        msg.write_bits(1, 1)?;
        if field.is_float() {
            write_float_value(msg, value)?;
        } else {
            msg.write_bits(value, field.bits)?;
        }
    }
    Ok(())
}

/// Reads the leading bits of an entity delta.
///
/// Returns `None` for the "no delta" bit, otherwise the entity number.
///
/// # Errors
///
/// [`NetError::ReadPastEnd`] on a truncated message.
pub fn read_entity_header(msg: &mut Message) -> NetResult<Option<i32>> {
    let has_delta = msg.read_bits(1);
    if msg.is_past_end() {
        return Err(NetError::ReadPastEnd);
    }
    if has_delta == 0 {
        return Ok(None);
    }
    let number = msg.read_bits(NUMBER_BITS);
    if msg.is_past_end() {
        return Err(NetError::ReadPastEnd);
    }
    Ok(Some(number))
}

/// Reads the body of an entity delta whose header named `number`.
///
/// Returns `None` when the entity was removed. Fields not flagged present
/// keep `from`'s value.
///
/// # Errors
///
/// [`NetError::BadEntityNumber`], [`NetError::InvalidFieldCount`] or
/// [`NetError::ReadPastEnd`].
pub fn read_delta_entity(
    msg: &mut Message,
    from: &EntityState,
    number: i32,
) -> NetResult<Option<EntityState>> {
    check_number(number)?;

    if msg.read_bits(1) == 1 {
        return if msg.is_past_end() {
            Err(NetError::ReadPastEnd)
        } else {
            Ok(None)
        };
    }

    let lc = msg.read_byte();
    if msg.is_past_end() {
        return Err(NetError::ReadPastEnd);
    }
    let lc = lc as usize;
    if lc > ENTITY_FIELD_COUNT {
        return Err(NetError::InvalidFieldCount {
            count: lc as i32,
            fields: ENTITY_FIELD_COUNT,
        });
    }

    let mut present = [false; ENTITY_FIELD_COUNT];
    for flag in &mut present[..lc] {
        *flag = msg.read_bits(1) == 1;
    }

    let mut to = *from;
    let out = words_mut(&mut to);
    out[ENTITY_NUMBER_INDEX] = number;
    for (field, _) in ENTITY_FIELDS[..lc].iter().zip(present).filter(|(_, p)| *p) {
        out[field.index()] = if msg.read_bits(1) == 0 {
            0
        } else if field.is_float() {
            read_float_value(msg)
        } else {
            msg.read_bits(field.bits)
        };
    }

    if msg.is_past_end() {
        return Err(NetError::ReadPastEnd);
    }
    Ok(Some(to))
}

/// Reads one entity delta against a known baseline.
///
/// # Errors
///
/// See [`read_delta_entity`].
pub fn read_entity_delta(msg: &mut Message, from: &EntityState) -> NetResult<EntityDelta> {
    let Some(number) = read_entity_header(msg)? else {
        return Ok(EntityDelta::Unchanged);
    };
    Ok(match read_delta_entity(msg, from, number)? {
        Some(state) => EntityDelta::Updated(state),
        None => EntityDelta::Removed(number),
    })
}
