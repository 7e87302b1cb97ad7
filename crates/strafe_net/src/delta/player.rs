//! Player state delta.
//!
//! ```text
//! lc:8 │ present[0..lc] │ values │ arrays:1 │ per array: present:1 [mask:16 │ values]
//! ```
//!
//! Scalar values go at the field's width with no zero flag. The four
//! arrays (`stats`, `persistant`, `ammo`, `powerups`) are diffed per element
//! so one changed ammo count costs one mask and one value.

use strafe_shared::state::PlayerState;

use super::fields::{words, words_mut, PLAYER_ARRAYS, PLAYER_FIELDS, PLAYER_FIELD_COUNT};
use super::{read_float_value, write_float_value};
use crate::error::{NetError, NetResult};
use crate::protocol::Message;

fn array_mask(old: &[i32], new: &[i32], start: usize, len: usize) -> i32 {
    (0..len)
        .filter(|&i| old[start + i] != new[start + i])
        .fold(0, |mask, i| mask | (1 << i))
}

/// Writes the delta from `from` (zeroed if `None`) to `to`.
///
/// # Errors
///
/// Any write failure.
pub fn write_delta_playerstate(
    msg: &mut Message,
    from: Option<&PlayerState>,
    to: &PlayerState,
) -> NetResult<()> {
    let zeroed = PlayerState::default();
    let from = from.unwrap_or(&zeroed);
    let (old, new) = (words(from), words(to));

    let lc = PLAYER_FIELDS
        .iter()
        .rposition(|f| old[f.index()] != new[f.index()])
        .map_or(0, |i| i + 1);

    msg.write_byte(lc as i32)?;
    for field in &PLAYER_FIELDS[..lc] {
        msg.write_bits(i32::from(old[field.index()] != new[field.index()]), 1)?;
    }
    for field in &PLAYER_FIELDS[..lc] {
        let value = new[field.index()];
        if value == old[field.index()] {
            continue;
        }
        if field.is_float() {
            write_float_value(msg, value)?;
        } else {
            msg.write_bits(value, field.bits)?;
        }
    }

    let masks = PLAYER_ARRAYS.map(|a| array_mask(old, new, a.index(0), a.len));
    if masks.iter().all(|&m| m == 0) {
        return msg.write_bits(0, 1);
    }
    msg.write_bits(1, 1)?;

    for (array, mask) in PLAYER_ARRAYS.iter().zip(masks) {
        if mask == 0 {
            msg.write_bits(0, 1)?;
            continue;
        }
        msg.write_bits(1, 1)?;
        msg.write_bits(mask, 16)?;
        tracing::trace!(array = array.name, mask, "player array delta");
        for i in (0..array.len).filter(|i| mask & (1 << i) != 0) {
            msg.write_bits(new[array.index(i)], array.bits)?;
        }
    }
    Ok(())
}

/// Reads a player state delta against `from` (zeroed if `None`).
///
/// # Errors
///
/// [`NetError::InvalidFieldCount`] or [`NetError::ReadPastEnd`].
pub fn read_delta_playerstate(msg: &mut Message, from: Option<&PlayerState>) -> NetResult<PlayerState> {
    let mut to = from.copied().unwrap_or_default();

    let lc = msg.read_byte();
    if msg.is_past_end() {
        return Err(NetError::ReadPastEnd);
    }
    let lc = lc as usize;
    if lc > PLAYER_FIELD_COUNT {
        return Err(NetError::InvalidFieldCount {
            count: lc as i32,
            fields: PLAYER_FIELD_COUNT,
        });
    }

    let mut present = [false; PLAYER_FIELD_COUNT];
    for flag in &mut present[..lc] {
        *flag = msg.read_bits(1) == 1;
    }

    let out = words_mut(&mut to);
    for (field, _) in PLAYER_FIELDS[..lc].iter().zip(present).filter(|(_, p)| *p) {
        out[field.index()] = if field.is_float() {
            read_float_value(msg)
        } else {
            msg.read_bits(field.bits)
        };
    }

    if msg.read_bits(1) == 1 {
        for array in &PLAYER_ARRAYS {
            if msg.read_bits(1) != 1 {
                continue;
            }
            let mask = msg.read_bits(16);
            for i in (0..array.len).filter(|i| mask & (1 << i) != 0) {
                out[array.index(i)] = msg.read_bits(array.bits);
            }
        }
    }

    if msg.is_past_end() {
        return Err(NetError::ReadPastEnd);
    }
    Ok(to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn running_player() -> PlayerState {
        PlayerState {
            command_time: 123_456,
            pm_type: 0,
            origin: [100.0, -250.5, 24.125],
            velocity: [320.0, 0.0, -12.0],
            viewangles: [10.0, 271.40625, 0.0],
            weapon_time: -50,
            gravity: 800,
            speed: 320,
            delta_angles: [0, 16384, 0],
            viewheight: 26,
            weapon: 5,
            client_num: 3,
            ground_entity_num: 1022,
            stats: [100, 0, 0, 25, 0, 0, 100, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            ammo: [0, 0, 100, 50, 0, 10, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            ping: 48,
            ..PlayerState::default()
        }
    }

    fn round_trip(from: Option<&PlayerState>, to: &PlayerState) -> (PlayerState, usize) {
        let mut msg = Message::new(2048);
        write_delta_playerstate(&mut msg, from, to).unwrap();
        let bits = msg.bits_written();
        msg.begin_reading();
        (read_delta_playerstate(&mut msg, from).unwrap(), bits)
    }

    #[test]
    fn test_unchanged_costs_nine_bits() {
        let ps = running_player();
        let (got, bits) = round_trip(Some(&ps), &ps);
        assert_eq!(got, ps);
        assert_eq!(bits, 9);
    }

    #[test]
    fn test_from_zeroed() {
        let mut ps = running_player();
        // not on the wire; stays at the baseline value
        ps.ping = 0;
        let (got, _) = round_trip(None, &ps);
        assert_eq!(got, ps);
    }

    #[test]
    fn test_fields_outside_table_keep_baseline() {
        let from = running_player();
        let mut to = from;
        to.ping = 999;
        to.pmove_framecount = 7;
        let (got, bits) = round_trip(Some(&from), &to);
        assert_eq!(bits, 9);
        assert_eq!(got.ping, from.ping);
    }

    #[test]
    fn test_single_ammo_change() {
        let from = running_player();
        let mut to = from;
        to.ammo[3] = 49;
        let mut msg = Message::new(64);
        write_delta_playerstate(&mut msg, Some(&from), &to).unwrap();
        // lc, arrays flag, stats/persistant absent, ammo mask and value, powerups absent
        assert_eq!(msg.bits_written(), 8 + 1 + 1 + 1 + 1 + 16 + 16 + 1);

        msg.begin_reading();
        assert_eq!(read_delta_playerstate(&mut msg, Some(&from)).unwrap(), to);
    }

    #[test]
    fn test_signed_and_array_values() {
        let from = running_player();
        let mut to = from;
        to.weapon_time = -1200;
        to.pm_time = -3;
        to.viewheight = -12;
        to.stats[0] = -40;
        to.persistant[15] = 32_000;
        to.powerups[2] = 1_700_000_000;
        to.powerups[15] = -1;
        let (got, _) = round_trip(Some(&from), &to);
        assert_eq!(got, to);
    }

    #[test]
    fn test_random_deltas() {
        let mut rng = StdRng::seed_from_u64(77);
        let mut from = running_player();
        for _ in 0..200 {
            let mut to = from;
            let w = words_mut(&mut to);
            for field in &PLAYER_FIELDS {
                if !rng.gen_bool(0.2) {
                    continue;
                }
                w[field.index()] = match field.bits {
                    0 => (rng.gen_range(-100_000..100_000) as f32 / 8.0).to_bits() as i32,
                    32 => rng.gen(),
                    b if b < 0 => rng.gen_range(-(1 << (-b - 1))..1 << (-b - 1)),
                    b => rng.gen_range(0..1 << b),
                };
            }
            for array in &PLAYER_ARRAYS {
                for i in 0..array.len {
                    if !rng.gen_bool(0.1) {
                        continue;
                    }
                    w[array.index(i)] = if array.bits == 32 {
                        rng.gen()
                    } else {
                        rng.gen_range(-32_768..32_768)
                    };
                }
            }
            let (got, _) = round_trip(Some(&from), &to);
            assert_eq!(words(&got), words(&to));
            from = to;
        }
    }

    #[test]
    fn test_invalid_field_count() {
        let mut msg = Message::new(8);
        msg.write_byte(PLAYER_FIELD_COUNT as i32 + 1).unwrap();
        msg.begin_reading();
        assert!(matches!(
            read_delta_playerstate(&mut msg, None),
            Err(NetError::InvalidFieldCount { count: 49, fields: 48 })
        ));
    }

    #[test]
    fn test_truncated() {
        let mut msg = Message::new(2048);
        write_delta_playerstate(&mut msg, None, &running_player()).unwrap();
        let mut cut = Message::from_bytes(&msg.data()[..6], 6);
        assert!(matches!(
            read_delta_playerstate(&mut cut, None),
            Err(NetError::ReadPastEnd)
        ));
    }
}
