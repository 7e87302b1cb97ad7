//! Packet entities: the entity list of a snapshot as a merge against the
//! baseline's list.
//!
//! Both lists are sorted by number. Walking them together, every entity
//! gets exactly one record:
//!
//! | old      | new      | record                         |
//! |----------|----------|--------------------------------|
//! | n        | n        | delta, one `0` bit if unchanged |
//! | -        | n        | forced delta from zeroed state |
//! | n        | -        | removal                        |

use strafe_shared::constants::{ENTITYNUM_NONE, GENTITYNUM_BITS};
use strafe_shared::state::EntityState;

use crate::delta::{read_delta_entity, read_entity_header, write_delta_entity};
use crate::error::{NetError, NetResult};
use crate::protocol::Message;

/// Writes `new` as a delta against `old`.
///
/// # Errors
///
/// [`NetError::CorruptEntities`] if `new` is not strictly ascending,
/// [`NetError::BadEntityNumber`] for `ENTITYNUM_NONE` or out-of-range
/// numbers, or any write failure.
pub fn write_packet_entities(
    msg: &mut Message,
    old: &[EntityState],
    new: &[EntityState],
) -> NetResult<()> {
    if new.windows(2).any(|w| w[0].number >= w[1].number) {
        return Err(NetError::CorruptEntities("entities not sorted by number"));
    }
    if let Some(e) = new.iter().find(|e| e.number == ENTITYNUM_NONE) {
        return Err(NetError::BadEntityNumber(e.number));
    }

    let (mut oi, mut ni) = (0, 0);
    loop {
        let old_entity = old.get(oi);
        let new_entity = new.get(ni);
        match (old_entity, new_entity) {
            (None, None) => break,
            (Some(o), Some(n)) if o.number == n.number => {
                write_delta_entity(msg, Some(o), Some(n), false)?;
                oi += 1;
                ni += 1;
            }
            (Some(o), Some(n)) if n.number < o.number => {
                write_delta_entity(msg, None, Some(n), true)?;
                ni += 1;
            }
            (None, Some(n)) => {
                write_delta_entity(msg, None, Some(n), true)?;
                ni += 1;
            }
            (Some(o), _) => {
                write_delta_entity(msg, Some(o), None, false)?;
                oi += 1;
            }
        }
    }

    msg.write_bits(1, 1)?;
    msg.write_bits(ENTITYNUM_NONE, GENTITYNUM_BITS as i32)
}

/// Reads packet entities written against `old`.
///
/// # Errors
///
/// [`NetError::CorruptEntities`] when the stream does not line up with
/// `old`, or any entity decoding error.
pub fn read_packet_entities(msg: &mut Message, old: &[EntityState]) -> NetResult<Vec<EntityState>> {
    let mut out: Vec<EntityState> = Vec::with_capacity(old.len() + 8);
    let mut oi = 0;

    loop {
        let Some(number) = read_entity_header(msg)? else {
            let unchanged = old
                .get(oi)
                .ok_or(NetError::CorruptEntities("unchanged marker past the baseline"))?;
            out.push(*unchanged);
            oi += 1;
            continue;
        };
        if number == ENTITYNUM_NONE {
            break;
        }
        if out.last().is_some_and(|e| e.number >= number) {
            return Err(NetError::CorruptEntities("entity numbers out of order"));
        }

        match old.get(oi) {
            Some(o) if o.number < number => {
                return Err(NetError::CorruptEntities("baseline entity skipped"));
            }
            Some(o) if o.number == number => {
                if let Some(state) = read_delta_entity(msg, o, number)? {
                    out.push(state);
                }
                oi += 1;
            }
            _ => {
                let state = read_delta_entity(msg, &EntityState::baseline(number), number)?
                    .ok_or(NetError::CorruptEntities("removal of an unknown entity"))?;
                out.push(state);
            }
        }
    }

    if oi != old.len() {
        return Err(NetError::CorruptEntities("baseline entities left over"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(number: i32, x: f32) -> EntityState {
        let mut e = EntityState::baseline(number);
        e.e_type = 1;
        e.origin = [x, 0.0, 64.0];
        e.pos.tr_base = [x, 0.0, 64.0];
        e
    }

    fn round_trip(old: &[EntityState], new: &[EntityState]) -> (Vec<EntityState>, usize) {
        let mut msg = Message::new(16_384);
        write_packet_entities(&mut msg, old, new).unwrap();
        let bits = msg.bits_written();
        msg.begin_reading();
        (read_packet_entities(&mut msg, old).unwrap(), bits)
    }

    #[test]
    fn test_merge_add_change_remove() {
        let old = vec![entity(1, 0.0), entity(4, 10.0), entity(7, 20.0)];
        let new = vec![entity(1, 0.0), entity(3, 5.0), entity(7, 25.0), entity(12, 1.0)];
        let (got, _) = round_trip(&old, &new);
        assert_eq!(got, new);
    }

    #[test]
    fn test_unchanged_list_costs_one_bit_each() {
        let old: Vec<_> = (0..50).map(|n| entity(n, n as f32)).collect();
        let (got, bits) = round_trip(&old, &old);
        assert_eq!(got, old);
        assert_eq!(bits, 50 + 11);
    }

    #[test]
    fn test_full_from_empty() {
        let new: Vec<_> = (100..140).map(|n| entity(n, -(n as f32))).collect();
        let (got, _) = round_trip(&[], &new);
        assert_eq!(got, new);
    }

    #[test]
    fn test_everything_removed() {
        let old: Vec<_> = (0..5).map(|n| entity(n * 3, 1.0)).collect();
        let (got, bits) = round_trip(&old, &[]);
        assert!(got.is_empty());
        assert_eq!(bits, 5 * 12 + 11);
    }

    #[test]
    fn test_unsorted_rejected() {
        let mut msg = Message::new(1024);
        let new = vec![entity(5, 0.0), entity(2, 0.0)];
        assert!(matches!(
            write_packet_entities(&mut msg, &[], &new),
            Err(NetError::CorruptEntities(_))
        ));
        let dup = vec![entity(5, 0.0), entity(5, 0.0)];
        assert!(write_packet_entities(&mut msg, &[], &dup).is_err());
    }

    #[test]
    fn test_reserved_number_rejected() {
        let mut msg = Message::new(1024);
        let new = vec![EntityState::baseline(ENTITYNUM_NONE)];
        assert!(matches!(
            write_packet_entities(&mut msg, &[], &new),
            Err(NetError::BadEntityNumber(1023))
        ));
    }

    #[test]
    fn test_wrong_baseline_detected() {
        let old = vec![entity(1, 0.0), entity(2, 0.0)];
        let mut msg = Message::new(1024);
        write_packet_entities(&mut msg, &old, &old).unwrap();

        msg.begin_reading();
        assert!(matches!(
            read_packet_entities(&mut msg, &old[..1]),
            Err(NetError::CorruptEntities(_))
        ));
    }
}
