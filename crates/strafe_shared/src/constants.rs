//! # Protocol Constants
//!
//! Limits baked into both client and server.
//!
//! **CRITICAL:** Changing any value here changes the wire format.
//! Bump [`PROTOCOL_VERSION`] when you do.

// =============================================================================
// PROTOCOL
// =============================================================================

/// Protocol version exchanged during connection setup.
pub const PROTOCOL_VERSION: i32 = 77;

/// Default server UDP port.
pub const PORT_SERVER: u16 = 27960;

// =============================================================================
// MESSAGE LIMITS
// =============================================================================

/// Largest message the netchan will accept for transmission.
pub const MAX_MSGLEN: usize = 16384 * 2;

/// Largest single datagram put on the wire.
pub const MAX_PACKETLEN: usize = 1400;

/// Payload bytes carried per fragment.
///
/// Leaves room for the netchan header inside [`MAX_PACKETLEN`].
pub const FRAGMENT_SIZE: usize = MAX_PACKETLEN - 100;

/// Longest string accepted by `write_string`, including the terminator.
pub const MAX_STRING_CHARS: usize = 1024;

/// Longest string accepted by `write_big_string`, including the terminator.
pub const BIG_INFO_STRING: usize = 8192;

// =============================================================================
// SNAPSHOT WINDOW
// =============================================================================

/// Number of sent snapshots remembered per client.
///
/// Must be a power of two.
pub const PACKET_BACKUP: usize = 32;

/// Mask turning a sequence number into a window slot.
pub const PACKET_MASK: usize = PACKET_BACKUP - 1;

/// Maximum number of entities carried in one snapshot.
pub const MAX_SNAPSHOT_ENTITIES: usize = 1024;

/// Maximum user commands bundled in one client packet.
pub const MAX_PACKET_USERCMDS: usize = 32;

// =============================================================================
// ENTITIES
// =============================================================================

/// Bits used to transmit an entity number.
pub const GENTITYNUM_BITS: u32 = 10;

/// Number of addressable entities.
pub const MAX_GENTITIES: usize = 1 << GENTITYNUM_BITS;

/// Entity number reserved as "no entity" and as the packet-entities terminator.
pub const ENTITYNUM_NONE: i32 = (MAX_GENTITIES - 1) as i32;

/// Entries in `PlayerState::stats`.
pub const MAX_STATS: usize = 16;

/// Entries in `PlayerState::persistant`.
pub const MAX_PERSISTANT: usize = 16;

/// Entries in `PlayerState::ammo`.
pub const MAX_WEAPONS: usize = 16;

/// Entries in `PlayerState::powerups`.
pub const MAX_POWERUPS: usize = 16;

/// Predictable events carried in a player state.
pub const MAX_PS_EVENTS: usize = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_is_power_of_two() {
        assert!(PACKET_BACKUP.is_power_of_two());
        assert_eq!(PACKET_MASK, 31);
    }

    #[test]
    fn test_fragment_fits_in_packet() {
        assert!(FRAGMENT_SIZE < MAX_PACKETLEN);
        assert!(MAX_MSGLEN > 3 * FRAGMENT_SIZE);
    }

    #[test]
    fn test_entity_terminator() {
        assert_eq!(ENTITYNUM_NONE, 1023);
        assert_eq!(MAX_GENTITIES, 1024);
    }
}
