//! Static field tables for the delta codecs.
//!
//! Order matters: fields are listed roughly by how often they change, so the
//! "last changed" count stays small for typical deltas. Both peers must use
//! identical tables.

use core::mem::offset_of;

use bytemuck::Pod;
use strafe_shared::constants::GENTITYNUM_BITS;
use strafe_shared::state::{EntityState, PlayerState, Trajectory};

/// Width marker for float fields.
pub const FLOAT_FIELD: i32 = 0;

/// One serializable field of a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetField {
    /// Field path, for logging.
    pub name: &'static str,
    /// Byte offset inside the record.
    pub offset: usize,
    /// Wire width; [`FLOAT_FIELD`] for floats, negative for signed ints.
    pub bits: i32,
}

impl NetField {
    const fn new(name: &'static str, offset: usize, bits: i32) -> Self {
        Self { name, offset, bits }
    }

    /// Index into the record's `[i32]` view.
    #[inline]
    #[must_use]
    pub const fn index(&self) -> usize {
        self.offset / 4
    }

    /// True for float fields.
    #[inline]
    #[must_use]
    pub const fn is_float(&self) -> bool {
        self.bits == FLOAT_FIELD
    }
}

/// Views a record as its 4-byte words.
#[inline]
pub(crate) fn words<T: Pod>(value: &T) -> &[i32] {
    bytemuck::cast_slice(core::slice::from_ref(value))
}

/// Mutable twin of [`words`].
#[inline]
pub(crate) fn words_mut<T: Pod>(value: &mut T) -> &mut [i32] {
    bytemuck::cast_slice_mut(core::slice::from_mut(value))
}

const W: usize = 4;
const ENTITY_BITS: i32 = GENTITYNUM_BITS as i32;

const POS: usize = offset_of!(EntityState, pos);
const APOS: usize = offset_of!(EntityState, apos);
const TR_TYPE: usize = offset_of!(Trajectory, tr_type);
const TR_TIME: usize = offset_of!(Trajectory, tr_time);
const TR_DURATION: usize = offset_of!(Trajectory, tr_duration);
const TR_BASE: usize = offset_of!(Trajectory, tr_base);
const TR_DELTA: usize = offset_of!(Trajectory, tr_delta);

macro_rules! es {
    ($field:ident) => {
        offset_of!(EntityState, $field)
    };
    ($field:ident [$i:expr]) => {
        offset_of!(EntityState, $field) + $i * W
    };
}

macro_rules! ps {
    ($field:ident) => {
        offset_of!(PlayerState, $field)
    };
    ($field:ident [$i:expr]) => {
        offset_of!(PlayerState, $field) + $i * W
    };
}

/// Number of entries in [`ENTITY_FIELDS`].
pub const ENTITY_FIELD_COUNT: usize = 51;

/// Number of entries in [`PLAYER_FIELDS`].
pub const PLAYER_FIELD_COUNT: usize = 48;

/// Entity fields, in wire order. `number` is sent separately.
pub static ENTITY_FIELDS: [NetField; ENTITY_FIELD_COUNT] = [
    NetField::new("pos.tr_time", POS + TR_TIME, 32),
    NetField::new("pos.tr_base[0]", POS + TR_BASE, FLOAT_FIELD),
    NetField::new("pos.tr_base[1]", POS + TR_BASE + W, FLOAT_FIELD),
    NetField::new("pos.tr_delta[0]", POS + TR_DELTA, FLOAT_FIELD),
    NetField::new("pos.tr_delta[1]", POS + TR_DELTA + W, FLOAT_FIELD),
    NetField::new("pos.tr_base[2]", POS + TR_BASE + 2 * W, FLOAT_FIELD),
    NetField::new("apos.tr_base[1]", APOS + TR_BASE + W, FLOAT_FIELD),
    NetField::new("pos.tr_delta[2]", POS + TR_DELTA + 2 * W, FLOAT_FIELD),
    NetField::new("apos.tr_base[0]", APOS + TR_BASE, FLOAT_FIELD),
    NetField::new("event", es!(event), 10),
    NetField::new("angles2[1]", es!(angles2[1]), FLOAT_FIELD),
    NetField::new("e_type", es!(e_type), 8),
    NetField::new("torso_anim", es!(torso_anim), 8),
    NetField::new("event_parm", es!(event_parm), 8),
    NetField::new("legs_anim", es!(legs_anim), 8),
    NetField::new("ground_entity_num", es!(ground_entity_num), ENTITY_BITS),
    NetField::new("pos.tr_type", POS + TR_TYPE, 8),
    NetField::new("e_flags", es!(e_flags), 19),
    NetField::new("other_entity_num", es!(other_entity_num), ENTITY_BITS),
    NetField::new("weapon", es!(weapon), 8),
    NetField::new("client_num", es!(client_num), 8),
    NetField::new("angles[1]", es!(angles[1]), FLOAT_FIELD),
    NetField::new("pos.tr_duration", POS + TR_DURATION, 32),
    NetField::new("apos.tr_type", APOS + TR_TYPE, 8),
    NetField::new("origin[0]", es!(origin[0]), FLOAT_FIELD),
    NetField::new("origin[1]", es!(origin[1]), FLOAT_FIELD),
    NetField::new("origin[2]", es!(origin[2]), FLOAT_FIELD),
    NetField::new("solid", es!(solid), 24),
    NetField::new("powerups", es!(powerups), 16),
    NetField::new("modelindex", es!(modelindex), 8),
    NetField::new("other_entity_num2", es!(other_entity_num2), ENTITY_BITS),
    NetField::new("loop_sound", es!(loop_sound), 8),
    NetField::new("generic1", es!(generic1), 8),
    NetField::new("origin2[2]", es!(origin2[2]), FLOAT_FIELD),
    NetField::new("origin2[0]", es!(origin2[0]), FLOAT_FIELD),
    NetField::new("origin2[1]", es!(origin2[1]), FLOAT_FIELD),
    NetField::new("modelindex2", es!(modelindex2), 8),
    NetField::new("angles[0]", es!(angles[0]), FLOAT_FIELD),
    NetField::new("time", es!(time), 32),
    NetField::new("apos.tr_time", APOS + TR_TIME, 32),
    NetField::new("apos.tr_duration", APOS + TR_DURATION, 32),
    NetField::new("apos.tr_base[2]", APOS + TR_BASE + 2 * W, FLOAT_FIELD),
    NetField::new("apos.tr_delta[0]", APOS + TR_DELTA, FLOAT_FIELD),
    NetField::new("apos.tr_delta[1]", APOS + TR_DELTA + W, FLOAT_FIELD),
    NetField::new("apos.tr_delta[2]", APOS + TR_DELTA + 2 * W, FLOAT_FIELD),
    NetField::new("time2", es!(time2), 32),
    NetField::new("angles[2]", es!(angles[2]), FLOAT_FIELD),
    NetField::new("angles2[0]", es!(angles2[0]), FLOAT_FIELD),
    NetField::new("angles2[2]", es!(angles2[2]), FLOAT_FIELD),
    NetField::new("constant_light", es!(constant_light), 32),
    NetField::new("frame", es!(frame), 16),
];

/// Player fields, in wire order. The four arrays travel separately.
pub static PLAYER_FIELDS: [NetField; PLAYER_FIELD_COUNT] = [
    NetField::new("command_time", ps!(command_time), 32),
    NetField::new("origin[0]", ps!(origin[0]), FLOAT_FIELD),
    NetField::new("origin[1]", ps!(origin[1]), FLOAT_FIELD),
    NetField::new("bob_cycle", ps!(bob_cycle), 8),
    NetField::new("velocity[0]", ps!(velocity[0]), FLOAT_FIELD),
    NetField::new("velocity[1]", ps!(velocity[1]), FLOAT_FIELD),
    NetField::new("viewangles[1]", ps!(viewangles[1]), FLOAT_FIELD),
    NetField::new("viewangles[0]", ps!(viewangles[0]), FLOAT_FIELD),
    NetField::new("weapon_time", ps!(weapon_time), -16),
    NetField::new("origin[2]", ps!(origin[2]), FLOAT_FIELD),
    NetField::new("velocity[2]", ps!(velocity[2]), FLOAT_FIELD),
    NetField::new("legs_timer", ps!(legs_timer), 8),
    NetField::new("pm_time", ps!(pm_time), -16),
    NetField::new("event_sequence", ps!(event_sequence), 16),
    NetField::new("torso_anim", ps!(torso_anim), 8),
    NetField::new("movement_dir", ps!(movement_dir), 4),
    NetField::new("events[0]", ps!(events[0]), 8),
    NetField::new("legs_anim", ps!(legs_anim), 8),
    NetField::new("events[1]", ps!(events[1]), 8),
    NetField::new("pm_flags", ps!(pm_flags), 16),
    NetField::new("ground_entity_num", ps!(ground_entity_num), ENTITY_BITS),
    NetField::new("weaponstate", ps!(weaponstate), 4),
    NetField::new("e_flags", ps!(e_flags), 16),
    NetField::new("external_event", ps!(external_event), 10),
    NetField::new("gravity", ps!(gravity), 16),
    NetField::new("speed", ps!(speed), 16),
    NetField::new("delta_angles[1]", ps!(delta_angles[1]), 16),
    NetField::new("external_event_parm", ps!(external_event_parm), 8),
    NetField::new("viewheight", ps!(viewheight), -8),
    NetField::new("damage_event", ps!(damage_event), 8),
    NetField::new("damage_yaw", ps!(damage_yaw), 8),
    NetField::new("damage_pitch", ps!(damage_pitch), 8),
    NetField::new("damage_count", ps!(damage_count), 8),
    NetField::new("generic1", ps!(generic1), 8),
    NetField::new("pm_type", ps!(pm_type), 8),
    NetField::new("delta_angles[0]", ps!(delta_angles[0]), 16),
    NetField::new("delta_angles[2]", ps!(delta_angles[2]), 16),
    NetField::new("torso_timer", ps!(torso_timer), 12),
    NetField::new("event_parms[0]", ps!(event_parms[0]), 8),
    NetField::new("event_parms[1]", ps!(event_parms[1]), 8),
    NetField::new("client_num", ps!(client_num), 8),
    NetField::new("weapon", ps!(weapon), 5),
    NetField::new("viewangles[2]", ps!(viewangles[2]), FLOAT_FIELD),
    NetField::new("grapple_point[0]", ps!(grapple_point[0]), FLOAT_FIELD),
    NetField::new("grapple_point[1]", ps!(grapple_point[1]), FLOAT_FIELD),
    NetField::new("grapple_point[2]", ps!(grapple_point[2]), FLOAT_FIELD),
    NetField::new("jumppad_ent", ps!(jumppad_ent), ENTITY_BITS),
    NetField::new("loop_sound", ps!(loop_sound), 16),
];

/// Index of `number` in the entity word view.
pub(crate) const ENTITY_NUMBER_INDEX: usize = offset_of!(EntityState, number) / W;

/// Per-element arrays of the player record, in wire order.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PlayerArray {
    pub name: &'static str,
    pub offset: usize,
    pub len: usize,
    pub bits: i32,
}

impl PlayerArray {
    pub const fn index(&self, element: usize) -> usize {
        self.offset / W + element
    }
}

pub(crate) static PLAYER_ARRAYS: [PlayerArray; 4] = [
    PlayerArray {
        name: "stats",
        offset: ps!(stats),
        len: strafe_shared::constants::MAX_STATS,
        bits: -16,
    },
    PlayerArray {
        name: "persistant",
        offset: ps!(persistant),
        len: strafe_shared::constants::MAX_PERSISTANT,
        bits: -16,
    },
    PlayerArray {
        name: "ammo",
        offset: ps!(ammo),
        len: strafe_shared::constants::MAX_WEAPONS,
        bits: -16,
    },
    PlayerArray {
        name: "powerups",
        offset: ps!(powerups),
        len: strafe_shared::constants::MAX_POWERUPS,
        bits: 32,
    },
];
