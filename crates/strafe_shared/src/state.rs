//! # Replicated State Records
//!
//! The two records the server streams to clients every snapshot.
//!
//! ## Layout
//!
//! Both records are `#[repr(C)]`, made only of `i32` and `f32` fields, and
//! derive [`Pod`]. That lets the delta codecs view them as `[i32]` and walk a
//! static table of word offsets instead of hand-writing a comparison per
//! field. Floats travel as their IEEE-754 bit patterns.

use bytemuck::{Pod, Zeroable};

use crate::constants::{MAX_PERSISTANT, MAX_POWERUPS, MAX_PS_EVENTS, MAX_STATS, MAX_WEAPONS};

/// How a [`Trajectory`] evaluates over time.
#[repr(i32)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TrajectoryType {
    /// Fixed at `base`.
    #[default]
    Stationary = 0,
    /// Moves toward `base` from the previous position.
    Interpolate = 1,
    /// `base + delta * t`.
    Linear = 2,
    /// Linear for `duration` then stops.
    LinearStop = 3,
    /// Oscillates around `base`.
    Sine = 4,
    /// Linear with gravity applied.
    Gravity = 5,
}

impl TrajectoryType {
    /// Decodes the wire value, falling back to [`TrajectoryType::Stationary`].
    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Self::Interpolate,
            2 => Self::Linear,
            3 => Self::LinearStop,
            4 => Self::Sine,
            5 => Self::Gravity,
            _ => Self::Stationary,
        }
    }
}

/// Parametric motion of an entity position or angle set.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Trajectory {
    /// Raw [`TrajectoryType`].
    pub tr_type: i32,
    /// Start time in server milliseconds.
    pub tr_time: i32,
    /// Duration for [`TrajectoryType::LinearStop`] and [`TrajectoryType::Sine`].
    pub tr_duration: i32,
    /// Position (or angles) at `tr_time`.
    pub tr_base: [f32; 3],
    /// Velocity, or amplitude for sine motion.
    pub tr_delta: [f32; 3],
}

impl Trajectory {
    /// Returns the decoded trajectory type.
    #[must_use]
    pub const fn kind(&self) -> TrajectoryType {
        TrajectoryType::from_raw(self.tr_type)
    }
}

/// Network-visible state of one entity.
///
/// Identified by `number` in `0..MAX_GENTITIES`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct EntityState {
    /// Slot number of this entity.
    pub number: i32,
    /// Entity type.
    pub e_type: i32,
    /// Entity flags.
    pub e_flags: i32,
    /// Position trajectory.
    pub pos: Trajectory,
    /// Angle trajectory.
    pub apos: Trajectory,
    /// Generic time field.
    pub time: i32,
    /// Second generic time field.
    pub time2: i32,
    /// Origin.
    pub origin: [f32; 3],
    /// Secondary origin (beam end, mover destination).
    pub origin2: [f32; 3],
    /// Angles.
    pub angles: [f32; 3],
    /// Secondary angles.
    pub angles2: [f32; 3],
    /// Linked entity, e.g. shooter of a missile.
    pub other_entity_num: i32,
    /// Second linked entity.
    pub other_entity_num2: i32,
    /// Entity standing on, or `ENTITYNUM_NONE`.
    pub ground_entity_num: i32,
    /// Looping sound index.
    pub loop_sound: i32,
    /// Packed r, g, b, intensity.
    pub constant_light: i32,
    /// Model index.
    pub modelindex: i32,
    /// Secondary model index.
    pub modelindex2: i32,
    /// Owning client, for players and their corpses.
    pub client_num: i32,
    /// Animation frame.
    pub frame: i32,
    /// Packed bounding box for client-side prediction.
    pub solid: i32,
    /// Impulse event.
    pub event: i32,
    /// Impulse event parameter.
    pub event_parm: i32,
    /// Active powerup bits.
    pub powerups: i32,
    /// Held weapon.
    pub weapon: i32,
    /// Legs animation.
    pub legs_anim: i32,
    /// Torso animation.
    pub torso_anim: i32,
    /// Mod-defined value.
    pub generic1: i32,
}

impl EntityState {
    /// Zeroed state carrying only `number`.
    ///
    /// Used as the baseline for entities that are new to a client.
    #[must_use]
    pub fn baseline(number: i32) -> Self {
        Self {
            number,
            ..Self::zeroed()
        }
    }
}

/// Full state of the player a client controls.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PlayerState {
    /// Time of the last executed command.
    pub command_time: i32,
    /// Movement type.
    pub pm_type: i32,
    /// View bob cycle.
    pub bob_cycle: i32,
    /// Movement flags.
    pub pm_flags: i32,
    /// Movement timer.
    pub pm_time: i32,
    /// Origin.
    pub origin: [f32; 3],
    /// Velocity.
    pub velocity: [f32; 3],
    /// Weapon cooldown.
    pub weapon_time: i32,
    /// Gravity.
    pub gravity: i32,
    /// Maximum speed.
    pub speed: i32,
    /// Added to command angles to get view direction.
    pub delta_angles: [i32; 3],
    /// Entity standing on, or `ENTITYNUM_NONE`.
    pub ground_entity_num: i32,
    /// Legs animation timer.
    pub legs_timer: i32,
    /// Legs animation.
    pub legs_anim: i32,
    /// Torso animation timer.
    pub torso_timer: i32,
    /// Torso animation.
    pub torso_anim: i32,
    /// Direction of movement, 0..8.
    pub movement_dir: i32,
    /// Grapple hook attachment point.
    pub grapple_point: [f32; 3],
    /// Entity flags.
    pub e_flags: i32,
    /// Incremented for every predictable event.
    pub event_sequence: i32,
    /// Predictable events.
    pub events: [i32; MAX_PS_EVENTS],
    /// Predictable event parameters.
    pub event_parms: [i32; MAX_PS_EVENTS],
    /// Event set by the server.
    pub external_event: i32,
    /// Parameter of the server event.
    pub external_event_parm: i32,
    /// Time the server event was set.
    pub external_event_time: i32,
    /// Client slot.
    pub client_num: i32,
    /// Held weapon.
    pub weapon: i32,
    /// Weapon state machine.
    pub weaponstate: i32,
    /// View angles.
    pub viewangles: [f32; 3],
    /// Eye height above origin.
    pub viewheight: i32,
    /// Damage feedback sequence.
    pub damage_event: i32,
    /// Damage direction yaw.
    pub damage_yaw: i32,
    /// Damage direction pitch.
    pub damage_pitch: i32,
    /// Damage amount.
    pub damage_count: i32,
    /// Status bar values.
    pub stats: [i32; MAX_STATS],
    /// Values that persist across respawns.
    pub persistant: [i32; MAX_PERSISTANT],
    /// Powerup expiry times.
    pub powerups: [i32; MAX_POWERUPS],
    /// Ammo per weapon.
    pub ammo: [i32; MAX_WEAPONS],
    /// Mod-defined value.
    pub generic1: i32,
    /// Looping sound index.
    pub loop_sound: i32,
    /// Last jump pad touched.
    pub jumppad_ent: i32,
    /// Server-side only; never transmitted.
    pub ping: i32,
    /// Server-side only; never transmitted.
    pub pmove_framecount: i32,
    /// Server-side only; never transmitted.
    pub jumppad_frame: i32,
    /// Server-side only; never transmitted.
    pub entity_event_sequence: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_are_word_sized() {
        assert_eq!(std::mem::size_of::<Trajectory>() % 4, 0);
        assert_eq!(std::mem::size_of::<EntityState>() % 4, 0);
        assert_eq!(std::mem::size_of::<PlayerState>() % 4, 0);
        assert_eq!(std::mem::align_of::<EntityState>(), 4);
    }

    #[test]
    fn test_baseline_keeps_number_only() {
        let base = EntityState::baseline(42);
        assert_eq!(base.number, 42);
        assert_eq!(base.origin, [0.0; 3]);
        assert_eq!(base, EntityState { number: 42, ..EntityState::default() });
    }

    #[test]
    fn test_trajectory_kind() {
        let tr = Trajectory {
            tr_type: TrajectoryType::Gravity as i32,
            ..Trajectory::default()
        };
        assert_eq!(tr.kind(), TrajectoryType::Gravity);
        assert_eq!(TrajectoryType::from_raw(99), TrajectoryType::Stationary);
    }
}
