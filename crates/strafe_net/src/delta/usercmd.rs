//! User command delta.
//!
//! Commands are chained: each one in a packet deltas against the previous.
//! `server_time` usually advances by a frame, so it gets an 8-bit short form.

use strafe_shared::usercmd::UserCmd;

use crate::error::NetResult;
use crate::protocol::Message;

/// Writes `to` as a delta against `from`.
///
/// # Errors
///
/// Any write failure.
pub fn write_delta_usercmd(msg: &mut Message, from: &UserCmd, to: &UserCmd) -> NetResult<()> {
    let elapsed = to.server_time.wrapping_sub(from.server_time);
    if (0..256).contains(&elapsed) {
        msg.write_bits(1, 1)?;
        msg.write_bits(elapsed, 8)?;
    } else {
        msg.write_bits(0, 1)?;
        msg.write_bits(to.server_time, 32)?;
    }

    for (old, new) in from.angles.iter().zip(&to.angles) {
        msg.write_delta(*old, *new, 16)?;
    }
    msg.write_delta(i32::from(from.forwardmove), i32::from(to.forwardmove), -8)?;
    msg.write_delta(i32::from(from.rightmove), i32::from(to.rightmove), -8)?;
    msg.write_delta(i32::from(from.upmove), i32::from(to.upmove), -8)?;
    msg.write_delta(from.buttons, to.buttons, 16)?;
    msg.write_delta(i32::from(from.weapon), i32::from(to.weapon), 8)
}

/// Reads a command written by [`write_delta_usercmd`].
#[must_use]
pub fn read_delta_usercmd(msg: &mut Message, from: &UserCmd) -> UserCmd {
    let server_time = if msg.read_bits(1) == 1 {
        from.server_time.wrapping_add(msg.read_bits(8))
    } else {
        msg.read_bits(32)
    };

    let mut angles = [0; 3];
    for (out, old) in angles.iter_mut().zip(from.angles) {
        *out = msg.read_delta(old, 16);
    }

    UserCmd {
        server_time,
        angles,
        forwardmove: msg.read_delta(i32::from(from.forwardmove), -8) as i8,
        rightmove: msg.read_delta(i32::from(from.rightmove), -8) as i8,
        upmove: msg.read_delta(i32::from(from.upmove), -8) as i8,
        buttons: msg.read_delta(from.buttons, 16),
        weapon: msg.read_delta(i32::from(from.weapon), 8) as u8,
    }
}
