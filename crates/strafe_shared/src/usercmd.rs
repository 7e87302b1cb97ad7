//! Per-frame client input.

/// One frame of client input, sent to the server in every command packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UserCmd {
    /// Server time the command was generated for.
    pub server_time: i32,
    /// View angles, 16-bit quantized.
    pub angles: [i32; 3],
    /// Button bits.
    pub buttons: i32,
    /// Selected weapon.
    pub weapon: u8,
    /// Forward/back movement, -127..127.
    pub forwardmove: i8,
    /// Strafe movement, -127..127.
    pub rightmove: i8,
    /// Jump/crouch movement, -127..127.
    pub upmove: i8,
}
