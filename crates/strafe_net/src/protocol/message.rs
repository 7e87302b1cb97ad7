//! # Bitstream Message
//!
//! The buffer every other layer reads and writes.
//!
//! ## Design
//!
//! - One bit cursor for writing, one for reading, both LSB-first
//! - `cursize` and `readcount` are derived byte counts; a partially
//!   written or read byte counts as a whole one
//! - Byte-aligned 16/32-bit writes therefore come out little-endian
//! - Writes fail loudly, reads degrade to the `-1` sentinel
//!
//! ```text
//! byte 0          byte 1
//! 7 6 5 4 3 2 1 0 7 6 5 4 3 2 1 0
//!       c c c b b a . . . . . c c c     a:1 bit, b:2 bits, c:6 bits
//! ```

use strafe_shared::constants::{BIG_INFO_STRING, MAX_STRING_CHARS};

use crate::error::{NetError, NetResult};

/// Quantizes an angle in degrees to 16 bits.
#[inline]
#[must_use]
pub fn angle_to_short(angle: f32) -> i32 {
    ((angle * 65536.0 / 360.0) as i32) & 65535
}

/// Expands a 16-bit angle back to degrees.
#[inline]
#[must_use]
pub fn short_to_angle(short: i32) -> f32 {
    short as f32 * (360.0 / 65536.0)
}

/// Bytes that would break console printing are replaced on the wire.
#[inline]
const fn sanitize(byte: u8) -> u8 {
    if byte > 127 || byte == b'%' {
        b'.'
    } else {
        byte
    }
}

/// A bit-packed network message.
#[derive(Clone, Debug)]
pub struct Message {
    data: Vec<u8>,
    maxsize: usize,
    write_bit: usize,
    read_bit: usize,
    overflowed: bool,
    allow_overflow: bool,
    oob: bool,
}

impl Message {
    /// Creates an empty message able to hold `maxsize` bytes.
    #[must_use]
    pub fn new(maxsize: usize) -> Self {
        Self {
            data: vec![0; maxsize],
            maxsize,
            write_bit: 0,
            read_bit: 0,
            overflowed: false,
            allow_overflow: false,
            oob: false,
        }
    }

    /// Creates an out-of-band message; it is never Huffman-compressed.
    #[must_use]
    pub fn new_oob(maxsize: usize) -> Self {
        Self {
            oob: true,
            ..Self::new(maxsize)
        }
    }

    /// Binds a received datagram for reading.
    ///
    /// Capacity is `maxsize` or the datagram length, whichever is larger.
    #[must_use]
    pub fn from_bytes(bytes: &[u8], maxsize: usize) -> Self {
        let mut msg = Self::new(maxsize.max(bytes.len()));
        msg.data[..bytes.len()].copy_from_slice(bytes);
        msg.write_bit = bytes.len() * 8;
        msg
    }

    /// Lets writes past `maxsize` be dropped instead of failing.
    #[must_use]
    pub const fn with_allow_overflow(mut self, allow: bool) -> Self {
        self.allow_overflow = allow;
        self
    }

    /// Capacity in bytes.
    #[inline]
    #[must_use]
    pub const fn maxsize(&self) -> usize {
        self.maxsize
    }

    /// Bytes written.
    #[inline]
    #[must_use]
    pub const fn cursize(&self) -> usize {
        (self.write_bit + 7) >> 3
    }

    /// Bytes consumed by reads.
    #[inline]
    #[must_use]
    pub const fn readcount(&self) -> usize {
        (self.read_bit + 7) >> 3
    }

    /// Absolute write cursor in bits.
    #[inline]
    #[must_use]
    pub const fn bits_written(&self) -> usize {
        self.write_bit
    }

    /// Absolute read cursor in bits.
    #[inline]
    #[must_use]
    pub const fn bits_read(&self) -> usize {
        self.read_bit
    }

    /// True once a write has been dropped for lack of space.
    #[inline]
    #[must_use]
    pub const fn overflowed(&self) -> bool {
        self.overflowed
    }

    /// True for connectionless messages.
    #[inline]
    #[must_use]
    pub const fn is_oob(&self) -> bool {
        self.oob
    }

    /// True once a read has run past `cursize`.
    #[inline]
    #[must_use]
    pub const fn is_past_end(&self) -> bool {
        self.read_bit > self.write_bit_ceiling()
    }

    #[inline]
    const fn write_bit_ceiling(&self) -> usize {
        self.cursize() << 3
    }

    /// Written bytes.
    #[inline]
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data[..self.cursize()]
    }

    /// The whole backing buffer, for in-place rewriting.
    #[inline]
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Sets the written length in bytes, clamped to `maxsize`.
    pub fn set_cursize(&mut self, cursize: usize) {
        debug_assert!(cursize <= self.maxsize);
        self.write_bit = cursize.min(self.maxsize) << 3;
    }

    /// Moves the read cursor to a byte offset.
    pub fn set_readcount(&mut self, readcount: usize) {
        self.read_bit = readcount << 3;
    }

    /// Empties the message for reuse.
    pub fn clear(&mut self) {
        self.write_bit = 0;
        self.read_bit = 0;
        self.overflowed = false;
    }

    /// Rewinds the read cursor.
    pub fn begin_reading(&mut self) {
        self.read_bit = 0;
        self.oob = false;
    }

    /// Rewinds the read cursor for a connectionless message.
    pub fn begin_reading_oob(&mut self) {
        self.read_bit = 0;
        self.oob = true;
    }

    /// Pads both cursors to the next byte boundary.
    ///
    /// The padding bits of a partially written byte are already zero.
    pub fn align(&mut self) {
        self.write_bit = (self.write_bit + 7) & !7;
        self.read_bit = (self.read_bit + 7) & !7;
    }

    /// Duplicates this message, cursors included, into a buffer of `capacity` bytes.
    ///
    /// # Errors
    ///
    /// [`NetError::CopyTooSmall`] if `capacity < cursize`.
    pub fn copy(&self, capacity: usize) -> NetResult<Self> {
        let cursize = self.cursize();
        if capacity < cursize {
            return Err(NetError::CopyTooSmall { capacity, cursize });
        }
        let mut data = vec![0; capacity];
        data[..cursize].copy_from_slice(&self.data[..cursize]);
        Ok(Self {
            data,
            maxsize: capacity,
            write_bit: self.write_bit,
            read_bit: self.read_bit,
            overflowed: self.overflowed,
            allow_overflow: self.allow_overflow,
            oob: self.oob,
        })
    }

    // =========================================================================
    // WRITING
    // =========================================================================

    fn check_width(bits: i32) -> NetResult<usize> {
        if bits == 0 || !(-31..=32).contains(&bits) {
            return Err(NetError::BadBitCount(bits));
        }
        Ok(bits.unsigned_abs() as usize)
    }

    /// Writes the low `|bits|` bits of `value`, LSB first.
    ///
    /// A negative width means the reader sign-extends.
    ///
    /// # Errors
    ///
    /// [`NetError::BadBitCount`] for a width outside `1..=32` / `-31..=-1`,
    /// [`NetError::Overflow`] if the write does not fit and overflow is not
    /// allowed. With overflow allowed the write, and every later one, is
    /// dropped and [`Message::overflowed`] turns true.
    pub fn write_bits(&mut self, value: i32, bits: i32) -> NetResult<()> {
        let width = Self::check_width(bits)?;
        if self.overflowed {
            return Ok(());
        }
        let available = (self.maxsize << 3) - self.write_bit;
        if width > available {
            if !self.allow_overflow {
                return Err(NetError::Overflow {
                    needed: width,
                    available,
                });
            }
            tracing::warn!(needed = width, available, "message overflowed");
            self.overflowed = true;
            return Ok(());
        }

        let mut value = value as u32;
        let mut remaining = width;
        while remaining > 0 {
            let byte = self.write_bit >> 3;
            let shift = self.write_bit & 7;
            if shift == 0 {
                self.data[byte] = 0;
            }
            let take = (8 - shift).min(remaining);
            let chunk = (value & ((1 << take) - 1)) as u8;
            self.data[byte] |= chunk << shift;
            value >>= take;
            remaining -= take;
            self.write_bit += take;
        }
        Ok(())
    }

    /// Writes a signed byte.
    ///
    /// # Errors
    ///
    /// See [`Message::write_bits`].
    #[inline]
    pub fn write_char(&mut self, c: i32) -> NetResult<()> {
        self.write_bits(c, 8)
    }

    /// Writes an unsigned byte.
    ///
    /// # Errors
    ///
    /// See [`Message::write_bits`].
    #[inline]
    pub fn write_byte(&mut self, c: i32) -> NetResult<()> {
        self.write_bits(c, 8)
    }

    /// Writes 16 bits.
    ///
    /// # Errors
    ///
    /// See [`Message::write_bits`].
    #[inline]
    pub fn write_short(&mut self, c: i32) -> NetResult<()> {
        self.write_bits(c, 16)
    }

    /// Writes 32 bits.
    ///
    /// # Errors
    ///
    /// See [`Message::write_bits`].
    #[inline]
    pub fn write_long(&mut self, c: i32) -> NetResult<()> {
        self.write_bits(c, 32)
    }

    /// Writes the IEEE-754 bit pattern of `f`.
    ///
    /// # Errors
    ///
    /// See [`Message::write_bits`].
    #[inline]
    pub fn write_float(&mut self, f: f32) -> NetResult<()> {
        self.write_bits(f.to_bits() as i32, 32)
    }

    /// Writes an angle quantized to 16 bits. Lossy.
    ///
    /// # Errors
    ///
    /// See [`Message::write_bits`].
    #[inline]
    pub fn write_angle16(&mut self, angle: f32) -> NetResult<()> {
        self.write_short(angle_to_short(angle))
    }

    /// Writes raw bytes.
    ///
    /// # Errors
    ///
    /// See [`Message::write_bits`].
    pub fn write_data(&mut self, bytes: &[u8]) -> NetResult<()> {
        if self.write_bit & 7 == 0 && !self.overflowed {
            let start = self.write_bit >> 3;
            if start + bytes.len() <= self.maxsize {
                self.data[start..start + bytes.len()].copy_from_slice(bytes);
                self.write_bit += bytes.len() << 3;
                return Ok(());
            }
        }
        for &b in bytes {
            self.write_byte(i32::from(b))?;
        }
        Ok(())
    }

    fn write_bounded_string(&mut self, s: &str, limit: usize) -> NetResult<()> {
        let bytes = s.as_bytes();
        if bytes.len() >= limit {
            tracing::warn!(len = bytes.len(), limit, "string truncated");
        }
        for &b in &bytes[..bytes.len().min(limit - 1)] {
            self.write_byte(i32::from(sanitize(b)))?;
        }
        self.write_byte(0)
    }

    /// Writes a null-terminated string of at most `MAX_STRING_CHARS - 1` bytes.
    ///
    /// Longer input is truncated. Bytes above 127 and `%` become `.`.
    ///
    /// # Errors
    ///
    /// See [`Message::write_bits`].
    pub fn write_string(&mut self, s: &str) -> NetResult<()> {
        self.write_bounded_string(s, MAX_STRING_CHARS)
    }

    /// Like [`Message::write_string`] with a `BIG_INFO_STRING` bound.
    ///
    /// # Errors
    ///
    /// See [`Message::write_bits`].
    pub fn write_big_string(&mut self, s: &str) -> NetResult<()> {
        self.write_bounded_string(s, BIG_INFO_STRING)
    }

    /// Writes a change bit, then `new` only if it differs from `old`.
    ///
    /// # Errors
    ///
    /// See [`Message::write_bits`].
    pub fn write_delta(&mut self, old: i32, new: i32, bits: i32) -> NetResult<()> {
        if old == new {
            return self.write_bits(0, 1);
        }
        self.write_bits(1, 1)?;
        self.write_bits(new, bits)
    }

    // =========================================================================
    // READING
    // =========================================================================

    /// Reads `|bits|` bits, sign-extending when `bits` is negative.
    ///
    /// Returns `-1` when the read runs past `cursize` or the width is invalid.
    pub fn read_bits(&mut self, bits: i32) -> i32 {
        let Ok(width) = Self::check_width(bits) else {
            return -1;
        };
        if self.read_bit + width > self.write_bit_ceiling() {
            self.read_bit += width;
            return -1;
        }

        let mut value: u32 = 0;
        let mut got = 0;
        while got < width {
            let byte = self.read_bit >> 3;
            let shift = self.read_bit & 7;
            let take = (8 - shift).min(width - got);
            let chunk = (u32::from(self.data[byte]) >> shift) & ((1 << take) - 1);
            value |= chunk << got;
            got += take;
            self.read_bit += take;
        }

        if bits < 0 && width < 32 && value & (1 << (width - 1)) != 0 {
            value |= u32::MAX << width;
        }
        value as i32
    }

    /// Reads a signed byte, `-1` past the end.
    #[inline]
    pub fn read_char(&mut self) -> i32 {
        self.read_bits(-8)
    }

    /// Reads an unsigned byte, `-1` past the end.
    #[inline]
    pub fn read_byte(&mut self) -> i32 {
        self.read_bits(8)
    }

    /// Reads a signed 16-bit value, `-1` past the end.
    #[inline]
    pub fn read_short(&mut self) -> i32 {
        self.read_bits(-16)
    }

    /// Reads 32 bits, `-1` past the end.
    #[inline]
    pub fn read_long(&mut self) -> i32 {
        self.read_bits(32)
    }

    /// Reads an IEEE-754 float, `-1.0` past the end.
    pub fn read_float(&mut self) -> f32 {
        let raw = self.read_bits(32);
        if self.is_past_end() {
            return -1.0;
        }
        f32::from_bits(raw as u32)
    }

    /// Reads a 16-bit angle in degrees, in `-180..180`.
    #[inline]
    pub fn read_angle16(&mut self) -> f32 {
        short_to_angle(self.read_short())
    }

    /// Fills `out` byte by byte; bytes past the end read as `0xFF`.
    pub fn read_data(&mut self, out: &mut [u8]) {
        for b in out.iter_mut() {
            *b = self.read_byte() as u8;
        }
    }

    fn read_bounded_string(&mut self, limit: usize, stop_at_newline: bool) -> String {
        let mut out = String::new();
        loop {
            let c = self.read_byte();
            if c <= 0 || (stop_at_newline && c == i32::from(b'\n')) {
                break;
            }
            out.push(char::from(sanitize(c as u8)));
            if out.len() >= limit - 1 {
                break;
            }
        }
        out
    }

    /// Reads a null-terminated string of at most `MAX_STRING_CHARS - 1` bytes.
    pub fn read_string(&mut self) -> String {
        self.read_bounded_string(MAX_STRING_CHARS, false)
    }

    /// Reads a null-terminated string of at most `BIG_INFO_STRING - 1` bytes.
    pub fn read_big_string(&mut self) -> String {
        self.read_bounded_string(BIG_INFO_STRING, false)
    }

    /// Reads up to a null or newline.
    pub fn read_string_line(&mut self) -> String {
        self.read_bounded_string(MAX_STRING_CHARS, true)
    }

    /// Peeks at the next byte without consuming it.
    pub fn lookahead_byte(&mut self) -> i32 {
        let saved = self.read_bit;
        let c = self.read_byte();
        self.read_bit = saved;
        c
    }

    /// Mirror of [`Message::write_delta`].
    pub fn read_delta(&mut self, old: i32, bits: i32) -> i32 {
        if self.read_bits(1) == 1 {
            self.read_bits(bits)
        } else {
            old
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn reread(msg: &Message) -> Message {
        let mut copy = Message::from_bytes(msg.data(), msg.maxsize());
        copy.begin_reading();
        copy
    }

    #[test]
    fn test_bits_round_trip_every_width() {
        let mut rng = StdRng::seed_from_u64(7);
        for bits in (1i32..=32).chain(-31i32..=-1) {
            for _ in 0..16 {
                let width = bits.unsigned_abs();
                let raw: u32 = rng.gen();
                let mut expected = (if width == 32 { raw } else { raw & ((1 << width) - 1) }) as i32;
                if bits < 0 && expected & (1 << (width - 1)) != 0 {
                    expected |= (u32::MAX << width) as i32;
                }

                let mut msg = Message::new(16);
                msg.write_bits(1, 3).unwrap();
                msg.write_bits(raw as i32, bits).unwrap();
                let mut rd = reread(&msg);
                assert_eq!(rd.read_bits(3), 1);
                assert_eq!(rd.read_bits(bits), expected, "bits={bits} raw={raw:#x}");
            }
        }
    }

    #[test]
    fn test_sign_extension() {
        let mut msg = Message::new(8);
        msg.write_bits(-5, -8).unwrap();
        msg.write_bits(-1, -16).unwrap();
        let mut rd = reread(&msg);
        assert_eq!(rd.read_bits(-8), -5);
        assert_eq!(rd.read_bits(-16), -1);
    }

    #[test]
    fn test_aligned_long_is_little_endian() {
        let mut msg = Message::new(8);
        msg.write_long(0x0403_0201).unwrap();
        assert_eq!(msg.data(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_bad_widths_rejected() {
        let mut msg = Message::new(8);
        assert!(matches!(msg.write_bits(1, 0), Err(NetError::BadBitCount(0))));
        assert!(matches!(msg.write_bits(1, 33), Err(NetError::BadBitCount(33))));
        assert!(matches!(msg.write_bits(1, -32), Err(NetError::BadBitCount(-32))));
    }

    #[test]
    fn test_overflow_is_fatal_by_default() {
        let mut msg = Message::new(2);
        msg.write_short(7).unwrap();
        assert!(matches!(msg.write_bits(1, 1), Err(NetError::Overflow { .. })));
        assert_eq!(msg.cursize(), 2);
    }

    #[test]
    fn test_overflow_allowed_drops_writes() {
        let mut msg = Message::new(2).with_allow_overflow(true);
        msg.write_byte(1).unwrap();
        msg.write_short(0x7777).unwrap();
        assert!(msg.overflowed());
        msg.write_byte(9).unwrap();
        assert_eq!(msg.data(), &[1]);

        msg.clear();
        assert!(!msg.overflowed());
    }

    #[test]
    fn test_read_past_end_is_sentinel() {
        let mut msg = Message::new(4);
        msg.write_byte(200).unwrap();
        let mut rd = reread(&msg);
        assert_eq!(rd.read_byte(), 200);
        assert!(!rd.is_past_end());
        assert_eq!(rd.read_byte(), -1);
        assert_eq!(rd.read_short(), -1);
        assert_eq!(rd.read_long(), -1);
        assert!(rd.is_past_end());
        assert!(rd.readcount() > rd.cursize());
    }

    #[test]
    fn test_typed_values() {
        let mut msg = Message::new(64);
        msg.write_char(-100).unwrap();
        msg.write_byte(255).unwrap();
        msg.write_short(-1234).unwrap();
        msg.write_long(i32::MIN).unwrap();
        msg.write_float(3.5).unwrap();
        msg.write_angle16(90.0).unwrap();
        msg.write_angle16(270.0).unwrap();

        let mut rd = reread(&msg);
        assert_eq!(rd.read_char(), -100);
        assert_eq!(rd.read_byte(), 255);
        assert_eq!(rd.read_short(), -1234);
        assert_eq!(rd.read_long(), i32::MIN);
        assert!((rd.read_float() - 3.5).abs() < f32::EPSILON);
        assert!((rd.read_angle16() - 90.0).abs() < 0.01);
        assert!((rd.read_angle16() + 90.0).abs() < 0.01);
    }

    #[test]
    fn test_angle_quantization() {
        assert_eq!(angle_to_short(0.0), 0);
        assert_eq!(angle_to_short(180.0), 32768);
        assert_eq!(angle_to_short(360.0), 0);
        assert_eq!(angle_to_short(-90.0), 49152);
        assert!((short_to_angle(16384) - 90.0).abs() < 0.001);
    }

    #[test]
    fn test_strings() {
        let mut msg = Message::new(256);
        msg.write_string("say hello").unwrap();
        msg.write_string("100% caf\u{e9}").unwrap();
        msg.write_big_string("line one\nline two").unwrap();
        msg.write_string("").unwrap();

        let mut rd = reread(&msg);
        assert_eq!(rd.read_string(), "say hello");
        assert_eq!(rd.read_string(), "100. caf..");
        assert_eq!(rd.read_string_line(), "line one");
        assert_eq!(rd.read_string(), "line two");
        assert_eq!(rd.read_string(), "");
        assert_eq!(rd.read_string(), "");
    }

    #[test]
    fn test_long_string_truncated() {
        let long = "x".repeat(MAX_STRING_CHARS + 50);
        let mut msg = Message::new(4096);
        msg.write_string(&long).unwrap();
        assert_eq!(msg.cursize(), MAX_STRING_CHARS);

        let mut rd = reread(&msg);
        assert_eq!(rd.read_string().len(), MAX_STRING_CHARS - 1);
        assert_eq!(rd.read_byte(), 0);
    }

    #[test]
    fn test_data_and_lookahead() {
        let mut msg = Message::new(32);
        msg.write_bits(1, 1).unwrap();
        msg.write_data(&[9, 8, 7]).unwrap();
        msg.write_byte(42).unwrap();
        msg.write_data(&[1, 2]).unwrap();

        let mut rd = reread(&msg);
        assert_eq!(rd.read_bits(1), 1);
        let mut out = [0u8; 3];
        rd.read_data(&mut out);
        assert_eq!(out, [9, 8, 7]);
        assert_eq!(rd.lookahead_byte(), 42);
        assert_eq!(rd.read_byte(), 42);
        let mut out = [0u8; 2];
        rd.read_data(&mut out);
        assert_eq!(out, [1, 2]);
    }

    #[test]
    fn test_delta_helpers() {
        let mut msg = Message::new(16);
        msg.write_delta(5, 5, 16).unwrap();
        msg.write_delta(5, 300, 16).unwrap();
        assert_eq!(msg.bits_written(), 1 + 17);

        let mut rd = reread(&msg);
        assert_eq!(rd.read_delta(5, 16), 5);
        assert_eq!(rd.read_delta(5, 16), 300);
    }

    #[test]
    fn test_copy() {
        let mut msg = Message::new(16);
        msg.write_long(77).unwrap();
        msg.write_byte(3).unwrap();
        msg.begin_reading();
        assert_eq!(msg.read_long(), 77);

        let mut copy = msg.copy(64).unwrap();
        assert_eq!(copy.maxsize(), 64);
        assert_eq!(copy.data(), msg.data());
        assert_eq!(copy.read_byte(), 3);

        assert!(matches!(msg.copy(4), Err(NetError::CopyTooSmall { capacity: 4, cursize: 5 })));
    }

    #[test]
    fn test_oob_flag() {
        let mut msg = Message::new_oob(8);
        assert!(msg.is_oob());
        msg.begin_reading();
        assert!(!msg.is_oob());
        msg.begin_reading_oob();
        assert!(msg.is_oob());
    }

    #[test]
    fn test_align() {
        let mut msg = Message::new(8);
        msg.write_bits(1, 3).unwrap();
        msg.align();
        assert_eq!(msg.bits_written(), 8);
        msg.write_byte(0xAB).unwrap();
        assert_eq!(msg.data(), &[1, 0xAB]);

        msg.begin_reading();
        assert_eq!(msg.read_bits(3), 1);
        msg.align();
        assert_eq!(msg.read_byte(), 0xAB);
    }
}
