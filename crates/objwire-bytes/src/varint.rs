//! Base-128 little-endian varints and ZigZag signed mapping.

use crate::buffer::OutputBuffer;
use crate::cursor::InputCursor;
use crate::error::{Result, WireError};

/// Maximum encoded length of a 64-bit varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Append an unsigned varint: 7 bits per byte, MSB set on all but the last.
pub fn put_uvarint(buf: &mut OutputBuffer, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8(value as u8 | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Read an unsigned varint.
///
/// Fails with [`WireError::VarintOverflow`] when a value runs past
/// [`MAX_VARINT_LEN`] bytes or the tenth byte carries bits a 64-bit value
/// cannot hold.
pub fn read_uvarint(cur: &mut InputCursor<'_>) -> Result<u64> {
    let start = cur.position();
    let mut value = 0u64;
    for i in 0..MAX_VARINT_LEN {
        let byte = cur.read_u8()?;
        // Bytes 1..9 contribute 63 bits; the tenth may only carry bit 64.
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(WireError::VarintOverflow { offset: start });
        }
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(WireError::VarintOverflow { offset: start })
}

/// ZigZag-map a signed value so small magnitudes stay short.
pub fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag`].
pub fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Append a signed varint (ZigZag then unsigned varint).
pub fn put_ivarint(buf: &mut OutputBuffer, value: i64) {
    put_uvarint(buf, zigzag(value));
}

/// Read a signed varint.
pub fn read_ivarint(cur: &mut InputCursor<'_>) -> Result<i64> {
    read_uvarint(cur).map(unzigzag)
}
