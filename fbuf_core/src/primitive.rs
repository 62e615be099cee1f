//! Primitive value encoding shared by every serializer above this layer.
//!
//! Fixed-width integers and doubles are little-endian. Variable-length
//! integers use base-128 groups, least significant first, with the high bit
//! of each byte flagging a continuation. Signed values are zig-zag mapped
//! first so small magnitudes of either sign stay short.
//!
//! Nothing here does I/O; sessions hand in their pending or decompressed
//! buffer.

use thiserror::Error;

/// Longest possible encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// A decode that could not complete within the buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{wanted} bytes wanted at offset {position} of {len}")]
    Truncated {
        position: usize,
        wanted: usize,
        len: usize,
    },
    #[error("variable-length integer at offset {position} does not fit in 64 bits")]
    Overlong { position: usize },
}

/// Encode `value` into `out`, returning the number of bytes used.
pub fn encode_uint(mut value: u64, out: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut n = 0;
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out[n] = byte;
        n += 1;
        if value == 0 {
            return n;
        }
    }
}

/// Zig-zag map then encode.
pub fn encode_int(value: i64, out: &mut [u8; MAX_VARINT_LEN]) -> usize {
    encode_uint(zigzag(value), out)
}

/// Number of bytes [`encode_uint`] produces for `value`.
pub fn uint_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

pub fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

pub fn unzigzag(zz: u64) -> i64 {
    ((zz >> 1) as i64) ^ -((zz & 1) as i64)
}

/// Decode an unsigned variable-length integer at `*pos`, advancing it.
pub fn decode_uint(buf: &[u8], pos: &mut usize) -> Result<u64, DecodeError> {
    let start = *pos;
    let mut groups = [0u8; MAX_VARINT_LEN];
    let mut n = 0;

    loop {
        if n == MAX_VARINT_LEN {
            return Err(DecodeError::Overlong { position: start });
        }
        let byte = *buf.get(start + n).ok_or(DecodeError::Truncated {
            position: start,
            wanted: n + 1,
            len: buf.len(),
        })?;
        groups[n] = byte & 0x7f;
        n += 1;
        if byte & 0x80 == 0 {
            break;
        }
    }

    // Ten groups carry 70 bits; only the lowest bit of the last one fits.
    if n == MAX_VARINT_LEN && groups[MAX_VARINT_LEN - 1] > 1 {
        return Err(DecodeError::Overlong { position: start });
    }

    // Emitted least significant first, so apply in reverse.
    let value = groups[..n]
        .iter()
        .rev()
        .fold(0u64, |acc, &group| (acc << 7) | u64::from(group));

    *pos = start + n;
    Ok(value)
}

/// Decode a zig-zag signed variable-length integer.
pub fn decode_int(buf: &[u8], pos: &mut usize) -> Result<i64, DecodeError> {
    decode_uint(buf, pos).map(unzigzag)
}

/// Borrow `len` bytes at `*pos`, advancing it.
pub fn take<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], DecodeError> {
    let start = *pos;
    let end = start
        .checked_add(len)
        .filter(|&end| end <= buf.len())
        .ok_or(DecodeError::Truncated {
            position: start,
            wanted: len,
            len: buf.len(),
        })?;
    *pos = end;
    Ok(&buf[start..end])
}

/// Copy exactly `N` bytes at `*pos`, advancing it.
pub fn take_array<const N: usize>(buf: &[u8], pos: &mut usize) -> Result<[u8; N], DecodeError> {
    let mut out = [0u8; N];
    out.copy_from_slice(take(buf, pos, N)?);
    Ok(out)
}

pub fn decode_u8(buf: &[u8], pos: &mut usize) -> Result<u8, DecodeError> {
    take_array::<1>(buf, pos).map(|b| b[0])
}

pub fn decode_u16(buf: &[u8], pos: &mut usize) -> Result<u16, DecodeError> {
    take_array(buf, pos).map(u16::from_le_bytes)
}

pub fn decode_u32(buf: &[u8], pos: &mut usize) -> Result<u32, DecodeError> {
    take_array(buf, pos).map(u32::from_le_bytes)
}

pub fn decode_u64(buf: &[u8], pos: &mut usize) -> Result<u64, DecodeError> {
    take_array(buf, pos).map(u64::from_le_bytes)
}

pub fn decode_double(buf: &[u8], pos: &mut usize) -> Result<f64, DecodeError> {
    decode_u64(buf, pos).map(f64::from_bits)
}
