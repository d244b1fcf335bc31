//! Length, string and integer-as-string encoding.
//!
//! The first byte of every length-prefixed field selects one of four modes
//! with its two high bits:
//!
//! | Bits       | Meaning                                        |
//! |------------|------------------------------------------------|
//! | `00xxxxxx` | 6-bit length (0..=63)                          |
//! | `01xxxxxx` | 14-bit big-endian length, one more byte         |
//! | `10______` | next 4 bytes are a big-endian `u32` length      |
//! | `11xxxxxx` | special encoding selected by the low six bits   |
//!
//! Decoders take `&mut &[u8]` so they advance the caller's cursor through
//! `bytes::Buf`. Every read checks `remaining()` first; a short buffer is
//! reported as [`SnapshotError::UnexpectedEof`] instead of panicking.

use super::format::{mode, special};
use super::SnapshotError;
use crate::storage::Value;
use bytes::{Buf, BufMut, Bytes};

/// A decoded length byte sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Length {
    /// A plain length.
    Len(u32),
    /// A special encoding marker (`11xxxxxx`), carrying the low six bits.
    Special(u8),
}

const MAX_6: u32 = (1 << 6) - 1;
const MAX_14: u32 = (1 << 14) - 1;

/// Appends the shortest encoding of `len`.
pub fn write_length(buf: &mut impl BufMut, len: usize) -> Result<(), SnapshotError> {
    let len = u32::try_from(len)
        .map_err(|_| SnapshotError::InvalidLength(format!("{} does not fit in 32 bits", len)))?;

    if len <= MAX_6 {
        buf.put_u8((mode::BITS_6 << 6) | len as u8);
    } else if len <= MAX_14 {
        buf.put_u8((mode::BITS_14 << 6) | (len >> 8) as u8);
        buf.put_u8(len as u8);
    } else {
        buf.put_u8(mode::BITS_32 << 6);
        buf.put_u32(len);
    }
    Ok(())
}

/// Reads a length or a special-encoding marker.
pub fn read_length(buf: &mut &[u8]) -> Result<Length, SnapshotError> {
    ensure(buf, 1)?;
    let first = buf.get_u8();

    match first >> 6 {
        mode::BITS_6 => Ok(Length::Len(u32::from(first & 0x3F))),
        mode::BITS_14 => {
            ensure(buf, 1)?;
            let low = buf.get_u8();
            Ok(Length::Len((u32::from(first & 0x3F) << 8) | u32::from(low)))
        }
        mode::BITS_32 => {
            ensure(buf, 4)?;
            Ok(Length::Len(buf.get_u32()))
        }
        _ => Ok(Length::Special(first & 0x3F)),
    }
}

/// Reads a length that must be a plain length, such as a DB index or a
/// resize hint.
pub fn read_plain_length(buf: &mut &[u8]) -> Result<usize, SnapshotError> {
    match read_length(buf)? {
        Length::Len(n) => Ok(n as usize),
        Length::Special(kind) => Err(SnapshotError::InvalidLength(format!(
            "expected a length, found special encoding {}",
            kind
        ))),
    }
}

/// Appends a length-prefixed byte string.
pub fn write_string(buf: &mut impl BufMut, bytes: &[u8]) -> Result<(), SnapshotError> {
    write_length(buf, bytes.len())?;
    buf.put_slice(bytes);
    Ok(())
}

/// Appends an integer using the smallest signed special width that holds it.
///
/// Values outside the `i32` range have no special width and are written as
/// their decimal text.
pub fn write_integer(buf: &mut impl BufMut, n: i64) -> Result<(), SnapshotError> {
    let special_byte = |kind: u8| (mode::SPECIAL << 6) | kind;

    if let Ok(v) = i8::try_from(n) {
        buf.put_u8(special_byte(special::INT8));
        buf.put_i8(v);
    } else if let Ok(v) = i16::try_from(n) {
        buf.put_u8(special_byte(special::INT16));
        buf.put_i16_le(v);
    } else if let Ok(v) = i32::try_from(n) {
        buf.put_u8(special_byte(special::INT32));
        buf.put_i32_le(v);
    } else {
        write_string(buf, n.to_string().as_bytes())?;
    }
    Ok(())
}

/// Appends a value in string encoding.
pub fn write_value(buf: &mut impl BufMut, value: &Value) -> Result<(), SnapshotError> {
    match value {
        Value::Text(s) => write_string(buf, s.as_bytes()),
        Value::Integer(n) => write_integer(buf, *n),
        Value::Blob(b) => write_string(buf, b),
    }
}

/// Reads a value in string encoding.
///
/// Plain strings become `Text` when valid UTF-8 and `Blob` otherwise;
/// integer specials become `Integer`; compressed strings are decompressed
/// into a `Blob`.
pub fn read_value(buf: &mut &[u8]) -> Result<Value, SnapshotError> {
    match read_length(buf)? {
        Length::Len(len) => {
            let len = len as usize;
            ensure(buf, len)?;
            Ok(Value::from_bytes(buf.copy_to_bytes(len)))
        }
        Length::Special(special::INT8) => {
            ensure(buf, 1)?;
            Ok(Value::Integer(i64::from(buf.get_i8())))
        }
        Length::Special(special::INT16) => {
            ensure(buf, 2)?;
            Ok(Value::Integer(i64::from(buf.get_i16_le())))
        }
        Length::Special(special::INT32) => {
            ensure(buf, 4)?;
            Ok(Value::Integer(i64::from(buf.get_i32_le())))
        }
        Length::Special(special::LZF) => read_compressed(buf).map(Value::Blob),
        Length::Special(kind) => Err(SnapshotError::InvalidLength(format!(
            "unknown special encoding {}",
            kind
        ))),
    }
}

/// Reads a key: any string encoding whose content is valid UTF-8.
pub fn read_key(buf: &mut &[u8]) -> Result<String, SnapshotError> {
    let value = read_value(buf)?;
    value
        .into_text()
        .ok_or_else(|| SnapshotError::InvalidKey("key is not valid UTF-8".to_string()))
}

fn read_compressed(buf: &mut &[u8]) -> Result<Bytes, SnapshotError> {
    let compressed_len = read_plain_length(buf)?;
    let uncompressed_len = read_plain_length(buf)?;
    ensure(buf, compressed_len)?;

    let compressed = buf.copy_to_bytes(compressed_len);
    if uncompressed_len == 0 {
        return Ok(Bytes::new());
    }

    let data = lzf::decompress(&compressed, uncompressed_len)
        .map_err(|e| SnapshotError::Decompress(format!("{:?}", e)))?;
    if data.len() != uncompressed_len {
        return Err(SnapshotError::Decompress(format!(
            "expected {} bytes, got {}",
            uncompressed_len,
            data.len()
        )));
    }
    Ok(Bytes::from(data))
}

/// Fails with `UnexpectedEof` unless `n` more bytes are available.
#[inline]
pub(crate) fn ensure(buf: &&[u8], n: usize) -> Result<(), SnapshotError> {
    if buf.remaining() < n {
        return Err(SnapshotError::UnexpectedEof);
    }
    Ok(())
}
