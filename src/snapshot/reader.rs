//! Snapshot decoder.

use super::format::{opcode, CRC64, HEADER_LEN, MAGIC, TYPE_STRING};
use super::length::{ensure, read_key, read_plain_length, read_value};
use super::SnapshotError;
use crate::storage::{Entry, Expiry, Value};
use bytes::Buf;
use tracing::trace;

/// Everything a snapshot file contains.
///
/// Aux fields, the DB index and the resize hint are informational; loading
/// only uses `entries`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedSnapshot {
    pub version: u32,
    pub aux: Vec<(String, Value)>,
    pub db: Option<usize>,
    pub resize: Option<(usize, usize)>,
    pub entries: Vec<Entry>,
}

/// Decodes a complete snapshot file image.
///
/// Each key/value record takes the expiry marker that directly precedes it.
/// The trailing checksum is verified unless it is all zeroes, which marks a
/// file written without one.
pub fn decode(data: &[u8]) -> Result<DecodedSnapshot, SnapshotError> {
    let mut buf = data;
    let mut snapshot = DecodedSnapshot {
        version: read_header(&mut buf)?,
        ..Default::default()
    };

    let mut pending_expiry: Option<Expiry> = None;

    loop {
        ensure(&buf, 1)?;
        let offset = data.len() - buf.remaining();

        match buf.get_u8() {
            opcode::AUX => {
                let key = read_key(&mut buf)?;
                let value = read_value(&mut buf)?;
                trace!(key = %key, value = %value, "aux field");
                snapshot.aux.push((key, value));
            }
            opcode::RESIZE_DB => {
                let size = read_plain_length(&mut buf)?;
                let expires = read_plain_length(&mut buf)?;
                snapshot.resize = Some((size, expires));
            }
            opcode::SELECT_DB => {
                snapshot.db = Some(read_plain_length(&mut buf)?);
            }
            opcode::EXPIRE_TIME_MS => {
                ensure(&buf, 8)?;
                pending_expiry = Some(Expiry::at_millis(buf.get_u64_le()));
            }
            opcode::EXPIRE_TIME => {
                ensure(&buf, 4)?;
                pending_expiry = Some(Expiry::at_secs(u64::from(buf.get_u32_le())));
            }
            opcode::EOF => {
                verify_checksum(&data[..offset], &mut buf)?;
                return Ok(snapshot);
            }
            TYPE_STRING => {
                let key = read_key(&mut buf)?;
                let value = read_value(&mut buf)?;
                snapshot.entries.push(Entry {
                    key,
                    value,
                    expiry: pending_expiry.take(),
                });
            }
            other if other < 0xF0 => return Err(SnapshotError::UnsupportedValueType(other)),
            other => return Err(SnapshotError::UnknownOpcode(other)),
        }
    }
}

fn read_header(buf: &mut &[u8]) -> Result<u32, SnapshotError> {
    if buf.remaining() < HEADER_LEN || !buf.starts_with(MAGIC) {
        return Err(SnapshotError::BadMagic);
    }
    buf.advance(MAGIC.len());

    let rest: &[u8] = *buf;
    let digits = &rest[..HEADER_LEN - MAGIC.len()];
    let version = std::str::from_utf8(digits)
        .ok()
        .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| SnapshotError::BadVersion(String::from_utf8_lossy(digits).into_owned()))?;
    buf.advance(digits.len());

    Ok(version)
}

fn verify_checksum(covered: &[u8], buf: &mut &[u8]) -> Result<(), SnapshotError> {
    ensure(buf, 8)?;
    let expected = buf.get_u64();
    if expected == 0 {
        trace!("snapshot has no checksum");
        return Ok(());
    }

    let actual = CRC64.checksum(covered);
    if actual != expected {
        return Err(SnapshotError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::length::write_length;
    use crate::snapshot::writer::{encode, SnapshotWriter};
    use crate::storage::{KeyspaceSnapshot, TimeUnit};

    fn sample() -> KeyspaceSnapshot {
        let later_ms = TimeUnit::Milliseconds.now() + 60_000;
        let later_s = TimeUnit::Seconds.now() + 60;

        KeyspaceSnapshot {
            size: 4,
            expires: 2,
            entries: vec![
                Entry::new("foo", "bar"),
                Entry::new("count", -300i64),
                Entry::new("session", "abc").with_expiry(Expiry::at_millis(later_ms)),
                Entry::new("daily", 1i64 << 35).with_expiry(Expiry::at_secs(later_s)),
            ],
        }
    }

    #[test]
    fn test_decode_round_trip() {
        let bytes = encode(&sample(), 1_700_000_000).unwrap();
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.version, 11);
        assert_eq!(decoded.db, Some(0));
        assert_eq!(decoded.resize, Some((4, 2)));
        assert_eq!(
            decoded.aux,
            vec![
                ("redis-bits".to_string(), Value::Integer(64)),
                ("ctime".to_string(), Value::Integer(1_700_000_000)),
            ]
        );

        let mut expected = sample().entries;
        // Out-of-range integers are stored as their decimal text
        expected[3].value = Value::Text((1i64 << 35).to_string());
        assert_eq!(decoded.entries, expected);
    }

    #[test]
    fn test_bad_magic() {
        assert!(matches!(decode(b"RODIS0011\xff"), Err(SnapshotError::BadMagic)));
        assert!(matches!(decode(b"RED"), Err(SnapshotError::BadMagic)));
    }

    #[test]
    fn test_bad_version() {
        assert!(matches!(
            decode(b"REDIS00x1\xff"),
            Err(SnapshotError::BadVersion(_))
        ));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut bytes = encode(&sample(), 1).unwrap();
        // Flip a byte inside the "bar" value
        let pos = bytes
            .windows(3)
            .position(|w| w == b"bar")
            .unwrap();
        bytes[pos] = b'c';

        match decode(&bytes) {
            Err(SnapshotError::ChecksumMismatch { expected, actual }) => {
                assert_ne!(expected, actual);
            }
            other => panic!("expected checksum mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_checksum_is_accepted() {
        let mut bytes = encode(&sample(), 1).unwrap();
        let len = bytes.len();
        bytes[len - 8..].fill(0);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.entries.len(), 4);
    }

    #[test]
    fn test_missing_end_marker() {
        let bytes = encode(&sample(), 1).unwrap();
        let truncated = &bytes[..bytes.len() - 9];
        assert!(matches!(decode(truncated), Err(SnapshotError::UnexpectedEof)));
    }

    #[test]
    fn test_truncated_checksum() {
        let bytes = encode(&sample(), 1).unwrap();
        let truncated = &bytes[..bytes.len() - 3];
        assert!(matches!(decode(truncated), Err(SnapshotError::UnexpectedEof)));
    }

    #[test]
    fn test_unsupported_value_type() {
        let mut bytes = b"REDIS0011".to_vec();
        bytes.extend_from_slice(&[0x01, 0x01, b'k']);
        assert!(matches!(
            decode(&bytes),
            Err(SnapshotError::UnsupportedValueType(1))
        ));
    }

    #[test]
    fn test_unknown_opcode() {
        let mut bytes = b"REDIS0011".to_vec();
        bytes.push(0xF5);
        assert!(matches!(decode(&bytes), Err(SnapshotError::UnknownOpcode(0xF5))));
    }

    #[test]
    fn test_expiry_applies_to_next_record_only() {
        let mut writer = SnapshotWriter::new();
        writer
            .entry(&Entry::new("a", "1").with_expiry(Expiry::at_millis(42)))
            .unwrap();
        writer.entry(&Entry::new("b", "2")).unwrap();

        let decoded = decode(&writer.finish()).unwrap();
        assert_eq!(decoded.entries[0].expiry, Some(Expiry::at_millis(42)));
        assert_eq!(decoded.entries[1].expiry, None);
    }

    #[test]
    fn test_compressed_value_record() {
        let original = "hello hello hello hello hello hello";
        let compressed = lzf::compress(original.as_bytes()).unwrap();

        let mut bytes = b"REDIS0011".to_vec();
        bytes.extend_from_slice(&[TYPE_STRING, 0x03, b'k', b'e', b'y', 0xC3]);
        write_length(&mut bytes, compressed.len()).unwrap();
        write_length(&mut bytes, original.len()).unwrap();
        bytes.extend_from_slice(&compressed);
        let checksum = CRC64.checksum(&bytes);
        bytes.push(opcode::EOF);
        bytes.extend_from_slice(&checksum.to_be_bytes());

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.entries.len(), 1);
        assert_eq!(decoded.entries[0].key, "key");
        assert_eq!(
            decoded.entries[0].value.to_bytes(),
            bytes::Bytes::from(original)
        );
    }
}
