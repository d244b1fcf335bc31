//! Snapshot encoder.

use super::format::{opcode, CRC64, DEFAULT_DB, MAGIC, TYPE_STRING, VERSION};
use super::length::{write_integer, write_length, write_string, write_value};
use super::SnapshotError;
use crate::storage::{Entry, KeyspaceSnapshot, TimeUnit};
use bytes::BufMut;

/// Auxiliary field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuxValue {
    Text(String),
    Integer(i64),
}

/// Builds a snapshot file in memory.
///
/// Records are appended in call order; [`SnapshotWriter::finish`] adds the
/// end marker and checksum.
#[derive(Debug)]
pub struct SnapshotWriter {
    buf: Vec<u8>,
}

impl Default for SnapshotWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotWriter {
    /// Starts a new file with the header already written.
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(1024);
        buf.put_slice(MAGIC);
        buf.put_slice(VERSION);
        Self { buf }
    }

    pub fn aux(&mut self, key: &str, value: &AuxValue) -> Result<(), SnapshotError> {
        self.buf.put_u8(opcode::AUX);
        write_string(&mut self.buf, key.as_bytes())?;
        match value {
            AuxValue::Text(s) => write_string(&mut self.buf, s.as_bytes()),
            AuxValue::Integer(n) => write_integer(&mut self.buf, *n),
        }
    }

    pub fn select_db(&mut self, db: u32) -> Result<(), SnapshotError> {
        self.buf.put_u8(opcode::SELECT_DB);
        write_length(&mut self.buf, db as usize)
    }

    pub fn resize_db(&mut self, size: usize, expires: usize) -> Result<(), SnapshotError> {
        self.buf.put_u8(opcode::RESIZE_DB);
        write_length(&mut self.buf, size)?;
        write_length(&mut self.buf, expires)
    }

    /// Appends one key/value record, preceded by its expiry marker if any.
    pub fn entry(&mut self, entry: &Entry) -> Result<(), SnapshotError> {
        if let Some(expiry) = entry.expiry {
            match expiry.unit {
                TimeUnit::Milliseconds => {
                    self.buf.put_u8(opcode::EXPIRE_TIME_MS);
                    self.buf.put_u64_le(expiry.at);
                }
                TimeUnit::Seconds => {
                    let secs = u32::try_from(expiry.at).map_err(|_| {
                        SnapshotError::InvalidLength(format!(
                            "expiry {}s does not fit in 32 bits",
                            expiry.at
                        ))
                    })?;
                    self.buf.put_u8(opcode::EXPIRE_TIME);
                    self.buf.put_u32_le(secs);
                }
            }
        }

        self.buf.put_u8(TYPE_STRING);
        write_string(&mut self.buf, entry.key.as_bytes())?;
        write_value(&mut self.buf, &entry.value)
    }

    /// Appends the end marker and the checksum of everything before it.
    pub fn finish(mut self) -> Vec<u8> {
        let checksum = CRC64.checksum(&self.buf);
        self.buf.put_u8(opcode::EOF);
        self.buf.put_u64(checksum);
        self.buf
    }
}

/// Encodes a keyspace snapshot into a complete file image.
///
/// `ctime` is the creation time in Unix seconds, recorded as an aux field.
pub fn encode(snapshot: &KeyspaceSnapshot, ctime: u64) -> Result<Vec<u8>, SnapshotError> {
    let mut writer = SnapshotWriter::new();

    writer.aux("redis-bits", &AuxValue::Integer(64))?;
    writer.aux("ctime", &AuxValue::Integer(ctime as i64))?;
    writer.select_db(DEFAULT_DB)?;
    writer.resize_db(snapshot.size, snapshot.expires)?;

    for entry in &snapshot.entries {
        writer.entry(entry)?;
    }

    Ok(writer.finish())
}
