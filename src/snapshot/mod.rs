//! Snapshot Persistence
//!
//! Point-in-time keyspace dumps in an RDB-style binary format.
//!
//! ## Modules
//!
//! - `format`: opcodes, header constants and the CRC-64 used for the trailer
//! - `length`: the variable-width length encoding and string/integer encodings
//! - `writer`: builds a file image from a keyspace snapshot
//! - `reader`: parses a file image back into entries
//!
//! ## Example
//!
//! ```no_run
//! use snapkv::snapshot::SnapshotFile;
//! use snapkv::storage::Keyspace;
//!
//! let keyspace = Keyspace::new();
//! let file = SnapshotFile::new("/tmp/dump.rdb");
//! file.save(&keyspace).unwrap();
//! let loaded = file.load(&keyspace).unwrap();
//! ```

pub mod format;
pub mod length;
pub mod reader;
pub mod writer;

pub use reader::{decode, DecodedSnapshot};
pub use writer::{encode, SnapshotWriter};

use crate::storage::{Keyspace, TimeUnit};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::{fs, io};
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while saving or loading a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("not a snapshot file: bad magic header")]
    BadMagic,

    #[error("invalid snapshot version '{0}'")]
    BadVersion(String),

    #[error("unexpected end of snapshot data")]
    UnexpectedEof,

    #[error("unknown opcode 0x{0:02X}")]
    UnknownOpcode(u8),

    #[error("unsupported value type {0}")]
    UnsupportedValueType(u8),

    #[error("invalid length: {0}")]
    InvalidLength(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("checksum mismatch: expected {expected:016x}, computed {actual:016x}")]
    ChecksumMismatch { expected: u64, actual: u64 },
}

impl SnapshotError {
    /// True when the snapshot file does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SnapshotError::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }
}

/// A snapshot file on disk.
///
/// Saves through one `SnapshotFile` are serialized so two `SAVE`s never
/// interleave writes to the same path.
#[derive(Debug)]
pub struct SnapshotFile {
    path: PathBuf,
    save_lock: Mutex<()>,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            save_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes every live key to the file, replacing its previous contents.
    ///
    /// The keyspace is scanned under all of its shard locks, so the file
    /// reflects a single point in time. Returns the number of keys written.
    pub fn save(&self, keyspace: &Keyspace) -> Result<usize, SnapshotError> {
        let _guard = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());

        let snapshot = keyspace.snapshot();
        let bytes = encode(&snapshot, TimeUnit::Seconds.now())?;
        fs::write(&self.path, &bytes)?;

        info!(
            path = %self.path.display(),
            keys = snapshot.entries.len(),
            bytes = bytes.len(),
            "Snapshot saved"
        );
        Ok(snapshot.entries.len())
    }

    /// Replaces the keyspace with the file's contents.
    ///
    /// Entries that have already expired are dropped. Returns how many keys
    /// were loaded.
    pub fn load(&self, keyspace: &Keyspace) -> Result<usize, SnapshotError> {
        let data = fs::read(&self.path)?;
        let loaded = load_bytes(&data, keyspace)?;

        info!(path = %self.path.display(), keys = loaded, "Snapshot loaded");
        Ok(loaded)
    }
}

/// Decodes a file image and replaces the keyspace with it.
pub fn load_bytes(data: &[u8], keyspace: &Keyspace) -> Result<usize, SnapshotError> {
    let decoded = decode(data)?;
    let total = decoded.entries.len();
    let loaded = keyspace.replace(decoded.entries);

    if loaded < total {
        debug!(skipped = total - loaded, "Skipped expired entries");
    }
    Ok(loaded)
}
