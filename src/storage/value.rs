//! Stored values and per-key expiry metadata.

use bytes::Bytes;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A value held by the keyspace.
///
/// Text and integers come from clients and snapshots; blobs hold raw bytes
/// that are not valid UTF-8, such as decompressed snapshot payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Blob(Bytes),
}

impl Value {
    /// Builds a value from raw bytes, keeping it as text when it is valid UTF-8.
    pub fn from_bytes(bytes: Bytes) -> Self {
        match std::str::from_utf8(&bytes) {
            Ok(s) => Value::Text(s.to_string()),
            Err(_) => Value::Blob(bytes),
        }
    }

    /// Returns the text if this value is `Text`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Wire representation: text and blobs as-is, integers as decimal text.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Value::Text(s) => Bytes::copy_from_slice(s.as_bytes()),
            Value::Integer(n) => Bytes::from(n.to_string()),
            Value::Blob(b) => b.clone(),
        }
    }

    /// Consumes the value and returns its text form, if it has one.
    pub fn into_text(self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s),
            Value::Integer(n) => Some(n.to_string()),
            Value::Blob(b) => String::from_utf8(b.to_vec()).ok(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{}", s),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Resolution of an expiry timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Seconds,
    Milliseconds,
}

impl TimeUnit {
    /// Current wall-clock time since the Unix epoch in this unit.
    pub fn now(self) -> u64 {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        match self {
            TimeUnit::Seconds => since_epoch.as_secs(),
            TimeUnit::Milliseconds => since_epoch.as_millis() as u64,
        }
    }
}

/// An absolute, epoch-based expiry timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    pub at: u64,
    pub unit: TimeUnit,
}

impl Expiry {
    pub fn at_millis(at: u64) -> Self {
        Self {
            at,
            unit: TimeUnit::Milliseconds,
        }
    }

    pub fn at_secs(at: u64) -> Self {
        Self {
            at,
            unit: TimeUnit::Seconds,
        }
    }

    /// Millisecond expiry `ttl` from now.
    pub fn after(ttl: Duration) -> Self {
        let now = TimeUnit::Milliseconds.now();
        Self::at_millis(now.saturating_add(ttl.as_millis() as u64))
    }

    /// A key is expired once its timestamp is strictly in the past,
    /// compared at the resolution it was recorded in.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.at < self.unit.now()
    }
}

/// A key with its value and optional expiry, as enumerated from the keyspace
/// or read from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: Value,
    pub expiry: Option<Expiry>,
}

impl Entry {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            expiry: None,
        }
    }

    pub fn with_expiry(mut self, expiry: Expiry) -> Self {
        self.expiry = Some(expiry);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_keeps_text() {
        assert_eq!(
            Value::from_bytes(Bytes::from("hello")),
            Value::Text("hello".to_string())
        );
        assert_eq!(
            Value::from_bytes(Bytes::from(&b"\xff\xfe"[..])),
            Value::Blob(Bytes::from(&b"\xff\xfe"[..]))
        );
    }

    #[test]
    fn test_to_bytes() {
        assert_eq!(Value::Integer(-17).to_bytes(), Bytes::from("-17"));
        assert_eq!(Value::from("abc").to_bytes(), Bytes::from("abc"));
    }

    #[test]
    fn test_expiry_strictly_past() {
        let now = TimeUnit::Milliseconds.now();
        assert!(Expiry::at_millis(now - 1).is_expired());
        assert!(!Expiry::at_millis(now + 10_000).is_expired());

        let now_secs = TimeUnit::Seconds.now();
        assert!(Expiry::at_secs(now_secs - 1).is_expired());
        assert!(!Expiry::at_secs(now_secs + 60).is_expired());
    }

    #[test]
    fn test_seconds_compared_at_second_resolution() {
        // A seconds timestamp equal to the current second is not yet past,
        // even though its millisecond equivalent usually is.
        let now_secs = TimeUnit::Seconds.now();
        let expiry = Expiry::at_secs(now_secs);
        assert!(!expiry.is_expired() || TimeUnit::Seconds.now() > now_secs);
    }

    #[test]
    fn test_entry_builder() {
        let entry = Entry::new("k", 7i64).with_expiry(Expiry::at_secs(10));
        assert_eq!(entry.value, Value::Integer(7));
        assert_eq!(entry.expiry, Some(Expiry::at_secs(10)));
    }
}
