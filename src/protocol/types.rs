//! RESP wire messages.
//!
//! ```text
//! +OK\r\n                      simple string
//! -ERR unknown command\r\n     error
//! :1000\r\n                    integer
//! $5\r\nhello\r\n              bulk string
//! $-1\r\n                      null bulk string
//! *2\r\n$3\r\nGET\r\n$1\r\nk\r\n   array
//! *-1\r\n                      null array
//! ```

use bytes::Bytes;
use std::fmt;

/// Line terminator for every frame.
pub const CRLF: &[u8] = b"\r\n";

/// Type tags, the first byte of every frame.
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// One RESP frame.
///
/// `NullBulkString` and `NullArray` both mean "no value" but encode
/// differently, so they are separate variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// Single line of text, no CR or LF inside.
    SimpleString(String),
    Error(String),
    Integer(i64),
    /// Binary-safe payload.
    BulkString(Bytes),
    NullBulkString,
    Array(Vec<RespValue>),
    NullArray,
}

impl RespValue {
    /// ```
    /// use snapkv::protocol::RespValue;
    /// assert_eq!(RespValue::simple_string("OK"), RespValue::ok());
    /// ```
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    /// The null reply for a missing key.
    pub fn null() -> Self {
        RespValue::NullBulkString
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// Builds a command frame: an array of bulk strings.
    ///
    /// ```
    /// use snapkv::protocol::RespValue;
    /// let frame = RespValue::command(["GET", "k"]);
    /// assert_eq!(frame.serialize(), b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n");
    /// ```
    pub fn command<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        RespValue::Array(
            parts
                .into_iter()
                .map(|p| RespValue::BulkString(Bytes::copy_from_slice(p.as_ref())))
                .collect(),
        )
    }

    pub fn ok() -> Self {
        RespValue::simple_string("OK")
    }

    pub fn pong() -> Self {
        RespValue::simple_string("PONG")
    }

    /// Encodes the frame for the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len_hint());
        self.write_to(&mut buf);
        buf
    }

    fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => put_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => put_line(buf, prefix::ERROR, s.as_bytes()),
            RespValue::Integer(n) => put_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                put_header(buf, prefix::BULK_STRING, data.len() as i64);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::NullBulkString => put_header(buf, prefix::BULK_STRING, -1),
            RespValue::Array(values) => {
                put_header(buf, prefix::ARRAY, values.len() as i64);
                for value in values {
                    value.write_to(buf);
                }
            }
            RespValue::NullArray => put_header(buf, prefix::ARRAY, -1),
        }
    }

    fn encoded_len_hint(&self) -> usize {
        match self {
            RespValue::BulkString(data) => data.len() + 16,
            RespValue::Array(values) => 16 + values.len() * 16,
            _ => 32,
        }
    }

    /// Text of a simple or bulk string, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }
}

fn put_line(buf: &mut Vec<u8>, tag: u8, text: &[u8]) {
    buf.push(tag);
    buf.extend_from_slice(text);
    buf.extend_from_slice(CRLF);
}

fn put_header(buf: &mut Vec<u8>, tag: u8, len: i64) {
    put_line(buf, tag, len.to_string().as_bytes());
}

/// One-line rendering for logs and error messages.
impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "+{}", s),
            RespValue::Error(s) => write!(f, "-{}", s),
            RespValue::Integer(n) => write!(f, ":{}", n),
            RespValue::BulkString(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "{:?}", s),
                Err(_) => write!(f, "<{} bytes>", data.len()),
            },
            RespValue::NullBulkString => write!(f, "(nil)"),
            RespValue::NullArray => write!(f, "(nil array)"),
            RespValue::Array(values) => {
                write!(f, "[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_frames() {
        assert_eq!(RespValue::ok().serialize(), b"+OK\r\n");
        assert_eq!(
            RespValue::error("ERR unknown command 'X'").serialize(),
            b"-ERR unknown command 'X'\r\n"
        );
        assert_eq!(RespValue::integer(-42).serialize(), b":-42\r\n");
        assert_eq!(
            RespValue::bulk_string(Bytes::from("hello")).serialize(),
            b"$5\r\nhello\r\n"
        );
        assert_eq!(RespValue::bulk_string(Bytes::new()).serialize(), b"$0\r\n\r\n");
    }

    #[test]
    fn test_nulls_encode_differently() {
        assert_eq!(RespValue::null().serialize(), b"$-1\r\n");
        assert_eq!(RespValue::NullArray.serialize(), b"*-1\r\n");
        assert_ne!(RespValue::null(), RespValue::NullArray);
    }

    #[test]
    fn test_nested_array() {
        let value = RespValue::array(vec![
            RespValue::integer(1),
            RespValue::array(vec![]),
            RespValue::null(),
        ]);
        assert_eq!(value.serialize(), b"*3\r\n:1\r\n*0\r\n$-1\r\n");
    }

    #[test]
    fn test_display() {
        let value = RespValue::array(vec![
            RespValue::simple_string("PONG"),
            RespValue::bulk_string(Bytes::from("a b")),
            RespValue::bulk_string(Bytes::from_static(&[0xff, 0x00])),
        ]);
        assert_eq!(value.to_string(), "[+PONG, \"a b\", <2 bytes>]");
    }
}
