//! Top-level command decoding.
//!
//! A command arrives as an array of bulk strings. The first element is the
//! command name; the remaining elements become typed arguments.

use super::types::RespValue;
use crate::storage::Value;
use thiserror::Error;

/// Why a decoded frame is not a command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("expected an array of bulk strings")]
    NotAnArray,

    #[error("empty command")]
    Empty,

    #[error("command name must be a text string")]
    NameNotText,

    #[error("null argument at position {0}")]
    NullArgument(usize),

    #[error("argument at position {0} is not a bulk string")]
    NotBulkString(usize),
}

/// A client command: a case-sensitive name plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<Value>,
}

impl Command {
    /// Argument `index` as text, if it is text.
    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(Value::as_text)
    }
}

impl TryFrom<RespValue> for Command {
    type Error = CommandParseError;

    fn try_from(value: RespValue) -> Result<Self, Self::Error> {
        let items = match value {
            RespValue::Array(items) => items,
            _ => return Err(CommandParseError::NotAnArray),
        };

        let mut iter = items.into_iter();
        let name = match iter.next() {
            None => return Err(CommandParseError::Empty),
            Some(RespValue::BulkString(data)) => String::from_utf8(data.to_vec())
                .map_err(|_| CommandParseError::NameNotText)?,
            Some(RespValue::SimpleString(s)) => s,
            Some(_) => return Err(CommandParseError::NameNotText),
        };

        let args = iter
            .enumerate()
            .map(|(i, item)| match item {
                RespValue::BulkString(data) => Ok(Value::from_bytes(data)),
                RespValue::SimpleString(s) => Ok(Value::Text(s)),
                RespValue::Integer(n) => Ok(Value::Integer(n)),
                RespValue::NullBulkString | RespValue::NullArray => {
                    Err(CommandParseError::NullArgument(i + 1))
                }
                RespValue::Array(_) | RespValue::Error(_) => {
                    Err(CommandParseError::NotBulkString(i + 1))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Command { name, args })
    }
}
