//! Wire protocol.
//!
//! Clients send each command as an array of bulk strings and get one reply
//! frame back per command, in order. Frames may be pipelined and may arrive
//! split across reads; the parser reports how many bytes a complete frame
//! used so the caller can drop exactly that prefix of its buffer.
//!
//! ```
//! use snapkv::protocol::{parse_message, Command, RespValue};
//!
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n*1\r\n$4\r\nPI";
//! let (frame, consumed) = parse_message(data).unwrap().unwrap();
//! assert_eq!(consumed, 23);
//! assert_eq!(parse_message(&data[consumed..]).unwrap(), None);
//!
//! let command = Command::try_from(frame).unwrap();
//! assert_eq!(command.name, "GET");
//! assert_eq!(RespValue::null().serialize(), b"$-1\r\n");
//! ```

pub mod command;
pub mod parser;
pub mod types;

pub use command::{Command, CommandParseError};
pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use types::RespValue;
