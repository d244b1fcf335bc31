//! Snapshot file constants.
//!
//! ```text
//! REDIS0011                         header: magic + 4 version digits
//! FA <key> <value>                  aux field (repeated)
//! FE <db>                           database selector
//! FB <size> <expires-size>          resize hint
//! [FC <u64 LE ms> | FD <u32 LE s>]  optional expiry for the next record
//! 00 <key> <value>                  key/value record (repeated)
//! FF <u64 BE crc64>                 end marker + checksum of all prior bytes
//! ```

use crc::{Crc, CRC_64_XZ};

/// File magic.
pub const MAGIC: &[u8; 5] = b"REDIS";

/// Version digits written after the magic.
pub const VERSION: &[u8; 4] = b"0011";

/// Header length: magic plus version digits.
pub const HEADER_LEN: usize = MAGIC.len() + VERSION.len();

/// Record opcodes.
pub mod opcode {
    pub const AUX: u8 = 0xFA;
    pub const RESIZE_DB: u8 = 0xFB;
    pub const EXPIRE_TIME_MS: u8 = 0xFC;
    pub const EXPIRE_TIME: u8 = 0xFD;
    pub const SELECT_DB: u8 = 0xFE;
    pub const EOF: u8 = 0xFF;
}

/// Value type tag for strings (including integer-encoded strings).
pub const TYPE_STRING: u8 = 0;

/// Low six bits of a `11xxxxxx` length byte.
pub mod special {
    pub const INT8: u8 = 0;
    pub const INT16: u8 = 1;
    pub const INT32: u8 = 2;
    pub const LZF: u8 = 3;
}

/// Two high bits of a length byte.
pub mod mode {
    pub const BITS_6: u8 = 0b00;
    pub const BITS_14: u8 = 0b01;
    pub const BITS_32: u8 = 0b10;
    pub const SPECIAL: u8 = 0b11;
}

/// CRC-64 with the ECMA-182 polynomial, reflected, as used for the trailer.
pub const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// The database index written by this server.
pub const DEFAULT_DB: u32 = 0;
