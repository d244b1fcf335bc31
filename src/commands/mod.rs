//! Command layer.
//!
//! [`CommandHandler`] owns everything a command can touch: the keyspace,
//! the snapshot file, the read-only [`ServerConfig`] and the replication
//! state reported by `INFO`. Every connection worker and the replica link
//! hold a clone of the same handler.
//!
//! ```text
//!  frame ──Command::try_from──> dispatch(name) ──> cmd_set / cmd_get / ...
//!                                    │                     │
//!                              CommandError          Keyspace, SnapshotFile
//!                                    │
//!                               "-ERR ..." reply
//! ```

pub mod config;
pub mod handler;

pub use config::{ConfigError, MasterAddr, ReplicationInfo, Role, ServerConfig, REPLICATION_ID};
pub use handler::{CommandError, CommandHandler};
