//! Command Handler Module
//!
//! This module implements the commands SnapKV understands. It turns decoded
//! RESP frames into [`Command`]s and dispatches them by name.
//!
//! Command names are matched exactly: `GET` is a command, `get` is not.
//!
//! ## Supported Commands
//!
//! - `PING [message]` - Liveness check
//! - `ECHO message` - Echo message
//! - `SET key value [PX milliseconds]` - Set a key, optionally with a TTL
//! - `GET key` - Get a key's value
//! - `KEYS *` - List every live key
//! - `CONFIG GET parameter [parameter ...]` - Read `dir` / `dbfilename`
//! - `SAVE` - Write a snapshot to the configured path
//! - `INFO [section]` - Server information
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │  Command::  │───>│  dispatch() │───>│  cmd_*()    │     │
//! │  │  try_from   │    └─────────────┘    └─────────────┘     │
//! │  └─────────────┘                              │             │
//! │                                               ▼             │
//! │                               Keyspace / SnapshotFile       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use super::config::{ReplicationInfo, ServerConfig};
use crate::connection::ConnectionStats;
use crate::protocol::{Command, RespValue};
use crate::snapshot::{SnapshotError, SnapshotFile};
use crate::storage::{Expiry, Keyspace, Value};
use bytes::Bytes;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};

/// Errors reported to the client as `-ERR ...` replies.
///
/// None of these close the connection.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("wrong argument type: {0}")]
    WrongType(String),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("invalid expire time in '{0}' command")]
    InvalidExpire(String),

    #[error("unknown config parameter '{0}'")]
    UnknownConfigKey(String),

    #[error("unknown subcommand '{sub}' for '{command}'")]
    UnsupportedSubcommand { command: String, sub: String },

    #[error("snapshot failed: {0}")]
    Snapshot(#[from] SnapshotError),
}

impl CommandError {
    pub fn to_resp(&self) -> RespValue {
        RespValue::error(format!("ERR {}", self))
    }
}

type CommandResult = Result<RespValue, CommandError>;

/// Handles commands by dispatching them against the shared keyspace.
///
/// Cheap to clone; every connection worker holds its own clone.
#[derive(Clone)]
pub struct CommandHandler {
    keyspace: Arc<Keyspace>,
    config: Arc<ServerConfig>,
    snapshot: Arc<SnapshotFile>,
    replication: Arc<ReplicationInfo>,
    stats: Option<Arc<ConnectionStats>>,
    start_time: Instant,
}

impl CommandHandler {
    /// Creates a command handler for `keyspace`, saving snapshots to the
    /// path named by `config`.
    pub fn new(keyspace: Arc<Keyspace>, config: Arc<ServerConfig>) -> Self {
        let snapshot = Arc::new(SnapshotFile::new(config.snapshot_path()));
        let replication = Arc::new(ReplicationInfo::new(&config));

        Self {
            keyspace,
            config,
            snapshot,
            replication,
            stats: None,
            start_time: Instant::now(),
        }
    }

    /// Reports these connection counters in `INFO stats`.
    pub fn with_stats(mut self, stats: Arc<ConnectionStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn keyspace(&self) -> &Arc<Keyspace> {
        &self.keyspace
    }

    pub fn snapshot_file(&self) -> &SnapshotFile {
        &self.snapshot
    }

    /// Replication state, shared by every clone so the replica link's
    /// offset shows up in `INFO`.
    pub fn replication(&self) -> &Arc<ReplicationInfo> {
        &self.replication
    }

    /// Executes a decoded frame and returns the reply.
    pub fn execute(&self, frame: RespValue) -> RespValue {
        match Command::try_from(frame) {
            Ok(command) => self.execute_command(&command),
            Err(e) => RespValue::error(format!("ERR {}", e)),
        }
    }

    /// Executes a command, turning any error into an error reply.
    pub fn execute_command(&self, command: &Command) -> RespValue {
        self.dispatch(command).unwrap_or_else(|e| e.to_resp())
    }

    /// Dispatches a command to its handler.
    pub fn dispatch(&self, command: &Command) -> CommandResult {
        let args = command.args.as_slice();

        match command.name.as_str() {
            "PING" => self.cmd_ping(args),
            "ECHO" => self.cmd_echo(args),
            "SET" => self.cmd_set(args),
            "GET" => self.cmd_get(args),
            "KEYS" => self.cmd_keys(args),
            "CONFIG" => self.cmd_config(args),
            "SAVE" => self.cmd_save(args),
            "INFO" => self.cmd_info(args),
            _ => Err(CommandError::UnknownCommand(command.name.clone())),
        }
    }

    // ========================================================================
    // Helper functions
    // ========================================================================

    /// Reads argument `index` as a key.
    fn key_arg(args: &[Value], index: usize) -> Result<String, CommandError> {
        match &args[index] {
            Value::Text(s) => Ok(s.clone()),
            Value::Integer(n) => Ok(n.to_string()),
            Value::Blob(_) => Err(CommandError::WrongType("key must be valid UTF-8".to_string())),
        }
    }

    fn integer_arg(value: &Value) -> Option<i64> {
        match value {
            Value::Integer(n) => Some(*n),
            Value::Text(s) => s.parse().ok(),
            Value::Blob(_) => None,
        }
    }

    fn bulk(value: Value) -> RespValue {
        match value {
            Value::Text(s) => RespValue::bulk_string(s),
            Value::Integer(n) => RespValue::bulk_string(n.to_string()),
            Value::Blob(b) => RespValue::BulkString(b),
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// PING [message]
    fn cmd_ping(&self, args: &[Value]) -> CommandResult {
        match args {
            [] => Ok(RespValue::pong()),
            [message] => Ok(RespValue::BulkString(message.to_bytes())),
            _ => Err(CommandError::WrongArity("PING".to_string())),
        }
    }

    /// ECHO message
    fn cmd_echo(&self, args: &[Value]) -> CommandResult {
        match args {
            [message] => Ok(RespValue::BulkString(message.to_bytes())),
            _ => Err(CommandError::WrongArity("ECHO".to_string())),
        }
    }

    /// SET key value [PX milliseconds]
    ///
    /// Options are fully validated before the keyspace is touched.
    fn cmd_set(&self, args: &[Value]) -> CommandResult {
        if args.len() < 2 {
            return Err(CommandError::WrongArity("SET".to_string()));
        }

        let key = Self::key_arg(args, 0)?;
        let ttl = parse_set_options(&args[2..])?;

        let expiry = ttl.map(Expiry::after);
        self.keyspace.set(key, args[1].clone(), expiry);
        Ok(RespValue::ok())
    }

    /// GET key
    fn cmd_get(&self, args: &[Value]) -> CommandResult {
        if args.len() != 1 {
            return Err(CommandError::WrongArity("GET".to_string()));
        }

        let key = Self::key_arg(args, 0)?;
        Ok(match self.keyspace.get(&key) {
            Some(value) => Self::bulk(value),
            None => RespValue::null(),
        })
    }

    /// KEYS *
    fn cmd_keys(&self, args: &[Value]) -> CommandResult {
        let pattern = match args {
            [pattern] => pattern,
            _ => return Err(CommandError::WrongArity("KEYS".to_string())),
        };

        if pattern.as_text() != Some("*") {
            return Err(CommandError::Syntax(format!(
                "unsupported pattern '{}', only '*' is supported",
                pattern
            )));
        }

        let mut keys = self.keyspace.keys();
        keys.sort_unstable();

        Ok(RespValue::array(
            keys.into_iter().map(RespValue::bulk_string).collect(),
        ))
    }

    /// CONFIG GET parameter [parameter ...]
    fn cmd_config(&self, args: &[Value]) -> CommandResult {
        let subcommand = match args.first() {
            Some(sub) => sub,
            None => return Err(CommandError::WrongArity("CONFIG".to_string())),
        };

        if subcommand.as_text() != Some("GET") {
            return Err(CommandError::UnsupportedSubcommand {
                command: "CONFIG".to_string(),
                sub: subcommand.to_string(),
            });
        }

        if args.len() < 2 {
            return Err(CommandError::WrongArity("CONFIG GET".to_string()));
        }

        let mut reply = Vec::with_capacity((args.len() - 1) * 2);
        for name in &args[1..] {
            let name = name.to_string();
            let value = self
                .config
                .get(&name)
                .ok_or_else(|| CommandError::UnknownConfigKey(name.clone()))?;
            reply.push(RespValue::bulk_string(name));
            reply.push(RespValue::bulk_string(value));
        }

        Ok(RespValue::array(reply))
    }

    /// SAVE
    fn cmd_save(&self, args: &[Value]) -> CommandResult {
        if !args.is_empty() {
            return Err(CommandError::WrongArity("SAVE".to_string()));
        }

        run_blocking(|| self.snapshot.save(&self.keyspace))?;
        Ok(RespValue::ok())
    }

    /// INFO [section]
    fn cmd_info(&self, args: &[Value]) -> CommandResult {
        let section = match args {
            [] => "all".to_string(),
            [section] => section.to_string().to_lowercase(),
            _ => return Err(CommandError::WrongArity("INFO".to_string())),
        };

        let text = match section.as_str() {
            "all" | "everything" | "default" => INFO_SECTIONS
                .iter()
                .map(|(title, name)| {
                    let body = self.info_section(name).unwrap_or_default();
                    format!("# {}\n{}", title, body)
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
            name => self.info_section(name).unwrap_or_default(),
        };

        Ok(RespValue::bulk_string(Bytes::from(text)))
    }

    fn info_section(&self, name: &str) -> Option<String> {
        match name {
            "server" => Some(format!(
                "snapkv_version:{}\nos:{}\ntcp_port:{}\nuptime_in_seconds:{}\nworkers:{}",
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS,
                self.config.port,
                self.start_time.elapsed().as_secs(),
                self.config.workers,
            )),
            "replication" => Some(self.replication.render()),
            "stats" => {
                let storage = self.keyspace.stats();
                let load = |counter: fn(&ConnectionStats) -> u64| {
                    self.stats.as_deref().map(counter).unwrap_or(0)
                };
                Some(format!(
                    "total_connections_received:{}\nconnected_clients:{}\n\
                     total_commands_processed:{}\ntotal_net_input_bytes:{}\n\
                     total_net_output_bytes:{}\nget_ops:{}\nset_ops:{}\nexpired_keys:{}",
                    load(|s| s.connections_accepted.load(Ordering::Relaxed)),
                    load(|s| s.active_connections.load(Ordering::Relaxed)),
                    load(|s| s.commands_processed.load(Ordering::Relaxed)),
                    load(|s| s.bytes_read.load(Ordering::Relaxed)),
                    load(|s| s.bytes_written.load(Ordering::Relaxed)),
                    storage.get_ops,
                    storage.set_ops,
                    storage.expired,
                ))
            }
            "keyspace" => {
                let storage = self.keyspace.stats();
                Some(format!(
                    "db0:keys={},expires={}",
                    storage.keys, storage.expires
                ))
            }
            _ => None,
        }
    }
}

/// Runs blocking file I/O from a command.
///
/// On a multi-threaded runtime the worker thread hands its other tasks off
/// first. `block_in_place` panics on a current-thread runtime, so there the
/// closure simply runs inline.
fn run_blocking<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if matches!(handle.runtime_flavor(), RuntimeFlavor::MultiThread) => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// Title and name of each INFO section, in output order.
const INFO_SECTIONS: [(&str, &str); 4] = [
    ("Server", "server"),
    ("Replication", "replication"),
    ("Stats", "stats"),
    ("Keyspace", "keyspace"),
];

/// Parses the options following `SET key value`.
///
/// Returns the TTL if `PX` was given. Unknown tokens, a missing or
/// non-integer `PX` value, and a repeated `PX` are all rejected.
fn parse_set_options(options: &[Value]) -> Result<Option<Duration>, CommandError> {
    let mut ttl = None;
    let mut iter = options.iter();

    while let Some(option) = iter.next() {
        match option.as_text() {
            Some("PX") => {
                if ttl.is_some() {
                    return Err(CommandError::Syntax("PX given more than once".to_string()));
                }
                let value = iter
                    .next()
                    .ok_or_else(|| CommandError::Syntax("PX requires a value".to_string()))?;
                let ms = CommandHandler::integer_arg(value).ok_or_else(|| {
                    CommandError::WrongType(format!("PX value '{}' is not an integer", value))
                })?;
                if ms <= 0 {
                    return Err(CommandError::InvalidExpire("SET".to_string()));
                }
                ttl = Some(Duration::from_millis(ms as u64));
            }
            _ => {
                return Err(CommandError::Syntax(format!(
                    "unsupported option '{}'",
                    option
                )))
            }
        }
    }

    Ok(ttl)
}
