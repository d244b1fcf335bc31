//! Server configuration and replication identity.
//!
//! `ServerConfig` is built once from the command line and shared with the
//! dispatcher. Only `dir` and `dbfilename` are visible through `CONFIG GET`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Replication id reported by this server.
pub const REPLICATION_ID: &str = "8371b4fb1155b71f4a04d3e1bc3e18c4a990aeeb";

/// Default number of connection workers.
pub const DEFAULT_WORKERS: usize = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("replicaof must be '<host> <port>', got '{0}'")]
    InvalidReplicaOf(String),

    #[error("worker count must be at least 1")]
    NoWorkers,
}

/// Address of the master this server replicates from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterAddr {
    pub host: String,
    pub port: u16,
}

impl MasterAddr {
    /// `host:port` form for connecting.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for MasterAddr {
    type Err = ConfigError;

    /// Parses `"<host> <port>"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidReplicaOf(s.to_string());

        let mut parts = s.split_whitespace();
        let host = parts.next().ok_or_else(invalid)?;
        let port = parts
            .next()
            .and_then(|p| p.parse::<u16>().ok())
            .ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for MasterAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.host, self.port)
    }
}

/// Process configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub dir: PathBuf,
    pub dbfilename: String,
    pub workers: usize,
    pub replica_of: Option<MasterAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 6379,
            dir: PathBuf::from("./data"),
            dbfilename: "dump.rdb".to_string(),
            workers: DEFAULT_WORKERS,
            replica_of: None,
        }
    }
}

impl ServerConfig {
    /// Address to bind the listener to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Full path of the snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(&self.dbfilename)
    }

    /// Looks up a key in the read-only table exposed by `CONFIG GET`.
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "dir" => Some(self.dir.display().to_string()),
            "dbfilename" => Some(self.dbfilename.clone()),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(())
    }

    pub fn role(&self) -> Role {
        if self.replica_of.is_some() {
            Role::Replica
        } else {
            Role::Master
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Replica => write!(f, "slave"),
        }
    }
}

/// Replication facts reported by `INFO replication`.
///
/// The offset is only advanced on a replica, as it applies the master's
/// command stream.
#[derive(Debug)]
pub struct ReplicationInfo {
    role: Role,
    master: Option<MasterAddr>,
    offset: AtomicU64,
}

impl ReplicationInfo {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            role: config.role(),
            master: config.replica_of.clone(),
            offset: AtomicU64::new(0),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Relaxed)
    }

    pub fn set_offset(&self, offset: u64) {
        self.offset.store(offset, Ordering::Relaxed);
    }

    /// Body of the `replication` INFO section.
    pub fn render(&self) -> String {
        let mut out = format!(
            "role:{}\nmaster_replid:{}\nmaster_repl_offset:{}",
            self.role,
            REPLICATION_ID,
            self.offset()
        );
        if let Some(master) = &self.master {
            out.push_str(&format!(
                "\nmaster_host:{}\nmaster_port:{}",
                master.host, master.port
            ));
        }
        out
    }
}
