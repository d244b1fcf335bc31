//! # SnapKV - An In-Memory Key-Value Server with Snapshot Persistence
//!
//! SnapKV speaks the RESP protocol, keeps string keys with optional expiry
//! in a sharded in-memory keyspace, persists it to a binary snapshot file
//! and can follow a master as a replica.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               SnapKV                                 │
//! │                                                                      │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐   ┌────────────┐   │
//! │  │ TCP Server │──>│ WorkerPool │──>│ Connection │──>│  Command   │   │
//! │  │ (accept)   │   │ (N workers)│   │  Handler   │   │  Handler   │   │
//! │  └────────────┘   └────────────┘   └────────────┘   └─────┬──────┘   │
//! │                                                           │          │
//! │  ┌────────────┐                     ┌─────────────────────▼───────┐  │
//! │  │ Replica    │── apply stream ────>│          Keyspace           │  │
//! │  │ link       │                     │  64 RwLock shards, lazy TTL │  │
//! │  └────────────┘                     └─────────────┬───────────────┘  │
//! │                                                   │ SAVE / startup   │
//! │                                     ┌─────────────▼───────────────┐  │
//! │                                     │   Snapshot codec (REDIS0011)│  │
//! │                                     └─────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use snapkv::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig {
//!         port: 6380,
//!         ..Default::default()
//!     };
//!     let server = Server::bind(config).await?;
//!     server.run().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`, `ECHO message`
//! - `SET key value [PX milliseconds]`, `GET key`
//! - `KEYS *`
//! - `CONFIG GET dir|dbfilename`
//! - `SAVE`
//! - `INFO [section]`
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP frames, the incremental parser and command frames
//! - [`storage`]: The sharded keyspace with lazy expiry
//! - [`snapshot`]: Binary snapshot encoder and decoder
//! - [`commands`]: Server configuration and command dispatch
//! - [`connection`]: Per-client read/parse/execute loop
//! - [`server`]: Startup, accept loop, worker pool and shutdown
//! - [`replication`]: Replica handshake and command-stream apply

pub mod commands;
pub mod connection;
pub mod protocol;
pub mod replication;
pub mod server;
pub mod snapshot;
pub mod storage;

pub use commands::{CommandHandler, ServerConfig};
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{ParseError, RespParser, RespValue};
pub use server::{Server, ServerError, ShutdownHandle};
pub use snapshot::{SnapshotError, SnapshotFile};
pub use storage::{Keyspace, Value};

/// Version of SnapKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
