//! Client connections.
//!
//! One pool worker serves one connection until the peer goes away or the
//! server shuts down.
//!
//! ```text
//!  accept ──> WorkerPool::submit ──> ConnectionHandler::run
//!                                        │
//!              ┌─────────────────────────┤
//!              ▼                         │
//!         read into BytesMut             │
//!              │                         │
//!         parse every complete frame ────┤ framing error: reply, close
//!              │                         │
//!         execute + write reply          │
//!              │                         │
//!         wait for data or shutdown ─────┘
//! ```
//!
//! Pipelined frames are answered in order. A frame split across reads
//! waits in the buffer until it is complete. Command errors are replies,
//! not disconnects.
//!
//! ## Example
//!
//! ```no_run
//! use snapkv::commands::{CommandHandler, ServerConfig};
//! use snapkv::connection::{handle_connection, ConnectionStats};
//! use snapkv::storage::Keyspace;
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use tokio::sync::watch;
//!
//! # async fn example() -> std::io::Result<()> {
//! let keyspace = Arc::new(Keyspace::new());
//! let stats = Arc::new(ConnectionStats::new());
//! let handler = CommandHandler::new(keyspace, Arc::new(ServerConfig::default()));
//! let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!
//! let listener = TcpListener::bind("127.0.0.1:6379").await?;
//! let (stream, addr) = listener.accept().await?;
//! handle_connection(stream, addr, handler, stats, shutdown_rx).await;
//! # Ok(())
//! # }
//! ```

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
