//! TCP server: startup, accept loop and shutdown.
//!
//! ```text
//! Server::bind ──> create snapshot dir ──> bind listener
//!      │
//! Server::run ──> master: load snapshot (missing/corrupt → empty keyspace)
//!      │          replica: spawn replication link
//!      ▼
//!   accept loop ──> WorkerPool::submit (blocks while all workers busy)
//!      │
//!   shutdown signal ──> stop accepting, close idle connections, join workers
//! ```

pub mod pool;

pub use pool::{PoolError, WorkerPool};

use crate::commands::{CommandHandler, ConfigError, ServerConfig};
use crate::connection::{handle_connection, ConnectionStats};
use crate::replication;
use crate::storage::Keyspace;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Errors that stop the server from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot create snapshot directory {}: {source}", .path.display())]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("cannot bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },
}

/// Signals a running server to stop.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.sender.send_replace(true);
    }
}

/// A bound, not yet running, server.
pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    handler: CommandHandler,
    stats: Arc<ConnectionStats>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Server {
    /// Validates the configuration, creates the snapshot directory and
    /// binds the listening socket.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        std::fs::create_dir_all(&config.dir).map_err(|source| ServerError::CreateDir {
            path: config.dir.clone(),
            source,
        })?;

        let addr = config.listen_addr();
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(source) => return Err(ServerError::Bind { addr, source }),
        };

        let config = Arc::new(config);
        let keyspace = Arc::new(Keyspace::new());
        let stats = Arc::new(ConnectionStats::new());
        let handler = CommandHandler::new(keyspace, Arc::clone(&config))
            .with_stats(Arc::clone(&stats));
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            listener,
            config,
            handler,
            stats,
            shutdown: Arc::new(shutdown),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn keyspace(&self) -> &Arc<Keyspace> {
        self.handler.keyspace()
    }

    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            sender: Arc::clone(&self.shutdown),
        }
    }

    /// Loads the configured snapshot into the keyspace.
    ///
    /// A missing file is normal on first start. Any other failure is logged
    /// and the server starts with an empty keyspace rather than refusing to
    /// start. Returns the number of keys loaded.
    pub fn load_snapshot(&self) -> usize {
        let file = self.handler.snapshot_file();
        match file.load(self.handler.keyspace()) {
            Ok(loaded) => loaded,
            Err(e) if e.is_not_found() => {
                info!(path = %file.path().display(), "No snapshot found, starting empty");
                0
            }
            Err(e) => {
                warn!(
                    path = %file.path().display(),
                    error = %e,
                    "Failed to load snapshot, starting with an empty keyspace"
                );
                0
            }
        }
    }

    /// Prepares the keyspace and serves connections until shutdown.
    pub async fn run(self) {
        let mut shutdown_rx = self.shutdown.subscribe();

        match &self.config.replica_of {
            Some(master) => {
                let master = master.clone();
                let handler = self.handler.clone();
                let port = self.config.port;
                let shutdown = self.shutdown.subscribe();
                tokio::spawn(async move {
                    if let Err(e) = replication::run_replica(master, port, handler, shutdown).await
                    {
                        error!(error = %e, "Replication link failed");
                    }
                });
            }
            None => {
                self.load_snapshot();
            }
        }

        let handler = self.handler.clone();
        let stats = Arc::clone(&self.stats);
        let conn_shutdown = self.shutdown.subscribe();
        let pool = WorkerPool::new(
            self.config.workers,
            move |(stream, addr): (TcpStream, SocketAddr)| {
                handle_connection(
                    stream,
                    addr,
                    handler.clone(),
                    Arc::clone(&stats),
                    conn_shutdown.clone(),
                )
            },
        );

        info!(
            addr = %self.config.listen_addr(),
            workers = pool.size(),
            role = %self.config.role(),
            "Server ready to accept connections"
        );

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let (stream, addr) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
                _ = shutdown_rx.changed() => break,
            };

            debug!(client = %addr, idle_workers = pool.idle_workers(), "Accepted connection");

            tokio::select! {
                submitted = pool.submit((stream, addr)) => {
                    if submitted.is_err() {
                        break;
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }

        info!("Stopping accept loop");
        drop(self.listener);
        pool.shutdown().await;
        info!("Server shutdown complete");
    }
}
