//! SnapKV server binary.
//!
//! Parses the command line, sets up logging and runs the server until
//! Ctrl+C.

use clap::Parser;
use snapkv::commands::{MasterAddr, ServerConfig};
use snapkv::Server;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "snapkv-server")]
#[command(version, about = "In-memory key-value server with RESP and binary snapshots", long_about = None)]
struct Args {
    /// Interface to listen on
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 6379)]
    port: u16,

    /// Directory holding the snapshot file
    #[arg(long, default_value = "./data")]
    dir: PathBuf,

    /// Snapshot file name
    #[arg(long, default_value = "dump.rdb")]
    dbfilename: String,

    /// Number of connection workers
    #[arg(long, default_value_t = 10)]
    workers: usize,

    /// Replicate from a master, given as "<host> <port>"
    #[arg(long)]
    replicaof: Option<MasterAddr>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind: self.bind,
            port: self.port,
            dir: self.dir,
            dbfilename: self.dbfilename,
            workers: self.workers,
            replica_of: self.replicaof,
        }
    }
}

fn print_banner(config: &ServerConfig) {
    println!(
        r#"
SnapKV v{} - In-Memory Key-Value Server
──────────────────────────────────────────
Listening on {} ({})
Snapshot file {}

Use Ctrl+C to shutdown gracefully.
"#,
        snapkv::VERSION,
        config.listen_addr(),
        config.role(),
        config.snapshot_path().display()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = args.into_config();
    print_banner(&config);

    let server = Server::bind(config).await?;
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping server..."),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
        }
        shutdown.shutdown();
    });

    server.run().await;

    info!("Server shutdown complete");
    Ok(())
}
