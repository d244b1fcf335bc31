//! Replica-side replication.
//!
//! A replica opens one connection to its master and walks through the
//! handshake:
//!
//! ```text
//! replica                              master
//!    │ PING ─────────────────────────────> │
//!    │ <───────────────────────────── +PONG│
//!    │ REPLCONF listening-port <port> ───> │
//!    │ <─────────────────────────────── +OK│
//!    │ REPLCONF capa psync2 ─────────────> │
//!    │ <─────────────────────────────── +OK│
//!    │ PSYNC ? -1 ───────────────────────> │
//!    │ <──────────── +FULLRESYNC <id> <off>│
//!    │ <──────────── $<len>\r\n<snapshot>  │  (no trailing CRLF)
//!    │ <──────────── command stream ...    │
//! ```
//!
//! The snapshot replaces the local keyspace. Every later frame is applied
//! through the command dispatcher without a reply, except
//! `REPLCONF GETACK *`, which is answered with `REPLCONF ACK <offset>`.
//! The offset counts the bytes of every frame processed after the snapshot.

use crate::commands::{CommandHandler, MasterAddr};
use crate::protocol::{Command, CommandParseError, ParseError, RespParser, RespValue};
use crate::snapshot::{self, SnapshotError};
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Parse(#[from] ParseError),

    #[error("unexpected reply from master: expected {expected}, got {got}")]
    UnexpectedReply { expected: String, got: String },

    #[error("snapshot from master is invalid: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("master closed the connection")]
    ConnectionClosed,
}

impl From<CommandParseError> for ReplicationError {
    fn from(e: CommandParseError) -> Self {
        ReplicationError::UnexpectedReply {
            expected: "a command frame".to_string(),
            got: e.to_string(),
        }
    }
}

type Result<T> = std::result::Result<T, ReplicationError>;

/// Master's answer to `PSYNC`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullResync {
    pub replid: String,
    pub offset: i64,
}

/// The replica's connection to its master.
pub struct MasterLink {
    stream: TcpStream,
    buffer: BytesMut,
    parser: RespParser,
    offset: u64,
}

impl MasterLink {
    pub async fn connect(master: &MasterAddr) -> Result<Self> {
        let stream = TcpStream::connect(master.socket_addr()).await?;
        debug!(master = %master.socket_addr(), "Connected to master");
        Ok(Self::new(stream))
    }

    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
            parser: RespParser::new(),
            offset: 0,
        }
    }

    /// Bytes of command stream processed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Runs the handshake up to and including the `FULLRESYNC` reply.
    pub async fn handshake(&mut self, listening_port: u16) -> Result<FullResync> {
        self.send(&RespValue::command(["PING"])).await?;
        self.expect_simple("PONG").await?;

        let port = listening_port.to_string();
        self.send(&RespValue::command(["REPLCONF", "listening-port", port.as_str()]))
            .await?;
        self.expect_simple("OK").await?;

        self.send(&RespValue::command(["REPLCONF", "capa", "psync2"]))
            .await?;
        self.expect_simple("OK").await?;

        self.send(&RespValue::command(["PSYNC", "?", "-1"])).await?;
        let (reply, _) = self.read_frame().await?;
        let resync = parse_fullresync(&reply)?;
        info!(replid = %resync.replid, offset = resync.offset, "Master accepted full resync");
        Ok(resync)
    }

    /// Reads the snapshot payload that follows `FULLRESYNC`.
    pub async fn read_snapshot(&mut self) -> Result<Bytes> {
        let header_end = loop {
            if let Some(pos) = self.buffer.windows(2).position(|w| w == b"\r\n") {
                break pos;
            }
            self.fill_buffer().await?;
        };

        let header = String::from_utf8_lossy(&self.buffer[..header_end]).into_owned();
        let len = header
            .strip_prefix('$')
            .and_then(|n| n.parse::<usize>().ok())
            .ok_or_else(|| ReplicationError::UnexpectedReply {
                expected: "$<length>".to_string(),
                got: header.clone(),
            })?;
        let _ = self.buffer.split_to(header_end + 2);

        while self.buffer.len() < len {
            self.fill_buffer().await?;
        }
        let payload = self.buffer.split_to(len).freeze();
        debug!(bytes = len, "Received snapshot from master");
        Ok(payload)
    }

    /// Applies the master's command stream until the master disconnects or
    /// `shutdown` flips to `true`.
    pub async fn apply_stream(
        &mut self,
        handler: &CommandHandler,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let (frame, consumed) = tokio::select! {
                frame = self.read_frame() => frame?,
                _ = shutdown.changed() => return Ok(()),
            };

            let command = Command::try_from(frame)?;
            if is_getack(&command) {
                let ack = self.offset.to_string();
                self.send(&RespValue::command(["REPLCONF", "ACK", ack.as_str()]))
                    .await?;
                trace!(offset = self.offset, "Sent ACK to master");
            } else if command.name != "PING" {
                if let Err(e) = handler.dispatch(&command) {
                    warn!(command = %command.name, error = %e, "Failed to apply replicated command");
                }
            }

            self.offset += consumed as u64;
            handler.replication().set_offset(self.offset);
        }
    }

    async fn send(&mut self, frame: &RespValue) -> Result<()> {
        self.stream.write_all(&frame.serialize()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads one complete frame, returning it with its size in bytes.
    async fn read_frame(&mut self) -> Result<(RespValue, usize)> {
        loop {
            if let Some((value, consumed)) = self.parser.parse(&self.buffer)? {
                let _ = self.buffer.split_to(consumed);
                return Ok((value, consumed));
            }
            self.fill_buffer().await?;
        }
    }

    async fn fill_buffer(&mut self) -> Result<()> {
        let n = self.stream.read_buf(&mut self.buffer).await?;
        if n == 0 {
            return Err(ReplicationError::ConnectionClosed);
        }
        Ok(())
    }

    async fn expect_simple(&mut self, expected: &str) -> Result<()> {
        match self.read_frame().await? {
            (RespValue::SimpleString(s), _) if s.eq_ignore_ascii_case(expected) => Ok(()),
            (other, _) => Err(ReplicationError::UnexpectedReply {
                expected: format!("+{}", expected),
                got: other.to_string(),
            }),
        }
    }
}

fn parse_fullresync(reply: &RespValue) -> Result<FullResync> {
    let unexpected = || ReplicationError::UnexpectedReply {
        expected: "+FULLRESYNC <replid> <offset>".to_string(),
        got: reply.to_string(),
    };

    let text = match reply {
        RespValue::SimpleString(s) => s,
        _ => return Err(unexpected()),
    };

    let mut parts = text.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("FULLRESYNC"), Some(replid), Some(offset)) => Ok(FullResync {
            replid: replid.to_string(),
            offset: offset.parse().map_err(|_| unexpected())?,
        }),
        _ => Err(unexpected()),
    }
}

fn is_getack(command: &Command) -> bool {
    command.name.eq_ignore_ascii_case("REPLCONF")
        && command
            .arg_str(0)
            .map(|sub| sub.eq_ignore_ascii_case("GETACK"))
            .unwrap_or(false)
}

/// Connects to `master`, completes the handshake and returns the link with
/// the master's snapshot payload.
pub async fn perform_handshake(
    master: &MasterAddr,
    listening_port: u16,
) -> Result<(MasterLink, Bytes)> {
    let mut link = MasterLink::connect(master).await?;
    link.handshake(listening_port).await?;
    let payload = link.read_snapshot().await?;
    Ok((link, payload))
}

/// Runs the replica side for the lifetime of the server.
pub async fn run_replica(
    master: MasterAddr,
    listening_port: u16,
    handler: CommandHandler,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    info!(master = %master.socket_addr(), "Starting replication handshake");

    let (mut link, payload) = perform_handshake(&master, listening_port).await?;
    let loaded = snapshot::load_bytes(&payload, handler.keyspace())?;
    info!(keys = loaded, "Loaded snapshot from master");

    let result = link.apply_stream(&handler, &mut shutdown).await;
    info!(offset = link.offset(), "Replication link closed");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::ServerConfig;
    use crate::snapshot::encode;
    use crate::storage::{Entry, Keyspace, KeyspaceSnapshot, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// Reads one frame from the replica and returns it as a command.
    async fn read_command(stream: &mut TcpStream, buffer: &mut BytesMut) -> Command {
        loop {
            if let Some((value, consumed)) = RespParser::new().parse(buffer).unwrap() {
                let _ = buffer.split_to(consumed);
                return Command::try_from(value).unwrap();
            }
            let n = stream.read_buf(buffer).await.unwrap();
            assert!(n > 0, "replica closed the connection");
        }
    }

    fn args(command: &Command) -> Vec<String> {
        command.args.iter().map(|a| a.to_string()).collect()
    }

    fn replica_handler() -> CommandHandler {
        let config = ServerConfig {
            replica_of: Some("127.0.0.1 1".parse().unwrap()),
            ..Default::default()
        };
        CommandHandler::new(Arc::new(Keyspace::new()), Arc::new(config))
    }

    #[tokio::test]
    async fn test_replica_against_scripted_master() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let master_addr = listener.local_addr().unwrap();

        let snapshot = encode(
            &KeyspaceSnapshot {
                size: 1,
                expires: 0,
                entries: vec![Entry::new("foo", "bar")],
            },
            0,
        )
        .unwrap();

        let stream_frames = [
            RespValue::command(["SET", "a", "1"]).serialize(),
            RespValue::command(["PING"]).serialize(),
            RespValue::command(["SET", "b", "2"]).serialize(),
        ];
        let expected_offset: usize = stream_frames.iter().map(Vec::len).sum();

        let master = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buffer = BytesMut::new();

            let ping = read_command(&mut stream, &mut buffer).await;
            assert_eq!(ping.name, "PING");
            stream.write_all(b"+PONG\r\n").await.unwrap();

            let port = read_command(&mut stream, &mut buffer).await;
            assert_eq!(port.name, "REPLCONF");
            assert_eq!(args(&port), vec!["listening-port", "6380"]);
            stream.write_all(b"+OK\r\n").await.unwrap();

            let capa = read_command(&mut stream, &mut buffer).await;
            assert_eq!(args(&capa), vec!["capa", "psync2"]);
            stream.write_all(b"+OK\r\n").await.unwrap();

            let psync = read_command(&mut stream, &mut buffer).await;
            assert_eq!(psync.name, "PSYNC");
            assert_eq!(args(&psync), vec!["?", "-1"]);

            // Resync line, payload and first commands in one write
            let mut out = b"+FULLRESYNC 8371b4fb1155b71f4a04d3e1bc3e18c4a990aeeb 0\r\n".to_vec();
            out.extend_from_slice(format!("${}\r\n", snapshot.len()).as_bytes());
            out.extend_from_slice(&snapshot);
            for frame in &stream_frames {
                out.extend_from_slice(frame);
            }
            stream.write_all(&out).await.unwrap();

            stream
                .write_all(&RespValue::command(["REPLCONF", "GETACK", "*"]).serialize())
                .await
                .unwrap();
            let ack = read_command(&mut stream, &mut buffer).await;
            assert_eq!(ack.name, "REPLCONF");
            args(&ack)
        });

        let handler = replica_handler();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let master_cfg: MasterAddr = format!("127.0.0.1 {}", master_addr.port()).parse().unwrap();
        let replica = tokio::spawn(run_replica(master_cfg, 6380, handler.clone(), shutdown_rx));

        let ack = tokio::time::timeout(Duration::from_secs(5), master)
            .await
            .expect("handshake timed out")
            .unwrap();
        assert_eq!(ack, vec!["ACK".to_string(), expected_offset.to_string()]);

        // Master task ended and dropped its socket
        let result = tokio::time::timeout(Duration::from_secs(5), replica)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ReplicationError::ConnectionClosed)));

        let keyspace = handler.keyspace();
        assert_eq!(keyspace.get("foo"), Some(Value::from("bar")));
        assert_eq!(keyspace.get("a"), Some(Value::from("1")));
        assert_eq!(keyspace.get("b"), Some(Value::from("2")));

        let getack_len = RespValue::command(["REPLCONF", "GETACK", "*"]).serialize().len();
        assert_eq!(
            handler.replication().offset(),
            (expected_offset + getack_len) as u64
        );
        let info = handler.execute(RespValue::command(["INFO", "replication"]));
        assert!(info.as_str().unwrap().starts_with("role:slave\n"));
    }

    #[tokio::test]
    async fn test_handshake_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buffer = BytesMut::new();
            read_command(&mut stream, &mut buffer).await;
            stream.write_all(b"-ERR go away\r\n").await.unwrap();
        });

        let master: MasterAddr = format!("127.0.0.1 {}", port).parse().unwrap();
        let result = perform_handshake(&master, 6380).await;
        assert!(matches!(
            result,
            Err(ReplicationError::UnexpectedReply { .. })
        ));
    }

    #[test]
    fn test_parse_fullresync() {
        let reply = RespValue::simple_string("FULLRESYNC abc 42");
        assert_eq!(
            parse_fullresync(&reply).unwrap(),
            FullResync {
                replid: "abc".to_string(),
                offset: 42
            }
        );

        assert!(parse_fullresync(&RespValue::simple_string("CONTINUE")).is_err());
        assert!(parse_fullresync(&RespValue::error("ERR no")).is_err());
    }
}
