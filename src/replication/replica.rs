use crate::config::Config;
use crate::connection::{ClientState, ConnectionWriter};
use crate::error::{ReplisError, ReplisResult};
use crate::persistence::rdb;
use crate::replication::ReplicationManager;
use crate::resp::{RespReader, RespValue};
use crate::server::SharedServer;
use crate::store::Store;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// An established link to the master, positioned just after the snapshot.
pub struct MasterLink {
    reader: RespReader<OwnedReadHalf>,
    writer: ConnectionWriter,
}

/// Connect to the configured master and run the handshake:
/// PING, REPLCONF listening-port, REPLCONF capa psync2, PSYNC ? -1.
///
/// The snapshot that follows FULLRESYNC is loaded into `store`; a snapshot
/// that fails to parse is logged and skipped.
pub async fn handshake(
    config: &Config,
    store: &Store,
    replication: &ReplicationManager,
) -> ReplisResult<MasterLink> {
    let Some((host, port)) = &config.replicaof else {
        return Err(ReplisError::Handshake("no master configured".into()));
    };
    let addr = format!("{host}:{port}");
    info!("Connecting to master at {addr}...");
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| ReplisError::Handshake(format!("connect to {addr}: {e}")))?;
    let (read_half, write_half) = stream.into_split();
    let mut link = MasterLink {
        reader: RespReader::new(read_half),
        writer: ConnectionWriter::new(write_half),
    };

    let pong = link.request(["PING"]).await?;
    expect_simple(&pong, "PONG", "PING")?;

    let listening_port = config.port.to_string();
    let reply = link
        .request(["REPLCONF", "listening-port", listening_port.as_str()])
        .await?;
    expect_simple(&reply, "OK", "REPLCONF listening-port")?;

    let reply = link.request(["REPLCONF", "capa", "psync2"]).await?;
    expect_simple(&reply, "OK", "REPLCONF capa")?;

    let reply = link.request(["PSYNC", "?", "-1"]).await?;
    let offset = parse_fullresync(&reply)?;
    replication.set_offset(offset);

    let blob = link
        .reader
        .read_snapshot()
        .await
        .map_err(|e| ReplisError::Handshake(format!("reading snapshot: {e}")))?
        .ok_or_else(|| ReplisError::Handshake("master closed during snapshot".into()))?;
    match rdb::load_bytes(&blob, store).await {
        Ok(keys) => info!(keys, offset, "full resync complete"),
        Err(e) => warn!(len = blob.len(), "ignoring unreadable snapshot from master: {e}"),
    }
    Ok(link)
}

impl MasterLink {
    async fn request<const N: usize>(&mut self, words: [&str; N]) -> ReplisResult<RespValue> {
        let label = words[0];
        self.writer
            .write_values(&[RespValue::command(words)])
            .await
            .map_err(|e| ReplisError::Handshake(format!("sending {label}: {e}")))?;
        match self.reader.read_value().await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(ReplisError::Handshake(format!(
                "master closed the connection after {label}"
            ))),
            Err(e) => Err(ReplisError::Handshake(format!("reading {label} reply: {e}"))),
        }
    }
}

fn expect_simple(reply: &RespValue, expected: &str, step: &str) -> ReplisResult<()> {
    match reply {
        RespValue::SimpleString(s) if s.eq_ignore_ascii_case(expected) => Ok(()),
        other => Err(ReplisError::Handshake(format!(
            "unexpected reply to {step}: {other:?}"
        ))),
    }
}

/// Extract the offset from `+FULLRESYNC <replid> <offset>`.
fn parse_fullresync(reply: &RespValue) -> ReplisResult<u64> {
    let RespValue::SimpleString(line) = reply else {
        return Err(ReplisError::Handshake(format!(
            "unexpected reply to PSYNC: {reply:?}"
        )));
    };
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("FULLRESYNC"), Some(_replid), Some(offset)) => offset
            .parse()
            .map_err(|_| ReplisError::Handshake(format!("bad FULLRESYNC offset: {offset}"))),
        _ => Err(ReplisError::Handshake(format!(
            "unexpected reply to PSYNC: {line}"
        ))),
    }
}

/// Apply the master's command stream until the link drops or `shutdown`
/// fires. Only `REPLCONF GETACK` is answered; every frame, GETACK
/// included, advances the replication offset by its encoded size once it
/// has been applied.
pub async fn run_link(server: SharedServer, mut link: MasterLink, shutdown: CancellationToken) {
    let mut client = ClientState::detached();
    loop {
        let value = tokio::select! {
            read = link.reader.read_value() => read,
            _ = shutdown.cancelled() => {
                debug!("master link shutting down");
                return;
            }
        };
        let value = match value {
            Ok(Some(value)) => value,
            Ok(None) => {
                warn!("master closed the replication link");
                return;
            }
            Err(e) => {
                warn!("replication stream error: {e}");
                return;
            }
        };

        let getack = is_getack(&value);
        let len = value.encoded_len() as u64;
        let replies = server.execute(&mut client, value).await;
        // The ACK already carries the offset from before this frame.
        server.replication.advance_offset(len);
        if getack && let Err(e) = link.writer.write_values(&replies).await {
            warn!("failed to answer GETACK: {e}");
            return;
        }
    }
}

fn is_getack(value: &RespValue) -> bool {
    let RespValue::Array(items) = value else {
        return false;
    };
    match items.as_slice() {
        [cmd, sub, ..] => {
            cmd.as_bytes().is_some_and(|b| b.eq_ignore_ascii_case(b"replconf"))
                && sub.as_bytes().is_some_and(|b| b.eq_ignore_ascii_case(b"getack"))
        }
        _ => false,
    }
}
