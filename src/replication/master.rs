//! Master-side replication commands: REPLCONF, PSYNC and WAIT.

use crate::command::{HandlerFuture, parse_u64, reply};
use crate::connection::ClientState;
use crate::error::{ReplisError, ReplisResult};
use crate::replication::ReplicationRole;
use crate::resp::RespValue;
use crate::server::Server;
use std::time::Duration;
use tracing::{debug, warn};

/// REPLCONF <option> <value> [...]
///
/// `GETACK` is answered by replicas, `ACK` is sent to masters and gets no
/// reply. Every other option is acknowledged with OK.
pub fn cmd_replconf<'a>(
    server: &'a Server,
    client: &'a mut ClientState,
    args: Vec<String>,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let option = args[0].to_lowercase();
        match option.as_str() {
            "listening-port" => match args.get(1).and_then(|p| p.parse::<u16>().ok()) {
                Some(port) => {
                    client.listening_port = Some(port);
                    vec![RespValue::ok()]
                }
                None => vec![ReplisError::NotInteger.to_resp()],
            },
            "getack" => {
                let offset = server.replication.offset();
                vec![RespValue::command([
                    "REPLCONF".to_string(),
                    "ACK".to_string(),
                    offset.to_string(),
                ])]
            }
            "ack" => {
                let Some(replica_id) = client.replica_id else {
                    debug!(client_id = client.id, "ignoring ACK from a non-replica");
                    return Vec::new();
                };
                match args.get(1).map(|o| parse_u64(o)) {
                    Some(Ok(offset)) => server.replication.record_ack(replica_id, offset).await,
                    _ => warn!(replica_id, "malformed REPLCONF ACK"),
                }
                Vec::new()
            }
            _ => vec![RespValue::ok()],
        }
    })
}

/// PSYNC <replid> <offset>. Always answered with a full resync; the
/// FULLRESYNC line and the snapshot go out on the replication stream, so the
/// handler itself has nothing to reply.
pub fn cmd_psync<'a>(
    server: &'a Server,
    client: &'a mut ClientState,
    _args: Vec<String>,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        if server.replication.role() != ReplicationRole::Master {
            return vec![RespValue::error("ERR PSYNC is not allowed on a replica")];
        }
        if client.is_replica() {
            return vec![RespValue::error("ERR this connection is already a replica")];
        }
        let Some(writer) = client.writer.clone() else {
            return vec![RespValue::error("ERR PSYNC needs a connection")];
        };

        let addr = match client.listening_port {
            Some(port) => format!("client {} listening on {port}", client.id),
            None => format!("client {}", client.id),
        };
        let _writes = server.lock_writes().await;
        match server
            .replication
            .attach_replica(writer, addr, &server.store)
            .await
        {
            Ok(id) => {
                client.replica_id = Some(id);
                Vec::new()
            }
            Err(e) => vec![RespValue::error(format!("ERR failed to build snapshot: {e}"))],
        }
    })
}

/// WAIT <numreplicas> <timeout-ms>. A timeout of 0 waits without a deadline.
pub fn cmd_wait<'a>(
    server: &'a Server,
    _client: &'a mut ClientState,
    args: Vec<String>,
) -> HandlerFuture<'a> {
    Box::pin(async move { reply(wait(server, &args).await) })
}

async fn wait(server: &Server, args: &[String]) -> ReplisResult<RespValue> {
    let wanted = parse_u64(&args[0])? as usize;
    let timeout_ms = parse_u64(&args[1])
        .map_err(|_| ReplisError::Generic("timeout is not an integer or out of range".into()))?;
    let timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));

    let count = server.replication.wait_for_acks(wanted, timeout).await;
    Ok(RespValue::integer(count as i64))
}
