pub mod master;
pub mod replica;

use crate::connection::ConnectionWriter;
use crate::persistence::rdb;
use crate::resp::RespValue;
use crate::store::Store;
use bytes::Bytes;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Buffered acknowledgments per WAIT caller.
const ACK_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationRole {
    Master,
    Replica,
}

impl fmt::Display for ReplicationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicationRole::Master => write!(f, "master"),
            ReplicationRole::Replica => write!(f, "slave"),
        }
    }
}

/// A connected replica, from the master's side.
#[derive(Debug)]
pub struct ReplicaRecord {
    pub id: u64,
    pub addr: String,
    pub acked_offset: u64,
    tx: mpsc::UnboundedSender<Bytes>,
}

/// A `REPLCONF ACK` received from a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaAck {
    pub replica_id: u64,
    pub offset: u64,
}

/// Replication state shared by every connection.
///
/// On a master `offset` counts the bytes fed into the replication stream;
/// on a replica it counts the bytes received from the master.
#[derive(Debug)]
pub struct ReplicationManager {
    role: ReplicationRole,
    replid: String,
    offset: AtomicU64,
    next_replica_id: AtomicU64,
    replicas: RwLock<Vec<ReplicaRecord>>,
    acks: broadcast::Sender<ReplicaAck>,
}

impl ReplicationManager {
    pub fn new(role: ReplicationRole) -> Self {
        let (acks, _) = broadcast::channel(ACK_CHANNEL_CAPACITY);
        ReplicationManager {
            role,
            replid: generate_replid(),
            offset: AtomicU64::new(0),
            next_replica_id: AtomicU64::new(1),
            replicas: RwLock::new(Vec::new()),
            acks,
        }
    }

    pub fn role(&self) -> ReplicationRole {
        self.role
    }

    pub fn replid(&self) -> &str {
        &self.replid
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    pub fn set_offset(&self, offset: u64) {
        self.offset.store(offset, Ordering::SeqCst);
    }

    /// Add `bytes` to the offset, returning the new value.
    pub fn advance_offset(&self, bytes: u64) -> u64 {
        self.offset.fetch_add(bytes, Ordering::SeqCst) + bytes
    }

    pub async fn replica_count(&self) -> usize {
        self.replicas.read().await.len()
    }

    /// Start a full resync with the connection behind `writer`: queue the
    /// FULLRESYNC line and a snapshot of `store`, then register the replica
    /// so every later write follows the snapshot on the same stream.
    pub async fn attach_replica(
        &self,
        writer: ConnectionWriter,
        addr: String,
        store: &Store,
    ) -> std::io::Result<u64> {
        let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
        let id = self.next_replica_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut replicas = self.replicas.write().await;
            let offset = self.offset();
            let snapshot = rdb::snapshot_bytes(store).await?;

            let mut payload = format!("+FULLRESYNC {} {offset}\r\n${}\r\n", self.replid, snapshot.len())
                .into_bytes();
            payload.extend_from_slice(&snapshot);
            // The receiver is still local, so this cannot fail.
            let _ = tx.send(Bytes::from(payload));

            replicas.push(ReplicaRecord {
                id,
                addr: addr.clone(),
                acked_offset: offset,
                tx,
            });
        }

        tokio::spawn(forward_to_replica(id, rx, writer));
        info!(replica_id = id, %addr, "replica attached, full resync sent");
        Ok(id)
    }

    pub async fn detach_replica(&self, id: u64) {
        let mut replicas = self.replicas.write().await;
        let before = replicas.len();
        replicas.retain(|r| r.id != id);
        if replicas.len() != before {
            info!(replica_id = id, "replica detached");
        }
    }

    /// Send a write, in its original wire form, to every replica.
    pub async fn propagate(&self, command: &RespValue) {
        if self.role != ReplicationRole::Master {
            return;
        }
        let data = Bytes::from(command.serialize());
        let mut replicas = self.replicas.write().await;
        self.feed(&mut replicas, data);
    }

    /// Append one frame to the replication stream. The offset grows by the
    /// frame size whether or not any replica is attached, since replicas
    /// count every frame they receive. Replicas whose stream is gone are
    /// dropped from the registry.
    fn feed(&self, replicas: &mut Vec<ReplicaRecord>, data: Bytes) {
        self.offset.fetch_add(data.len() as u64, Ordering::SeqCst);
        replicas.retain(|r| {
            let ok = r.tx.send(data.clone()).is_ok();
            if !ok {
                warn!(replica_id = r.id, "dropping replica with closed stream");
            }
            ok
        });
    }

    /// Record a `REPLCONF ACK` and wake any WAIT callers.
    pub async fn record_ack(&self, replica_id: u64, offset: u64) {
        {
            let mut replicas = self.replicas.write().await;
            if let Some(r) = replicas.iter_mut().find(|r| r.id == replica_id) {
                r.acked_offset = r.acked_offset.max(offset);
            }
        }
        debug!(replica_id, offset, "replica ack");
        // No receivers just means nobody is waiting.
        let _ = self.acks.send(ReplicaAck { replica_id, offset });
    }

    /// Wait until `wanted` replicas have acknowledged the current offset, or
    /// until `timeout` passes (`None` waits without a deadline). Returns the
    /// number of replicas known to be caught up.
    pub async fn wait_for_acks(&self, wanted: usize, timeout: Option<Duration>) -> usize {
        let target = self.offset();
        let mut acks = self.acks.subscribe();
        let mut caught_up = HashSet::new();

        {
            let mut replicas = self.replicas.write().await;
            caught_up.extend(
                replicas
                    .iter()
                    .filter(|r| r.acked_offset >= target)
                    .map(|r| r.id),
            );
            if caught_up.len() >= wanted || self.role != ReplicationRole::Master {
                return caught_up.len();
            }
            // GETACK travels on the replication stream like any write, so
            // every replica sees it and both sides count its bytes.
            if !replicas.is_empty() {
                let getack =
                    Bytes::from(RespValue::command(["REPLCONF", "GETACK", "*"]).serialize());
                self.feed(&mut replicas, getack);
            }
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        while caught_up.len() < wanted {
            let received = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, acks.recv()).await {
                    Ok(received) => received,
                    Err(_) => break,
                },
                None => acks.recv().await,
            };
            match received {
                Ok(ack) if ack.offset >= target => {
                    caught_up.insert(ack.replica_id);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "ack receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        caught_up.len()
    }
}

/// Drain a replica's channel into its connection until either side closes.
async fn forward_to_replica(id: u64, mut rx: mpsc::UnboundedReceiver<Bytes>, writer: ConnectionWriter) {
    while let Some(data) = rx.recv().await {
        if let Err(e) = writer.write_bytes(&data).await {
            warn!(replica_id = id, "replication stream write failed: {e}");
            break;
        }
    }
    debug!(replica_id = id, "replication forwarder stopped");
}

/// Generate a 40-character hex replication ID.
fn generate_replid() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..20).map(|_| rng.r#gen()).collect();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
