use crate::resp::RespValue;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// The write half of a connection, shared between the reply path and the
/// replication forwarder. Each call writes its whole payload before another
/// writer gets the lock.
#[derive(Clone)]
pub struct ConnectionWriter {
    inner: Arc<Mutex<BoxedWrite>>,
}

impl ConnectionWriter {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        ConnectionWriter {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub async fn write_bytes(&self, bytes: &[u8]) -> io::Result<()> {
        let mut w = self.inner.lock().await;
        w.write_all(bytes).await?;
        w.flush().await
    }

    pub async fn write_values(&self, values: &[RespValue]) -> io::Result<()> {
        let mut buf = Vec::with_capacity(values.iter().map(RespValue::encoded_len).sum());
        for value in values {
            value.write_to(&mut buf);
        }
        self.write_bytes(&buf).await
    }
}

impl fmt::Debug for ConnectionWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionWriter").finish_non_exhaustive()
    }
}

/// Per-client connection state.
#[derive(Debug)]
pub struct ClientState {
    pub id: u64,
    /// Where out-of-band data for this client goes. Sessions without a
    /// socket, such as EXEC replays in tests, have none.
    pub writer: Option<ConnectionWriter>,

    // Transaction state
    pub in_multi: bool,
    /// Commands queued by MULTI, kept in their wire form.
    pub multi_queue: Vec<RespValue>,

    // Replication state
    pub listening_port: Option<u16>,
    /// Set once this connection completed PSYNC and became a replica.
    pub replica_id: Option<u64>,
}

impl ClientState {
    pub fn new(writer: ConnectionWriter) -> Self {
        ClientState {
            writer: Some(writer),
            ..ClientState::detached()
        }
    }

    pub fn detached() -> Self {
        ClientState {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            writer: None,
            in_multi: false,
            multi_queue: Vec::new(),
            listening_port: None,
            replica_id: None,
        }
    }

    pub fn is_replica(&self) -> bool {
        self.replica_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_writer_serializes_values() {
        let (client, mut server) = tokio::io::duplex(64);
        let writer = ConnectionWriter::new(client);
        writer
            .write_values(&[RespValue::ok(), RespValue::integer(3)])
            .await
            .unwrap();
        drop(writer);
        let mut out = Vec::new();
        server.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"+OK\r\n:3\r\n");
    }

    #[test]
    fn test_client_ids_are_unique() {
        let a = ClientState::detached();
        let b = ClientState::detached();
        assert_ne!(a.id, b.id);
        assert!(!a.is_replica());
        assert!(a.writer.is_none());
    }
}
