use crate::command::{self, Dispatcher};
use crate::config::{Config, SharedConfig};
use crate::connection::{ClientState, ConnectionWriter};
use crate::error::{ReplisError, ReplisResult};
use crate::persistence::rdb;
use crate::replication::{ReplicationManager, ReplicationRole, replica};
use crate::resp::{RespReader, RespValue};
use crate::store::{SharedStore, Store};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Everything a connection needs: the keyspace, the configuration, the
/// replication state and the command table.
pub struct Server {
    pub store: SharedStore,
    pub config: SharedConfig,
    pub replication: ReplicationManager,
    dispatcher: Dispatcher,
    /// Held across a write and its propagation so replicas see writes in
    /// the order the store applied them.
    write_order: Mutex<()>,
}

pub type SharedServer = Arc<Server>;

impl Server {
    pub fn new(config: Config, store: Store) -> Self {
        let role = if config.is_replica() {
            ReplicationRole::Replica
        } else {
            ReplicationRole::Master
        };
        Server {
            store: Arc::new(store),
            config: Arc::new(config),
            replication: ReplicationManager::new(role),
            dispatcher: Dispatcher::new(),
            write_order: Mutex::new(()),
        }
    }

    /// Block writes until the guard drops. A replica attached under this
    /// guard sees every write either in its snapshot or on its stream,
    /// never both.
    pub async fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_order.lock().await
    }

    /// Execute one request for `client` and return its replies. Successful
    /// writes are forwarded to replicas in their original wire form.
    pub async fn execute(&self, client: &mut ClientState, request: RespValue) -> Vec<RespValue> {
        let _order = if !client.in_multi && is_write_request(&request) {
            Some(self.lock_writes().await)
        } else {
            None
        };
        let (name, replies) = self.dispatcher.dispatch(self, client, &request).await;
        if command::is_write_command(&name) && !replies.iter().any(RespValue::is_error) {
            self.replication.propagate(&request).await;
        }
        replies
    }
}

fn is_write_request(request: &RespValue) -> bool {
    let RespValue::Array(items) = request else {
        return false;
    };
    items
        .first()
        .and_then(RespValue::as_bytes)
        .is_some_and(|name| command::is_write_command(&String::from_utf8_lossy(name).to_lowercase()))
}

/// Load the snapshot, bind the listener, sync with the master when
/// configured as a replica, then accept clients until `shutdown` fires.
pub async fn run_server(config: Config, shutdown: CancellationToken) -> ReplisResult<()> {
    let store = Store::new();
    rdb::load_file(&config.snapshot_path(), &store).await?;

    let server: SharedServer = Arc::new(Server::new(config, store));
    let addr = format!("{}:{}", server.config.bind, server.config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(role = %server.replication.role(), "Replis server listening on {addr}");

    if server.config.is_replica() {
        let link = replica::handshake(&server.config, &server.store, &server.replication).await?;
        tokio::spawn(replica::run_link(server.clone(), link, shutdown.clone()));
    }

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                };
                debug!("New connection from {peer_addr}");

                let server = server.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, server, shutdown).await {
                        debug!("Connection error from {peer_addr}: {e}");
                    }
                    debug!("Connection closed: {peer_addr}");
                });
            }
            _ = shutdown.cancelled() => {
                info!("Shutting down...");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    server: SharedServer,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let (read_half, write_half) = stream.into_split();
    let writer = ConnectionWriter::new(write_half);
    let mut reader = RespReader::new(read_half);
    let mut client = ClientState::new(writer.clone());

    let result = loop {
        let request = tokio::select! {
            read = reader.read_value() => read,
            _ = shutdown.cancelled() => break Ok(()),
        };
        match request {
            Ok(Some(request)) => {
                let replies = tokio::select! {
                    replies = server.execute(&mut client, request) => replies,
                    _ = shutdown.cancelled() => break Ok(()),
                };
                if !replies.is_empty()
                    && let Err(e) = writer.write_values(&replies).await
                {
                    break Err(e);
                }
            }
            Ok(None) => break Ok(()),
            Err(e) => {
                let err = ReplisError::Protocol(e.to_string()).to_resp();
                let _ = writer.write_values(&[err]).await;
                break Ok(());
            }
        }
    };

    if let Some(id) = client.replica_id {
        server.replication.detach_replica(id).await;
    }
    result
}
