//! WebSocket server routing document channels.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── connection task ── join/update/leave frames
//! Client B ──┘        │
//!                     ▼
//!            DocumentRegistry ── DocumentActor (one per document id)
//!                                      │ commits (in commit order)
//!                     ┌────────────────┼────────────────┐
//!                     ▼                ▼                ▼
//!                forwarder A      forwarder B      forwarder C
//!                     └── per-connection outbound queue ──► WebSocket
//! ```
//!
//! Each joined document gets a forwarder task copying the actor's commit
//! stream into the connection's outbound queue. The ok-reply for a
//! connection's own update travels the same stream, so a client can never
//! see a peer's later commit before the ack of its own earlier one.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::DocumentRegistry;
use crate::document::{CommittedUpdate, DocumentHandle};
use crate::protocol::{
    parse_document_topic, ClientFrame, Envelope, ProtocolError, ReplyStatus, ServerFrame,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: String,
    /// Per-document commit buffer; a subscriber lagging further than this
    /// misses broadcasts and must rejoin.
    pub commit_capacity: usize,
    /// Per-connection outbound frame queue.
    pub outbound_capacity: usize,
    /// Maximum concurrently joined documents per connection.
    pub max_subscriptions_per_connection: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: "127.0.0.1:9090".to_string(),
            commit_capacity: 256,
            outbound_capacity: 256,
            max_subscriptions_per_connection: 64,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_frames: u64,
    pub rejected_updates: u64,
    pub active_documents: usize,
}

/// One joined document on a connection.
struct Subscription {
    handle: DocumentHandle,
    forwarder: JoinHandle<()>,
    /// Refs of updates submitted but not yet acked, consumed by the
    /// forwarder when it sees this connection's own commits.
    pending_refs: Arc<Mutex<VecDeque<Option<u64>>>>,
}

/// The collaborative editing server.
pub struct CollabServer {
    config: ServerConfig,
    registry: Arc<DocumentRegistry>,
    stats: Arc<RwLock<ServerStats>>,
}

impl CollabServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(DocumentRegistry::new(config.commit_capacity));
        CollabServer {
            config,
            registry,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn registry(&self) -> &Arc<DocumentRegistry> {
        &self.registry
    }

    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Accept loop. Call from an async runtime; runs until the listener
    /// fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("collab server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("new tcp connection from {addr}");

            let registry = self.registry.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, registry, stats, config).await
                {
                    log::error!("connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Drive a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<DocumentRegistry>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let conn_id = Uuid::new_v4();

        log::info!("connection {conn_id} established from {addr}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let (out_tx, mut out_rx) = mpsc::channel::<String>(config.outbound_capacity);
        let mut subscriptions: HashMap<String, Subscription> = HashMap::new();

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            {
                                let mut s = stats.write().await;
                                s.total_frames += 1;
                            }
                            match Envelope::decode(text.as_str()) {
                                Ok(envelope) => {
                                    if let Err(e) = Self::handle_client_envelope(
                                        &envelope,
                                        conn_id,
                                        &registry,
                                        &stats,
                                        &config,
                                        &out_tx,
                                        &mut subscriptions,
                                    )
                                    .await
                                    {
                                        log::warn!("error handling frame from {conn_id}: {e}");
                                    }
                                }
                                Err(e) => {
                                    log::warn!("undecodable frame from {addr}: {e}");
                                }
                            }
                        }

                        Some(Ok(Message::Binary(_))) => {
                            log::warn!("binary frame from {addr} ignored; protocol is JSON text");
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("connection closed from {addr}");
                            break;
                        }

                        Some(Err(e)) => {
                            log::error!("websocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                out = out_rx.recv() => {
                    match out {
                        Some(text) => ws_sender.send(Message::Text(text.into())).await?,
                        None => break,
                    }
                }
            }
        }

        // Cleanup: a dropped connection silently leaves its documents.
        for (_, subscription) in subscriptions.drain() {
            subscription.forwarder.abort();
        }
        let active_documents = registry.document_count().await;
        {
            let mut s = stats.write().await;
            s.active_connections -= 1;
            s.active_documents = active_documents;
        }
        log::info!("connection {conn_id} cleaned up");

        Ok(())
    }

    async fn handle_client_envelope(
        envelope: &Envelope,
        conn_id: Uuid,
        registry: &DocumentRegistry,
        stats: &RwLock<ServerStats>,
        config: &ServerConfig,
        out_tx: &mpsc::Sender<String>,
        subscriptions: &mut HashMap<String, Subscription>,
    ) -> Result<(), ProtocolError> {
        let doc_id = parse_document_topic(&envelope.topic)?.to_owned();
        match ClientFrame::from_envelope(envelope)? {
            ClientFrame::Join { user_id } => {
                if !subscriptions.contains_key(&doc_id)
                    && subscriptions.len() >= config.max_subscriptions_per_connection
                {
                    send_error_reply(out_tx, envelope, "too_many_subscriptions")?;
                    return Ok(());
                }

                let handle = registry.get_or_create(&doc_id).await;
                // Subscribe before snapshotting so no commit can slip
                // between the snapshot and the forwarder.
                let commits = handle.subscribe();
                let (version, contents) = match handle.get_contents().await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        send_error_reply(out_tx, envelope, &e.reason())?;
                        return Ok(());
                    }
                };

                let open = ServerFrame::Open { version, contents }
                    .into_envelope(envelope.topic.clone(), envelope.reference)?
                    .encode()?;
                queue_frame(out_tx, open)?;

                let pending_refs = Arc::new(Mutex::new(VecDeque::new()));
                let forwarder = spawn_forwarder(
                    commits,
                    version,
                    conn_id,
                    envelope.topic.clone(),
                    out_tx.clone(),
                    pending_refs.clone(),
                );
                if let Some(previous) = subscriptions.insert(
                    doc_id.clone(),
                    Subscription {
                        handle,
                        forwarder,
                        pending_refs,
                    },
                ) {
                    previous.forwarder.abort();
                }

                let active_documents = registry.document_count().await;
                {
                    let mut s = stats.write().await;
                    s.active_documents = active_documents;
                }
                log::info!(
                    "connection {conn_id} ({}) joined {doc_id} at version {version}",
                    user_id.as_deref().unwrap_or("anonymous")
                );
            }

            ClientFrame::Update { version, change } => {
                let Some(subscription) = subscriptions.get(&doc_id) else {
                    send_error_reply(out_tx, envelope, "not_joined")?;
                    return Ok(());
                };

                // The ok-reply is emitted by the forwarder when it sees
                // this connection's commit, keeping replies ordered with
                // peer broadcasts. Queue the ref before submitting.
                subscription
                    .pending_refs
                    .lock()
                    .unwrap()
                    .push_back(envelope.reference);

                match subscription.handle.update(version, change, conn_id).await {
                    Ok((new_version, _)) => {
                        log::debug!(
                            "connection {conn_id} committed version {new_version} on {doc_id}"
                        );
                    }
                    Err(e) => {
                        // Nothing was committed; retract the queued ref.
                        subscription.pending_refs.lock().unwrap().pop_back();
                        {
                            let mut s = stats.write().await;
                            s.rejected_updates += 1;
                        }
                        log::debug!("update from {conn_id} on {doc_id} rejected: {e}");
                        send_error_reply(out_tx, envelope, &e.reason())?;
                    }
                }
            }

            ClientFrame::Leave => {
                if let Some(subscription) = subscriptions.remove(&doc_id) {
                    subscription.forwarder.abort();
                    log::info!("connection {conn_id} left {doc_id}");
                }
            }
        }
        Ok(())
    }
}

fn send_error_reply(
    out_tx: &mpsc::Sender<String>,
    request: &Envelope,
    reason: &str,
) -> Result<(), ProtocolError> {
    let reply = ServerFrame::Reply {
        status: ReplyStatus::Error {
            reason: reason.to_owned(),
        },
    }
    .into_envelope(request.topic.clone(), request.reference)?
    .encode()?;
    queue_frame(out_tx, reply)
}

/// Enqueue a frame without blocking. The connection task both fills and
/// drains the outbound queue, so a blocking send here could deadlock
/// against itself; a connection that is 256 frames behind is dropped
/// frames instead.
fn queue_frame(out_tx: &mpsc::Sender<String>, text: String) -> Result<(), ProtocolError> {
    match out_tx.try_send(text) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(_)) => {
            log::warn!("outbound queue full; dropping frame");
            Ok(())
        }
        Err(mpsc::error::TrySendError::Closed(_)) => Err(ProtocolError::ConnectionClosed),
    }
}

/// Copy a document's commit stream into one connection's outbound queue.
///
/// Commits at or below `opened_version` are already contained in the open
/// snapshot and are skipped. The connection's own commits become ok-replies
/// rather than update frames.
fn spawn_forwarder(
    mut commits: broadcast::Receiver<CommittedUpdate>,
    opened_version: u64,
    conn_id: Uuid,
    topic: String,
    out_tx: mpsc::Sender<String>,
    pending_refs: Arc<Mutex<VecDeque<Option<u64>>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match commits.recv().await {
                Ok(commit) => {
                    if commit.version <= opened_version {
                        continue;
                    }
                    let envelope = if commit.origin == conn_id {
                        let reference = pending_refs.lock().unwrap().pop_front().flatten();
                        ServerFrame::Reply {
                            status: ReplyStatus::Ok,
                        }
                        .into_envelope(topic.clone(), reference)
                    } else {
                        ServerFrame::Update {
                            version: commit.version,
                            change: commit.change,
                        }
                        .into_envelope(topic.clone(), None)
                    };
                    let encoded = match envelope.and_then(|env| env.encode()) {
                        Ok(text) => text,
                        Err(e) => {
                            log::error!("failed to encode outbound frame on {topic}: {e}");
                            continue;
                        }
                    };
                    if out_tx.send(encoded).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!(
                        "connection {conn_id} lagged {n} commits on {topic}; it must rejoin"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.commit_capacity, 256);
        assert_eq!(config.outbound_capacity, 256);
        assert_eq!(config.max_subscriptions_per_connection, 64);
    }

    #[test]
    fn test_server_creation() {
        let server = CollabServer::with_defaults();
        assert_eq!(server.bind_addr(), "127.0.0.1:9090");
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let server = CollabServer::with_defaults();
        let stats = server.stats().await;
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.total_frames, 0);
        assert_eq!(stats.rejected_updates, 0);
        assert_eq!(stats.active_documents, 0);
    }

    #[test]
    fn test_server_custom_config() {
        let config = ServerConfig {
            bind_addr: "0.0.0.0:8080".to_string(),
            commit_capacity: 512,
            outbound_capacity: 64,
            max_subscriptions_per_connection: 4,
        };
        let server = CollabServer::new(config);
        assert_eq!(server.bind_addr(), "0.0.0.0:8080");
    }
}
