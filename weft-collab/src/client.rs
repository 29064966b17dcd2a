//! WebSocket client for the collaboration server.
//!
//! Connects, joins documents, and drives one [`SyncSession`] per joined
//! document. Incoming frames are folded into the sessions on the reader
//! task; what the application sees is a stream of [`ClientEvent`]s on an
//! event channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;

use weft_delta::Delta;

use crate::history::HistoryConfig;
use crate::protocol::{
    document_topic, parse_document_topic, ClientFrame, Envelope, ProtocolError, ReplyStatus,
    ServerFrame,
};
use crate::session::{OutgoingUpdate, SessionError, SyncSession};

/// Errors surfaced by client operations.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("not connected")]
    NotConnected,
    #[error("not joined to document {0:?}")]
    NotJoined(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Events emitted to the application.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connection established.
    Connected,
    /// Connection lost; all sessions are dead.
    Disconnected,
    /// A joined document's snapshot arrived.
    Opened {
        doc_id: String,
        version: u64,
        contents: Delta,
    },
    /// The document changed, locally (undo/redo) or remotely. `change` is
    /// the delta that was applied to the previous displayed document.
    Changed {
        doc_id: String,
        change: Delta,
        document: Delta,
    },
    /// The server acked this client's in-flight update.
    Acked { doc_id: String },
    /// The server rejected an update; the session must be rejoined.
    Rejected { doc_id: String, reason: String },
    /// The document's invariants broke client-side. Unrecoverable without
    /// a rejoin.
    Fatal {
        doc_id: String,
        error: SessionError,
    },
}

type Sessions = Arc<Mutex<HashMap<String, SyncSession>>>;

/// The collaboration client.
pub struct CollabClient {
    server_url: String,
    sessions: Sessions,
    outgoing_tx: Option<mpsc::Sender<String>>,
    event_tx: mpsc::Sender<ClientEvent>,
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
    next_ref: Arc<AtomicU64>,
    history_config: HistoryConfig,
}

impl CollabClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        CollabClient {
            server_url: server_url.into(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            outgoing_tx: None,
            event_tx,
            event_rx: Some(event_rx),
            next_ref: Arc::new(AtomicU64::new(1)),
            history_config: HistoryConfig::default(),
        }
    }

    pub fn with_history_config(mut self, config: HistoryConfig) -> Self {
        self.history_config = config;
        self
    }

    /// Take the event receiver (can only be taken once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Connect and spawn the writer and reader tasks.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.server_url)
            .await
            .map_err(|e| {
                log::error!("failed to connect to {}: {e}", self.server_url);
                ClientError::Protocol(ProtocolError::ConnectionClosed)
            })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx.clone());

        // Writer task: forward the outgoing queue onto the socket.
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        });

        // Reader task: fold server frames into the sessions.
        let sessions = self.sessions.clone();
        let event_tx = self.event_tx.clone();
        let next_ref = self.next_ref.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        match Envelope::decode(text.as_str()) {
                            Ok(envelope) => {
                                handle_server_envelope(
                                    &envelope, &sessions, &out_tx, &event_tx, &next_ref,
                                )
                                .await;
                            }
                            Err(e) => log::warn!("undecodable server frame: {e}"),
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            let _ = event_tx.send(ClientEvent::Disconnected).await;
        });

        let _ = self.event_tx.send(ClientEvent::Connected).await;
        Ok(())
    }

    /// Join a document. The snapshot arrives as [`ClientEvent::Opened`].
    pub async fn join(&self, doc_id: &str, user_id: Option<&str>) -> Result<(), ClientError> {
        self.sessions
            .lock()
            .await
            .insert(doc_id.to_owned(), SyncSession::new(self.history_config.clone()));
        let envelope = ClientFrame::Join {
            user_id: user_id.map(str::to_owned),
        }
        .into_envelope(document_topic(doc_id), Some(self.take_ref()))?;
        self.send(envelope).await
    }

    /// Replace the document with what the editor now shows. Diffs, paces,
    /// and sends.
    pub async fn edit(&self, doc_id: &str, new_document: &Delta) -> Result<(), ClientError> {
        let outgoing = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .get_mut(doc_id)
                .ok_or_else(|| ClientError::NotJoined(doc_id.to_owned()))?;
            session.local_change(new_document, Instant::now())?
        };
        self.send_update(doc_id, outgoing).await
    }

    /// Undo the most recent local change. Returns whether anything changed.
    pub async fn undo(&self, doc_id: &str) -> Result<bool, ClientError> {
        self.unwind(doc_id, SyncSession::undo).await
    }

    /// Redo the most recently undone change.
    pub async fn redo(&self, doc_id: &str) -> Result<bool, ClientError> {
        self.unwind(doc_id, SyncSession::redo).await
    }

    async fn unwind(
        &self,
        doc_id: &str,
        step: fn(&mut SyncSession) -> Option<(Delta, Option<OutgoingUpdate>)>,
    ) -> Result<bool, ClientError> {
        let (change, document, outgoing) = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .get_mut(doc_id)
                .ok_or_else(|| ClientError::NotJoined(doc_id.to_owned()))?;
            match step(session) {
                Some((change, outgoing)) => (change, session.current().clone(), outgoing),
                None => return Ok(false),
            }
        };
        let _ = self
            .event_tx
            .send(ClientEvent::Changed {
                doc_id: doc_id.to_owned(),
                change,
                document,
            })
            .await;
        self.send_update(doc_id, outgoing).await?;
        Ok(true)
    }

    /// Leave a document and drop its session.
    pub async fn leave(&self, doc_id: &str) -> Result<(), ClientError> {
        self.sessions.lock().await.remove(doc_id);
        let envelope = ClientFrame::Leave.into_envelope(document_topic(doc_id), None)?;
        self.send(envelope).await
    }

    /// Current contents of a joined document.
    pub async fn document(&self, doc_id: &str) -> Option<Delta> {
        self.sessions
            .lock()
            .await
            .get(doc_id)
            .map(|session| session.current().clone())
    }

    /// Last integrated (or optimistically advanced) version of a joined
    /// document.
    pub async fn version(&self, doc_id: &str) -> Option<u64> {
        self.sessions.lock().await.get(doc_id).map(SyncSession::version)
    }

    fn take_ref(&self) -> u64 {
        self.next_ref.fetch_add(1, Ordering::Relaxed)
    }

    async fn send(&self, envelope: Envelope) -> Result<(), ClientError> {
        let text = envelope.encode()?;
        let tx = self.outgoing_tx.as_ref().ok_or(ClientError::NotConnected)?;
        tx.send(text)
            .await
            .map_err(|_| ClientError::Protocol(ProtocolError::ConnectionClosed))
    }

    async fn send_update(
        &self,
        doc_id: &str,
        outgoing: Option<OutgoingUpdate>,
    ) -> Result<(), ClientError> {
        let Some(outgoing) = outgoing else {
            return Ok(());
        };
        let envelope = ClientFrame::Update {
            version: outgoing.version,
            change: outgoing.change,
        }
        .into_envelope(document_topic(doc_id), Some(self.take_ref()))?;
        self.send(envelope).await
    }
}

/// Fold one server frame into the matching session and emit events.
async fn handle_server_envelope(
    envelope: &Envelope,
    sessions: &Sessions,
    out_tx: &mpsc::Sender<String>,
    event_tx: &mpsc::Sender<ClientEvent>,
    next_ref: &AtomicU64,
) {
    let doc_id = match parse_document_topic(&envelope.topic) {
        Ok(id) => id.to_owned(),
        Err(e) => {
            log::warn!("server frame on unexpected topic: {e}");
            return;
        }
    };
    let frame = match ServerFrame::from_envelope(envelope) {
        Ok(frame) => frame,
        Err(e) => {
            log::warn!("malformed server frame on {}: {e}", envelope.topic);
            return;
        }
    };

    match frame {
        ServerFrame::Open { version, contents } => {
            let mut sessions = sessions.lock().await;
            let Some(session) = sessions.get_mut(&doc_id) else {
                log::warn!("open frame for unjoined document {doc_id}");
                return;
            };
            session.open(version, contents.clone());
            drop(sessions);
            let _ = event_tx
                .send(ClientEvent::Opened {
                    doc_id,
                    version,
                    contents,
                })
                .await;
        }

        ServerFrame::Update { version, change } => {
            let mut sessions = sessions.lock().await;
            let Some(session) = sessions.get_mut(&doc_id) else {
                return;
            };
            match session.remote_update(&change) {
                Ok(applied) => {
                    let document = session.current().clone();
                    drop(sessions);
                    log::trace!("document {doc_id} advanced to version {version}");
                    let _ = event_tx
                        .send(ClientEvent::Changed {
                            doc_id,
                            change: applied,
                            document,
                        })
                        .await;
                }
                Err(error) => {
                    sessions.remove(&doc_id);
                    drop(sessions);
                    let _ = event_tx
                        .send(ClientEvent::Fatal { doc_id, error })
                        .await;
                }
            }
        }

        ServerFrame::Reply { status } => match status {
            ReplyStatus::Ok => {
                let next = {
                    let mut sessions = sessions.lock().await;
                    let Some(session) = sessions.get_mut(&doc_id) else {
                        return;
                    };
                    session.ack()
                };
                let _ = event_tx
                    .send(ClientEvent::Acked {
                        doc_id: doc_id.clone(),
                    })
                    .await;
                // A queued change was promoted; send it out.
                if let Some(outgoing) = next {
                    let reference = next_ref.fetch_add(1, Ordering::Relaxed);
                    let envelope = ClientFrame::Update {
                        version: outgoing.version,
                        change: outgoing.change,
                    }
                    .into_envelope(document_topic(&doc_id), Some(reference));
                    match envelope.and_then(|env| env.encode()) {
                        Ok(text) => {
                            let _ = out_tx.send(text).await;
                        }
                        Err(e) => log::error!("failed to encode queued update: {e}"),
                    }
                }
            }
            ReplyStatus::Error { reason } => {
                let error = {
                    let mut sessions = sessions.lock().await;
                    match sessions.get_mut(&doc_id) {
                        Some(session) => {
                            let error = session.reject(&reason);
                            sessions.remove(&doc_id);
                            Some(error)
                        }
                        None => None,
                    }
                };
                log::warn!("server rejected update on {doc_id}: {reason}");
                if let Some(error) = error {
                    if error == SessionError::Corrupted {
                        let _ = event_tx.send(ClientEvent::Fatal { doc_id, error }).await;
                    } else {
                        let _ = event_tx
                            .send(ClientEvent::Rejected { doc_id, reason })
                            .await;
                    }
                }
            }
        },
    }
}
