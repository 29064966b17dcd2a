//! The per-document reconciliation actor.
//!
//! One actor per document id owns `{version, history, contents}` and
//! serializes every request through its inbox, so updates are linearizable
//! per document. Commits are published on a broadcast channel from inside
//! the serialized loop, which makes fan-out order identical to commit order
//! by construction.
//!
//! ```text
//! DocumentHandle ── mpsc ──► DocumentActor ── broadcast ──► subscribers
//!      (get/update)            {version,                  (one receiver per
//!                               history,                   joined connection)
//!                               contents}
//! ```

use std::collections::VecDeque;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

use weft_delta::{AttrValue, Attributes, Delta, NODE_ID_ATTR};

/// Capacity of the actor's command inbox.
const INBOX_CAPACITY: usize = 64;

/// The hard-coded document every actor starts from. There is no
/// persistence; a restarted actor returns here.
pub fn seed_document() -> Delta {
    let attrs = Attributes::from([(NODE_ID_ATTR.to_string(), AttrValue::from("hello"))]);
    Delta::new().insert_attrs("Hello world!\n", attrs)
}

/// Errors an update can return. Both are per-request: the actor stays up
/// and its state is untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpdateError {
    /// The client claims a version the server never assigned.
    #[error("server behind: client at version {client}, server at {server}")]
    ServerBehind { client: u64, server: u64 },
    /// Composing the transformed change would leave non-insert ops in the
    /// document.
    #[error("document corrupted: transformed change does not yield a document")]
    DocumentCorrupted,
    /// The actor's task is gone; callers must re-join.
    #[error("document actor is gone")]
    ActorGone,
}

impl UpdateError {
    /// Wire-level reason string.
    pub fn reason(&self) -> String {
        match self {
            UpdateError::ServerBehind { .. } => "server_behind".to_owned(),
            UpdateError::DocumentCorrupted => "document_corrupted".to_owned(),
            UpdateError::ActorGone => format!("{self:?}"),
        }
    }
}

/// A committed update as fanned out to subscribers.
#[derive(Debug, Clone)]
pub struct CommittedUpdate {
    /// Version assigned by the commit.
    pub version: u64,
    /// The transformed change peers must apply. Echoing the original client
    /// change instead would diverge state.
    pub change: Delta,
    /// Connection that submitted the update; used to suppress the echo.
    pub origin: Uuid,
}

enum DocumentCommand {
    GetContents {
        reply: oneshot::Sender<(u64, Delta)>,
    },
    Update {
        version: u64,
        change: Delta,
        origin: Uuid,
        reply: oneshot::Sender<Result<(u64, Delta), UpdateError>>,
    },
}

/// Cloneable handle to a document actor.
#[derive(Clone)]
pub struct DocumentHandle {
    id: String,
    commands: mpsc::Sender<DocumentCommand>,
    commits: broadcast::Sender<CommittedUpdate>,
}

impl DocumentHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Snapshot of `(version, contents)`.
    pub async fn get_contents(&self) -> Result<(u64, Delta), UpdateError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(DocumentCommand::GetContents { reply })
            .await
            .map_err(|_| UpdateError::ActorGone)?;
        response.await.map_err(|_| UpdateError::ActorGone)
    }

    /// Submit a change made against `version`. On success returns the new
    /// version and the transformed change that was actually committed.
    pub async fn update(
        &self,
        version: u64,
        change: Delta,
        origin: Uuid,
    ) -> Result<(u64, Delta), UpdateError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(DocumentCommand::Update {
                version,
                change,
                origin,
                reply,
            })
            .await
            .map_err(|_| UpdateError::ActorGone)?;
        response.await.map_err(|_| UpdateError::ActorGone)?
    }

    /// Subscribe to committed updates, delivered in commit order.
    pub fn subscribe(&self) -> broadcast::Receiver<CommittedUpdate> {
        self.commits.subscribe()
    }

    /// Number of live commit subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.commits.receiver_count()
    }

    /// Whether the actor task is still running.
    pub fn is_alive(&self) -> bool {
        !self.commands.is_closed()
    }
}

/// Single-writer state machine owning one document.
pub struct DocumentActor {
    id: String,
    version: u64,
    /// Transformed changes, most recent first. `history.len() == version`.
    history: VecDeque<Delta>,
    contents: Delta,
    inbox: mpsc::Receiver<DocumentCommand>,
    commits: broadcast::Sender<CommittedUpdate>,
}

impl DocumentActor {
    /// Spawn an actor at the seed state and return a handle to it. The
    /// actor stops once every handle is dropped.
    pub fn spawn(id: String, commit_capacity: usize) -> DocumentHandle {
        let (commands, inbox) = mpsc::channel(INBOX_CAPACITY);
        let (commits, _) = broadcast::channel(commit_capacity);
        let actor = DocumentActor {
            id: id.clone(),
            version: 0,
            history: VecDeque::new(),
            contents: seed_document(),
            inbox,
            commits: commits.clone(),
        };
        tokio::spawn(actor.run());
        DocumentHandle {
            id,
            commands,
            commits,
        }
    }

    async fn run(mut self) {
        log::debug!("document actor {} started", self.id);
        while let Some(command) = self.inbox.recv().await {
            match command {
                DocumentCommand::GetContents { reply } => {
                    let _ = reply.send((self.version, self.contents.clone()));
                }
                DocumentCommand::Update {
                    version,
                    change,
                    origin,
                    reply,
                } => {
                    let _ = reply.send(self.apply_update(version, change, origin));
                }
            }
        }
        log::debug!("document actor {} stopped", self.id);
    }

    fn apply_update(
        &mut self,
        client_version: u64,
        change: Delta,
        origin: Uuid,
    ) -> Result<(u64, Delta), UpdateError> {
        if client_version > self.version {
            return Err(UpdateError::ServerBehind {
                client: client_version,
                server: self.version,
            });
        }

        // Replay the operations the client has not seen, oldest first,
        // transforming the incoming change over each with the server
        // winning ties.
        let lag = (self.version - client_version) as usize;
        let mut transformed = change;
        for missed in self.history.range(..lag).rev() {
            transformed = missed.transform(&transformed, true);
        }

        let new_contents = self.contents.compose(&transformed);
        if !new_contents.is_document() {
            return Err(UpdateError::DocumentCorrupted);
        }

        self.history.push_front(transformed.clone());
        self.version += 1;
        self.contents = new_contents;
        log::trace!(
            "document {} committed version {} ({} ops)",
            self.id,
            self.version,
            transformed.ops().len()
        );

        // Publishing from inside the serialized loop keeps fan-out in
        // commit order. Send errors just mean nobody is subscribed.
        let _ = self.commits.send(CommittedUpdate {
            version: self.version,
            change: transformed.clone(),
            origin,
        });

        Ok((self.version, transformed))
    }
}
