//! Client-side sync engine for one open document.
//!
//! A pure state machine: the transport feeds it server frames, the editor
//! feeds it documents, and it hands back the frames to send. It upholds two
//! invariants across any interleaving of local edits, acks, and remote
//! updates:
//!
//! - at most one update is ever in flight to the server;
//! - once the transport quiesces, the local document equals the server's.

use std::time::Instant;

use thiserror::Error;

use weft_delta::{Delta, DeltaError};

use crate::history::{HistoryConfig, LocalHistory};

/// Fatal conditions for a document session. After any of these the caller
/// must rejoin the document.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("local state is not a document delta")]
    NotADocument,
    #[error("document corrupted: applying the remote change broke document invariants")]
    Corrupted,
    #[error("session desynchronized from server; rejoin required")]
    Desynchronized,
}

/// An update frame the engine wants sent to the server.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingUpdate {
    /// Version the change was made against.
    pub version: u64,
    pub change: Delta,
}

/// Sync state for one open document.
pub struct SyncSession {
    /// Last server version integrated, bumped optimistically on send.
    version: u64,
    /// Document the editor is displaying.
    current: Delta,
    /// Change awaiting a server ack, if any.
    in_flight: Option<Delta>,
    /// Local changes accumulated while `in_flight` is pending.
    queued: Option<Delta>,
    history: LocalHistory,
    history_config: HistoryConfig,
}

impl SyncSession {
    pub fn new(history_config: HistoryConfig) -> Self {
        SyncSession {
            version: 0,
            current: Delta::new(),
            in_flight: None,
            queued: None,
            history: LocalHistory::new(history_config.clone()),
            history_config,
        }
    }

    /// Reset to the snapshot received in an `open` frame.
    pub fn open(&mut self, version: u64, contents: Delta) {
        self.version = version;
        self.current = contents;
        self.in_flight = None;
        self.queued = None;
        self.history = LocalHistory::new(self.history_config.clone());
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn current(&self) -> &Delta {
        &self.current
    }

    pub fn in_flight(&self) -> Option<&Delta> {
        self.in_flight.as_ref()
    }

    pub fn queued(&self) -> Option<&Delta> {
        self.queued.as_ref()
    }

    /// The editor produced a new document. Diffs it against the current
    /// one, records undo history, and returns the update to send — unless
    /// one is already in flight, in which case the change queues.
    pub fn local_change(
        &mut self,
        new_document: &Delta,
        now: Instant,
    ) -> Result<Option<OutgoingUpdate>, SessionError> {
        let change = self.current.diff(new_document).map_err(|e| match e {
            DeltaError::NotADocument => SessionError::NotADocument,
            other => {
                // diff has no other failure mode on documents
                unreachable!("unexpected diff error: {other}")
            }
        })?;
        if change.is_empty() {
            return Ok(None);
        }
        self.history.record(&change, &self.current, now);
        self.current = new_document.clone();
        Ok(self.push_local(change))
    }

    /// The server acked the in-flight update. Promotes the queued change,
    /// if any, to the next in-flight update.
    pub fn ack(&mut self) -> Option<OutgoingUpdate> {
        self.in_flight = None;
        let queued = self.queued.take()?;
        self.push_local(queued)
    }

    /// The server rejected the in-flight update. Classifies the reason;
    /// either way the session is done and the caller must rejoin.
    pub fn reject(&mut self, reason: &str) -> SessionError {
        self.in_flight = None;
        self.queued = None;
        if reason == "document_corrupted" {
            SessionError::Corrupted
        } else {
            SessionError::Desynchronized
        }
    }

    /// A peer's change arrived. Transforms it over the in-flight and queued
    /// local changes, folds it into the document and history, and returns
    /// the change as it applies to the displayed document.
    pub fn remote_update(&mut self, remote: &Delta) -> Result<Delta, SessionError> {
        let mut remote = remote.clone();

        // The server committed the remote before our in-flight change and
        // will transform the in-flight against it server-side; mirror that
        // here so the next remote sees a consistent in-flight.
        if let Some(in_flight) = self.in_flight.take() {
            let shifted = in_flight.transform(&remote, false);
            self.in_flight = Some(remote.transform(&in_flight, true));
            remote = shifted;
        }
        if let Some(queued) = self.queued.take() {
            let shifted = queued.transform(&remote, false);
            let rebased = remote.transform(&queued, true);
            self.queued = if rebased.is_empty() {
                None
            } else {
                Some(rebased)
            };
            remote = shifted;
        }

        self.current = self.current.compose(&remote);
        if !self.current.is_document() {
            return Err(SessionError::Corrupted);
        }
        self.history.transform_remote(&remote);
        self.version += 1;
        Ok(remote)
    }

    /// Undo the most recent local change. Returns the change applied to the
    /// document and the update to send, if one went out.
    pub fn undo(&mut self) -> Option<(Delta, Option<OutgoingUpdate>)> {
        let change = self.history.undo(&self.current)?;
        self.current = self.current.compose(&change);
        let outgoing = self.push_local(change.clone());
        Some((change, outgoing))
    }

    /// Redo the most recently undone change.
    pub fn redo(&mut self) -> Option<(Delta, Option<OutgoingUpdate>)> {
        let change = self.history.redo(&self.current)?;
        self.current = self.current.compose(&change);
        let outgoing = self.push_local(change.clone());
        Some((change, outgoing))
    }

    /// Pace an outgoing change: send immediately when the line is clear,
    /// queue otherwise. The version is bumped optimistically on send; the
    /// server either accepts the change at that version or transforms it.
    fn push_local(&mut self, change: Delta) -> Option<OutgoingUpdate> {
        if self.in_flight.is_none() {
            self.in_flight = Some(change.clone());
            let update = OutgoingUpdate {
                version: self.version,
                change,
            };
            self.version += 1;
            Some(update)
        } else {
            self.queued = Some(match self.queued.take() {
                Some(queued) => queued.compose(&change),
                None => change,
            });
            None
        }
    }
}
