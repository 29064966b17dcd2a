//! # weft-collab — realtime collaborative editing over WebSocket
//!
//! Server and client for multiplayer rich-text editing, reconciled with
//! operational transformation over [`weft_delta`] deltas.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐      WebSocket      ┌──────────────┐
//! │ CollabClient │ ◄──────────────────► │ CollabServer │
//! │  SyncSession │     JSON frames      │  (dispatch)  │
//! └──────┬───────┘                      └──────┬───────┘
//!        │                                     │
//!        ▼                                     ▼
//! ┌──────────────┐                     ┌──────────────┐
//! │ LocalHistory │                     │ DocumentActor│  one per doc id:
//! │ (undo/redo)  │                     │ {version,    │  single writer,
//! └──────────────┘                     │  history,    │  commits broadcast
//!                                      │  contents}   │  in order
//!                                      └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON envelope and join/update/leave, open/update/reply
//!   frames
//! - [`document`] — the per-document reconciliation actor
//! - [`broadcast`] — document registry (id → live actor)
//! - [`server`] — WebSocket accept loop and channel routing
//! - [`session`] — client sync state machine (one update in flight, queued
//!   local edits, remote transform)
//! - [`history`] — per-client undo/redo stacks of inverse deltas
//! - [`client`] — WebSocket client emitting [`ClientEvent`]s

pub mod broadcast;
pub mod client;
pub mod document;
pub mod history;
pub mod protocol;
pub mod server;
pub mod session;

pub use broadcast::{DocumentRegistry, RegistryStats};
pub use client::{ClientError, ClientEvent, CollabClient};
pub use document::{
    seed_document, CommittedUpdate, DocumentActor, DocumentHandle, UpdateError,
};
pub use history::{HistoryConfig, LocalHistory};
pub use protocol::{
    document_topic, parse_document_topic, ClientFrame, Envelope, ProtocolError, ReplyStatus,
    ServerFrame,
};
pub use server::{CollabServer, ServerConfig, ServerStats};
pub use session::{OutgoingUpdate, SessionError, SyncSession};
