//! JSON wire protocol for document channels.
//!
//! Every frame is a JSON envelope multiplexed by topic:
//!
//! ```text
//! {"topic": "document:<id>", "event": "<event>", "ref": <n>?, "payload": {…}}
//! ```
//!
//! Client → server events: `join`, `update`, `leave`.
//! Server → client events: `open` (once after join), `update` (broadcast),
//! `reply` (`{"status":"ok"}` or `{"status":"error","response":{"reason":…}}`
//! answering the sender's `update`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use weft_delta::Delta;

/// Topic prefix for document channels.
pub const DOCUMENT_TOPIC_PREFIX: &str = "document:";

pub fn document_topic(id: &str) -> String {
    format!("{DOCUMENT_TOPIC_PREFIX}{id}")
}

/// Extract the document id from a `document:<id>` topic.
pub fn parse_document_topic(topic: &str) -> Result<&str, ProtocolError> {
    topic
        .strip_prefix(DOCUMENT_TOPIC_PREFIX)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ProtocolError::InvalidTopic(topic.to_owned()))
}

/// Protocol errors.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("failed to encode frame: {0}")]
    Encode(String),
    #[error("failed to decode frame: {0}")]
    Decode(String),
    #[error("unknown event {0:?}")]
    UnknownEvent(String),
    #[error("invalid topic {0:?}")]
    InvalidTopic(String),
    #[error("connection closed")]
    ConnectionClosed,
}

/// The outer frame shared by both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    pub event: String,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<u64>,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

/// Frames a client sends on a document topic.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Join { user_id: Option<String> },
    Update { version: u64, change: Delta },
    Leave,
}

/// Frames the server sends on a document topic.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Snapshot sent once after a successful join.
    Open { version: u64, contents: Delta },
    /// A committed change, broadcast to every other subscriber.
    Update { version: u64, change: Delta },
    /// Answer to the sender's own update.
    Reply { status: ReplyStatus },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplyStatus {
    Ok,
    Error { reason: String },
}

#[derive(Serialize, Deserialize)]
struct JoinPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct UpdatePayload {
    version: u64,
    change: Delta,
}

#[derive(Serialize, Deserialize)]
struct OpenPayload {
    version: u64,
    contents: Delta,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum ReplyPayload {
    Ok,
    Error { response: ErrorResponse },
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    reason: String,
}

fn to_payload<T: Serialize>(value: &T) -> Result<Value, ProtocolError> {
    serde_json::to_value(value).map_err(|e| ProtocolError::Encode(e.to_string()))
}

fn from_payload<T: for<'de> Deserialize<'de>>(payload: &Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload.clone()).map_err(|e| ProtocolError::Decode(e.to_string()))
}

impl ClientFrame {
    pub const JOIN: &'static str = "join";
    pub const UPDATE: &'static str = "update";
    pub const LEAVE: &'static str = "leave";

    pub fn into_envelope(
        self,
        topic: String,
        reference: Option<u64>,
    ) -> Result<Envelope, ProtocolError> {
        let (event, payload) = match self {
            ClientFrame::Join { user_id } => {
                (Self::JOIN, to_payload(&JoinPayload { user_id })?)
            }
            ClientFrame::Update { version, change } => {
                (Self::UPDATE, to_payload(&UpdatePayload { version, change })?)
            }
            ClientFrame::Leave => (Self::LEAVE, Value::Null),
        };
        Ok(Envelope {
            topic,
            event: event.to_owned(),
            reference,
            payload,
        })
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self, ProtocolError> {
        match envelope.event.as_str() {
            Self::JOIN => {
                let payload: JoinPayload = if envelope.payload.is_null() {
                    JoinPayload { user_id: None }
                } else {
                    from_payload(&envelope.payload)?
                };
                Ok(ClientFrame::Join {
                    user_id: payload.user_id,
                })
            }
            Self::UPDATE => {
                let payload: UpdatePayload = from_payload(&envelope.payload)?;
                Ok(ClientFrame::Update {
                    version: payload.version,
                    change: payload.change,
                })
            }
            Self::LEAVE => Ok(ClientFrame::Leave),
            other => Err(ProtocolError::UnknownEvent(other.to_owned())),
        }
    }
}

impl ServerFrame {
    pub const OPEN: &'static str = "open";
    pub const UPDATE: &'static str = "update";
    pub const REPLY: &'static str = "reply";

    pub fn into_envelope(
        self,
        topic: String,
        reference: Option<u64>,
    ) -> Result<Envelope, ProtocolError> {
        let (event, payload) = match self {
            ServerFrame::Open { version, contents } => {
                (Self::OPEN, to_payload(&OpenPayload { version, contents })?)
            }
            ServerFrame::Update { version, change } => {
                (Self::UPDATE, to_payload(&UpdatePayload { version, change })?)
            }
            ServerFrame::Reply { status } => {
                let payload = match status {
                    ReplyStatus::Ok => ReplyPayload::Ok,
                    ReplyStatus::Error { reason } => ReplyPayload::Error {
                        response: ErrorResponse { reason },
                    },
                };
                (Self::REPLY, to_payload(&payload)?)
            }
        };
        Ok(Envelope {
            topic,
            event: event.to_owned(),
            reference,
            payload,
        })
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self, ProtocolError> {
        match envelope.event.as_str() {
            Self::OPEN => {
                let payload: OpenPayload = from_payload(&envelope.payload)?;
                Ok(ServerFrame::Open {
                    version: payload.version,
                    contents: payload.contents,
                })
            }
            Self::UPDATE => {
                let payload: UpdatePayload = from_payload(&envelope.payload)?;
                Ok(ServerFrame::Update {
                    version: payload.version,
                    change: payload.change,
                })
            }
            Self::REPLY => {
                let payload: ReplyPayload = from_payload(&envelope.payload)?;
                Ok(ServerFrame::Reply {
                    status: match payload {
                        ReplyPayload::Ok => ReplyStatus::Ok,
                        ReplyPayload::Error { response } => ReplyStatus::Error {
                            reason: response.reason,
                        },
                    },
                })
            }
            other => Err(ProtocolError::UnknownEvent(other.to_owned())),
        }
    }
}
