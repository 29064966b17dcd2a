//! The operation primitive: insert, retain, delete.
//!
//! Wire form (one key per variant, attributes optional):
//! `{"insert": "text"}` · `{"retain": 3, "attributes": {"bold": true}}` ·
//! `{"delete": 2}`. An insert payload may also be an embed object, which
//! counts as a single character of delta length.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::attributes::Attributes;

/// Errors raised when decoding ops from the wire or when an algebra
/// precondition on whole deltas is not met.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeltaError {
    #[error("malformed op: {0}")]
    MalformedOp(String),
    #[error("operation requires document deltas (inserts only)")]
    NotADocument,
}

/// Payload of an insert: a text run or an embedded object.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertValue {
    Text(String),
    Embed(Map<String, Value>),
}

impl InsertValue {
    /// Delta length: character count for text, 1 for an embed.
    pub fn len(&self) -> usize {
        match self {
            InsertValue::Text(text) => text.chars().count(),
            InsertValue::Embed(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, InsertValue::Text(text) if text.is_empty())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            InsertValue::Text(text) => Some(text),
            InsertValue::Embed(_) => None,
        }
    }
}

impl From<&str> for InsertValue {
    fn from(text: &str) -> Self {
        InsertValue::Text(text.to_owned())
    }
}

impl From<String> for InsertValue {
    fn from(text: String) -> Self {
        InsertValue::Text(text)
    }
}

/// Discriminant of an [`Op`], used by the iterator and the walkers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Insert,
    Retain,
    Delete,
}

/// A single rich-text operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Insert {
        value: InsertValue,
        attributes: Option<Attributes>,
    },
    Retain {
        count: usize,
        attributes: Option<Attributes>,
    },
    Delete {
        count: usize,
    },
}

impl Op {
    pub fn insert(value: impl Into<InsertValue>) -> Self {
        Op::Insert {
            value: value.into(),
            attributes: None,
        }
    }

    pub fn insert_attrs(value: impl Into<InsertValue>, attributes: Attributes) -> Self {
        Op::Insert {
            value: value.into(),
            attributes: if attributes.is_empty() {
                None
            } else {
                Some(attributes)
            },
        }
    }

    pub fn retain(count: usize) -> Self {
        Op::Retain {
            count,
            attributes: None,
        }
    }

    pub fn retain_attrs(count: usize, attributes: Attributes) -> Self {
        Op::Retain {
            count,
            attributes: if attributes.is_empty() {
                None
            } else {
                Some(attributes)
            },
        }
    }

    pub fn delete(count: usize) -> Self {
        Op::Delete { count }
    }

    /// Delta length of this op.
    pub fn len(&self) -> usize {
        match self {
            Op::Insert { value, .. } => value.len(),
            Op::Retain { count, .. } | Op::Delete { count } => *count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> OpKind {
        match self {
            Op::Insert { .. } => OpKind::Insert,
            Op::Retain { .. } => OpKind::Retain,
            Op::Delete { .. } => OpKind::Delete,
        }
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        match self {
            Op::Insert { attributes, .. } | Op::Retain { attributes, .. } => attributes.as_ref(),
            Op::Delete { .. } => None,
        }
    }
}

/// Wire-shape intermediate; exactly one of the three payload keys must be
/// present.
#[derive(Default, Serialize, Deserialize)]
struct RawOp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    insert: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retain: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delete: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attributes: Option<Attributes>,
}

impl TryFrom<RawOp> for Op {
    type Error = DeltaError;

    fn try_from(raw: RawOp) -> Result<Self, Self::Error> {
        let attributes = raw.attributes.filter(|attrs| !attrs.is_empty());
        match (raw.insert, raw.retain, raw.delete) {
            (Some(value), None, None) => {
                let value = match value {
                    Value::String(text) => {
                        if text.is_empty() {
                            return Err(DeltaError::MalformedOp("empty insert".into()));
                        }
                        InsertValue::Text(text)
                    }
                    Value::Object(embed) => InsertValue::Embed(embed),
                    other => {
                        return Err(DeltaError::MalformedOp(format!(
                            "insert payload must be a string or object, got {other}"
                        )))
                    }
                };
                Ok(Op::Insert { value, attributes })
            }
            (None, Some(count), None) => {
                if count == 0 {
                    return Err(DeltaError::MalformedOp("retain of zero".into()));
                }
                Ok(Op::Retain {
                    count: count as usize,
                    attributes,
                })
            }
            (None, None, Some(count)) => {
                if count == 0 {
                    return Err(DeltaError::MalformedOp("delete of zero".into()));
                }
                if attributes.is_some() {
                    return Err(DeltaError::MalformedOp("delete carries attributes".into()));
                }
                Ok(Op::Delete {
                    count: count as usize,
                })
            }
            _ => Err(DeltaError::MalformedOp(
                "op must carry exactly one of insert/retain/delete".into(),
            )),
        }
    }
}

impl From<&Op> for RawOp {
    fn from(op: &Op) -> Self {
        match op {
            Op::Insert { value, attributes } => RawOp {
                insert: Some(match value {
                    InsertValue::Text(text) => Value::String(text.clone()),
                    InsertValue::Embed(embed) => Value::Object(embed.clone()),
                }),
                attributes: attributes.clone(),
                ..RawOp::default()
            },
            Op::Retain { count, attributes } => RawOp {
                retain: Some(*count as u64),
                attributes: attributes.clone(),
                ..RawOp::default()
            },
            Op::Delete { count } => RawOp {
                delete: Some(*count as u64),
                ..RawOp::default()
            },
        }
    }
}

impl Serialize for Op {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RawOp::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Op {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawOp::deserialize(deserializer)?;
        Op::try_from(raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttrValue;

    #[test]
    fn test_lengths() {
        assert_eq!(Op::insert("héllo").len(), 5);
        assert_eq!(Op::retain(3).len(), 3);
        assert_eq!(Op::delete(7).len(), 7);
        let embed = Map::from_iter([("image".to_string(), Value::String("cat.png".into()))]);
        assert_eq!(Op::insert(InsertValue::Embed(embed)).len(), 1);
    }

    #[test]
    fn test_insert_json_shape() {
        let op = Op::insert_attrs(
            "hi",
            Attributes::from([("bold".to_string(), AttrValue::Bool(true))]),
        );
        let json = serde_json::to_string(&op).unwrap();
        assert_eq!(json, r#"{"insert":"hi","attributes":{"bold":true}}"#);
    }

    #[test]
    fn test_retain_json_shape() {
        let json = serde_json::to_string(&Op::retain(4)).unwrap();
        assert_eq!(json, r#"{"retain":4}"#);
    }

    #[test]
    fn test_delete_json_shape() {
        let json = serde_json::to_string(&Op::delete(2)).unwrap();
        assert_eq!(json, r#"{"delete":2}"#);
    }

    #[test]
    fn test_decode_roundtrip_with_null_attribute() {
        let json = r#"{"retain":1,"attributes":{"bold":null}}"#;
        let op: Op = serde_json::from_str(json).unwrap();
        match &op {
            Op::Retain { count, attributes } => {
                assert_eq!(*count, 1);
                assert_eq!(
                    attributes.as_ref().unwrap().get("bold"),
                    Some(&AttrValue::Null)
                );
            }
            other => panic!("expected retain, got {other:?}"),
        }
        assert_eq!(serde_json::to_string(&op).unwrap(), json);
    }

    #[test]
    fn test_decode_embed() {
        let json = r#"{"insert":{"image":"cat.png"}}"#;
        let op: Op = serde_json::from_str(json).unwrap();
        assert_eq!(op.len(), 1);
    }

    #[test]
    fn test_decode_rejects_empty_insert() {
        assert!(serde_json::from_str::<Op>(r#"{"insert":""}"#).is_err());
    }

    #[test]
    fn test_decode_rejects_zero_retain() {
        assert!(serde_json::from_str::<Op>(r#"{"retain":0}"#).is_err());
    }

    #[test]
    fn test_decode_rejects_delete_with_attributes() {
        let json = r#"{"delete":1,"attributes":{"bold":true}}"#;
        assert!(serde_json::from_str::<Op>(json).is_err());
    }

    #[test]
    fn test_decode_rejects_mixed_payloads() {
        assert!(serde_json::from_str::<Op>(r#"{"insert":"x","delete":1}"#).is_err());
        assert!(serde_json::from_str::<Op>(r#"{}"#).is_err());
    }
}
