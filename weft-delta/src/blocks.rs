//! Block view of a document delta.
//!
//! Every newline in a stored document carries a `node_id` attribute naming
//! the rich-text block it terminates, so blocks stay addressable as the
//! text around them changes. This module splits a document delta at those
//! newlines.

use thiserror::Error;

use crate::attributes::{AttrValue, Attributes};
use crate::delta::Delta;
use crate::op::{InsertValue, Op};

/// Attribute key identifying the block a newline terminates.
pub const NODE_ID_ATTR: &str = "node_id";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BlockError {
    /// A trailing run of inserts with no block-terminating newline.
    #[error("orphaned operations: document does not end with a block-terminating newline")]
    OrphanedOperations,
    #[error("unsupported document node: {0}")]
    UnsupportedNode(String),
    #[error("block conversion requires a document delta")]
    NotADocument,
}

/// One run of identically-attributed content inside a block.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub content: InsertValue,
    pub attributes: Option<Attributes>,
}

/// A block: its `node_id` and the segments preceding the terminating
/// newline.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub node_id: String,
    pub segments: Vec<Segment>,
}

/// Split a document delta into its blocks.
pub fn blocks(document: &Delta) -> Result<Vec<Block>, BlockError> {
    let mut blocks = Vec::new();
    let mut segments: Vec<Segment> = Vec::new();
    for op in document.ops() {
        let Op::Insert { value, attributes } = op else {
            return Err(BlockError::NotADocument);
        };
        match value {
            InsertValue::Text(text) => {
                let mut rest = text.as_str();
                while let Some(newline) = rest.find('\n') {
                    let before = &rest[..newline];
                    if !before.is_empty() {
                        segments.push(Segment {
                            content: InsertValue::Text(before.to_owned()),
                            attributes: attributes.clone(),
                        });
                    }
                    let node_id = attributes
                        .as_ref()
                        .and_then(|attrs| attrs.get(NODE_ID_ATTR))
                        .and_then(AttrValue::as_str)
                        .ok_or_else(|| {
                            BlockError::UnsupportedNode(
                                "newline without a node_id attribute".into(),
                            )
                        })?;
                    blocks.push(Block {
                        node_id: node_id.to_owned(),
                        segments: std::mem::take(&mut segments),
                    });
                    rest = &rest[newline + 1..];
                }
                if !rest.is_empty() {
                    segments.push(Segment {
                        content: InsertValue::Text(rest.to_owned()),
                        attributes: attributes.clone(),
                    });
                }
            }
            InsertValue::Embed(embed) => segments.push(Segment {
                content: InsertValue::Embed(embed.clone()),
                attributes: attributes.clone(),
            }),
        }
    }
    if !segments.is_empty() {
        return Err(BlockError::OrphanedOperations);
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> Attributes {
        Attributes::from([(NODE_ID_ATTR.to_string(), AttrValue::from(id))])
    }

    #[test]
    fn test_single_block() {
        let doc = Delta::new().insert_attrs("Hello world!\n", node("hello"));
        let parsed = blocks(&doc).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].node_id, "hello");
        assert_eq!(
            parsed[0].segments,
            vec![Segment {
                content: InsertValue::Text("Hello world!".into()),
                attributes: Some(node("hello")),
            }]
        );
    }

    #[test]
    fn test_multiple_blocks_and_styled_runs() {
        let mut bold = node("a");
        bold.insert("bold".to_string(), AttrValue::Bool(true));
        let doc = Delta::new()
            .insert("plain ")
            .insert_attrs("styled", bold)
            .insert_attrs("\n", node("a"))
            .insert_attrs("second\n", node("b"));
        let parsed = blocks(&doc).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].node_id, "a");
        assert_eq!(parsed[0].segments.len(), 2);
        assert_eq!(parsed[1].node_id, "b");
    }

    #[test]
    fn test_empty_block() {
        let doc = Delta::new()
            .insert_attrs("\n", node("empty"))
            .insert_attrs("tail\n", node("tail"));
        let parsed = blocks(&doc).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed[0].segments.is_empty());
    }

    #[test]
    fn test_orphaned_tail() {
        let doc = Delta::new()
            .insert_attrs("done\n", node("a"))
            .insert("dangling");
        assert_eq!(blocks(&doc), Err(BlockError::OrphanedOperations));
    }

    #[test]
    fn test_newline_without_node_id() {
        let doc = Delta::new().insert("no id\n");
        assert!(matches!(
            blocks(&doc),
            Err(BlockError::UnsupportedNode(_))
        ));
    }

    #[test]
    fn test_rejects_change_delta() {
        let change = Delta::new().retain(3);
        assert_eq!(blocks(&change), Err(BlockError::NotADocument));
    }
}
