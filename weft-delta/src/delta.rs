//! Deltas: ordered op sequences describing documents and edits.
//!
//! A delta consisting solely of inserts is a *document*; one mixing retains
//! and deletes is a *change*. Both share one canonical form, maintained by
//! [`Delta::push`]:
//!
//! - adjacent ops of the same kind with equal attributes merge;
//! - a delete emitted at the same position as an insert precedes it;
//! - a trailing bare retain is elided by [`Delta::chop`].

use serde::{Deserialize, Deserializer, Serialize};

use crate::attributes::{
    compose_attributes, invert_attributes, transform_attributes, Attributes,
};
use crate::iter::OpIter;
use crate::op::{InsertValue, Op, OpKind};

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Delta {
    ops: Vec<Op>,
}

impl Delta {
    pub fn new() -> Self {
        Delta::default()
    }

    /// Build a canonical delta from raw ops.
    pub fn from_ops(ops: impl IntoIterator<Item = Op>) -> Self {
        let mut delta = Delta::new();
        for op in ops {
            delta.push(op);
        }
        delta
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<Op> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Sum of all op lengths. For a document delta this is the document
    /// length in characters.
    pub fn length(&self) -> usize {
        self.ops.iter().map(Op::len).sum()
    }

    /// Length of input this delta consumes when applied (retains + deletes).
    pub fn base_len(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| !matches!(op, Op::Insert { .. }))
            .map(Op::len)
            .sum()
    }

    /// Length of the output this delta produces (inserts + retains).
    pub fn target_len(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| !matches!(op, Op::Delete { .. }))
            .map(Op::len)
            .sum()
    }

    /// True when every op is an insert.
    pub fn is_document(&self) -> bool {
        self.ops.iter().all(|op| matches!(op, Op::Insert { .. }))
    }

    /// Text content of the insert ops; embeds render as U+FFFC.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for op in &self.ops {
            if let Op::Insert { value, .. } = op {
                match value {
                    InsertValue::Text(text) => out.push_str(text),
                    InsertValue::Embed(_) => out.push('\u{FFFC}'),
                }
            }
        }
        out
    }

    pub fn iter(&self) -> OpIter<'_> {
        OpIter::new(&self.ops)
    }

    // ── builders ───────────────────────────────────────────────────

    pub fn insert(mut self, value: impl Into<InsertValue>) -> Self {
        self.push(Op::insert(value));
        self
    }

    pub fn insert_attrs(mut self, value: impl Into<InsertValue>, attributes: Attributes) -> Self {
        self.push(Op::insert_attrs(value, attributes));
        self
    }

    pub fn retain(mut self, count: usize) -> Self {
        self.push(Op::retain(count));
        self
    }

    pub fn retain_attrs(mut self, count: usize, attributes: Attributes) -> Self {
        self.push(Op::retain_attrs(count, attributes));
        self
    }

    pub fn delete(mut self, count: usize) -> Self {
        self.push(Op::delete(count));
        self
    }

    /// Append an op, maintaining canonical form.
    pub fn push(&mut self, op: Op) {
        if op.is_empty() {
            return;
        }
        let mut index = self.ops.len();
        // Deletes sort ahead of inserts emitted at the same position.
        if matches!(op, Op::Delete { .. }) {
            while index > 0 && matches!(self.ops[index - 1], Op::Insert { .. }) {
                index -= 1;
            }
        }
        if index > 0 {
            if let Some(merged) = merge_ops(&self.ops[index - 1], &op) {
                self.ops[index - 1] = merged;
                return;
            }
        }
        self.ops.insert(index, op);
    }

    /// Drop a trailing bare retain.
    pub fn chop(&mut self) {
        if let Some(Op::Retain {
            attributes: None, ..
        }) = self.ops.last()
        {
            self.ops.pop();
        }
    }

    /// The sub-delta covering delta-length range `start..end`.
    pub fn slice(&self, start: usize, end: usize) -> Delta {
        let mut iter = self.iter();
        let mut out = Delta::new();
        let mut index = 0;
        while index < end && iter.has_next() {
            if index < start {
                index += iter.next_slice(start - index).len();
            } else {
                let op = iter.next_slice(end - index);
                index += op.len();
                out.push(op);
            }
        }
        out
    }

    // ── algebra ────────────────────────────────────────────────────

    /// Returns the delta equivalent to applying `self` then `other`.
    pub fn compose(&self, other: &Delta) -> Delta {
        let mut a = self.iter();
        let mut b = other.iter();
        let mut out = Delta::new();
        while a.has_next() || b.has_next() {
            if b.peek_kind() == OpKind::Insert {
                let len = b.peek_len();
                out.push(b.next_slice(len));
                continue;
            }
            if a.peek_kind() == OpKind::Delete && a.has_next() {
                let len = a.peek_len();
                out.push(a.next_slice(len));
                continue;
            }
            let len = a.peek_len().min(b.peek_len());
            let a_op = a.next_slice(len);
            let b_op = b.next_slice(len);
            match b_op {
                Op::Retain {
                    attributes: b_attrs,
                    ..
                } => match a_op {
                    Op::Insert { value, attributes } => out.push(Op::Insert {
                        value,
                        attributes: compose_attributes(
                            attributes.as_ref(),
                            b_attrs.as_ref(),
                            false,
                        ),
                    }),
                    Op::Retain { count, attributes } => out.push(Op::Retain {
                        count,
                        attributes: compose_attributes(
                            attributes.as_ref(),
                            b_attrs.as_ref(),
                            true,
                        ),
                    }),
                    Op::Delete { .. } => unreachable!("deletes on the left are passed through"),
                },
                Op::Delete { count } => {
                    // An insert on the left cancels against the delete.
                    if matches!(a_op, Op::Retain { .. }) {
                        out.push(Op::Delete { count });
                    }
                }
                Op::Insert { .. } => unreachable!("inserts on the right are passed through"),
            }
        }
        out.chop();
        out
    }

    /// Transform `other` to apply after `self`. `priority` means `self` is
    /// considered to have happened first and wins positional and attribute
    /// ties.
    pub fn transform(&self, other: &Delta, priority: bool) -> Delta {
        let mut a = self.iter();
        let mut b = other.iter();
        let mut out = Delta::new();
        while a.has_next() || b.has_next() {
            if a.peek_kind() == OpKind::Insert && (priority || b.peek_kind() != OpKind::Insert) {
                let len = a.peek_len();
                out.push(Op::retain(a.next_slice(len).len()));
                continue;
            }
            if b.peek_kind() == OpKind::Insert {
                let len = b.peek_len();
                out.push(b.next_slice(len));
                continue;
            }
            let len = a.peek_len().min(b.peek_len());
            let a_op = a.next_slice(len);
            let b_op = b.next_slice(len);
            match (a_op, b_op) {
                // Text deleted under us: the other side's op has nothing
                // left to act on.
                (Op::Delete { .. }, _) => {}
                (_, Op::Delete { count }) => out.push(Op::Delete { count }),
                (a_op, Op::Retain {
                    count,
                    attributes: b_attrs,
                }) => out.push(Op::Retain {
                    count,
                    attributes: transform_attributes(
                        a_op.attributes(),
                        b_attrs.as_ref(),
                        priority,
                    ),
                }),
                (_, Op::Insert { .. }) => unreachable!("inserts are passed through"),
            }
        }
        out.chop();
        out
    }

    /// Where a cursor at `pos` lands after this delta applies. Inserts
    /// strictly before `pos` push it right; inserts exactly at `pos` leave
    /// it in place (left gravity); deletes pull it left.
    pub fn transform_position(&self, pos: usize) -> usize {
        let mut index = pos;
        let mut offset = 0;
        for op in &self.ops {
            if offset > index {
                break;
            }
            match op {
                Op::Delete { count } => {
                    index -= (*count).min(index - offset);
                }
                Op::Insert { .. } => {
                    if offset < index {
                        index += op.len();
                    }
                    offset += op.len();
                }
                Op::Retain { .. } => {
                    offset += op.len();
                }
            }
        }
        index
    }

    /// The change that undoes `self` against the document `base` it was
    /// applied to: `compose(base, compose(self, invert(self, base)))` is
    /// `base` again.
    pub fn invert(&self, base: &Delta) -> Delta {
        let mut inverted = Delta::new();
        let mut base_index = 0;
        for op in &self.ops {
            match op {
                Op::Insert { .. } => inverted.push(Op::delete(op.len())),
                Op::Retain {
                    count,
                    attributes: None,
                } => {
                    inverted.push(Op::retain(*count));
                    base_index += count;
                }
                Op::Retain {
                    count,
                    attributes: Some(attrs),
                } => {
                    for base_op in base.slice(base_index, base_index + count).into_ops() {
                        inverted.push(Op::Retain {
                            count: base_op.len(),
                            attributes: invert_attributes(Some(attrs), base_op.attributes()),
                        });
                    }
                    base_index += count;
                }
                Op::Delete { count } => {
                    // Restore the deleted run, attributes included.
                    for base_op in base.slice(base_index, base_index + count).into_ops() {
                        inverted.push(base_op);
                    }
                    base_index += count;
                }
            }
        }
        inverted.chop();
        inverted
    }
}

fn merge_ops(last: &Op, next: &Op) -> Option<Op> {
    match (last, next) {
        (Op::Delete { count: a }, Op::Delete { count: b }) => Some(Op::delete(a + b)),
        (
            Op::Retain {
                count: a,
                attributes: attrs_a,
            },
            Op::Retain {
                count: b,
                attributes: attrs_b,
            },
        ) if attrs_a == attrs_b => Some(Op::Retain {
            count: a + b,
            attributes: attrs_a.clone(),
        }),
        (
            Op::Insert {
                value: InsertValue::Text(a),
                attributes: attrs_a,
            },
            Op::Insert {
                value: InsertValue::Text(b),
                attributes: attrs_b,
            },
        ) if attrs_a == attrs_b => Some(Op::Insert {
            value: InsertValue::Text(format!("{a}{b}")),
            attributes: attrs_a.clone(),
        }),
        _ => None,
    }
}

impl<'de> Deserialize<'de> for Delta {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ops = Vec::<Op>::deserialize(deserializer)?;
        let mut delta = Delta::from_ops(ops);
        delta.chop();
        Ok(delta)
    }
}

impl FromIterator<Op> for Delta {
    fn from_iter<T: IntoIterator<Item = Op>>(ops: T) -> Self {
        Delta::from_ops(ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttrValue;

    fn attrs(entries: &[(&str, AttrValue)]) -> Attributes {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_push_merges_adjacent_inserts() {
        let delta = Delta::new().insert("Hello ").insert("world");
        assert_eq!(delta.ops(), &[Op::insert("Hello world")]);
    }

    #[test]
    fn test_push_keeps_differently_attributed_inserts_apart() {
        let delta = Delta::new()
            .insert("a")
            .insert_attrs("b", attrs(&[("bold", true.into())]));
        assert_eq!(delta.ops().len(), 2);
    }

    #[test]
    fn test_push_orders_delete_before_insert() {
        let delta = Delta::new().retain(2).insert("x").delete(1);
        assert_eq!(
            delta.ops(),
            &[Op::retain(2), Op::delete(1), Op::insert("x")]
        );
    }

    #[test]
    fn test_push_merges_deletes_across_insert() {
        let delta = Delta::new().delete(1).insert("x").delete(2);
        assert_eq!(delta.ops(), &[Op::delete(3), Op::insert("x")]);
    }

    #[test]
    fn test_chop_drops_bare_trailing_retain() {
        let mut delta = Delta::new().insert("a").retain(3);
        delta.chop();
        assert_eq!(delta.ops(), &[Op::insert("a")]);
    }

    #[test]
    fn test_chop_keeps_attributed_retain() {
        let mut delta = Delta::new().retain_attrs(3, attrs(&[("bold", true.into())]));
        delta.chop();
        assert_eq!(delta.ops().len(), 1);
    }

    #[test]
    fn test_lengths() {
        let delta = Delta::new().retain(2).insert("abc").delete(4);
        assert_eq!(delta.length(), 9);
        assert_eq!(delta.base_len(), 6);
        assert_eq!(delta.target_len(), 5);
    }

    #[test]
    fn test_slice_middle() {
        let doc = Delta::new()
            .insert("Hello")
            .insert_attrs(" world", attrs(&[("bold", true.into())]));
        let slice = doc.slice(3, 8);
        assert_eq!(
            slice.ops(),
            &[
                Op::insert("lo"),
                Op::insert_attrs(" wo", attrs(&[("bold", true.into())])),
            ]
        );
    }

    // ── compose ────────────────────────────────────────────────────

    #[test]
    fn test_compose_insert_then_insert() {
        let doc = Delta::new().insert("Hello");
        let change = Delta::new().retain(5).insert(" world");
        assert_eq!(doc.compose(&change), Delta::new().insert("Hello world"));
    }

    #[test]
    fn test_compose_insert_then_delete_cancels() {
        let a = Delta::new().insert("abc");
        let b = Delta::new().retain(1).delete(2);
        assert_eq!(a.compose(&b), Delta::new().insert("a"));
    }

    #[test]
    fn test_compose_retain_then_delete() {
        let a = Delta::new().retain(3);
        let b = Delta::new().delete(2);
        assert_eq!(a.compose(&b), Delta::new().delete(2));
    }

    #[test]
    fn test_compose_delete_passes_through() {
        let a = Delta::new().delete(2).insert("x");
        let b = Delta::new().retain(1).insert("y");
        let composed = a.compose(&b);
        assert_eq!(
            composed.ops(),
            &[Op::delete(2), Op::insert("xy")]
        );
    }

    #[test]
    fn test_compose_attribute_merge_on_insert() {
        let a = Delta::new().insert_attrs("a", attrs(&[("bold", true.into())]));
        let b = Delta::new().retain_attrs(1, attrs(&[("italic", true.into())]));
        assert_eq!(
            a.compose(&b).ops(),
            &[Op::insert_attrs(
                "a",
                attrs(&[("bold", true.into()), ("italic", true.into())])
            )]
        );
    }

    #[test]
    fn test_compose_null_removes_attribute_from_insert() {
        let a = Delta::new().insert_attrs("a", attrs(&[("bold", true.into())]));
        let b = Delta::new().retain_attrs(1, attrs(&[("bold", AttrValue::Null)]));
        assert_eq!(a.compose(&b).ops(), &[Op::insert("a")]);
    }

    #[test]
    fn test_compose_retain_keeps_null_as_removal() {
        let a = Delta::new().retain_attrs(1, attrs(&[("font", "serif".into())]));
        let b = Delta::new().retain_attrs(1, attrs(&[("font", AttrValue::Null)]));
        assert_eq!(
            a.compose(&b).ops(),
            &[Op::retain_attrs(1, attrs(&[("font", AttrValue::Null)]))]
        );
    }

    #[test]
    fn test_compose_with_longer_change_pads() {
        let a = Delta::new().insert("ab");
        let b = Delta::new().retain(2).delete(3);
        assert_eq!(
            a.compose(&b).ops(),
            &[Op::insert("ab"), Op::delete(3)]
        );
    }

    // ── transform ──────────────────────────────────────────────────

    #[test]
    fn test_transform_insert_tie_server_wins() {
        let a = Delta::new().insert("A");
        let b = Delta::new().insert("B");
        assert_eq!(a.transform(&b, true), Delta::new().retain(1).insert("B"));
    }

    #[test]
    fn test_transform_insert_tie_without_priority() {
        let a = Delta::new().insert("A");
        let b = Delta::new().insert("B");
        assert_eq!(a.transform(&b, false), Delta::new().insert("B"));
    }

    #[test]
    fn test_transform_shifts_past_earlier_insert() {
        let a = Delta::new().retain(2).insert("xx");
        let b = Delta::new().retain(5).insert("y");
        assert_eq!(a.transform(&b, true), Delta::new().retain(7).insert("y"));
    }

    #[test]
    fn test_transform_delete_vs_retain_drops_covered_span() {
        let a = Delta::new().delete(3);
        let b = Delta::new().retain(3).insert("x");
        assert_eq!(a.transform(&b, true), Delta::new().insert("x"));
    }

    #[test]
    fn test_transform_delete_vs_delete_cancels() {
        let a = Delta::new().delete(2).retain(1);
        let b = Delta::new().delete(3);
        assert_eq!(a.transform(&b, true), Delta::new().delete(1));
    }

    #[test]
    fn test_transform_attribute_conflict_priority() {
        let a = Delta::new().retain_attrs(1, attrs(&[("bold", true.into())]));
        let b = Delta::new().retain_attrs(1, attrs(&[("bold", false.into()), ("italic", true.into())]));
        assert_eq!(
            a.transform(&b, true).ops(),
            &[Op::retain_attrs(1, attrs(&[("italic", true.into())]))]
        );
        assert_eq!(a.transform(&b, false).ops(), b.ops());
    }

    #[test]
    fn test_transform_tp1_convergence() {
        let base = Delta::new().insert("Hello world!\n");
        let a = Delta::new().retain(5).insert(" there");
        let b = Delta::new().retain(11).delete(1).insert("?");
        let left = base.compose(&a).compose(&a.transform(&b, false));
        let right = base.compose(&b).compose(&b.transform(&a, true));
        assert_eq!(left, right);
    }

    // ── transform_position ─────────────────────────────────────────

    #[test]
    fn test_transform_position_insert_before_pushes_right() {
        let d = Delta::new().retain(2).insert("ab");
        assert_eq!(d.transform_position(5), 7);
    }

    #[test]
    fn test_transform_position_insert_at_pos_left_gravity() {
        let d = Delta::new().retain(3).insert("x");
        assert_eq!(d.transform_position(3), 3);
        assert_eq!(d.transform_position(4), 5);
    }

    #[test]
    fn test_transform_position_delete_before_pulls_left() {
        let d = Delta::new().retain(1).delete(3);
        assert_eq!(d.transform_position(6), 3);
    }

    #[test]
    fn test_transform_position_delete_straddling_clamps() {
        let d = Delta::new().delete(5);
        assert_eq!(d.transform_position(2), 0);
    }

    #[test]
    fn test_transform_position_empty_delta_is_identity() {
        assert_eq!(Delta::new().transform_position(9), 9);
    }

    // ── invert ─────────────────────────────────────────────────────

    #[test]
    fn test_invert_insert() {
        let base = Delta::new().insert("ab");
        let change = Delta::new().retain(1).insert("xy");
        let inverse = change.invert(&base);
        assert_eq!(inverse, Delta::new().retain(1).delete(2));
        assert_eq!(base.compose(&change).compose(&inverse), base);
    }

    #[test]
    fn test_invert_delete_restores_text_and_attributes() {
        let base = Delta::new()
            .insert("a")
            .insert_attrs("b", attrs(&[("bold", true.into())]));
        let change = Delta::new().delete(2);
        let inverse = change.invert(&base);
        assert_eq!(inverse, base);
        assert_eq!(base.compose(&change).compose(&inverse), base);
    }

    #[test]
    fn test_invert_retain_attributes() {
        let base = Delta::new().insert_attrs("ab", attrs(&[("font", "serif".into())]));
        let change = Delta::new().retain_attrs(2, attrs(&[("font", "mono".into())]));
        let inverse = change.invert(&base);
        assert_eq!(
            inverse,
            Delta::new().retain_attrs(2, attrs(&[("font", "serif".into())]))
        );
        assert_eq!(base.compose(&change).compose(&inverse), base);
    }

    #[test]
    fn test_invert_mixed_change() {
        let base = Delta::new().insert("Hello world!\n");
        let change = Delta::new().retain(5).delete(6).insert(" there");
        let inverse = change.invert(&base);
        assert_eq!(base.compose(&change).compose(&inverse), base);
    }

    // ── serde ──────────────────────────────────────────────────────

    #[test]
    fn test_delta_json_roundtrip() {
        let delta = Delta::new()
            .retain(12)
            .insert_attrs("!", attrs(&[("node_id", "hello".into())]))
            .delete(1);
        let json = serde_json::to_string(&delta).unwrap();
        let decoded: Delta = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, delta);
    }

    #[test]
    fn test_deserialize_canonicalizes() {
        let json = r#"[{"insert":"ab"},{"insert":"cd"},{"retain":3}]"#;
        let decoded: Delta = serde_json::from_str(json).unwrap();
        assert_eq!(decoded, Delta::new().insert("abcd"));
    }
}
