//! Pull-based cursor over a delta's ops.
//!
//! `compose`, `transform`, `diff` and `slice` all walk two deltas in
//! lockstep, consuming slices of whatever length the other side dictates.
//! The cursor yields ops cut to the requested length and pads with plain
//! retains once the underlying delta is exhausted.

use crate::op::{InsertValue, Op, OpKind};

pub struct OpIter<'a> {
    ops: &'a [Op],
    index: usize,
    /// Delta-length offset consumed within `ops[index]`.
    offset: usize,
}

impl<'a> OpIter<'a> {
    pub fn new(ops: &'a [Op]) -> Self {
        OpIter {
            ops,
            index: 0,
            offset: 0,
        }
    }

    pub fn has_next(&self) -> bool {
        self.index < self.ops.len()
    }

    /// Remaining length of the current op, or `usize::MAX` once exhausted.
    pub fn peek_len(&self) -> usize {
        match self.ops.get(self.index) {
            Some(op) => op.len() - self.offset,
            None => usize::MAX,
        }
    }

    /// Kind of the current op. Exhausted cursors report `Retain`, matching
    /// the implicit retain padding `next_slice` emits.
    pub fn peek_kind(&self) -> OpKind {
        match self.ops.get(self.index) {
            Some(op) => op.kind(),
            None => OpKind::Retain,
        }
    }

    /// Take up to `max` length from the current op. Callers must bound `max`
    /// by a real length when this cursor may be exhausted.
    pub fn next_slice(&mut self, max: usize) -> Op {
        let Some(op) = self.ops.get(self.index) else {
            return Op::retain(max);
        };
        let available = op.len() - self.offset;
        let take = max.min(available);
        let slice = slice_op(op, self.offset, take);
        self.offset += take;
        if self.offset == op.len() {
            self.index += 1;
            self.offset = 0;
        }
        slice
    }
}

fn slice_op(op: &Op, offset: usize, len: usize) -> Op {
    match op {
        Op::Retain { attributes, .. } => Op::Retain {
            count: len,
            attributes: attributes.clone(),
        },
        Op::Delete { .. } => Op::Delete { count: len },
        Op::Insert { value, attributes } => {
            let value = match value {
                InsertValue::Text(text) if offset == 0 && len == value.len() => {
                    InsertValue::Text(text.clone())
                }
                InsertValue::Text(text) => {
                    InsertValue::Text(text.chars().skip(offset).take(len).collect())
                }
                // Embeds are length 1 and never split.
                InsertValue::Embed(embed) => InsertValue::Embed(embed.clone()),
            };
            Op::Insert {
                value,
                attributes: attributes.clone(),
            }
        }
    }
}
