//! Document-to-document diffing.
//!
//! Produces a minimal change delta via a character-level longest common
//! subsequence over both documents, then re-attaches attribute changes on
//! the retained runs. Embeds participate as a single sentinel character and
//! are compared by value inside retained runs.

use crate::attributes::diff_attributes;
use crate::delta::Delta;
use crate::op::{DeltaError, Op};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunk {
    Equal,
    Delete,
    Insert,
}

impl Delta {
    /// The change that, composed onto `self`, yields `other`. Both sides
    /// must be document deltas.
    pub fn diff(&self, other: &Delta) -> Result<Delta, DeltaError> {
        if !self.is_document() || !other.is_document() {
            return Err(DeltaError::NotADocument);
        }
        let mut out = Delta::new();
        if self == other {
            return Ok(out);
        }
        let a_chars: Vec<char> = self.text().chars().collect();
        let b_chars: Vec<char> = other.text().chars().collect();
        let mut a_iter = self.iter();
        let mut b_iter = other.iter();
        for (kind, run) in edit_script(&a_chars, &b_chars) {
            let mut remaining = run;
            while remaining > 0 {
                match kind {
                    Chunk::Insert => {
                        let len = remaining.min(b_iter.peek_len());
                        out.push(b_iter.next_slice(len));
                        remaining -= len;
                    }
                    Chunk::Delete => {
                        let len = remaining.min(a_iter.peek_len());
                        a_iter.next_slice(len);
                        out.push(Op::delete(len));
                        remaining -= len;
                    }
                    Chunk::Equal => {
                        let len = remaining.min(a_iter.peek_len()).min(b_iter.peek_len());
                        let a_op = a_iter.next_slice(len);
                        let b_op = b_iter.next_slice(len);
                        if insert_values_match(&a_op, &b_op) {
                            out.push(Op::Retain {
                                count: len,
                                attributes: diff_attributes(
                                    a_op.attributes(),
                                    b_op.attributes(),
                                ),
                            });
                        } else {
                            // Distinct embeds behind the same sentinel.
                            out.push(Op::delete(len));
                            out.push(b_op);
                        }
                        remaining -= len;
                    }
                }
            }
        }
        out.chop();
        Ok(out)
    }
}

fn insert_values_match(a: &Op, b: &Op) -> bool {
    match (a, b) {
        (Op::Insert { value: a, .. }, Op::Insert { value: b, .. }) => a == b,
        _ => false,
    }
}

/// Run-length edit script between two character sequences: trims the common
/// prefix and suffix, then backtracks an LCS table over the middle.
fn edit_script(a: &[char], b: &[char]) -> Vec<(Chunk, usize)> {
    let prefix = a
        .iter()
        .zip(b.iter())
        .take_while(|(x, y)| x == y)
        .count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let mut script = Vec::new();
    if prefix > 0 {
        script.push((Chunk::Equal, prefix));
    }
    script.extend(lcs_script(
        &a[prefix..a.len() - suffix],
        &b[prefix..b.len() - suffix],
    ));
    if suffix > 0 {
        script.push((Chunk::Equal, suffix));
    }
    script
}

fn lcs_script(a: &[char], b: &[char]) -> Vec<(Chunk, usize)> {
    if a.is_empty() && b.is_empty() {
        return Vec::new();
    }
    if a.is_empty() {
        return vec![(Chunk::Insert, b.len())];
    }
    if b.is_empty() {
        return vec![(Chunk::Delete, a.len())];
    }
    // The quadratic table is bounded to keep pathological inputs from
    // exhausting memory; beyond the cap the middle is replaced wholesale.
    const MAX_CELLS: usize = 4_000_000;
    if a.len().saturating_mul(b.len()) > MAX_CELLS {
        return vec![(Chunk::Delete, a.len()), (Chunk::Insert, b.len())];
    }

    let cols = b.len() + 1;
    let mut table = vec![0u32; (a.len() + 1) * cols];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            table[i * cols + j] = if a[i - 1] == b[j - 1] {
                table[(i - 1) * cols + (j - 1)] + 1
            } else {
                table[(i - 1) * cols + j].max(table[i * cols + (j - 1)])
            };
        }
    }

    let mut reversed: Vec<(Chunk, usize)> = Vec::new();
    let (mut i, mut j) = (a.len(), b.len());
    while i > 0 && j > 0 {
        if a[i - 1] == b[j - 1] {
            push_run(&mut reversed, Chunk::Equal);
            i -= 1;
            j -= 1;
        } else if table[(i - 1) * cols + j] >= table[i * cols + (j - 1)] {
            push_run(&mut reversed, Chunk::Delete);
            i -= 1;
        } else {
            push_run(&mut reversed, Chunk::Insert);
            j -= 1;
        }
    }
    while i > 0 {
        push_run(&mut reversed, Chunk::Delete);
        i -= 1;
    }
    while j > 0 {
        push_run(&mut reversed, Chunk::Insert);
        j -= 1;
    }
    reversed.reverse();
    reversed
}

fn push_run(runs: &mut Vec<(Chunk, usize)>, kind: Chunk) {
    match runs.last_mut() {
        Some((last, count)) if *last == kind => *count += 1,
        _ => runs.push((kind, 1)),
    }
}
