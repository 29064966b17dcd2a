//! # weft-delta — rich-text delta algebra
//!
//! Pure, deterministic operations over rich-text deltas for operational
//! transformation. A delta is an ordered sequence of insert / retain /
//! delete ops; a delta of inserts alone is a whole document, anything else
//! is an edit.
//!
//! ## Modules
//!
//! - [`op`] — the three-variant operation primitive and its JSON wire form
//! - [`attributes`] — attribute maps with null-preserving removal semantics
//! - [`delta`] — canonical sequences plus `compose`, `transform`, `invert`,
//!   `transform_position`
//! - [`iter`] — the pull-based cursor the walkers are built on
//! - [`blocks`] — `node_id`-addressed block view of a document
//!
//! ## Convergence
//!
//! `transform` satisfies the TP1 property: transforming two concurrent
//! edits against each other yields the same document either way.
//!
//! ```
//! use weft_delta::Delta;
//!
//! let base = Delta::new().insert("Hello World");
//! let alice = Delta::new().retain(5).insert(",");
//! let bob = Delta::new().retain(11).insert("!");
//!
//! assert_eq!(
//!     base.compose(&alice).compose(&alice.transform(&bob, false)),
//!     base.compose(&bob).compose(&bob.transform(&alice, true)),
//! );
//! ```

pub mod attributes;
pub mod blocks;
pub mod delta;
mod diff;
pub mod iter;
pub mod op;

pub use attributes::{
    compose_attributes, diff_attributes, invert_attributes, transform_attributes, AttrValue,
    Attributes,
};
pub use blocks::{blocks, Block, BlockError, Segment, NODE_ID_ATTR};
pub use delta::Delta;
pub use iter::OpIter;
pub use op::{DeltaError, InsertValue, Op, OpKind};
