#![deny(missing_docs)]
//! Basket storage and entry resolution for Arbor trees.
//!
//! A tree is a table of entries stored column by column. Each column is a [`Branch`] whose
//! values are split into independently compressed records called baskets. A branch keeps three
//! parallel tables describing its flushed baskets (sizes, first entries and positions), which
//! [`Branch::spans`] turns into a list of [`Span`]s partitioning the entries of the branch.
//!
//! # Reading
//!
//! A [`TreeReader`] binds leaves to typed destinations and iterates the entries of a range.
//! Sequential iteration runs one [`Prefetcher`] per bound branch, decoding the next baskets on
//! a background thread while the current one is consumed. Random access with
//! [`TreeReader::read_entry`] goes through a [`BranchCursor`], which loads the basket holding
//! an entry synchronously.
//!
//! # Writing
//!
//! A [`TreeWriter`] buffers the values of every branch in a basket until it reaches the basket
//! size, then appends the encoded basket to a [`RecordSink`](arbor_io::RecordSink) and records
//! its location in the branch tables. Closing the writer returns the [`Tree`] and its encoded
//! record, to be stored by the enclosing container.
//!
//! # Records
//!
//! Metadata records are versioned: decoders accept every version they know, read the fields a
//! version carries, and check the byte count declared by the record header. Encoders always
//! write the newest version.

pub use arena::*;
pub use basket::*;
pub use branch::*;
pub use codec::*;
pub use cursor::*;
pub use key::*;
pub use leaf::*;
pub use options::*;
pub use prefetch::*;
pub use reader::*;
pub use span::*;
pub use tree::*;
pub use writer::*;

mod arena;
mod basket;
mod branch;
mod codec;
mod cursor;
mod key;
mod leaf;
pub mod metrics;
mod options;
mod prefetch;
mod reader;
mod span;
mod tree;
pub mod wire;
mod writer;

#[cfg(test)]
mod tests;
