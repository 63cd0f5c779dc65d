//! The transactional export stream buffer
//!
//! This library implements the export path of a partitioned storage engine.
//! Row mutations produced by transaction execution are serialized into a
//! compact fixed-width framing and packed into fixed-size stream blocks. A
//! block is handed to the consumer only once every byte it carries is known
//! to belong to a committed transaction; the uncommitted tail of the stream
//! stays writable and can be truncated in place when a transaction rolls
//! back.
//!
//! Every byte ever produced is addressed by its Universal Stream Offset
//! (USO), a monotonically non-decreasing 64-bit counter that never resets
//! for the lifetime of the partition. Consumers use the USO ranges of
//! successive blocks for ordering and gap detection.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

#[macro_use]
extern crate tracing;

mod block;
mod buffer;
pub mod config;
mod row;
pub mod schema;
mod topend;

#[cfg(test)]
mod test;

pub use block::{BlockError, StreamBlock};
pub use buffer::{StreamBuffer, StreamBufferError, StreamMark};
pub use config::StreamBufferConfig;
pub use row::{Datum, ExportOperation, RowMetadata};
pub use schema::{ColumnType, ExportSchema};
pub use topend::TopEnd;
