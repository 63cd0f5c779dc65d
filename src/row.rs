//! Row serialization into the fixed export framing.
//!
//! Each row is emitted as:
//!
//!   `row_length`: int32, big-endian, excludes itself
//!   `null_mask`:  one bit per column, metadata columns first, MSB-first
//!   metadata:     six int64 columns, big-endian, in declared order
//!   user columns: fixed-width big-endian payloads, in schema order
//!
//! The serializer is pure: it writes through a caller-supplied cursor that
//! has already been sized to exactly [`ExportSchema::serialized_row_size`]
//! bytes, and allocates nothing.

use bytes::BufMut;

use crate::schema::{ExportSchema, METADATA_COLUMN_COUNT, ROW_LENGTH_PREFIX_WIDTH};

/// A single exported column value.
///
/// The export framing carries only fixed-width integer-family columns, and
/// every value is widened to 64 bits before hitting the wire. `None` marks
/// the column null in the row's null mask; a null column still occupies its
/// full width, zero-filled, so rows keep a fixed size.
pub type Datum = Option<i64>;

/// Kind of mutation an exported row represents.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExportOperation {
    Insert,
    Delete,
}

impl ExportOperation {
    pub(crate) const fn wire_value(self) -> i64 {
        match self {
            ExportOperation::Insert => 1,
            ExportOperation::Delete => 2,
        }
    }
}

/// Executor-supplied metadata serialized ahead of a row's user columns.
///
/// The transaction id comes in through the append call itself and the site
/// id is a property of the buffer; everything else rides here.
#[derive(Clone, Copy, Debug)]
pub struct RowMetadata {
    /// Per-stream sequence number of the row.
    pub seq_no: i64,
    /// Partition the mutation executed on.
    pub partition_id: i32,
    /// Wall-clock timestamp assigned by the executor.
    pub timestamp: i64,
    pub operation: ExportOperation,
}

/// Serializes one row into `buf`.
///
/// The caller validates the value count against the schema and reserves
/// exactly `schema.serialized_row_size()` bytes before calling.
pub(crate) fn serialize_row<B: BufMut>(
    schema: &ExportSchema,
    txn_id: i64,
    site_id: i32,
    meta: &RowMetadata,
    values: &[Datum],
    buf: &mut B,
) {
    debug_assert_eq!(
        values.len(),
        schema.column_count(),
        "value count must match the schema"
    );

    let row_length = schema.serialized_row_size() - ROW_LENGTH_PREFIX_WIDTH;
    let row_length: i32 = row_length
        .try_into()
        .expect("row length should always fit into an i32");
    buf.put_i32(row_length);

    // Metadata columns are never null, so only user bits can be set.
    for byte_index in 0..schema.null_mask_width() {
        let mut mask_byte = 0u8;
        for bit in 0..8 {
            let column = byte_index * 8 + bit;
            if column < METADATA_COLUMN_COUNT {
                continue;
            }
            let user_column = column - METADATA_COLUMN_COUNT;
            if user_column < values.len() && values[user_column].is_none() {
                mask_byte |= 0x80 >> bit;
            }
        }
        buf.put_u8(mask_byte);
    }

    buf.put_i64(txn_id);
    buf.put_i64(meta.timestamp);
    buf.put_i64(meta.seq_no);
    buf.put_i64(i64::from(meta.partition_id));
    buf.put_i64(i64::from(site_id));
    buf.put_i64(meta.operation.wire_value());

    for value in values {
        buf.put_i64(value.unwrap_or(0));
    }
}
