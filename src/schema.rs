//! Export schema: the shape of the rows a stream carries.
//!
//! The export framing is fixed-width: a schema fully determines the
//! serialized size of every row, which is what lets the buffer decide block
//! cuts before serializing anything.

use serde::{Deserialize, Serialize};

/// Number of fixed metadata columns prepended to every exported row.
///
/// In declared order: transaction id, timestamp, sequence number, partition
/// id, site id, export operation kind.
pub const METADATA_COLUMN_COUNT: usize = 6;

/// Serialized width, in bytes, of each metadata column.
pub const METADATA_COLUMN_WIDTH: usize = 8;

/// Width of the row-length prefix. The prefix value excludes itself.
pub(crate) const ROW_LENGTH_PREFIX_WIDTH: usize = 4;

/// Logical type of an exported user column.
///
/// Only the fixed-width integer family is exportable. The logical type is
/// retained for catalog fidelity, but every member widens to an 8-byte
/// big-endian signed integer on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Timestamp,
}

impl ColumnType {
    /// Serialized width of this column in the export framing.
    pub const fn export_width(self) -> usize {
        match self {
            ColumnType::TinyInt
            | ColumnType::SmallInt
            | ColumnType::Integer
            | ColumnType::BigInt
            | ColumnType::Timestamp => 8,
        }
    }
}

/// Ordered user-column layout of an export stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportSchema {
    names: Vec<String>,
    types: Vec<ColumnType>,
}

impl ExportSchema {
    /// Creates a schema from `(name, type)` pairs in declared order.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = (S, ColumnType)>,
        S: Into<String>,
    {
        let (names, types) = columns
            .into_iter()
            .map(|(name, ty)| (name.into(), ty))
            .unzip();
        ExportSchema { names, types }
    }

    pub fn column_count(&self) -> usize {
        self.types.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.names
    }

    pub fn column_types(&self) -> &[ColumnType] {
        &self.types
    }

    /// Width of the null-mask bitfield: one bit per column, metadata columns
    /// first, rounded up to a whole byte.
    pub fn null_mask_width(&self) -> usize {
        (METADATA_COLUMN_COUNT + self.types.len() + 7) / 8
    }

    /// Exact serialized size of one row, including the length prefix.
    pub fn serialized_row_size(&self) -> usize {
        ROW_LENGTH_PREFIX_WIDTH
            + self.null_mask_width()
            + METADATA_COLUMN_COUNT * METADATA_COLUMN_WIDTH
            + self
                .types
                .iter()
                .map(|ty| ty.export_width())
                .sum::<usize>()
    }
}
