//! Stream blocks: the unit of hand-off to the consumer.

use bytes::BytesMut;
use snafu::Snafu;

/// Error that occurred during calls to [`StreamBlock`].
#[derive(Debug, Snafu)]
pub enum BlockError {
    /// The requested reservation does not fit in the block.
    #[snafu(display(
        "reserve of {needed} bytes exceeds block capacity ({occupied} of {capacity} in use)"
    ))]
    CapacityExceeded {
        needed: usize,
        occupied: usize,
        capacity: usize,
    },
}

/// A fixed-capacity, contiguous segment of the export stream.
///
/// A block tracks two cursors over its owned byte region: the write offset,
/// and the committed offset below which bytes are irrevocable. Bytes between
/// the two cursors belong to a transaction that has not yet been observed as
/// committed and may be truncated away by rollback. The starting USO and the
/// generation tag are fixed at creation; a generation change always forces a
/// new block, so the tag is authoritative for every byte the block holds.
///
/// Blocks are created by the stream buffer and owned by it until they are
/// cut, at which point ownership transfers to the consumer.
#[derive(Debug)]
pub struct StreamBlock {
    id: u64,
    uso: u64,
    generation: i64,
    capacity: usize,
    committed_offset: usize,
    data: BytesMut,
}

impl StreamBlock {
    pub(crate) fn new(id: u64, uso: u64, capacity: usize, generation: i64) -> Self {
        StreamBlock {
            id,
            uso,
            generation,
            capacity,
            committed_offset: 0,
            data: BytesMut::with_capacity(capacity),
        }
    }

    /// Buffer-assigned identity, used by rollback marks to survive cuts.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// USO of the first byte this block holds.
    pub fn uso(&self) -> u64 {
        self.uso
    }

    /// USO one past the last byte written.
    pub fn end_uso(&self) -> u64 {
        self.uso + self.data.len() as u64
    }

    /// Generation tag in effect when the block was created.
    pub fn generation(&self) -> i64 {
        self.generation
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes written so far.
    pub fn offset(&self) -> usize {
        self.data.len()
    }

    /// High-water mark below which bytes are irrevocable.
    pub fn committed_offset(&self) -> usize {
        self.committed_offset
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_fully_committed(&self) -> bool {
        self.committed_offset == self.data.len()
    }

    /// The serialized rows held by this block.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Reserves `len` writable bytes at the current offset, advancing it.
    ///
    /// # Errors
    ///
    /// Fails with [`BlockError::CapacityExceeded`] if the reservation would
    /// overrun the block's capacity; the block is left unchanged.
    pub(crate) fn reserve(&mut self, len: usize) -> Result<&mut [u8], BlockError> {
        let start = self.data.len();
        if start + len > self.capacity {
            return CapacityExceededSnafu {
                needed: len,
                occupied: start,
                capacity: self.capacity,
            }
            .fail();
        }
        self.data.resize(start + len, 0);
        Ok(&mut self.data[start..])
    }

    /// Raises the committed high-water mark to `up_to`, if higher.
    pub(crate) fn mark_committed(&mut self, up_to: usize) {
        debug_assert!(up_to <= self.data.len(), "commit mark past write offset");
        self.committed_offset = self.committed_offset.max(up_to);
    }

    /// Truncates the writable tail back to `offset`.
    ///
    /// Only uncommitted bytes may be discarded; the caller validates the
    /// mark against the committed offset before truncating.
    pub(crate) fn truncate_to(&mut self, offset: usize) {
        assert!(
            offset >= self.committed_offset,
            "truncation below the committed offset"
        );
        assert!(offset <= self.data.len(), "truncation past the write offset");
        self.data.truncate(offset);
    }
}
