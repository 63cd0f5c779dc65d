//! The transactional stream buffer.
//!
//! The buffer owns every block between creation and hand-off. At any moment
//! the locally held blocks form an ordered chain: zero or more *pending*
//! blocks filled by a still-open transaction, then the single writable block
//! at the tail. Pending blocks exist only while one transaction's bytes span
//! more than a block's worth of stream; they are promoted and pushed the
//! moment the transaction is observed committed, and discarded wholesale if
//! it rolls back. This is what keeps "roll back a transaction that filled
//! several blocks" a cheap, in-memory operation.

use std::{cmp, collections::VecDeque};

use metrics::{counter, gauge};
use snafu::{ensure, Snafu};

use crate::{
    block::StreamBlock,
    config::StreamBufferConfig,
    row::{self, Datum, RowMetadata},
    schema::ExportSchema,
    topend::TopEnd,
};

/// Error that occurred during calls to [`StreamBuffer`].
///
/// Every variant is a programmer error or a resource misconfiguration; none
/// are retried internally, and a failed call leaves the buffer in the state
/// it was in before the call.
#[derive(Debug, Snafu)]
pub enum StreamBufferError {
    /// The serialized row can never fit in a block.
    #[snafu(display(
        "serialized row of {size} bytes exceeds the block capacity of {capacity} bytes"
    ))]
    RowTooLarge { size: usize, capacity: usize },

    /// The row's value count does not match the stream's schema.
    #[snafu(display("row has {got} values but the export schema declares {want} user columns"))]
    SchemaMismatch { got: usize, want: usize },

    /// The rollback mark points below the irrevocable portion of the stream,
    /// either bytes already released to the consumer or bytes of a
    /// committed transaction.
    #[snafu(display(
        "rollback mark at USO {mark_uso} precedes the irrevocable stream floor at USO {floor_uso}"
    ))]
    RollbackTooFar { mark_uso: u64, floor_uso: u64 },

    /// A stream identity update moved the generation backwards.
    #[snafu(display("generation {requested} is behind the current generation {current}"))]
    GenerationRegression { requested: i64, current: i64 },

    /// An append named a transaction older than the open one.
    #[snafu(display("transaction {txn_id} is behind the open transaction {open_txn_id}"))]
    TransactionRegression { txn_id: i64, open_txn_id: i64 },

    /// The block capacity may only change while the buffer holds no bytes.
    #[snafu(display(
        "default capacity may only change while the buffer is empty ({allocated} bytes allocated)"
    ))]
    CapacityMisconfig { allocated: u64 },
}

/// An opaque rollback mark.
///
/// A mark names the block that was writable when it was captured and the
/// write offset within it, not just a byte count; a scalar would lose block
/// identity once an open transaction rolls across blocks. The absolute USO
/// rides along so a mark stays interpretable at the boundary of a block
/// that has since been cut.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StreamMark {
    block: Option<u64>,
    offset: usize,
    uso: u64,
}

impl StreamMark {
    /// Absolute stream position of the mark.
    pub fn uso(&self) -> u64 {
        self.uso
    }
}

/// The export stream buffer of one partition.
///
/// Accepts per-row appends from the transaction executor, enforces
/// transactional and generational boundaries, and cuts completed blocks
/// through to the [`TopEnd`]. Single-threaded by design: the buffer is owned
/// by the partition's execution context, every operation runs to completion,
/// and pushes happen synchronously on the caller.
pub struct StreamBuffer<T> {
    top_end: T,
    schema: ExportSchema,
    signature: String,
    partition_id: i32,
    site_id: i32,
    default_capacity: usize,
    generation: i64,
    /// Transaction whose bytes occupy the uncommitted tail, if any.
    open_txn_id: Option<i64>,
    /// Highest transaction id known committed.
    last_committed_txn_id: i64,
    /// Locally owned blocks, oldest first; the back one is writable.
    blocks: VecDeque<StreamBlock>,
    /// USO of the next byte to be produced.
    head_uso: u64,
    next_block_id: u64,
}

impl<T: TopEnd> StreamBuffer<T> {
    pub fn new(config: StreamBufferConfig, schema: ExportSchema, top_end: T) -> Self {
        StreamBuffer {
            top_end,
            schema,
            signature: config.signature,
            partition_id: config.partition_id,
            site_id: config.site_id,
            default_capacity: config.default_capacity,
            generation: config.initial_generation,
            open_txn_id: None,
            last_committed_txn_id: i64::MIN,
            blocks: VecDeque::new(),
            head_uso: 0,
            next_block_id: 0,
        }
    }

    /// Serializes one row into the stream.
    ///
    /// `last_committed_txn` is the executor's current commit point: if it
    /// covers the open transaction, that transaction's tail is absorbed into
    /// the committed prefix before anything else happens. A `generation`
    /// ahead of the buffer's forces an end-of-stream cut first; a stale tag
    /// simply joins the current generation, since rows serialized under an
    /// older catalog may legitimately trail an export-window advance.
    ///
    /// # Errors
    ///
    /// Fails with `RowTooLarge` if the serialized row exceeds the block
    /// capacity, `SchemaMismatch` if the value count disagrees with the
    /// schema, and `TransactionRegression` if `txn_id` is behind the open
    /// transaction. The buffer is unchanged on failure.
    #[instrument(skip(self, meta, values), level = "trace")]
    pub fn append(
        &mut self,
        last_committed_txn: i64,
        txn_id: i64,
        generation: i64,
        meta: &RowMetadata,
        values: &[Datum],
    ) -> Result<(), StreamBufferError> {
        let row_size = self.schema.serialized_row_size();
        ensure!(
            row_size <= self.default_capacity,
            RowTooLargeSnafu {
                size: row_size,
                capacity: self.default_capacity,
            }
        );
        ensure!(
            values.len() == self.schema.column_count(),
            SchemaMismatchSnafu {
                got: values.len(),
                want: self.schema.column_count(),
            }
        );
        if let Some(open) = self.open_txn_id {
            ensure!(
                txn_id >= open,
                TransactionRegressionSnafu {
                    txn_id,
                    open_txn_id: open,
                }
            );
        }

        self.last_committed_txn_id = cmp::max(self.last_committed_txn_id, last_committed_txn);
        self.absorb_committed(false);

        if generation > self.generation {
            self.cut_for_generation_change(generation);
        }

        self.ensure_writable(row_size);

        let block = self
            .blocks
            .back_mut()
            .expect("writable block should exist after ensure_writable");
        let mut cursor = block
            .reserve(row_size)
            .expect("row should fit after ensure_writable");
        row::serialize_row(&self.schema, txn_id, self.site_id, meta, values, &mut cursor);

        self.open_txn_id = Some(txn_id);
        self.head_uso += row_size as u64;
        self.update_allocated_gauge();
        Ok(())
    }

    /// Externally triggered flush tick.
    ///
    /// Raises the commit point to `committed_through_txn`, absorbing the
    /// open transaction's tail if it is now covered, then cuts and pushes
    /// whatever is fully committed. A block with an open tail is left in
    /// place. A negative `sync_hint` requests a durability fence on the
    /// pushes this flush performs.
    #[instrument(skip(self), level = "trace")]
    pub fn periodic_flush(&mut self, sync_hint: i64, committed_through_txn: i64, current_txn: i64) {
        let sync = sync_hint < 0;
        trace!(sync, committed_through_txn, current_txn, "periodic flush");

        self.last_committed_txn_id =
            cmp::max(self.last_committed_txn_id, committed_through_txn);
        self.absorb_committed(sync);

        if self.open_txn_id.is_none() && self.blocks.back().is_some_and(|b| !b.is_empty()) {
            let block = self
                .blocks
                .pop_back()
                .expect("non-empty writable block checked above");
            self.push_block(block, sync, false);
        }
    }

    /// Truncates the stream back to a previously captured mark.
    ///
    /// Everything appended after the mark is discarded: the writable block
    /// is truncated in place, and any blocks the open transaction rolled
    /// into after the mark are dropped wholesale, their memory returned.
    /// Clears the open transaction.
    ///
    /// # Errors
    ///
    /// Fails with `RollbackTooFar` if the mark reaches below the
    /// irrevocable stream floor: bytes already pushed, or bytes of a
    /// committed transaction. The buffer is unchanged on failure.
    #[instrument(skip(self), level = "trace")]
    pub fn rollback_to(&mut self, mark: StreamMark) -> Result<(), StreamBufferError> {
        let held = mark
            .block
            .and_then(|id| self.blocks.iter().position(|b| b.id() == id));

        let dropped = match held {
            Some(position) => {
                let block = &self.blocks[position];
                ensure!(
                    mark.offset >= block.committed_offset(),
                    RollbackTooFarSnafu {
                        mark_uso: mark.uso,
                        floor_uso: block.uso() + block.committed_offset() as u64,
                    }
                );
                debug_assert!(
                    mark.offset <= block.offset(),
                    "rollback mark is ahead of the write offset"
                );

                let mut dropped = 0u64;
                while self.blocks.len() > position + 1 {
                    let trailing = self
                        .blocks
                        .pop_back()
                        .expect("blocks behind the marked block");
                    debug_assert_eq!(
                        trailing.committed_offset(),
                        0,
                        "blocks behind a live mark belong to the open transaction"
                    );
                    dropped += trailing.offset() as u64;
                }
                let block = self
                    .blocks
                    .back_mut()
                    .expect("marked block is still held");
                dropped += (block.offset() - mark.offset) as u64;
                block.truncate_to(mark.offset);
                dropped
            }
            None => {
                // The marked block has already been cut; the mark is only
                // usable if it sits exactly on the released boundary and
                // nothing held below it is committed.
                let (boundary, committed_floor) = match self.blocks.front() {
                    Some(first) => (
                        first.uso(),
                        first.uso() + first.committed_offset() as u64,
                    ),
                    None => (self.head_uso, self.head_uso),
                };
                ensure!(
                    mark.uso == boundary && committed_floor == boundary,
                    RollbackTooFarSnafu {
                        mark_uso: mark.uso,
                        floor_uso: committed_floor,
                    }
                );
                let dropped = self.allocated_byte_count();
                self.blocks.clear();
                dropped
            }
        };

        self.head_uso -= dropped;
        self.open_txn_id = None;
        if dropped > 0 {
            counter!(
                "export_stream_discarded_bytes_total",
                "partition" => self.partition_id.to_string()
            )
            .increment(dropped);
            debug!(dropped, uso = mark.uso, "stream rolled back");
        }
        self.update_allocated_gauge();
        Ok(())
    }

    /// Updates the stream identity, cutting the old stream with an
    /// end-of-stream marker.
    ///
    /// Rows of the open transaction already covered by the known commit
    /// point are absorbed first; a still-uncommitted tail is silently
    /// discarded, to be replayed by the executor under the new generation.
    /// The final block of the old stream is pushed even if it is empty, so
    /// the consumer always observes the end-of-stream signal.
    ///
    /// # Errors
    ///
    /// Fails with `GenerationRegression` if `generation` is behind the
    /// buffer's current generation.
    #[instrument(skip(self), level = "debug")]
    pub fn set_signature_and_generation(
        &mut self,
        signature: &str,
        generation: i64,
    ) -> Result<(), StreamBufferError> {
        ensure!(
            generation >= self.generation,
            GenerationRegressionSnafu {
                requested: generation,
                current: self.generation,
            }
        );

        self.absorb_committed(false);
        self.discard_uncommitted_tail();
        debug_assert!(
            self.blocks.len() <= 1,
            "at most the writable block survives the discard"
        );

        let block = match self.blocks.pop_front() {
            Some(block) => block,
            // Nothing is open; emit an empty block so the consumer still
            // observes end-of-stream for the old generation.
            None => self.new_block(),
        };
        self.push_block(block, false, true);

        debug!(
            signature,
            generation,
            previous = self.generation,
            "stream identity updated"
        );
        self.signature = signature.to_owned();
        self.generation = generation;
        Ok(())
    }

    /// Captures a rollback mark at the current write position.
    pub fn bytes_used(&self) -> StreamMark {
        match self.blocks.back() {
            Some(block) => StreamMark {
                block: Some(block.id()),
                offset: block.offset(),
                uso: block.end_uso(),
            },
            None => StreamMark {
                block: None,
                offset: 0,
                uso: self.head_uso,
            },
        }
    }

    /// Total bytes held by blocks not yet handed to the consumer.
    pub fn allocated_byte_count(&self) -> u64 {
        self.blocks.iter().map(|b| b.offset() as u64).sum()
    }

    /// Changes the capacity of blocks created from here on.
    ///
    /// # Errors
    ///
    /// Fails with `CapacityMisconfig` unless the buffer holds no bytes.
    pub fn set_default_capacity(&mut self, bytes: usize) -> Result<(), StreamBufferError> {
        let allocated = self.allocated_byte_count();
        ensure!(allocated == 0, CapacityMisconfigSnafu { allocated });
        // Any held block is empty; recreate it lazily at the new size.
        self.blocks.clear();
        self.default_capacity = bytes;
        Ok(())
    }

    pub fn generation(&self) -> i64 {
        self.generation
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn top_end(&self) -> &T {
        &self.top_end
    }

    pub fn top_end_mut(&mut self) -> &mut T {
        &mut self.top_end
    }

    /// Absorbs the open transaction into the committed prefix if the known
    /// commit point covers it, then promotes the pending chain: every block
    /// ahead of the writable one is full and now entirely committed, so it
    /// is pushed in stream order.
    fn absorb_committed(&mut self, sync: bool) {
        let Some(open) = self.open_txn_id else {
            return;
        };
        if self.last_committed_txn_id < open {
            return;
        }

        for block in &mut self.blocks {
            let offset = block.offset();
            block.mark_committed(offset);
        }
        self.open_txn_id = None;
        trace!(txn_id = open, "open transaction absorbed into committed prefix");

        while self.blocks.len() > 1 {
            let block = self
                .blocks
                .pop_front()
                .expect("chain has more than one block");
            self.push_block(block, sync, false);
        }
    }

    /// Makes sure the writable block can take `row_size` more bytes.
    fn ensure_writable(&mut self, row_size: usize) {
        if self.blocks.is_empty() {
            let block = self.new_block();
            self.blocks.push_back(block);
            return;
        }

        let back = self.blocks.back().expect("non-empty checked above");
        if back.offset() + row_size <= back.capacity() {
            return;
        }

        if back.is_fully_committed() {
            debug_assert_eq!(
                self.blocks.len(),
                1,
                "a fully committed block never trails a pending chain"
            );
            let block = self.blocks.pop_back().expect("writable block is held");
            self.push_block(block, false, false);
        } else {
            // The open transaction's bytes must stay rollback-eligible, so
            // the filled block parks in the pending chain instead of being
            // pushed.
            trace!(
                held_blocks = self.blocks.len() + 1,
                "open transaction rolling into a fresh block"
            );
        }
        let block = self.new_block();
        self.blocks.push_back(block);
    }

    /// Cuts the stream for a generation advance observed on an appended row.
    ///
    /// Unlike a signature update, this path does not push an empty block:
    /// with nothing written under the old generation there is no stream to
    /// end, and the replacement block simply opens under the new tag.
    fn cut_for_generation_change(&mut self, generation: i64) {
        self.discard_uncommitted_tail();
        debug_assert!(
            self.blocks.len() <= 1,
            "at most the writable block survives the discard"
        );
        if let Some(block) = self.blocks.pop_front() {
            if block.is_empty() {
                drop(block);
            } else {
                self.push_block(block, false, true);
            }
        }
        debug!(
            generation,
            previous = self.generation,
            "generation advanced mid-stream"
        );
        self.generation = generation;
    }

    /// Drops the open transaction's uncommitted bytes: trailing blocks that
    /// hold nothing committed are discarded outright and the remaining
    /// writable block is truncated back to its committed offset.
    fn discard_uncommitted_tail(&mut self) {
        if self.open_txn_id.is_none() {
            return;
        }

        let mut dropped = 0u64;
        while self.blocks.len() > 1
            && self
                .blocks
                .back()
                .is_some_and(|b| b.committed_offset() == 0)
        {
            let block = self.blocks.pop_back().expect("trailing uncommitted block");
            dropped += block.offset() as u64;
        }
        if let Some(block) = self.blocks.back_mut() {
            let committed = block.committed_offset();
            dropped += (block.offset() - committed) as u64;
            block.truncate_to(committed);
        }

        self.head_uso -= dropped;
        self.open_txn_id = None;
        if dropped > 0 {
            counter!(
                "export_stream_discarded_bytes_total",
                "partition" => self.partition_id.to_string()
            )
            .increment(dropped);
            debug!(dropped, "uncommitted tail discarded");
        }
    }

    /// Hands a block to the consumer; ownership transfers at this point.
    fn push_block(&mut self, block: StreamBlock, sync: bool, end_of_stream: bool) {
        debug_assert!(
            block.is_fully_committed(),
            "pushed blocks never carry uncommitted bytes"
        );
        debug!(
            block_id = block.id(),
            uso = block.uso(),
            offset = block.offset(),
            generation = block.generation(),
            end_of_stream,
            "pushing stream block"
        );
        counter!(
            "export_stream_pushed_blocks_total",
            "partition" => self.partition_id.to_string()
        )
        .increment(1);
        counter!(
            "export_stream_pushed_bytes_total",
            "partition" => self.partition_id.to_string()
        )
        .increment(block.offset() as u64);

        self.top_end.push_export_buffer(
            block.generation(),
            self.partition_id,
            &self.signature,
            self.schema.column_names(),
            block,
            sync,
            end_of_stream,
        );
        self.update_allocated_gauge();
    }

    fn new_block(&mut self) -> StreamBlock {
        let id = self.next_block_id;
        self.next_block_id += 1;
        let block = StreamBlock::new(id, self.head_uso, self.default_capacity, self.generation);
        trace!(
            block_id = id,
            uso = self.head_uso,
            generation = self.generation,
            "opened stream block"
        );
        block
    }

    #[allow(clippy::cast_precision_loss)]
    fn update_allocated_gauge(&self) {
        gauge!(
            "export_stream_allocated_bytes",
            "partition" => self.partition_id.to_string()
        )
        .set(self.allocated_byte_count() as f64);
    }
}

impl<T> std::fmt::Debug for StreamBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBuffer")
            .field("signature", &self.signature)
            .field("partition_id", &self.partition_id)
            .field("generation", &self.generation)
            .field("open_txn_id", &self.open_txn_id)
            .field("last_committed_txn_id", &self.last_committed_txn_id)
            .field("held_blocks", &self.blocks.len())
            .field("head_uso", &self.head_uso)
            .finish_non_exhaustive()
    }
}
