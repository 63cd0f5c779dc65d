//! The consumer boundary for completed stream blocks.

use crate::block::StreamBlock;

/// Receives completed stream blocks for durable persistence and downstream
/// delivery.
///
/// The buffer hands blocks over synchronously on the partition's execution
/// thread; implementations that need asynchrony are expected to enqueue
/// behind this interface. Blocks arrive in strict USO order with contiguous,
/// non-overlapping ranges.
pub trait TopEnd {
    /// Takes ownership of a completed block.
    ///
    /// `sync` requests a durability fence before the push is considered
    /// delivered. `end_of_stream` signals that no further blocks will be
    /// pushed under this block's generation.
    #[allow(clippy::too_many_arguments)]
    fn push_export_buffer(
        &mut self,
        generation: i64,
        partition_id: i32,
        signature: &str,
        column_names: &[String],
        block: StreamBlock,
        sync: bool,
        end_of_stream: bool,
    );

    /// Bytes currently queued behind the consumer, for upstream throttling.
    /// Strictly informational; the buffer itself never blocks on it.
    fn queued_export_bytes(&self) -> u64 {
        0
    }
}
