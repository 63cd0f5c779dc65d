//! Stream buffer configuration.

use serde::{Deserialize, Serialize};

/// Default block capacity. There's nothing magic about 2MB, it's simply a
/// comfortable unit for the persistence layer to batch; deployments tune it
/// per stream.
pub const DEFAULT_BLOCK_CAPACITY: usize = 2 * 1024 * 1024;

/// Per-partition configuration of an export stream buffer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamBufferConfig {
    /// Opaque identifier of the logical stream this buffer feeds.
    pub(crate) signature: String,
    /// Partition this buffer belongs to. Stamped into every row's metadata
    /// and carried alongside every pushed block.
    pub(crate) partition_id: i32,
    /// Site executing this partition.
    pub(crate) site_id: i32,
    /// Capacity of blocks created by the buffer.
    pub(crate) default_capacity: usize,
    /// Generation tag the stream starts under.
    pub(crate) initial_generation: i64,
}

impl StreamBufferConfig {
    pub fn for_partition<S>(signature: S, partition_id: i32, site_id: i32) -> StreamBufferConfigBuilder
    where
        S: Into<String>,
    {
        StreamBufferConfigBuilder {
            signature: signature.into(),
            partition_id,
            site_id,
            default_capacity: None,
            initial_generation: None,
        }
    }
}

/// Builder for [`StreamBufferConfig`].
pub struct StreamBufferConfigBuilder {
    signature: String,
    partition_id: i32,
    site_id: i32,
    default_capacity: Option<usize>,
    initial_generation: Option<i64>,
}

impl StreamBufferConfigBuilder {
    /// Sets the capacity, in bytes, of blocks created by the buffer.
    ///
    /// A serialized row must fit in a single block, so this bounds the
    /// largest appendable row. Defaults to 2MB.
    pub fn default_capacity(mut self, bytes: usize) -> Self {
        self.default_capacity = Some(bytes);
        self
    }

    /// Sets the generation tag the stream starts under.
    ///
    /// Defaults to 0.
    pub fn initial_generation(mut self, generation: i64) -> Self {
        self.initial_generation = Some(generation);
        self
    }

    /// Consumes this builder and constructs a [`StreamBufferConfig`].
    pub fn build(self) -> StreamBufferConfig {
        StreamBufferConfig {
            signature: self.signature,
            partition_id: self.partition_id,
            site_id: self.site_id,
            default_capacity: self.default_capacity.unwrap_or(DEFAULT_BLOCK_CAPACITY),
            initial_generation: self.initial_generation.unwrap_or(0),
        }
    }
}
