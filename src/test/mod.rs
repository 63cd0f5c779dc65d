use crate::{
    config::StreamBufferConfig,
    row::{Datum, ExportOperation, RowMetadata},
    schema::{ColumnType, ExportSchema},
    StreamBlock, StreamBuffer, TopEnd,
};


/*
    Helper code for getting tracing data from a failing test:

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .init();
*/

pub(crate) const TEST_BLOCK_CAPACITY: usize = 1024;
/// Serialized size of one row of the five-integer-column test schema.
pub(crate) const TEST_ROW_SIZE: usize = 94;
pub(crate) const TEST_PARTITION: i32 = 2;
pub(crate) const TEST_SITE: i32 = 1;
pub(crate) const TEST_SIGNATURE: &str = "export_test";

/// Everything the buffer handed over in one push call.
pub(crate) struct PushedBlock {
    pub generation: i64,
    pub partition_id: i32,
    pub signature: String,
    pub column_names: Vec<String>,
    pub sync: bool,
    pub end_of_stream: bool,
    pub block: StreamBlock,
}

/// A [`TopEnd`] that just collects what it is given.
#[derive(Default)]
pub(crate) struct CollectingTopEnd {
    pub pushed: Vec<PushedBlock>,
}

impl TopEnd for CollectingTopEnd {
    fn push_export_buffer(
        &mut self,
        generation: i64,
        partition_id: i32,
        signature: &str,
        column_names: &[String],
        block: StreamBlock,
        sync: bool,
        end_of_stream: bool,
    ) {
        self.pushed.push(PushedBlock {
            generation,
            partition_id,
            signature: signature.to_owned(),
            column_names: column_names.to_vec(),
            sync,
            end_of_stream,
            block,
        });
    }

    fn queued_export_bytes(&self) -> u64 {
        self.pushed.iter().map(|p| p.block.offset() as u64).sum()
    }
}

pub(crate) fn five_integer_schema() -> ExportSchema {
    ExportSchema::new((0..5).map(|i| (format!("c{i}"), ColumnType::Integer)))
}

pub(crate) fn test_buffer() -> StreamBuffer<CollectingTopEnd> {
    test_buffer_with_capacity(TEST_BLOCK_CAPACITY)
}

pub(crate) fn test_buffer_with_capacity(capacity: usize) -> StreamBuffer<CollectingTopEnd> {
    let config = StreamBufferConfig::for_partition(TEST_SIGNATURE, TEST_PARTITION, TEST_SITE)
        .default_capacity(capacity)
        .build();
    StreamBuffer::new(config, five_integer_schema(), CollectingTopEnd::default())
}

pub(crate) fn row_metadata(txn_id: i64) -> RowMetadata {
    RowMetadata {
        seq_no: txn_id,
        partition_id: TEST_PARTITION,
        timestamp: txn_id * 10,
        operation: ExportOperation::Insert,
    }
}

pub(crate) fn test_values() -> [Datum; 5] {
    [Some(1), Some(2), Some(3), None, Some(5)]
}

pub(crate) fn append_row(
    buffer: &mut StreamBuffer<CollectingTopEnd>,
    last_committed_txn: i64,
    txn_id: i64,
    generation: i64,
) {
    buffer
        .append(
            last_committed_txn,
            txn_id,
            generation,
            &row_metadata(txn_id),
            &test_values(),
        )
        .expect("append should not fail");
}

/// The exact bytes `append_row` produces for the given transaction.
pub(crate) fn serialized_row(txn_id: i64) -> Vec<u8> {
    let schema = five_integer_schema();
    let mut buf = Vec::with_capacity(schema.serialized_row_size());
    crate::row::serialize_row(
        &schema,
        txn_id,
        TEST_SITE,
        &row_metadata(txn_id),
        &test_values(),
        &mut buf,
    );
    buf
}

pub(crate) fn assert_pushed(pushed: &PushedBlock, uso: u64, generation: i64, offset: usize) {
    assert_eq!(
        pushed.block.uso(),
        uso,
        "pushed block should start at USO {uso}, started at {}",
        pushed.block.uso()
    );
    assert_eq!(
        pushed.block.generation(),
        generation,
        "pushed block should carry generation {generation}, carried {}",
        pushed.block.generation()
    );
    assert_eq!(
        pushed.block.offset(),
        offset,
        "pushed block should hold {offset} bytes, held {}",
        pushed.block.offset()
    );
    assert_eq!(
        pushed.generation,
        pushed.block.generation(),
        "push generation should match the block tag"
    );
    assert_eq!(pushed.partition_id, TEST_PARTITION);
}
