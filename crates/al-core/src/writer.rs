//! Batch handler that projects records into rows and writes them to a sink.

use crate::accumulator::{BatchHandler, FlushError};
use crate::enrichment::LocationPipe;
use al_telemetry::{BulkSink, Record, Row, TableSchema};
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;

/// Writes one entry type to its table and, after a successful write, feeds
/// the batch's distinct source addresses to the location pipe.
pub struct TableWriter<R> {
    sink: Arc<dyn BulkSink>,
    schema: TableSchema,
    locations: Option<Arc<LocationPipe>>,
    _record: PhantomData<fn(R)>,
}

impl<R: Record> TableWriter<R> {
    pub fn new(sink: Arc<dyn BulkSink>, schema: TableSchema) -> Self {
        Self {
            sink,
            schema,
            locations: None,
            _record: PhantomData,
        }
    }

    pub fn with_locations(mut self, pipe: Arc<LocationPipe>) -> Self {
        self.locations = Some(pipe);
        self
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }
}

impl<R: Record> BatchHandler<R> for TableWriter<R> {
    fn handle(&mut self, batch: &[R]) -> Result<(), FlushError> {
        let rows: Vec<Row> = batch.iter().map(Record::project).collect();
        self.sink.write_batch(&self.schema, &rows)?;

        if let Some(pipe) = &self.locations {
            let addresses: BTreeSet<&str> = batch.iter().filter_map(R::source_address).collect();
            if !addresses.is_empty() {
                pipe.submit(addresses);
            }
        }
        Ok(())
    }
}
