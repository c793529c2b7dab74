//! Comma-separated-value file backend
//!
//! Reads a header CSV into record batches. When the catalog carries an
//! interchange schema for the dataset the translated Arrow schema is
//! enforced, so every storage mode of a dataset yields the same column
//! types; otherwise the schema is inferred from the file.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_csv::reader::Format;
use arrow_csv::{ReaderBuilder, WriterBuilder};
use arrow_schema::SchemaRef;
use serde_json::Value;

use crate::backend::{concat_rows, Backend, BackendSpec, ChunkTiming, Discovery};
use crate::error::{Error, Result};
use crate::register_backend;

const DEFAULT_BATCH_SIZE: usize = 8192;

pub struct CsvBackend {
    path: PathBuf,
    schema: Option<SchemaRef>,
    batch_size: usize,
    dtype: Option<serde_json::Map<String, Value>>,
    metadata: serde_json::Map<String, Value>,
}

impl CsvBackend {
    pub fn create(spec: BackendSpec) -> Result<Box<dyn Backend>> {
        let batch_size = spec
            .args
            .get("batch_size")
            .and_then(Value::as_u64)
            .map_or(DEFAULT_BATCH_SIZE, |n| n as usize);
        Ok(Box::new(CsvBackend {
            path: PathBuf::from(&spec.location),
            schema: spec.column_types.as_ref().map(|ct| ct.arrow_schema()),
            batch_size,
            dtype: spec.column_types.as_ref().map(|ct| ct.display_map()),
            metadata: spec.metadata,
        }))
    }

    fn reader_schema(&self) -> Result<SchemaRef> {
        match &self.schema {
            Some(schema) => Ok(schema.clone()),
            None => {
                let file = File::open(&self.path)?;
                let (schema, _) = Format::default()
                    .with_header(true)
                    .infer_schema(file, None)?;
                Ok(Arc::new(schema))
            }
        }
    }

    fn open_reader(&self) -> Result<(SchemaRef, arrow_csv::Reader<File>)> {
        let schema = self.reader_schema()?;
        let file = File::open(&self.path)?;
        let reader = ReaderBuilder::new(schema.clone())
            .with_header(true)
            .with_batch_size(self.batch_size)
            .build(file)?;
        Ok((schema, reader))
    }
}

impl Backend for CsvBackend {
    fn discover(&self) -> Result<Discovery> {
        let schema = self.reader_schema()?;
        Ok(Discovery {
            dtype: self.dtype.clone(),
            shape: (None, Some(schema.fields().len())),
            npartitions: 1,
            metadata: self.metadata.clone(),
        })
    }

    fn read(&self) -> Result<RecordBatch> {
        let (schema, reader) = self.open_reader()?;
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        concat_rows(schema, &batches)
    }

    fn read_partition(&self, index: usize) -> Result<RecordBatch> {
        if index != 0 {
            return Err(Error::PartitionOutOfRange { index, count: 1 });
        }
        self.read()
    }

    fn read_chunked(&self) -> Result<Box<dyn Iterator<Item = Result<RecordBatch>> + Send>> {
        let (_, reader) = self.open_reader()?;
        Ok(Box::new(reader.map(|batch| batch.map_err(Error::from))))
    }

    fn write(&self, rows: &RecordBatch) -> Result<Vec<ChunkTiming>> {
        let file = File::create(&self.path)?;
        let mut writer = WriterBuilder::new().with_header(true).build(file);
        writer.write(rows)?;
        Ok(Vec::new())
    }
}

register_backend!(BACKEND_DRIVER_CSV, scheme: "csv", create: CsvBackend::create);
