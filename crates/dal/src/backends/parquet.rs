//! Columnar-file (parquet) backend
//!
//! Row groups are exposed as partitions. The resolver injects
//! `gather_statistics`/`engine` compatibility defaults for this driver;
//! they mean nothing to the parquet reader here and are accepted and
//! ignored.

use std::fs::File;
use std::path::PathBuf;

use arrow_array::RecordBatch;
use diagnostics::log_debug;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde_json::Value;

use crate::backend::{concat_rows, Backend, BackendSpec, ChunkTiming, Discovery};
use crate::error::{Error, Result};
use crate::register_backend;

pub struct ParquetBackend {
    path: PathBuf,
    dtype: Option<serde_json::Map<String, Value>>,
    metadata: serde_json::Map<String, Value>,
}

impl ParquetBackend {
    pub fn create(spec: BackendSpec) -> Result<Box<dyn Backend>> {
        for key in ["gather_statistics", "engine"] {
            if spec.args.contains_key(key) {
                log_debug!(
                    "Ignoring compatibility argument {key}",
                    key: key.to_string()
                );
            }
        }
        Ok(Box::new(ParquetBackend {
            path: PathBuf::from(&spec.location),
            dtype: spec.column_types.as_ref().map(|ct| ct.display_map()),
            metadata: spec.metadata,
        }))
    }

    fn builder(&self) -> Result<ParquetRecordBatchReaderBuilder<File>> {
        Ok(ParquetRecordBatchReaderBuilder::try_new(File::open(
            &self.path,
        )?)?)
    }
}

impl Backend for ParquetBackend {
    fn partition_access(&self) -> bool {
        true
    }

    fn discover(&self) -> Result<Discovery> {
        let builder = self.builder()?;
        Ok(Discovery {
            dtype: self.dtype.clone(),
            shape: (None, Some(builder.schema().fields().len())),
            npartitions: builder.metadata().num_row_groups(),
            metadata: self.metadata.clone(),
        })
    }

    fn read(&self) -> Result<RecordBatch> {
        let builder = self.builder()?;
        let schema = builder.schema().clone();
        let reader = builder.build()?;
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        concat_rows(schema, &batches)
    }

    fn read_partition(&self, index: usize) -> Result<RecordBatch> {
        let builder = self.builder()?;
        let count = builder.metadata().num_row_groups();
        if index >= count {
            return Err(Error::PartitionOutOfRange { index, count });
        }
        let schema = builder.schema().clone();
        let reader = builder.with_row_groups(vec![index]).build()?;
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        concat_rows(schema, &batches)
    }

    fn read_chunked(&self) -> Result<Box<dyn Iterator<Item = Result<RecordBatch>> + Send>> {
        let reader = self.builder()?.build()?;
        Ok(Box::new(reader.map(|batch| batch.map_err(Error::from))))
    }

    fn write(&self, rows: &RecordBatch) -> Result<Vec<ChunkTiming>> {
        let file = File::create(&self.path)?;
        let mut writer = ArrowWriter::try_new(file, rows.schema(), None)?;
        writer.write(rows)?;
        writer.close()?;
        Ok(Vec::new())
    }
}

register_backend!(BACKEND_DRIVER_PARQUET, scheme: "parquet", create: ParquetBackend::create);
