//! In-memory key-value backend
//!
//! A merge-on-write store useful for tests and local development. The
//! store object is injected at registration time and owned by the factory;
//! there is no process-global table, so independent stores stay
//! independent.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use arrow::compute::{cast, filter_record_batch};
use arrow_array::{Array, BooleanArray, RecordBatch, StringArray};
use arrow_schema::DataType;
use serde_json::Value;

use crate::backend::{
    concat_rows, register_backend_factory, Backend, BackendFactory, BackendSpec, ChunkTiming,
    Discovery,
};
use crate::error::{Error, Result};

/// Shared row storage, keyed by location. Cloning shares the table.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, RecordBatch>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, slot: &str) -> Result<Option<RecordBatch>> {
        let table = self
            .inner
            .lock()
            .map_err(|e| Error::MutexPoisoned(e.to_string()))?;
        Ok(table.get(slot).cloned())
    }

    fn put(&self, slot: &str, rows: RecordBatch) -> Result<()> {
        let mut table = self
            .inner
            .lock()
            .map_err(|e| Error::MutexPoisoned(e.to_string()))?;
        table.insert(slot.to_string(), rows);
        Ok(())
    }
}

/// Factory carrying an injected [`MemoryStore`].
pub struct MemoryKvFactory {
    store: MemoryStore,
    key_column: String,
}

impl MemoryKvFactory {
    pub fn new(store: MemoryStore) -> Self {
        MemoryKvFactory {
            store,
            key_column: "key".to_string(),
        }
    }

    pub fn with_key_column(mut self, key_column: &str) -> Self {
        self.key_column = key_column.to_string();
        self
    }
}

impl BackendFactory for MemoryKvFactory {
    fn create(&self, spec: BackendSpec) -> Result<Box<dyn Backend>> {
        Ok(Box::new(MemoryKvBackend {
            store: self.store.clone(),
            slot: spec.location.clone(),
            key_column: self.key_column.clone(),
            key: spec.args.get("key").cloned(),
            schema: spec.column_types.as_ref().map(|ct| ct.arrow_schema()),
            dtype: spec.column_types.as_ref().map(|ct| ct.display_map()),
            metadata: spec.metadata,
        }))
    }
}

/// Register the in-memory driver under a scheme with its owned store.
pub fn register_memory_backend(scheme: &str, store: MemoryStore) -> Result<()> {
    register_backend_factory(scheme, Arc::new(MemoryKvFactory::new(store)))
}

pub struct MemoryKvBackend {
    store: MemoryStore,
    slot: String,
    key_column: String,
    key: Option<Value>,
    schema: Option<arrow_schema::SchemaRef>,
    dtype: Option<serde_json::Map<String, Value>>,
    metadata: serde_json::Map<String, Value>,
}

impl MemoryKvBackend {
    fn current(&self) -> Result<RecordBatch> {
        match self.store.get(&self.slot)? {
            Some(rows) => Ok(rows),
            None => match &self.schema {
                Some(schema) => Ok(RecordBatch::new_empty(schema.clone())),
                None => Err(Error::InvalidCatalog {
                    path: self.slot.clone(),
                    reason: "in-memory store holds no rows for this location".to_string(),
                }),
            },
        }
    }
}

impl Backend for MemoryKvBackend {
    fn discover(&self) -> Result<Discovery> {
        let rows = self.current()?;
        Ok(Discovery {
            dtype: self.dtype.clone(),
            shape: (Some(rows.num_rows()), Some(rows.num_columns())),
            npartitions: 1,
            metadata: self.metadata.clone(),
        })
    }

    fn read(&self) -> Result<RecordBatch> {
        let rows = self.current()?;
        let Some(key) = &self.key else {
            return Ok(rows);
        };
        let wanted = scalar_string(key);
        let keys = key_strings(&rows, &self.key_column)?;
        let mask: BooleanArray = keys.iter().map(|k| Some(*k == wanted)).collect();
        Ok(filter_record_batch(&rows, &mask)?)
    }

    fn read_partition(&self, index: usize) -> Result<RecordBatch> {
        if index != 0 {
            return Err(Error::PartitionOutOfRange { index, count: 1 });
        }
        self.read()
    }

    fn read_chunked(&self) -> Result<Box<dyn Iterator<Item = Result<RecordBatch>> + Send>> {
        let rows = self.read()?;
        Ok(Box::new(std::iter::once(Ok(rows))))
    }

    /// Merge-on-write: incoming rows replace existing rows with the same
    /// key and append the rest.
    fn write(&self, rows: &RecordBatch) -> Result<Vec<ChunkTiming>> {
        let merged = match self.store.get(&self.slot)? {
            None => rows.clone(),
            Some(existing) => {
                let incoming: HashSet<String> =
                    key_strings(rows, &self.key_column)?.into_iter().collect();
                let existing_keys = key_strings(&existing, &self.key_column)?;
                let mask: BooleanArray = existing_keys
                    .iter()
                    .map(|k| Some(!incoming.contains(k)))
                    .collect();
                let kept = filter_record_batch(&existing, &mask)?;
                concat_rows(existing.schema(), &[kept, rows.clone()])?
            }
        };
        self.store.put(&self.slot, merged)?;
        Ok(Vec::new())
    }
}

/// String form of every value in the key column, for merge comparisons.
fn key_strings(rows: &RecordBatch, key_column: &str) -> Result<Vec<String>> {
    let index = rows.schema().index_of(key_column)?;
    let as_text = cast(rows.column(index), &DataType::Utf8)?;
    let text = as_text
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| Error::InvalidCatalog {
            path: key_column.to_string(),
            reason: "key column cannot be rendered as text".to_string(),
        })?;
    Ok((0..text.len())
        .map(|i| {
            if text.is_null(i) {
                "<null>".to_string()
            } else {
                text.value(i).to_string()
            }
        })
        .collect())
}

fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
