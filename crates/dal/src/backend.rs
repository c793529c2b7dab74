//! Backend trait and driver registry
//!
//! Concrete data-access drivers are selected by location scheme. Built-in
//! drivers register at link time through a distributed slice; drivers that
//! need injected state (the in-memory store) register at process
//! initialization through [`register_backend_factory`]. Dynamic
//! registrations shadow compiled-in drivers so an embedding application or
//! test can replace a built-in.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef;
use linkme::distributed_slice;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::schema::{AvroSchema, ColumnTypes};

/// Everything a driver needs to construct a backend instance.
#[derive(Debug, Clone)]
pub struct BackendSpec {
    /// Driver identifier (the location scheme).
    pub scheme: String,
    /// The location remainder, verbatim including params/query/fragment.
    pub location: String,
    /// Merged mode/caller arguments.
    pub args: serde_json::Map<String, Value>,
    /// Dot-joined hierarchical dataset identity.
    pub canonical_name: String,
    /// The active storage mode.
    pub storage_mode: String,
    /// Inline interchange schema for this canonical name, when present.
    pub avro_schema: Option<AvroSchema>,
    /// Column types translated from the interchange schema.
    pub column_types: Option<ColumnTypes>,
    /// Inherited catalog metadata plus resolution diagnostics.
    pub metadata: serde_json::Map<String, Value>,
}

impl BackendSpec {
    /// Integer argument from the namespaced metadata block for this driver,
    /// e.g. `metadata["dal-online"]["write_chunk_size"]`.
    pub fn driver_metadata_u64(&self, driver: &str, key: &str) -> Option<u64> {
        self.metadata.get(driver)?.get(key)?.as_u64()
    }
}

/// What a dataset looks like before reading it.
#[derive(Debug, Clone)]
pub struct Discovery {
    /// Column dtype display strings, absent when the catalog carries no
    /// schema entry for the dataset.
    pub dtype: Option<serde_json::Map<String, Value>>,
    pub shape: (Option<usize>, Option<usize>),
    pub npartitions: usize,
    pub metadata: serde_json::Map<String, Value>,
}

/// Per-chunk write timings: serialization time and post time.
#[derive(Debug, Clone, Copy)]
pub struct ChunkTiming {
    pub serialize: Duration,
    pub post: Duration,
}

/// Capability set of a concrete data-access driver.
pub trait Backend: Send + Sync {
    fn container(&self) -> &'static str {
        "dataframe"
    }

    fn partition_access(&self) -> bool {
        false
    }

    fn discover(&self) -> Result<Discovery>;

    fn read(&self) -> Result<RecordBatch>;

    fn read_partition(&self, index: usize) -> Result<RecordBatch>;

    /// Lazy sequence of partitions.
    fn read_chunked(&self) -> Result<Box<dyn Iterator<Item = Result<RecordBatch>> + Send>>;

    fn write(&self, rows: &RecordBatch) -> Result<Vec<ChunkTiming>>;
}

/// Compiled-in driver entry for distributed slice registration.
pub struct BackendDriverEntry {
    /// Location scheme (e.g. "csv", "parquet", "dal-online").
    pub scheme: &'static str,
    /// Factory function to create a backend instance.
    pub create: fn(BackendSpec) -> Result<Box<dyn Backend>>,
}

/// Distributed slice containing all compiled-in backend drivers.
/// linkme's distributed_slice uses #[link_section] which is considered unsafe
#[allow(unsafe_code)]
#[allow(clippy::declare_interior_mutable_const)]
#[distributed_slice]
pub static BACKEND_DRIVERS: [BackendDriverEntry];

/// Factory trait for drivers registered at runtime with injected state.
pub trait BackendFactory: Send + Sync {
    fn create(&self, spec: BackendSpec) -> Result<Box<dyn Backend>>;
}

fn dynamic_registry() -> &'static RwLock<HashMap<String, Arc<dyn BackendFactory>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Arc<dyn BackendFactory>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register (or replace) a driver factory for a scheme at process-wide
/// initialization.
pub fn register_backend_factory(scheme: &str, factory: Arc<dyn BackendFactory>) -> Result<()> {
    let mut registry = dynamic_registry()
        .write()
        .map_err(|e| Error::MutexPoisoned(e.to_string()))?;
    registry.insert(scheme.to_string(), factory);
    Ok(())
}

/// Construct a backend for the given spec by scheme lookup.
pub fn create_backend(spec: BackendSpec) -> Result<Box<dyn Backend>> {
    {
        let registry = dynamic_registry()
            .read()
            .map_err(|e| Error::MutexPoisoned(e.to_string()))?;
        if let Some(factory) = registry.get(&spec.scheme) {
            return factory.create(spec);
        }
    }
    let entry = BACKEND_DRIVERS
        .iter()
        .find(|entry| entry.scheme == spec.scheme)
        .ok_or_else(|| Error::UnknownScheme(spec.scheme.clone()))?;
    (entry.create)(spec)
}

/// List all registered schemes, dynamic registrations first.
pub fn registered_schemes() -> Vec<String> {
    let mut schemes: Vec<String> = dynamic_registry()
        .read()
        .map(|r| r.keys().cloned().collect())
        .unwrap_or_default();
    schemes.extend(BACKEND_DRIVERS.iter().map(|e| e.scheme.to_string()));
    schemes
}

/// Register a compiled-in backend driver.
///
/// Usage:
/// ```ignore
/// register_backend!(BACKEND_DRIVER_CSV, scheme: "csv", create: CsvBackend::create);
/// ```
#[macro_export]
macro_rules! register_backend {
    ($ident:ident, scheme: $scheme:expr, create: $create:expr) => {
        #[allow(unsafe_code)]
        #[linkme::distributed_slice($crate::backend::BACKEND_DRIVERS)]
        static $ident: $crate::backend::BackendDriverEntry = $crate::backend::BackendDriverEntry {
            scheme: $scheme,
            create: $create,
        };
    };
}

/// Concatenate batches into one, yielding an empty batch when there are none.
pub(crate) fn concat_rows(schema: SchemaRef, batches: &[RecordBatch]) -> Result<RecordBatch> {
    if batches.is_empty() {
        return Ok(RecordBatch::new_empty(schema));
    }
    Ok(arrow::compute::concat_batches(&schema, batches)?)
}
