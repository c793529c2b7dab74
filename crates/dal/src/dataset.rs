//! Virtual dataset facade
//!
//! The object consumers interact with. Backend construction is deferred to
//! the first operation, then cached for the instance's lifetime; changing
//! storage mode or arguments produces a fresh unresolved dataset instead of
//! re-resolving in place.

use std::sync::{Arc, Mutex};

use arrow_array::RecordBatch;
use diagnostics::log_info;
use serde_json::Value;

use crate::backend::{Backend, ChunkTiming, Discovery};
use crate::catalog::{CatalogNode, DatasetEntry};
use crate::error::{Error, Result};
use crate::resolve;

pub struct VirtualDataset {
    node: Option<Arc<CatalogNode>>,
    entry: DatasetEntry,
    name: String,
    storage_mode: Option<String>,
    extra_args: serde_json::Map<String, Value>,
    // single-assignment cell: resolved exactly once per instance
    resolved: Mutex<Option<Arc<dyn Backend>>>,
}

impl VirtualDataset {
    pub(crate) fn new(node: Arc<CatalogNode>, entry: DatasetEntry) -> Self {
        let name = node.name().to_string();
        VirtualDataset {
            node: Some(node),
            entry,
            name,
            storage_mode: None,
            extra_args: serde_json::Map::new(),
            resolved: Mutex::new(None),
        }
    }

    /// A dataset not attached to any catalog. Every operation fails with
    /// [`Error::DetachedDataset`]; exists for construction-time validation.
    pub fn detached(name: &str, entry: DatasetEntry) -> Self {
        VirtualDataset {
            node: None,
            entry,
            name: name.to_string(),
            storage_mode: None,
            extra_args: serde_json::Map::new(),
            resolved: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.entry.description.as_deref()
    }

    pub fn canonical_name(&self) -> Result<String> {
        let node = self.node()?;
        Ok(node.canonical_name())
    }

    /// Fresh unresolved dataset with a storage-mode override.
    pub fn with_storage_mode(&self, mode: &str) -> VirtualDataset {
        VirtualDataset {
            node: self.node.clone(),
            entry: self.entry.clone(),
            name: self.name.clone(),
            storage_mode: Some(mode.to_string()),
            extra_args: self.extra_args.clone(),
            resolved: Mutex::new(None),
        }
    }

    /// Fresh unresolved dataset with extra backend arguments merged in.
    pub fn with_args(&self, args: serde_json::Map<String, Value>) -> VirtualDataset {
        let mut extra_args = self.extra_args.clone();
        for (key, value) in args {
            extra_args.insert(key, value);
        }
        VirtualDataset {
            node: self.node.clone(),
            entry: self.entry.clone(),
            name: self.name.clone(),
            storage_mode: self.storage_mode.clone(),
            extra_args,
            resolved: Mutex::new(None),
        }
    }

    /// Shorthand for the common `key` argument of keyed backends.
    pub fn with_key(&self, key: impl Into<Value>) -> VirtualDataset {
        let mut args = serde_json::Map::new();
        args.insert("key".to_string(), key.into());
        self.with_args(args)
    }

    fn node(&self) -> Result<&Arc<CatalogNode>> {
        self.node
            .as_ref()
            .ok_or_else(|| Error::DetachedDataset(self.name.clone()))
    }

    /// Resolve (once) and return the concrete backend.
    fn backend(&self) -> Result<Arc<dyn Backend>> {
        let mut guard = self
            .resolved
            .lock()
            .map_err(|e| Error::MutexPoisoned(e.to_string()))?;
        if let Some(backend) = guard.as_ref() {
            return Ok(backend.clone());
        }
        let node = self.node()?;
        let backend: Arc<dyn Backend> = Arc::from(resolve::resolve(
            node,
            &self.entry,
            self.storage_mode.as_deref(),
            &self.extra_args,
        )?);
        log_info!(
            "Resolved dataset {name}",
            name: node.canonical_name()
        );
        *guard = Some(backend.clone());
        Ok(backend)
    }

    // Post-resolution the facade is transparent: these mirror the backend.

    pub fn container(&self) -> Result<&'static str> {
        Ok(self.backend()?.container())
    }

    pub fn partition_access(&self) -> Result<bool> {
        Ok(self.backend()?.partition_access())
    }

    pub fn discover(&self) -> Result<Discovery> {
        self.backend()?.discover()
    }

    pub fn read(&self) -> Result<RecordBatch> {
        self.backend()?.read()
    }

    pub fn read_partition(&self, index: usize) -> Result<RecordBatch> {
        self.backend()?.read_partition(index)
    }

    pub fn read_chunked(&self) -> Result<Box<dyn Iterator<Item = Result<RecordBatch>> + Send>> {
        self.backend()?.read_chunked()
    }

    pub fn write(&self, rows: &RecordBatch) -> Result<Vec<ChunkTiming>> {
        self.backend()?.write(rows)
    }
}
