//! dal: storage-mode indirection for tabular datasets
//!
//! A catalog maps logical dataset names to a set of named storage modes
//! (local file, batch warehouse, low-latency store). Resolving a dataset
//! picks a concrete backend driver by location scheme, enforces one
//! Avro-derived schema across every mode, and exposes a uniform
//! discover/read/write surface over `arrow` record batches.
//!
//! ```no_run
//! # fn example() -> dal::Result<()> {
//! let catalog = dal::Catalog::load("catalog.yaml")?;
//! let events = catalog.dataset("entity.user.user_events")?;
//! let rows = events.read()?;
//! let batch_rows = events.with_storage_mode("batch").read()?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod backends;
mod catalog;
mod dataset;
mod error;
mod location;
mod resolve;
pub mod schema;

pub use backend::{
    create_backend, register_backend_factory, Backend, BackendFactory, BackendSpec, ChunkTiming,
    Discovery,
};
pub use backends::{register_memory_backend, MemoryStore};
pub use catalog::{Catalog, CatalogNode, DatasetArgs, DatasetEntry, DAL_DRIVER};
pub use dataset::VirtualDataset;
pub use error::{Error, Result};
pub use location::{Location, LocationSpec};
pub use resolve::{plan, resolve};
pub use schema::{to_column_types, AvroSchema, AvroField, ColumnType, ColumnTypes};
