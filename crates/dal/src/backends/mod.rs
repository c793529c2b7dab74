//! Built-in storage backends

pub mod csv;
pub mod memory;
pub mod parquet;

pub use csv::CsvBackend;
pub use memory::{register_memory_backend, MemoryKvFactory, MemoryStore};
pub use parquet::ParquetBackend;
