//! Error types shared by the dal crates

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("storage mode '{mode}' not found; available modes: {available:?}")]
    ModeNotFound {
        mode: String,
        available: Vec<String>,
    },

    #[error("dataset '{0}' is not attached to a catalog")]
    DetachedDataset(String),

    #[error("no native column type for field '{field}' with Avro tags {tags:?}")]
    UnsupportedAvroType { field: String, tags: Vec<String> },

    #[error(
        "schema registry indirection is not supported; inline the Avro schema JSON under '{0}'"
    )]
    SchemaRegistryUnsupported(String),

    #[error("no backend registered for scheme '{0}'")]
    UnknownScheme(String),

    #[error("invalid location '{url}': {reason}")]
    InvalidLocation { url: String, reason: String },

    #[error("invalid catalog entry '{path}': {reason}")]
    InvalidCatalog { path: String, reason: String },

    #[error("dataset '{0}' requires a 'key' argument for this storage mode")]
    KeyRequired(String),

    #[error("remote read failed: url={url} status={status}: {body}")]
    RemoteRead {
        url: String,
        status: u16,
        body: String,
    },

    #[error("remote write failed: url={url} status={status}: {body}")]
    RemoteWrite {
        url: String,
        status: u16,
        body: String,
    },

    #[error("HTTP transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("partition {index} out of range ({count} partitions)")]
    PartitionOutOfRange { index: usize, count: usize },

    #[error("Avro serialization error: {0}")]
    AvroSerde(String),

    #[error("Mutex poisoned: {0}")]
    MutexPoisoned(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type for dal operations
pub type Result<T> = std::result::Result<T, Error>;
