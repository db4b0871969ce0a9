use hwpolicy_core::CatalogError;
use hwpolicy_storage::StorageError;
use thiserror::Error;

/// Expected, caller-facing failures of policy operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("invalid requirement: {0}")]
    InvalidRequirement(String),

    #[error("policy version {requested} not found (current version {current})")]
    VersionNotFound { requested: u64, current: u64 },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid value for {field}: {message}")]
    Invalid { field: String, message: String },

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
