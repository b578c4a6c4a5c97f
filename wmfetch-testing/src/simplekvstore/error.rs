//! Error types for the simple KV store.

use thiserror::Error;

/// Result type for simple KV store operations.
pub type Result<T> = std::result::Result<T, SimpleKVStoreError>;

/// Errors specific to the simple KV store implementation.
#[derive(Error, Debug, Clone)]
pub enum SimpleKVStoreError {
    #[error("Failed to put value: {0}")]
    Put(String),

    #[error("Failed to create watch: {0}")]
    Watch(String),
}
