//! Generic Key-Value store traits for pluggable storage backends.
//!
//! The watermark fetch side only ever reads from the store through [`KVStore::watch`], but the
//! trait carries the basic CRUD operations too so publishers, owners and tests can share one
//! handle. The traits use `async_trait` to enable object safety, allowing usage as
//! `Arc<dyn KVStore>`.

use std::error::Error as StdError;
use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

pub mod jetstream;

/// Error type for KV operations (boxed for object safety)
pub type KVError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type for KV operations.
pub type KVResult<T> = Result<T, KVError>;

/// Operation type for KV watch events
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KVWatchOp {
    /// An element has been put/added into the KV store
    Put,
    /// An element has been deleted
    Delete,
    /// The KV bucket has been purged
    Purge,
}

impl fmt::Display for KVWatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KVWatchOp::Put => write!(f, "put"),
            KVWatchOp::Delete => write!(f, "delete"),
            KVWatchOp::Purge => write!(f, "purge"),
        }
    }
}

/// A single entry from a KV watch stream.
#[derive(Clone, Debug, PartialEq)]
pub struct KVEntry {
    /// The key that was modified
    pub key: String,
    /// The value (empty for delete/purge)
    pub value: Bytes,
    /// The operation that triggered this entry
    pub operation: KVWatchOp,
}

/// Watch stream. The end of the stream is the completion signal: the subscription was torn down
/// by the store.
pub type KVWatchStream = Pin<Box<dyn Stream<Item = KVEntry> + Send>>;

/// KVStore defines a generic key-value store interface for one logical bucket.
///
/// Every call to [`KVStore::watch`] creates an independent subscription, so many consumers can
/// watch the same bucket without blocking each other.
#[async_trait]
pub trait KVStore: Send + Sync {
    /// Get all keys from the KV store.
    async fn keys(&self) -> KVResult<Vec<String>>;

    /// Delete a key from the KV store.
    async fn delete(&self, key: &str) -> KVResult<()>;

    /// Insert or update a key-value pair.
    async fn put(&self, key: &str, value: Bytes) -> KVResult<()>;

    /// Get the value for a given key, `Ok(None)` if the key does not exist.
    async fn get(&self, key: &str) -> KVResult<Option<Bytes>>;

    /// Name of the store, typically the bucket name.
    fn name(&self) -> &str;

    /// Watch for changes in the KV store.
    ///
    /// # Arguments
    /// * `revision` - If `Some`, watches from that revision (inclusive).
    ///   If `None`, watches only new changes from this point forward.
    async fn watch(&self, revision: Option<u64>) -> KVResult<KVWatchStream>;
}
