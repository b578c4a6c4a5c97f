//! Simple KV store implementation for testing.
//!
//! An in-memory store implementing `KVStore` from `wmfetch_shared::kv`. Every `watch` call gets
//! its own subscription, so several consumers can watch the same bucket the way processors of a
//! vertex do.
//!
//! # Example
//! ```ignore
//! use wmfetch_testing::simplekvstore::SimpleKVStore;
//! use wmfetch_shared::kv::KVStore;
//! use bytes::Bytes;
//!
//! let store = SimpleKVStore::new("test-bucket");
//! let mut watch = store.watch(None).await.unwrap();
//! store.put("key1", Bytes::from("value1")).await.unwrap();
//!
//! // fail the next watch creation
//! store.error_injector().fail_watches(1);
//!
//! // end every live watch stream
//! store.error_injector().close_all_watch_streams();
//! ```

/// Error types for the simple KV store.
mod error;
/// Error injection controller.
mod error_injector;
/// Core store implementation.
mod store;

pub use error::{Result, SimpleKVStoreError};
pub use error_injector::KVErrorInjector;
pub use store::SimpleKVStore;
