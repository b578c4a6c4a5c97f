//! Core KV store implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use wmfetch_shared::kv::{KVEntry, KVError, KVResult, KVStore, KVWatchOp, KVWatchStream};

use super::error::SimpleKVStoreError;
use super::error_injector::KVErrorInjector;

/// Simple in-memory KV store for testing.
///
/// Clones share the same state. Once every clone is dropped the live watch streams end, which is
/// how a test simulates the bucket being closed upstream.
#[derive(Clone)]
pub struct SimpleKVStore {
    /// Shared key-value data.
    data: Arc<RwLock<HashMap<String, Bytes>>>,
    /// Store name.
    name: &'static str,
    /// Error injector for testing.
    error_injector: Arc<KVErrorInjector>,
    /// Broadcast sender for watch updates.
    watch_sender: broadcast::Sender<KVEntry>,
}

impl std::fmt::Debug for SimpleKVStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleKVStore")
            .field("name", &self.name)
            .field("data", &self.data)
            .finish()
    }
}

impl SimpleKVStore {
    /// Create a new simple KV store.
    pub fn new(name: &'static str) -> Self {
        let (watch_sender, _) = broadcast::channel(1024);
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            name,
            error_injector: Arc::new(KVErrorInjector::new()),
            watch_sender,
        }
    }

    /// Get the error injector for this store.
    pub fn error_injector(&self) -> &Arc<KVErrorInjector> {
        &self.error_injector
    }

    /// Get the number of keys in the store.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Number of watch streams currently subscribed.
    pub fn watcher_count(&self) -> usize {
        self.watch_sender.receiver_count()
    }

    /// Clear all data in the store and emit a purge event.
    pub fn purge(&self) {
        let mut data = self.data.write();
        data.clear();
        let _ = self.watch_sender.send(KVEntry {
            key: String::new(),
            value: Bytes::new(),
            operation: KVWatchOp::Purge,
        });
    }
}

#[async_trait]
impl KVStore for SimpleKVStore {
    async fn keys(&self) -> KVResult<Vec<String>> {
        Ok(self.data.read().keys().cloned().collect())
    }

    async fn delete(&self, key: &str) -> KVResult<()> {
        let mut data = self.data.write();
        data.remove(key);
        let _ = self.watch_sender.send(KVEntry {
            key: key.to_string(),
            value: Bytes::new(),
            operation: KVWatchOp::Delete,
        });
        Ok(())
    }

    async fn put(&self, key: &str, value: Bytes) -> KVResult<()> {
        if self.error_injector.should_fail_put() {
            return Err(Box::new(SimpleKVStoreError::Put(
                "injected failure".to_string(),
            )));
        }

        // notify while holding the lock so watchers observe the write order
        let mut data = self.data.write();
        data.insert(key.to_string(), value.clone());
        let _ = self.watch_sender.send(KVEntry {
            key: key.to_string(),
            value,
            operation: KVWatchOp::Put,
        });
        Ok(())
    }

    async fn get(&self, key: &str) -> KVResult<Option<Bytes>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn name(&self) -> &str {
        self.name
    }

    /// Only the changes made after the subscription are delivered, the revision is not tracked.
    async fn watch(&self, _revision: Option<u64>) -> KVResult<KVWatchStream> {
        if self.error_injector.should_fail_watch() {
            return Err(Box::new(SimpleKVStoreError::Watch(
                "injected failure".to_string(),
            )) as KVError);
        }

        let watch = SimpleKVWatch {
            receiver: self.watch_sender.subscribe(),
            close_receiver: self.error_injector.watch_close_receiver(),
        };

        Ok(Box::pin(stream::unfold(watch, |mut watch| async move {
            let entry = watch.next_entry().await?;
            Some((entry, watch))
        })))
    }
}

/// State behind one watch stream.
struct SimpleKVWatch {
    receiver: broadcast::Receiver<KVEntry>,
    close_receiver: broadcast::Receiver<()>,
}

impl SimpleKVWatch {
    async fn next_entry(&mut self) -> Option<KVEntry> {
        loop {
            tokio::select! {
                biased;
                _ = self.close_receiver.recv() => return None,
                received = self.receiver.recv() => match received {
                    Ok(entry) => return Some(entry),
                    // missed some updates, keep receiving
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return None,
                },
            }
        }
    }
}
