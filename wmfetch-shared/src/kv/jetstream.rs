//! JetStream implementation of the [`KVStore`] trait.

use async_nats::jetstream::kv::{Entry, Operation, Store};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use tracing::warn;

use super::{KVEntry, KVError, KVResult, KVStore, KVWatchOp, KVWatchStream};

impl From<Entry> for KVEntry {
    fn from(entry: Entry) -> Self {
        let operation = match entry.operation {
            Operation::Put => KVWatchOp::Put,
            Operation::Delete => KVWatchOp::Delete,
            Operation::Purge => KVWatchOp::Purge,
        };

        KVEntry {
            key: entry.key,
            value: entry.value,
            operation,
        }
    }
}

/// JetStream KV Store implementation.
///
/// Wraps an `async_nats::jetstream::kv::Store`. Use this as `Arc<dyn KVStore>` for dynamic
/// dispatch.
#[derive(Clone)]
pub struct JetstreamKVStore {
    store: Store,
    name: String,
}

impl JetstreamKVStore {
    /// Create a new JetstreamKVStore from an existing JetStream KV Store.
    pub fn new(store: Store, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    /// Create a JetstreamKVStore from a JetStream context and bucket name.
    pub async fn from_context(
        js_context: &async_nats::jetstream::Context,
        bucket_name: &str,
    ) -> KVResult<Self> {
        let store = js_context
            .get_key_value(bucket_name)
            .await
            .map_err(|e| Box::new(e) as KVError)?;

        Ok(Self::new(store, bucket_name))
    }
}

#[async_trait]
impl KVStore for JetstreamKVStore {
    async fn keys(&self) -> KVResult<Vec<String>> {
        self.store
            .keys()
            .await
            .map_err(|e| Box::new(e) as KVError)?
            .try_collect()
            .await
            .map_err(|e| Box::new(e) as KVError)
    }

    async fn delete(&self, key: &str) -> KVResult<()> {
        self.store
            .delete(key)
            .await
            .map_err(|e| Box::new(e) as KVError)?;
        Ok(())
    }

    async fn put(&self, key: &str, value: Bytes) -> KVResult<()> {
        self.store
            .put(key, value)
            .await
            .map_err(|e| Box::new(e) as KVError)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> KVResult<Option<Bytes>> {
        self.store
            .get(key)
            .await
            .map_err(|e| Box::new(e) as KVError)
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn watch(&self, revision: Option<u64>) -> KVResult<KVWatchStream> {
        let watch = match revision {
            Some(rev) => self.store.watch_all_from_revision(rev).await,
            None => self.store.watch_all().await,
        }
        .map_err(|e| Box::new(e) as KVError)?;

        let bucket = self.name.clone();
        // a broken entry is skipped, the watch itself stays alive
        let entries = watch.filter_map(move |entry| {
            let bucket = bucket.clone();
            async move {
                match entry {
                    Ok(entry) => Some(KVEntry::from(entry)),
                    Err(e) => {
                        warn!(?e, bucket = %bucket, "Failed to read entry from kv watcher");
                        None
                    }
                }
            }
        });

        Ok(Box::pin(entries))
    }
}

#[cfg(all(test, feature = "nats-tests"))]
mod tests {
    use std::time::Duration;

    use async_nats::jetstream;
    use async_nats::jetstream::kv::Config;

    use super::*;

    #[tokio::test]
    async fn test_jetstream_kv_watch() {
        let client = async_nats::connect("localhost:4222").await.unwrap();
        let js_context = jetstream::new(client);
        let bucket_name = "test_jetstream_kv_watch";
        let _ = js_context.delete_key_value(bucket_name).await;
        js_context
            .create_key_value(Config {
                bucket: bucket_name.to_string(),
                history: 1,
                ..Default::default()
            })
            .await
            .unwrap();

        let store = JetstreamKVStore::from_context(&js_context, bucket_name)
            .await
            .unwrap();
        assert_eq!(store.name(), bucket_name);

        let mut watcher = store.watch(None).await.unwrap();
        store.put("processor1", Bytes::from("hello")).await.unwrap();
        store.delete("processor1").await.unwrap();

        let entry = tokio::time::timeout(Duration::from_secs(1), watcher.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.key, "processor1");
        assert_eq!(entry.value, Bytes::from("hello"));
        assert_eq!(entry.operation, KVWatchOp::Put);

        let entry = tokio::time::timeout(Duration::from_secs(1), watcher.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.operation, KVWatchOp::Delete);

        assert_eq!(store.get("processor1").await.unwrap(), None);
        let _ = js_context.delete_key_value(bucket_name).await;
    }
}
