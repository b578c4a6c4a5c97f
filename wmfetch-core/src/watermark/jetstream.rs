use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use wmfetch_shared::kv::jetstream::JetstreamKVStore;

use crate::config::FetchConfig;
use crate::error::{Error, Result};
use crate::watermark::manager::ProcessorManager;

/// Creates a ProcessorManager over the OT and heartbeat JetStream buckets named in the config.
pub async fn create_processor_manager(
    js_context: &async_nats::jetstream::Context,
    config: &FetchConfig,
    cancel: &CancellationToken,
) -> Result<ProcessorManager> {
    let ot_store = JetstreamKVStore::from_context(js_context, &config.ot_bucket)
        .await
        .map_err(|e| {
            Error::KV(format!(
                "Failed to get kv bucket {}: {}",
                config.ot_bucket, e
            ))
        })?;

    let hb_store = JetstreamKVStore::from_context(js_context, &config.hb_bucket)
        .await
        .map_err(|e| {
            Error::KV(format!(
                "Failed to get kv bucket {}: {}",
                config.hb_bucket, e
            ))
        })?;

    ProcessorManager::new(cancel, Arc::new(ot_store), Arc::new(hb_store), config.clone()).await
}
