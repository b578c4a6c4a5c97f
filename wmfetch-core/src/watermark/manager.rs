//! Manages the processors and their lifecycle. Processors are discovered through the heartbeat
//! bucket: every processor periodically publishes its epoch seconds under its own name. The first
//! heartbeat of a processor creates its [ProcessorToFetch], which starts watching the OT bucket.
//!
//! The refresher task periodically compares the last heartbeat of each processor with the current
//! time and marks it inactive, or deleted once it has been silent for too long. Deleted
//! processors are reaped, which stops their timeline watcher.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::Utc;
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use wmfetch_shared::kv::{KVEntry, KVStore, KVWatchOp};

use crate::config::FetchConfig;
use crate::error::{Error, Result};
use crate::watermark::entity::{ProcessorEntitier, ProcessorEntity};
use crate::watermark::processor::ProcessorToFetch;

/// Decodes a heartbeat value, the little-endian epoch seconds of the processor.
pub fn decode_heartbeat(mut value: Bytes) -> Result<i64> {
    if value.remaining() < 8 {
        return Err(Error::Decode(format!(
            "heartbeat needs 8 bytes, got {}",
            value.remaining()
        )));
    }
    Ok(value.get_i64_le())
}

pub fn encode_heartbeat(hb_time: i64) -> Bytes {
    let mut bytes = BytesMut::with_capacity(8);
    bytes.put_i64_le(hb_time);
    bytes.freeze()
}

/// Whole seconds of the duration, saturating at i64::MAX.
fn as_secs_i64(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

struct TrackedProcessor {
    processor: Arc<ProcessorToFetch>,
    /// Epoch seconds of the latest heartbeat.
    last_hb_time: i64,
}

/// State shared between the manager handle and its background tasks.
struct Processors {
    processors: RwLock<HashMap<String, TrackedProcessor>>,
    ot_store: Arc<dyn KVStore>,
    cancel: CancellationToken,
    config: FetchConfig,
}

impl Processors {
    fn add_processor(
        &self,
        entity: Arc<dyn ProcessorEntitier>,
        hb_time: i64,
    ) -> Result<Arc<ProcessorToFetch>> {
        let mut processors = self.processors.write();
        if let Some(tracked) = processors.get(entity.id()) {
            return Ok(Arc::clone(&tracked.processor));
        }

        let id = entity.id().to_string();
        let processor = Arc::new(ProcessorToFetch::new(
            &self.cancel,
            entity,
            self.config.timeline_capacity,
            Arc::clone(&self.ot_store),
        )?);
        info!(processor = %id, vertex = %self.config.vertex, "Processor added");

        processors.insert(
            id,
            TrackedProcessor {
                processor: Arc::clone(&processor),
                last_hb_time: hb_time,
            },
        );
        Ok(processor)
    }

    fn heartbeat(&self, id: &str, hb_time: i64) -> Result<Arc<ProcessorToFetch>> {
        {
            let mut processors = self.processors.write();
            if let Some(tracked) = processors.get_mut(id) {
                if hb_time > tracked.last_hb_time {
                    tracked.last_hb_time = hb_time;
                }
                // a heartbeat revives an inactive processor, deleted ones wait to be reaped
                if tracked.processor.is_inactive() {
                    tracked.processor.set_active();
                }
                return Ok(Arc::clone(&tracked.processor));
            }
        }
        self.add_processor(Arc::new(ProcessorEntity::new(id)), hb_time)
    }

    fn delete_processor(&self, id: &str) -> Option<Arc<ProcessorToFetch>> {
        let tracked = self.processors.write().remove(id)?;
        Self::reap(&tracked.processor);
        Some(tracked.processor)
    }

    fn delete_all(&self) {
        let drained: Vec<TrackedProcessor> =
            self.processors.write().drain().map(|(_, p)| p).collect();
        for tracked in drained {
            Self::reap(&tracked.processor);
        }
    }

    fn reap(processor: &ProcessorToFetch) {
        processor.set_deleted();
        processor.stop();
        info!(processor = processor.id(), "Processor deleted");
    }

    fn refresh(&self, now: i64) {
        let inactive_after = as_secs_i64(self.config.inactive_after);
        let delete_after = as_secs_i64(self.config.delete_after);

        let mut processors = self.processors.write();
        let mut reaped = Vec::new();
        for (id, tracked) in processors.iter() {
            let processor = &tracked.processor;
            match now - tracked.last_hb_time {
                _ if processor.is_deleted() => reaped.push(id.clone()),
                diff if diff > delete_after => reaped.push(id.clone()),
                diff if diff > inactive_after => {
                    if !processor.is_inactive() {
                        warn!(processor = %id, silent_secs = diff, "Processor is inactive");
                    }
                    processor.set_inactive();
                }
                _ => processor.set_active(),
            }
        }

        for id in reaped {
            if let Some(tracked) = processors.remove(&id) {
                Self::reap(&tracked.processor);
            }
        }
    }

    fn handle_hb_entry(&self, kv: KVEntry) {
        match kv.operation {
            KVWatchOp::Put => {
                let hb_time = match decode_heartbeat(kv.value) {
                    Ok(hb_time) => hb_time,
                    Err(e) => {
                        error!(processor = %kv.key, ?e, "Unable to decode the heartbeat");
                        return;
                    }
                };
                if let Err(e) = self.heartbeat(&kv.key, hb_time) {
                    error!(processor = %kv.key, ?e, "Failed to add processor");
                }
            }
            // the processor is gone for good
            KVWatchOp::Delete => {
                self.delete_processor(&kv.key);
            }
            KVWatchOp::Purge => self.delete_all(),
        }
    }
}

/// ProcessorManager manages the point of view of Vn-1 from the Vn vertex. It has the mapping of
/// all the processors which in turn have all the information about each processor's timeline.
pub struct ProcessorManager {
    processors: Arc<Processors>,
    /// Handles of the heartbeat watcher and the processor refresher tasks.
    handles: Vec<JoinHandle<()>>,
}

impl Debug for ProcessorManager {
    /// Formats as: "{proc1 status:.., timeline: .., proc2 ...}"
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut proc_infos: Vec<String> = self
            .processors()
            .iter()
            .map(|p| p.to_string())
            .collect();
        proc_infos.sort();
        write!(f, "{{{}}}", proc_infos.join(", "))
    }
}

impl Drop for ProcessorManager {
    fn drop(&mut self) {
        // cascades to the timeline watchers of every processor
        self.processors.cancel.cancel();
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl ProcessorManager {
    /// Creates a new ProcessorManager. It prepopulates the processors from the heartbeats already
    /// in the heartbeat store, then keeps watching it and refreshing the processor statuses.
    ///
    /// # Arguments
    /// * `cancel` - parent scope of the manager and its processors
    /// * `ot_store` - the offset-timeline store shared by the timeline watchers
    /// * `hb_store` - the heartbeat store the processors publish their liveness into
    /// * `config` - fetch configuration of the vertex
    pub async fn new(
        cancel: &CancellationToken,
        ot_store: Arc<dyn KVStore>,
        hb_store: Arc<dyn KVStore>,
        config: FetchConfig,
    ) -> Result<Self> {
        config.validate()?;
        let refresh_interval = config.refresh_interval;

        let processors = Arc::new(Processors {
            processors: RwLock::new(HashMap::new()),
            ot_store,
            cancel: cancel.child_token(),
            config,
        });

        Self::prepopulate_processors(&processors, &hb_store).await;

        let hb_handle = tokio::spawn(Self::start_hb_watcher(
            Arc::clone(&processors),
            hb_store,
        ));
        let refresh_handle = tokio::spawn(Self::start_refreshing_processors(
            Arc::clone(&processors),
            refresh_interval,
        ));

        Ok(ProcessorManager {
            processors,
            handles: vec![hb_handle, refresh_handle],
        })
    }

    /// Prepopulates the processors from the heartbeats present in the heartbeat store.
    async fn prepopulate_processors(processors: &Processors, hb_store: &Arc<dyn KVStore>) {
        let hb_keys = hb_store.keys().await.unwrap_or_else(|e| {
            warn!(?e, bucket = hb_store.name(), "Failed to get keys from hb store");
            Vec::new()
        });

        for hb_key in hb_keys {
            let Ok(Some(hb_value)) = hb_store.get(&hb_key).await else {
                continue;
            };
            processors.handle_hb_entry(KVEntry {
                key: hb_key,
                value: hb_value,
                operation: KVWatchOp::Put,
            });
        }
    }

    /// Listens to the heartbeat store, adding processors and recording their heartbeats.
    async fn start_hb_watcher(processors: Arc<Processors>, hb_store: Arc<dyn KVStore>) {
        let hb_watcher = tokio::select! {
            biased;
            _ = processors.cancel.cancelled() => return,
            watcher = hb_store.watch(None) => watcher,
        };
        let mut hb_watcher = match hb_watcher {
            Ok(hb_watcher) => hb_watcher,
            Err(e) => {
                error!(?e, bucket = hb_store.name(), "Failed to watch the heartbeat bucket");
                return;
            }
        };

        loop {
            tokio::select! {
                biased;
                _ = processors.cancel.cancelled() => return,
                kv = hb_watcher.next() => {
                    let Some(kv) = kv else {
                        info!(bucket = hb_store.name(), "Heartbeat watch stream closed");
                        return;
                    };
                    processors.handle_hb_entry(kv);
                }
            }
        }
    }

    /// Refreshes the processor statuses from their last heartbeat every `refresh_interval`.
    async fn start_refreshing_processors(
        processors: Arc<Processors>,
        refresh_interval: Duration,
    ) {
        let start = tokio::time::Instant::now() + refresh_interval;
        let mut interval = tokio::time::interval_at(start, refresh_interval);
        loop {
            tokio::select! {
                biased;
                _ = processors.cancel.cancelled() => return,
                _ = interval.tick() => processors.refresh(Utc::now().timestamp()),
            }
        }
    }

    /// Adds the processor if it is not tracked yet, its heartbeat clock starts now.
    pub fn add_processor(
        &self,
        entity: Arc<dyn ProcessorEntitier>,
    ) -> Result<Arc<ProcessorToFetch>> {
        self.processors
            .add_processor(entity, Utc::now().timestamp())
    }

    /// Records a heartbeat (epoch seconds) of the processor, adding it if it is not tracked yet.
    pub fn heartbeat(&self, id: &str, hb_time: i64) -> Result<Arc<ProcessorToFetch>> {
        self.processors.heartbeat(id, hb_time)
    }

    /// Re-evaluates every processor status against `now` (epoch seconds).
    pub fn refresh(&self, now: i64) {
        self.processors.refresh(now);
    }

    pub fn get_processor(&self, id: &str) -> Option<Arc<ProcessorToFetch>> {
        self.processors
            .processors
            .read()
            .get(id)
            .map(|tracked| Arc::clone(&tracked.processor))
    }

    pub fn processors(&self) -> Vec<Arc<ProcessorToFetch>> {
        self.processors
            .processors
            .read()
            .values()
            .map(|tracked| Arc::clone(&tracked.processor))
            .collect()
    }

    /// Processors whose timelines take part in the watermark computation.
    pub fn active_processors(&self) -> Vec<Arc<ProcessorToFetch>> {
        self.processors()
            .into_iter()
            .filter(|p| p.is_active())
            .collect()
    }

    /// Marks the processor deleted, stops its timeline watcher and forgets it.
    pub fn delete_processor(&self, id: &str) -> Option<Arc<ProcessorToFetch>> {
        self.processors.delete_processor(id)
    }
}
