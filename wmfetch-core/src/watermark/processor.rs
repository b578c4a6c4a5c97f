//! Processor is the smallest unit of entity (from which we fetch data) that does inorder processing
//! or contains inorder data. Every [ProcessorToFetch] runs its own timeline watcher over the OT
//! bucket shared by all the processors of the vertex. Each watcher has its own subscription and
//! filters the events by the processor's key, so a slow processor never blocks another one.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wmfetch_shared::kv::{KVEntry, KVStore, KVWatchOp};

use crate::error::Result;
use crate::watermark::entity::ProcessorEntitier;
use crate::watermark::ot::OTValue;
use crate::watermark::status::{ProcessorStatus, Status};
use crate::watermark::timeline::OffsetTimeline;

/// ProcessorToFetch owns the lifecycle status and the offset timeline of one processor, and the
/// background task which keeps the timeline up to date.
pub struct ProcessorToFetch {
    entity: Arc<dyn ProcessorEntitier>,
    status: ProcessorStatus,
    timeline: OffsetTimeline,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProcessorToFetch {
    /// Creates the processor and starts its timeline watcher on the shared OT store. It does not
    /// wait for the first event. Must be called within a tokio runtime.
    ///
    /// # Arguments
    /// * `cancel` - parent scope, the processor derives its own child scope from it
    /// * `entity` - identity of the processor
    /// * `capacity` - number of entries retained in the offset timeline, must be positive
    /// * `ot_store` - OT bucket shared by all the processors of the vertex, closed by its owner
    pub fn new(
        cancel: &CancellationToken,
        entity: Arc<dyn ProcessorEntitier>,
        capacity: usize,
        ot_store: Arc<dyn KVStore>,
    ) -> Result<Self> {
        let timeline = OffsetTimeline::new(capacity)?;
        let cancel = cancel.child_token();

        let watcher = TimelineWatcher {
            watch_key: entity.ot_watch_key(),
            entity: Arc::clone(&entity),
            timeline: timeline.clone(),
            ot_store,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(watcher.run());

        Ok(ProcessorToFetch {
            entity,
            status: ProcessorStatus::new(),
            timeline,
            cancel,
            handle,
        })
    }

    pub fn id(&self) -> &str {
        self.entity.id()
    }

    pub fn entity(&self) -> &Arc<dyn ProcessorEntitier> {
        &self.entity
    }

    /// Offset timeline of the processor, only the timeline watcher writes to it.
    pub fn timeline(&self) -> &OffsetTimeline {
        &self.timeline
    }

    pub fn status(&self) -> Status {
        self.status.get()
    }

    pub fn set_active(&self) {
        self.status.set_active();
    }

    pub fn set_inactive(&self) {
        self.status.set_inactive();
    }

    pub fn set_deleted(&self) {
        self.status.set_deleted();
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Returns whether the processor is inactive (no heartbeats of any sort).
    pub fn is_inactive(&self) -> bool {
        self.status.is_inactive()
    }

    pub fn is_deleted(&self) -> bool {
        self.status.is_deleted()
    }

    /// Stops the timeline watcher. Idempotent, and the other processors watching the same store
    /// are not affected. The watcher exits eventually, use [ProcessorToFetch::is_stopped] to
    /// observe it.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the timeline watcher has exited.
    pub fn is_stopped(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ProcessorToFetch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl fmt::Display for ProcessorToFetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} status:{}, timeline: {}",
            self.entity.id(),
            self.status(),
            self.timeline.dump()
        )
    }
}

impl fmt::Debug for ProcessorToFetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorToFetch")
            .field("id", &self.entity.id())
            .field("status", &self.status())
            .field("timeline", &self.timeline)
            .finish()
    }
}

/// Background task feeding the offset timeline of one processor from the OT bucket.
struct TimelineWatcher {
    entity: Arc<dyn ProcessorEntitier>,
    watch_key: String,
    timeline: OffsetTimeline,
    ot_store: Arc<dyn KVStore>,
    cancel: CancellationToken,
}

impl TimelineWatcher {
    async fn run(self) {
        let ot_watcher = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            watcher = self.ot_store.watch(None) => watcher,
        };

        let mut ot_watcher = match ot_watcher {
            Ok(ot_watcher) => ot_watcher,
            Err(e) => {
                // no retries, reconnecting is the store's concern
                error!(
                    processor = self.entity.id(),
                    bucket = self.ot_store.name(),
                    ?e,
                    "Failed to watch the OT bucket"
                );
                return;
            }
        };

        // the watch only delivers new changes, load the value already stored under the key.
        // subscribing first means nothing published in between is lost, a duplicate is skipped.
        let latest = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            latest = self.ot_store.get(&self.watch_key) => latest,
        };
        match latest {
            Ok(Some(value)) => self.handle_entry(KVEntry {
                key: self.watch_key.clone(),
                value,
                operation: KVWatchOp::Put,
            }),
            Ok(None) => {}
            Err(e) => warn!(
                processor = self.entity.id(),
                bucket = self.ot_store.name(),
                ?e,
                "Failed to load the latest OT value, waiting for the next update"
            ),
        }

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(processor = self.entity.id(), "Timeline watcher stopped");
                    return;
                }
                kv = ot_watcher.next() => {
                    // the store is shared by the vertex and closed by its owner, not here
                    let Some(kv) = kv else {
                        info!(
                            processor = self.entity.id(),
                            bucket = self.ot_store.name(),
                            "OT watch stream closed, stopping timeline watcher"
                        );
                        return;
                    };
                    self.handle_entry(kv);
                }
            }
        }
    }

    fn handle_entry(&self, kv: KVEntry) {
        match kv.operation {
            KVWatchOp::Put => {
                if kv.key != self.watch_key {
                    return;
                }

                let ot_value = match OTValue::try_from(kv.value) {
                    Ok(ot_value) => ot_value,
                    Err(e) => {
                        error!(processor = self.entity.id(), ?e, "Unable to decode the value");
                        return;
                    }
                };

                if self.timeline.put(ot_value.into()) {
                    debug!(
                        processor = self.entity.id(),
                        bucket = self.ot_store.name(),
                        watermark = ot_value.watermark,
                        offset = ot_value.offset,
                        "Timeline updated"
                    );
                }
            }
            // the OT bucket only grows, the store's TTL trims it
            KVWatchOp::Delete => {}
            KVWatchOp::Purge => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use wmfetch_testing::simplekvstore::SimpleKVStore;

    use super::*;
    use crate::error::Error;
    use crate::watermark::entity::ProcessorEntity;
    use crate::watermark::timeline::OffsetWatermark;

    fn ot_bytes(watermark: i64, offset: i64) -> Bytes {
        OTValue { offset, watermark }.into()
    }

    fn new_processor(
        cancel: &CancellationToken,
        name: &str,
        store: &SimpleKVStore,
    ) -> ProcessorToFetch {
        ProcessorToFetch::new(
            cancel,
            Arc::new(ProcessorEntity::new(name)),
            3,
            Arc::new(store.clone()),
        )
        .unwrap()
    }

    /// Polls the condition every 10ms, panics if it does not hold within a second.
    async fn wait_for(mut condition: impl FnMut() -> bool, what: &str) {
        let start = tokio::time::Instant::now();
        while !condition() {
            if start.elapsed() > Duration::from_secs(1) {
                panic!("Test failed: {what} did not happen within 1 second");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn watcher_for(name: &str, store: &SimpleKVStore) -> TimelineWatcher {
        let entity: Arc<dyn ProcessorEntitier> = Arc::new(ProcessorEntity::new(name));
        TimelineWatcher {
            watch_key: entity.ot_watch_key(),
            entity,
            timeline: OffsetTimeline::new(3).unwrap(),
            ot_store: Arc::new(store.clone()),
            cancel: CancellationToken::new(),
        }
    }

    fn put(key: &str, value: Bytes) -> KVEntry {
        KVEntry {
            key: key.to_string(),
            value,
            operation: KVWatchOp::Put,
        }
    }

    #[test]
    fn test_handle_entry_filters_by_key() {
        let store = SimpleKVStore::new("test_handle_entry_OT");
        let watcher = watcher_for("processor1", &store);

        watcher.handle_entry(put("processor2", ot_bytes(15, 1)));
        assert!(watcher.timeline.is_empty());

        watcher.handle_entry(put("processor1", ot_bytes(15, 1)));
        assert_eq!(
            watcher.timeline.entries(),
            vec![OffsetWatermark {
                watermark: 15,
                offset: 1
            }]
        );
    }

    #[test]
    fn test_handle_entry_drops_anomalies() {
        let store = SimpleKVStore::new("test_handle_entry_anomalies_OT");
        let watcher = watcher_for("processor1", &store);

        watcher.handle_entry(put("", Bytes::new()));
        watcher.handle_entry(put("processor1", Bytes::from_static(b"garbage")));
        watcher.handle_entry(KVEntry {
            key: "processor1".to_string(),
            value: Bytes::new(),
            operation: KVWatchOp::Delete,
        });
        watcher.handle_entry(KVEntry {
            key: String::new(),
            value: Bytes::new(),
            operation: KVWatchOp::Purge,
        });
        assert!(watcher.timeline.is_empty());

        // the next good update is still applied
        watcher.handle_entry(put("processor1", ot_bytes(20, 2)));
        assert_eq!(watcher.timeline.latest_watermark(), 20);
    }

    #[tokio::test]
    async fn test_zero_capacity_fails_construction() {
        let store = SimpleKVStore::new("test_zero_capacity_OT");
        let result = ProcessorToFetch::new(
            &CancellationToken::new(),
            Arc::new(ProcessorEntity::new("processor1")),
            0,
            Arc::new(store.clone()),
        );
        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(store.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_processor_tracks_its_own_key() {
        let store = SimpleKVStore::new("test_processor_tracks_its_own_key_OT");
        let cancel = CancellationToken::new();
        let processor = new_processor(&cancel, "processor1", &store);
        assert!(processor.is_active());
        assert!(processor.timeline().is_empty());

        wait_for(|| store.watcher_count() == 1, "watch subscription").await;

        store.put("processor2", ot_bytes(15, 1)).await.unwrap();
        store.put("processor1", ot_bytes(15, 1)).await.unwrap();

        wait_for(|| processor.timeline().latest().is_some(), "timeline update").await;
        // events are delivered in order, so the other key was seen and ignored before
        assert_eq!(
            processor.timeline().entries(),
            vec![OffsetWatermark {
                watermark: 15,
                offset: 1
            }]
        );
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_processor_loads_value_stored_before_start() {
        let store = SimpleKVStore::new("test_processor_loads_stored_value_OT");
        store.put("processor1", ot_bytes(15, 1)).await.unwrap();
        store.put("processor2", ot_bytes(99, 9)).await.unwrap();

        let cancel = CancellationToken::new();
        let processor = new_processor(&cancel, "processor1", &store);
        wait_for(|| processor.timeline().latest().is_some(), "timeline load").await;
        assert_eq!(
            processor.timeline().entries(),
            vec![OffsetWatermark {
                watermark: 15,
                offset: 1
            }]
        );

        // the live updates follow the stored value
        wait_for(|| store.watcher_count() == 1, "watch subscription").await;
        store.put("processor1", ot_bytes(15, 1)).await.unwrap();
        store.put("processor1", ot_bytes(25, 2)).await.unwrap();
        wait_for(|| processor.timeline().latest_offset() == 2, "timeline update").await;
        assert_eq!(processor.timeline().len(), 2);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_processor_skips_bad_stored_value() {
        let store = SimpleKVStore::new("test_processor_skips_bad_stored_value_OT");
        store
            .put("processor1", Bytes::from_static(b"bad"))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let processor = new_processor(&cancel, "processor1", &store);
        wait_for(|| store.watcher_count() == 1, "watch subscription").await;

        store.put("processor1", ot_bytes(10, 1)).await.unwrap();
        wait_for(|| processor.timeline().latest_watermark() == 10, "timeline update").await;
        assert!(!processor.is_stopped());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_processor_skips_bad_values_and_deletes() {
        let store = SimpleKVStore::new("test_processor_skips_bad_values_OT");
        let cancel = CancellationToken::new();
        let processor = new_processor(&cancel, "processor1", &store);
        wait_for(|| store.watcher_count() == 1, "watch subscription").await;

        store.put("processor1", ot_bytes(10, 1)).await.unwrap();
        store
            .put("processor1", Bytes::from_static(b"bad"))
            .await
            .unwrap();
        store.delete("processor1").await.unwrap();
        store.purge();
        store.put("processor1", ot_bytes(5, 0)).await.unwrap();
        store.put("processor1", ot_bytes(30, 3)).await.unwrap();

        wait_for(|| processor.timeline().latest_offset() == 3, "timeline update").await;
        assert_eq!(
            processor.timeline().entries(),
            vec![
                OffsetWatermark {
                    watermark: 10,
                    offset: 1
                },
                OffsetWatermark {
                    watermark: 30,
                    offset: 3
                }
            ]
        );
        assert!(processor.is_active());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_stop_terminates_watcher() {
        let store = SimpleKVStore::new("test_stop_terminates_watcher_OT");
        let cancel = CancellationToken::new();
        let processor1 = new_processor(&cancel, "processor1", &store);
        let processor2 = new_processor(&cancel, "processor2", &store);
        wait_for(|| store.watcher_count() == 2, "watch subscriptions").await;

        processor1.stop();
        processor1.stop();
        wait_for(|| processor1.is_stopped(), "processor1 stop").await;
        assert_eq!(store.watcher_count(), 1);

        store.put("processor1", ot_bytes(10, 1)).await.unwrap();
        store.put("processor2", ot_bytes(20, 2)).await.unwrap();

        // the other processor sharing the store keeps going
        wait_for(|| processor2.timeline().latest_watermark() == 20, "processor2 update").await;
        assert!(!processor2.is_stopped());
        assert!(processor1.timeline().is_empty());

        cancel.cancel();
        wait_for(|| processor2.is_stopped(), "processor2 stop").await;
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_watcher() {
        let store = SimpleKVStore::new("test_parent_cancellation_OT");
        let cancel = CancellationToken::new();
        let processor = new_processor(&cancel, "processor1", &store);

        cancel.cancel();
        wait_for(|| processor.is_stopped(), "processor stop").await;
    }

    #[tokio::test]
    async fn test_watcher_exits_when_store_closes() {
        let store = SimpleKVStore::new("test_watcher_exits_when_store_closes_OT");
        let cancel = CancellationToken::new();
        let processor = new_processor(&cancel, "processor1", &store);
        wait_for(|| store.watcher_count() == 1, "watch subscription").await;

        store.error_injector().close_all_watch_streams();
        wait_for(|| processor.is_stopped(), "processor stop").await;
        // the status is owned by the owner, closing the stream does not change it
        assert!(processor.is_active());
    }

    #[tokio::test]
    async fn test_watcher_exits_when_watch_fails() {
        let store = SimpleKVStore::new("test_watcher_exits_when_watch_fails_OT");
        store.error_injector().fail_watches(1);

        let processor = new_processor(&CancellationToken::new(), "processor1", &store);
        wait_for(|| processor.is_stopped(), "processor stop").await;
        assert!(processor.timeline().is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_isolation() {
        let store = SimpleKVStore::new("test_lifecycle_isolation_OT");
        let cancel = CancellationToken::new();
        let processor1 = new_processor(&cancel, "processor1", &store);
        let processor2 = new_processor(&cancel, "processor2", &store);
        wait_for(|| store.watcher_count() == 2, "watch subscriptions").await;

        store.put("processor2", ot_bytes(100, 10)).await.unwrap();
        wait_for(|| processor2.timeline().latest().is_some(), "processor2 update").await;

        processor1.set_inactive();
        assert!(processor1.is_inactive());
        assert!(processor2.is_active());

        processor2.set_deleted();
        assert!(processor2.is_deleted());
        assert!(processor1.is_inactive());
        assert!(processor1.timeline().is_empty());
        assert_eq!(processor2.timeline().latest_watermark(), 100);

        processor1.set_active();
        assert_eq!(processor1.status(), Status::Active);
        assert_eq!(processor2.status(), Status::Deleted);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_display() {
        let store = SimpleKVStore::new("test_display_OT");
        let cancel = CancellationToken::new();
        let processor = new_processor(&cancel, "processor1", &store);
        assert_eq!(
            processor.to_string(),
            "processor1 status:active, timeline: empty"
        );

        wait_for(|| store.watcher_count() == 1, "watch subscription").await;
        store.put("processor1", ot_bytes(10, 1)).await.unwrap();
        store.put("processor1", ot_bytes(20, 2)).await.unwrap();
        wait_for(|| processor.timeline().len() == 2, "timeline update").await;

        processor.set_inactive();
        assert_eq!(
            processor.to_string(),
            "processor1 status:inactive, timeline: (wm=10,off=1)->(wm=20,off=2)"
        );
        cancel.cancel();
    }
}
