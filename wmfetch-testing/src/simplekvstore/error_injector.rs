//! Error injection controller for KV store testing.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::broadcast;

/// Controller for injecting failures into a [`SimpleKVStore`](super::SimpleKVStore).
#[derive(Debug)]
pub struct KVErrorInjector {
    /// Fail the next N put operations.
    fail_next_puts: AtomicUsize,
    /// Fail the next N watch operations (when creating the watch).
    fail_next_watches: AtomicUsize,
    /// Sender to broadcast watch close signals.
    watch_close_sender: broadcast::Sender<()>,
}

impl Default for KVErrorInjector {
    fn default() -> Self {
        let (watch_close_sender, _) = broadcast::channel(16);
        Self {
            fail_next_puts: AtomicUsize::new(0),
            fail_next_watches: AtomicUsize::new(0),
            watch_close_sender,
        }
    }
}

impl KVErrorInjector {
    /// Create a new error injector with all errors disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next N put operations.
    pub fn fail_puts(&self, count: usize) {
        self.fail_next_puts.store(count, Ordering::Relaxed);
    }

    /// Fail the next N watch creation operations.
    pub fn fail_watches(&self, count: usize) {
        self.fail_next_watches.store(count, Ordering::Relaxed);
    }

    /// End every watch stream that is currently open. Watches created afterwards are unaffected.
    pub fn close_all_watch_streams(&self) {
        let _ = self.watch_close_sender.send(());
    }

    pub(crate) fn watch_close_receiver(&self) -> broadcast::Receiver<()> {
        self.watch_close_sender.subscribe()
    }

    pub(crate) fn should_fail_put(&self) -> bool {
        Self::consume(&self.fail_next_puts)
    }

    pub(crate) fn should_fail_watch(&self) -> bool {
        Self::consume(&self.fail_next_watches)
    }

    /// Decrements the counter if it is positive, returns whether it was.
    fn consume(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}
