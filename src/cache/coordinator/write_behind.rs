//! Write-behind queue
//!
//! `set_async` publishes to memory and hands the durable write to this
//! queue: a bounded channel feeding one worker task that fans writes out to
//! a small fixed number of concurrent store calls. Enqueueing never blocks
//! the caller; when the channel is full the write is dropped and logged,
//! on the grounds that the durable tier is a trailing copy of memory
//! anyway. Shutdown stops intake, drains what was queued within the drain
//! timeout, and aborts anything still running after that.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::cache::tier::persist::PersistStore;
use crate::cache::traits::{CacheKey, CacheValue};
use crate::telemetry::CacheStatistics;

enum Task<K, V> {
    Write {
        key: K,
        value: V,
        expiry: Option<SystemTime>,
    },
    Shutdown,
}

pub(crate) struct WriteBehindQueue<K: CacheKey, V: CacheValue> {
    sender: mpsc::Sender<Task<K, V>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<CacheStatistics>,
}

impl<K: CacheKey, V: CacheValue> WriteBehindQueue<K, V> {
    pub(crate) fn start(
        store: Arc<dyn PersistStore<K, V>>,
        queue_depth: usize,
        concurrency: usize,
        stats: Arc<CacheStatistics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_depth.max(1));
        let worker = tokio::spawn(run_worker(
            receiver,
            store,
            concurrency.max(1),
            Arc::clone(&stats),
        ));
        WriteBehindQueue {
            sender,
            worker: Mutex::new(Some(worker)),
            stats,
        }
    }

    /// Queue a durable write. Never blocks; a full queue drops the write.
    pub(crate) fn enqueue(&self, key: K, value: V, expiry: Option<SystemTime>) {
        if let Err(mpsc::error::TrySendError::Full(Task::Write { key, .. })) =
            self.sender.try_send(Task::Write { key, value, expiry })
        {
            self.stats.record_async_write_dropped();
            log::warn!("write-behind queue full, dropping async write for {}", key);
        }
    }

    /// Stop intake and wait for queued writes, bounded by `drain_timeout`.
    pub(crate) async fn shutdown(&self, drain_timeout: Duration) {
        let handle = self.worker.lock().take();
        let Some(handle) = handle else {
            return;
        };
        let abort = handle.abort_handle();
        let deadline = tokio::time::Instant::now() + drain_timeout;

        // The shutdown marker queues behind every write accepted so far.
        let sent = tokio::time::timeout_at(deadline, self.sender.send(Task::Shutdown)).await;
        if sent.is_err() {
            log::warn!(
                "write-behind queue refused shutdown within {:?}, aborting worker",
                drain_timeout
            );
            abort.abort();
            return;
        }

        if tokio::time::timeout_at(deadline, handle).await.is_err() {
            log::warn!(
                "write-behind drain exceeded {:?}, aborting remaining writes",
                drain_timeout
            );
            abort.abort();
        }
    }
}

async fn run_worker<K: CacheKey, V: CacheValue>(
    mut receiver: mpsc::Receiver<Task<K, V>>,
    store: Arc<dyn PersistStore<K, V>>,
    concurrency: usize,
    stats: Arc<CacheStatistics>,
) {
    let mut in_flight = JoinSet::new();
    while let Some(task) = receiver.recv().await {
        match task {
            Task::Write { key, value, expiry } => {
                while in_flight.len() >= concurrency {
                    in_flight.join_next().await;
                }
                let store = Arc::clone(&store);
                let stats = Arc::clone(&stats);
                in_flight.spawn(async move {
                    if let Err(err) = store.set(&key, &value, expiry).await {
                        stats.record_store_error();
                        log::warn!("async write for {} failed: {}", key, err);
                    }
                });
            }
            Task::Shutdown => break,
        }
    }
    while in_flight.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tier::persist::testing::MockStore;

    fn stats() -> Arc<CacheStatistics> {
        Arc::new(CacheStatistics::default())
    }

    #[tokio::test]
    async fn queued_writes_reach_the_store() {
        let store = Arc::new(MockStore::<String, u32>::new());
        let queue = WriteBehindQueue::start(
            Arc::clone(&store) as Arc<dyn PersistStore<String, u32>>,
            64,
            4,
            stats(),
        );

        for i in 0..10 {
            queue.enqueue(format!("k{}", i), i, None);
        }
        queue.shutdown(Duration::from_secs(5)).await;

        assert_eq!(store.sets(), 10);
        assert_eq!(store.records.len(), 10);
    }

    #[tokio::test]
    async fn overflow_drops_instead_of_blocking() {
        let store = Arc::new(MockStore::<String, u32>::with_set_delay(
            Duration::from_millis(50),
        ));
        let telemetry = stats();
        let queue = WriteBehindQueue::start(
            Arc::clone(&store) as Arc<dyn PersistStore<String, u32>>,
            2,
            1,
            Arc::clone(&telemetry),
        );

        let started = std::time::Instant::now();
        for i in 0..50 {
            queue.enqueue(format!("k{}", i), i, None);
        }
        // Fifty enqueues against a 2-deep queue and a slow store must not
        // have waited on the store.
        assert!(started.elapsed() < Duration::from_millis(40));
        assert!(telemetry.snapshot().async_writes_dropped > 0);

        queue.shutdown(Duration::from_secs(5)).await;
        assert!(store.sets() < 50);
    }

    #[tokio::test]
    async fn shutdown_is_bounded_by_the_drain_timeout() {
        let store = Arc::new(MockStore::<String, u32>::with_set_delay(
            Duration::from_secs(30),
        ));
        let queue = WriteBehindQueue::start(
            Arc::clone(&store) as Arc<dyn PersistStore<String, u32>>,
            8,
            1,
            stats(),
        );

        queue.enqueue("slow".to_string(), 1, None);
        let started = std::time::Instant::now();
        queue.shutdown(Duration::from_millis(100)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn shutdown_twice_is_harmless() {
        let store = Arc::new(MockStore::<String, u32>::new());
        let queue = WriteBehindQueue::start(
            Arc::clone(&store) as Arc<dyn PersistStore<String, u32>>,
            8,
            1,
            stats(),
        );
        queue.shutdown(Duration::from_secs(1)).await;
        queue.shutdown(Duration::from_secs(1)).await;
    }
}
