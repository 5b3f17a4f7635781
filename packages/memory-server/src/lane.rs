//! Write Lane: the single admission gate every mutating operation passes
//! through. Bounds total concurrent writes and serializes writes
//! to the same record, so a create/update/delete sequence for one memory
//! never interleaves with another write to that same memory.
//!
//! The lane itself knows nothing about Guard, Snapshot, or the Store -- it
//! just runs whatever async closure the caller hands it under the admission
//! rules. Domain services compose Guard -> Snapshot -> Store mutate -> Index
//! enqueue inside that closure.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use memory_palace_core::ConcurrencyError;
use tokio::sync::{Mutex, Semaphore};

/// Per-record lock, kept alive only while at least one writer holds or
/// waits on it.
struct RecordLock {
    mutex: Mutex<()>,
}

pub struct WriteLane {
    global: Arc<Semaphore>,
    wait_timeout: Duration,
    records: Arc<DashMap<String, Arc<RecordLock>>>,
}

impl WriteLane {
    #[must_use]
    pub fn new(global_concurrency: usize, wait_timeout: Duration) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_concurrency.max(1))),
            wait_timeout,
            records: Arc::new(DashMap::new()),
        }
    }

    /// Runs `op` under the lane's admission rules, keyed on `record_key`
    /// (the target memory id, or `domain://path` for a not-yet-created
    /// record). Returns [`ConcurrencyError::LaneTimeout`] if a global permit
    /// or the per-record lock isn't available within the configured wait.
    pub async fn run<F, Fut, T>(&self, record_key: &str, op: F) -> Result<T, ConcurrencyError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let permit = tokio::time::timeout(self.wait_timeout, self.global.acquire())
            .await
            .map_err(|_| ConcurrencyError::LaneTimeout)?
            .map_err(|_| ConcurrencyError::LaneTimeout)?;

        let lock = Arc::clone(self.records.entry(record_key.to_string()).or_insert_with(|| {
            Arc::new(RecordLock { mutex: Mutex::new(()) })
        }).value());

        let guard = tokio::time::timeout(self.wait_timeout, lock.mutex.lock())
            .await
            .map_err(|_| ConcurrencyError::LaneTimeout)?;

        let result = op().await;

        drop(guard);
        drop(permit);
        self.records.remove_if(record_key, |_, l| Arc::strong_count(l) <= 2);
        Ok(result)
    }

    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.global.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    #[tokio::test]
    async fn serializes_writes_to_the_same_record() {
        let lane = Arc::new(WriteLane::new(4, Duration::from_secs(1)));
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let lane = Arc::clone(&lane);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                lane.run("mem-1", || async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    order.lock().unwrap().push(i);
                })
                .await
                .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(order.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn allows_concurrent_writes_to_different_records() {
        let lane = Arc::new(WriteLane::new(8, Duration::from_secs(1)));
        let concurrent = Arc::new(AtomicU32::new(0));
        let max_concurrent = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for i in 0..6 {
            let lane = Arc::clone(&lane);
            let concurrent = Arc::clone(&concurrent);
            let max_concurrent = Arc::clone(&max_concurrent);
            handles.push(tokio::spawn(async move {
                lane.run(&format!("mem-{i}"), || async move {
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_concurrent.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(max_concurrent.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn global_concurrency_caps_total_in_flight() {
        let lane = Arc::new(WriteLane::new(2, Duration::from_secs(2)));
        let start = Instant::now();

        let mut handles = Vec::new();
        for i in 0..4 {
            let lane = Arc::clone(&lane);
            handles.push(tokio::spawn(async move {
                lane.run(&format!("mem-{i}"), || async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                })
                .await
                .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn returns_lane_timeout_when_record_lock_contended_past_deadline() {
        let lane = Arc::new(WriteLane::new(4, Duration::from_millis(20)));
        let lane2 = Arc::clone(&lane);
        let holder = tokio::spawn(async move {
            lane2
                .run("mem-1", || async move {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let err = lane.run("mem-1", || async move {}).await.unwrap_err();
        assert_eq!(err, ConcurrencyError::LaneTimeout);
        holder.await.unwrap().unwrap();
    }

    #[test]
    fn available_permits_reports_global_capacity() {
        let lane = WriteLane::new(3, Duration::from_secs(1));
        assert_eq!(lane.available_permits(), 3);
    }
}
