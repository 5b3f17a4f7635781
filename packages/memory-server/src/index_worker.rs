//! Index Worker: the bounded FIFO queue of background reindex tasks.
//! Accepts `rebuild_index`, `reindex_memory`, and
//! `sleep_consolidation` jobs, dedups same-shape pending jobs, and drives
//! each through the state machine in [`JobState`] via a caller-supplied
//! [`IndexTaskExecutor`] -- the worker itself is queue-and-scheduling
//! machinery, not task semantics.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use memory_palace_core::{ConcurrencyError, IndexJob, IndexWorkerConfig, JobState, MemoryId, TaskType};
use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

/// Executes the actual work behind one [`IndexJob`]. Implemented by the
/// governance/retrieval wiring; the worker only calls it.
#[async_trait]
pub trait IndexTaskExecutor: Send + Sync {
    async fn execute(&self, job: &IndexJob) -> Result<Vec<String>, String>;
}

struct Inner {
    queue: Mutex<VecDeque<Uuid>>,
    jobs: DashMap<Uuid, IndexJob>,
    notify: Notify,
}

#[derive(Clone)]
pub struct IndexWorker {
    config: IndexWorkerConfig,
    inner: Arc<Inner>,
}

impl IndexWorker {
    #[must_use]
    pub fn new(config: IndexWorkerConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                jobs: DashMap::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Queues a task, or returns the id of an already-queued job with the
    /// same `(task_type, memory_id)` dedup key. `Err(QueueFull)` once the
    /// queue is at `queue_capacity`.
    pub fn enqueue(&self, task_type: TaskType, memory_id: Option<MemoryId>, reason: &str) -> Result<Uuid, ConcurrencyError> {
        let dedup_key = (task_type, memory_id);
        {
            let queue = self.inner.queue.lock();
            for queued_id in queue.iter() {
                if let Some(job) = self.inner.jobs.get(queued_id) {
                    if job.state == JobState::Queued && job.dedup_key() == dedup_key {
                        return Ok(*queued_id);
                    }
                }
            }
            if queue.len() >= self.config.queue_capacity {
                return Err(ConcurrencyError::QueueFull);
            }
        }

        let job_id = Uuid::new_v4();
        let job = IndexJob {
            job_id,
            task_type,
            memory_id,
            reason: reason.to_string(),
            state: JobState::Queued,
            requested_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            degrade_reasons: Vec::new(),
        };
        self.inner.jobs.insert(job_id, job);
        self.inner.queue.lock().push_back(job_id);
        self.inner.notify.notify_one();
        Ok(job_id)
    }

    /// Marks a queued job cancelled outright, or a running job
    /// `Cancelling` so the executor can observe it cooperatively.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        let Some(mut job) = self.inner.jobs.get_mut(&job_id) else {
            return false;
        };
        match job.state {
            JobState::Queued => {
                job.state = JobState::Cancelled;
                job.finished_at = Some(Utc::now());
                drop(job);
                self.inner.queue.lock().retain(|id| *id != job_id);
                true
            }
            JobState::Running => {
                job.state = JobState::Cancelling;
                true
            }
            _ => false,
        }
    }

    /// Re-queues a terminal (failed, cancelled, or dropped) job under a
    /// fresh id, preserving its original task shape.
    pub fn retry(&self, job_id: Uuid) -> Result<Uuid, ConcurrencyError> {
        let Some(job) = self.inner.jobs.get(&job_id).map(|j| j.clone()) else {
            return Err(ConcurrencyError::StaleState);
        };
        if !job.state.is_terminal() || job.state == JobState::Succeeded {
            return Err(ConcurrencyError::StaleState);
        }
        self.enqueue(job.task_type, job.memory_id, &job.reason)
    }

    #[must_use]
    pub fn status(&self, job_id: Uuid) -> Option<IndexJob> {
        self.inner.jobs.get(&job_id).map(|j| j.clone())
    }

    /// Most recently requested jobs, newest first, capped at
    /// `recent_jobs_ring`.
    #[must_use]
    pub fn recent(&self) -> Vec<IndexJob> {
        let mut jobs: Vec<IndexJob> = self.inner.jobs.iter().map(|j| j.value().clone()).collect();
        jobs.sort_by(|a, b| b.requested_at.cmp(&a.requested_at));
        jobs.truncate(self.config.recent_jobs_ring);
        jobs
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Runs the dispatch loop until `shutdown` fires. Pops one job at a
    /// time, runs it through `executor` with retry/backoff on failure, and
    /// prunes completed jobs past `recent_jobs_ring`.
    pub async fn run(&self, executor: Arc<dyn IndexTaskExecutor>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            let next = self.inner.queue.lock().pop_front();
            let Some(job_id) = next else {
                tokio::select! {
                    () = self.inner.notify.notified() => continue,
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() { return; }
                        continue;
                    }
                }
            };
            if *shutdown.borrow() {
                return;
            }
            self.run_one(job_id, &executor).await;
        }
    }

    /// Runs `job` exactly once. A failed execution is terminal -- index jobs
    /// are not automatically retried; re-enqueueing is only done through
    /// [`IndexWorker::retry`], an explicit operator action.
    async fn run_one(&self, job_id: Uuid, executor: &Arc<dyn IndexTaskExecutor>) {
        {
            let Some(mut job) = self.inner.jobs.get_mut(&job_id) else { return };
            if job.state == JobState::Cancelled {
                return;
            }
            job.state = JobState::Running;
            job.started_at = Some(Utc::now());
        }

        let job_snapshot = match self.inner.jobs.get(&job_id) {
            Some(j) => j.value().clone(),
            None => return,
        };
        let result = executor.execute(&job_snapshot).await;

        let mut job = match self.inner.jobs.get_mut(&job_id) {
            Some(j) => j,
            None => return,
        };
        job.finished_at = Some(Utc::now());
        match result {
            Ok(degrade_reasons) => {
                job.state = if job.state == JobState::Cancelling { JobState::Cancelled } else { JobState::Succeeded };
                job.degrade_reasons = degrade_reasons;
            }
            Err(err) => {
                job.state = JobState::Failed;
                job.error = Some(err);
            }
        }
    }
}

/// Jittered backoff delay for the `attempt`-th retry (1-indexed) of a
/// remote call, capped at `max_backoff`. Jitter is applied as a random
/// factor in `[0.5, 1.0]` of the doubled delay, so concurrent retries
/// don't all wake up on the same tick.
#[must_use]
pub fn backoff_for_attempt(base: Duration, max: Duration, attempt: u32) -> Duration {
    let doubled = base.saturating_mul(2u32.saturating_pow(attempt)).min(max);
    let factor = rand::Rng::random_range(&mut rand::rng(), 0.5..=1.0);
    doubled.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysOk;
    #[async_trait]
    impl IndexTaskExecutor for AlwaysOk {
        async fn execute(&self, _job: &IndexJob) -> Result<Vec<String>, String> {
            Ok(vec![])
        }
    }

    struct AlwaysFails;
    #[async_trait]
    impl IndexTaskExecutor for AlwaysFails {
        async fn execute(&self, _job: &IndexJob) -> Result<Vec<String>, String> {
            Err("boom".to_string())
        }
    }

    fn small_config() -> IndexWorkerConfig {
        IndexWorkerConfig {
            queue_capacity: 2,
            recent_jobs_ring: 10,
            defer_on_write: true,
            max_remote_retries: 2,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }

    #[test]
    fn enqueue_dedups_same_shaped_queued_job() {
        let worker = IndexWorker::new(small_config());
        let id = Uuid::new_v4();
        let first = worker.enqueue(TaskType::ReindexMemory, Some(id), "r1").unwrap();
        let second = worker.enqueue(TaskType::ReindexMemory, Some(id), "r2").unwrap();
        assert_eq!(first, second);
        assert_eq!(worker.queue_len(), 1);
    }

    #[test]
    fn enqueue_rejects_once_capacity_reached() {
        let worker = IndexWorker::new(small_config());
        worker.enqueue(TaskType::ReindexMemory, Some(Uuid::new_v4()), "a").unwrap();
        worker.enqueue(TaskType::ReindexMemory, Some(Uuid::new_v4()), "b").unwrap();
        let err = worker.enqueue(TaskType::ReindexMemory, Some(Uuid::new_v4()), "c").unwrap_err();
        assert_eq!(err, ConcurrencyError::QueueFull);
    }

    #[test]
    fn cancel_queued_job_removes_it_from_queue() {
        let worker = IndexWorker::new(small_config());
        let id = worker.enqueue(TaskType::RebuildIndex, None, "r").unwrap();
        assert!(worker.cancel(id));
        assert_eq!(worker.queue_len(), 0);
        assert_eq!(worker.status(id).unwrap().state, JobState::Cancelled);
    }

    #[tokio::test]
    async fn run_processes_queued_job_to_success() {
        let worker = IndexWorker::new(small_config());
        let id = worker.enqueue(TaskType::RebuildIndex, None, "r").unwrap();
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let worker_clone = worker.clone();
        let handle = tokio::spawn(async move {
            worker_clone.run(Arc::new(AlwaysOk), rx).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.abort();
        assert_eq!(worker.status(id).unwrap().state, JobState::Succeeded);
    }

    #[tokio::test]
    async fn run_marks_failed_jobs_failed_without_retrying() {
        let worker = IndexWorker::new(small_config());
        let id = worker.enqueue(TaskType::RebuildIndex, None, "r").unwrap();
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let worker_clone = worker.clone();
        let handle = tokio::spawn(async move {
            worker_clone.run(Arc::new(AlwaysFails), rx).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.abort();
        let job = worker.status(id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
    }

    #[test]
    fn retry_requeues_failed_job_under_new_id() {
        let worker = IndexWorker::new(small_config());
        let id = worker.enqueue(TaskType::RebuildIndex, None, "r").unwrap();
        {
            let mut job = worker.inner.jobs.get_mut(&id).unwrap();
            job.state = JobState::Failed;
        }
        worker.inner.queue.lock().clear();
        let retried = worker.retry(id).unwrap();
        assert_ne!(retried, id);
        assert_eq!(worker.status(retried).unwrap().state, JobState::Queued);
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(1);
        let short = backoff_for_attempt(base, max, 1);
        assert!(short >= Duration::from_millis(100) && short <= Duration::from_millis(200));
        let capped = backoff_for_attempt(base, max, 10);
        assert!(capped >= max.mul_f64(0.5) && capped <= max);
    }

    #[test]
    fn backoff_jitter_varies_across_calls() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(10);
        let samples: std::collections::HashSet<Duration> = (0..20).map(|_| backoff_for_attempt(base, max, 3)).collect();
        assert!(samples.len() > 1);
    }
}
