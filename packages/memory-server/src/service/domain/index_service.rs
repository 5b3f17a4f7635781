//! `IndexService`: the `rebuild_index`/`index_status` operation handlers,
//! and the [`IndexTaskExecutor`] that drives what those jobs actually do
//! once the [`IndexWorker`] dispatches them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use memory_palace_core::{DegradeReason, IndexJob, Memory, MemoryId, TaskType};
use tower::Service;

use crate::external::embedding::EmbeddingAdapter;
use crate::governance::GovernanceLoop;
use crate::index_worker::{IndexTaskExecutor, IndexWorker};
use crate::service::operation::{Operation, OperationError, OperationResponse};
use crate::storage::text_index::TextIndex;
use crate::storage::vector_index::VectorIndex;
use crate::storage::StoreEngine;

const REMOTE_STAGE_TIMEOUT: Duration = Duration::from_secs(5);

type BoxFuture = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

#[derive(Clone)]
pub struct IndexService {
    index: Arc<IndexWorker>,
    store: StoreEngine,
    text_index: Arc<TextIndex>,
    vector_index: Arc<VectorIndex>,
    embedding: Arc<EmbeddingAdapter>,
    governance: Arc<GovernanceLoop>,
}

impl IndexService {
    #[must_use]
    pub fn new(
        index: Arc<IndexWorker>,
        store: StoreEngine,
        text_index: Arc<TextIndex>,
        vector_index: Arc<VectorIndex>,
        embedding: Arc<EmbeddingAdapter>,
        governance: Arc<GovernanceLoop>,
    ) -> Self {
        Self { index, store, text_index, vector_index, embedding, governance }
    }

    async fn rebuild_all(&self) -> Result<Vec<String>, String> {
        let memories: Vec<Memory> = self.store.list_all().into_iter().filter(Memory::is_live).collect();
        self.text_index
            .rebuild(memories.iter().map(|m| (m.id, m.content.as_str())))
            .map_err(|e| e.to_string())?;

        let mut degrade = Vec::new();
        if self.embedding.is_enabled() {
            let mut vectors = Vec::with_capacity(memories.len());
            for memory in &memories {
                match self.embedding.embed(&memory.content, REMOTE_STAGE_TIMEOUT).await {
                    Ok(vector) => vectors.push((memory.id, vector)),
                    Err(_) => degrade.push(DegradeReason::EmbeddingRequestFailed.to_string()),
                }
            }
            self.vector_index.rebuild(vectors.into_iter());
        }
        Ok(degrade)
    }

    async fn reindex_one(&self, id: MemoryId) -> Result<Vec<String>, String> {
        let Some(memory) = self.store.get_memory(id) else {
            return Ok(Vec::new());
        };
        if !memory.is_live() {
            self.vector_index.remove(id);
            return Ok(Vec::new());
        }

        self.text_index.reindex_one(id, &memory.content).map_err(|e| e.to_string())?;
        if self.embedding.is_enabled() {
            match self.embedding.embed(&memory.content, REMOTE_STAGE_TIMEOUT).await {
                Ok(vector) => self.vector_index.upsert(id, vector),
                Err(_) => return Ok(vec![DegradeReason::EmbeddingRequestFailed.to_string()]),
            }
        }
        Ok(Vec::new())
    }

    async fn sleep_consolidation(&self) -> Result<Vec<String>, String> {
        let _suggestions = self.governance.sleep_consolidation(&self.vector_index).await;
        Ok(Vec::new())
    }
}

#[async_trait]
impl IndexTaskExecutor for IndexService {
    async fn execute(&self, job: &IndexJob) -> Result<Vec<String>, String> {
        match job.task_type {
            TaskType::RebuildIndex => self.rebuild_all().await,
            TaskType::ReindexMemory => {
                let id = job.memory_id.ok_or_else(|| "reindex_memory job missing memory_id".to_string())?;
                self.reindex_one(id).await
            }
            TaskType::SleepConsolidation => self.sleep_consolidation().await,
        }
    }
}

impl Service<Operation> for IndexService {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = BoxFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let index = Arc::clone(&self.index);
        Box::pin(async move {
            match op {
                Operation::RebuildIndex { reason, .. } => {
                    let job_id = index.enqueue(TaskType::RebuildIndex, None, &reason).map_err(OperationError::from)?;
                    Ok(OperationResponse::JobQueued { job_id })
                }
                Operation::IndexStatus { job_id: Some(job_id), .. } => Ok(OperationResponse::JobStatus { job: index.status(job_id) }),
                Operation::IndexStatus { job_id: None, .. } => {
                    Ok(OperationResponse::JobStatus { job: index.recent().into_iter().next() })
                }
                other => Err(OperationError::Internal(anyhow::anyhow!(
                    "operation not routed to index service: {other:?}"
                ))),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use memory_palace_core::EmbeddingConfig;
    use tempfile::tempdir;
    use tower::ServiceExt;

    use super::*;
    use crate::lane::WriteLane;
    use crate::service::operation::OperationContext;

    fn ctx() -> OperationContext {
        OperationContext::new(1, "sess", crate::service::operation::service_names::INDEX, 5_000)
    }

    fn make_service() -> (tempfile::TempDir, IndexService) {
        let dir = tempdir().unwrap();
        let store = StoreEngine::open(dir.path().join("s.redb")).unwrap();
        let index = Arc::new(IndexWorker::new(memory_palace_core::IndexWorkerConfig::default()));
        let text_index = Arc::new(TextIndex::in_memory().unwrap());
        let vector_index = Arc::new(VectorIndex::new(8));
        let embedding = Arc::new(EmbeddingAdapter::new(EmbeddingConfig { dim: 8, ..EmbeddingConfig::default() }));
        let lane = Arc::new(WriteLane::new(4, Duration::from_secs(1)));
        let governance = Arc::new(GovernanceLoop::new(memory_palace_core::GovernanceConfig::default(), store.clone(), lane));
        let service = IndexService::new(index, store, text_index, vector_index, embedding, governance);
        (dir, service)
    }

    #[tokio::test]
    async fn rebuild_index_enqueues_a_job() {
        let (_dir, mut service) = make_service();
        let op = Operation::RebuildIndex { ctx: ctx(), reason: "manual".to_string() };
        let resp = ServiceExt::ready(&mut service).await.unwrap().call(op).await.unwrap();
        let OperationResponse::JobQueued { job_id } = resp else { panic!("expected JobQueued") };

        let status = Operation::IndexStatus { ctx: ctx(), job_id: Some(job_id) };
        let resp = ServiceExt::ready(&mut service).await.unwrap().call(status).await.unwrap();
        let OperationResponse::JobStatus { job } = resp else { panic!("expected JobStatus") };
        assert_eq!(job.unwrap().job_id, job_id);
    }

    #[tokio::test]
    async fn index_status_without_job_id_returns_most_recent() {
        let (_dir, mut service) = make_service();
        let enqueue = Operation::RebuildIndex { ctx: ctx(), reason: "manual".to_string() };
        ServiceExt::ready(&mut service).await.unwrap().call(enqueue).await.unwrap();

        let status = Operation::IndexStatus { ctx: ctx(), job_id: None };
        let resp = ServiceExt::ready(&mut service).await.unwrap().call(status).await.unwrap();
        let OperationResponse::JobStatus { job } = resp else { panic!("expected JobStatus") };
        assert!(job.is_some());
    }

    #[tokio::test]
    async fn execute_rebuild_all_indexes_live_memories_and_skips_deprecated() {
        let (_dir, service) = make_service();
        let live = service.store.create("core", "a", "alive content", 0, "").unwrap();
        service.store.create("core", "b", "gone content", 0, "").unwrap();
        service.store.delete_path("core", "b").unwrap();

        let job = IndexJob {
            job_id: uuid::Uuid::new_v4(),
            task_type: TaskType::RebuildIndex,
            memory_id: None,
            reason: "test".to_string(),
            state: memory_palace_core::JobState::Queued,
            requested_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            degrade_reasons: Vec::new(),
        };
        let degrade = IndexTaskExecutor::execute(&service, &job).await.unwrap();
        assert!(degrade.is_empty());

        let hits = service.text_index.search("alive", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory_id, live.id);
    }

    #[tokio::test]
    async fn unrelated_operation_is_rejected() {
        let (_dir, mut service) = make_service();
        let op = Operation::ReadMemory { ctx: ctx(), address: "core://a".to_string() };
        let err = ServiceExt::ready(&mut service).await.unwrap().call(op).await.unwrap_err();
        assert!(matches!(err, OperationError::Internal(_)));
    }
}
