//! `RetrievalService`: the thin `tower::Service<Operation>` adapter over
//! [`RetrievalPipeline`] that handles `search_memory`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tower::Service;

use crate::retrieval::{RetrievalPipeline, RetrievalRequest};
use crate::service::operation::{Operation, OperationError, OperationResponse};

const REMOTE_STAGE_TIMEOUT: Duration = Duration::from_secs(5);
/// Boundary for `max_results`: `search_memory` rejects 0 and anything above
/// this before it ever reaches the pipeline.
const MAX_RESULTS_CEILING: usize = 50;
/// Boundary for `candidate_multiplier`, when the caller overrides the
/// strategy template's default.
const CANDIDATE_MULTIPLIER_CEILING: usize = 20;

type BoxFuture = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

#[derive(Clone)]
pub struct RetrievalService {
    pipeline: Arc<RetrievalPipeline>,
}

impl RetrievalService {
    #[must_use]
    pub fn new(pipeline: Arc<RetrievalPipeline>) -> Self {
        Self { pipeline }
    }
}

impl Service<Operation> for RetrievalService {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = BoxFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let pipeline = Arc::clone(&self.pipeline);
        Box::pin(async move {
            match op {
                Operation::SearchMemory { query, max_results, mode_override, candidate_multiplier, include_session, filters, .. } => {
                    if max_results == 0 || max_results > MAX_RESULTS_CEILING {
                        return Err(OperationError::InvalidRequest {
                            message: format!("max_results must be between 1 and {MAX_RESULTS_CEILING}, got {max_results}"),
                        });
                    }
                    if let Some(multiplier) = candidate_multiplier {
                        if multiplier == 0 || multiplier > CANDIDATE_MULTIPLIER_CEILING {
                            return Err(OperationError::InvalidRequest {
                                message: format!("candidate_multiplier must be between 1 and {CANDIDATE_MULTIPLIER_CEILING}, got {multiplier}"),
                            });
                        }
                    }
                    let request = RetrievalRequest {
                        query: query.clone(),
                        max_results,
                        mode_override,
                        candidate_multiplier,
                        include_session,
                        filters,
                        always_include: Vec::new(),
                        remote_timeout: REMOTE_STAGE_TIMEOUT,
                    };
                    let result = pipeline.search(&request).await;
                    Ok(OperationResponse::SearchResults {
                        query,
                        query_effective: result.query_effective,
                        mode_requested: result.mode_requested,
                        mode_applied: result.mode_applied,
                        intent: result.intent,
                        strategy_template: result.strategy_template,
                        hits: result.hits,
                        session_count: result.session_count,
                        global_count: result.global_count,
                        degraded: !result.degrade_reasons.is_empty(),
                        degrade_reasons: result.degrade_reasons,
                    })
                }
                other => Err(OperationError::Internal(anyhow::anyhow!(
                    "operation not routed to retrieval service: {other:?}"
                ))),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use memory_palace_core::{EmbeddingConfig, GovernanceConfig, RetrievalConfig};
    use tempfile::tempdir;
    use tower::ServiceExt;

    use super::*;
    use crate::external::embedding::EmbeddingAdapter;
    use crate::external::rerank::RerankAdapter;
    use crate::retrieval::SearchFilters;
    use crate::service::operation::OperationContext;
    use crate::storage::text_index::TextIndex;
    use crate::storage::vector_index::VectorIndex;
    use crate::storage::StoreEngine;

    fn ctx() -> OperationContext {
        OperationContext::new(1, "sess", crate::service::operation::service_names::RETRIEVAL, 5_000)
    }

    fn search_op(query: &str, max_results: usize) -> Operation {
        Operation::SearchMemory {
            ctx: ctx(),
            query: query.to_string(),
            max_results,
            mode_override: None,
            candidate_multiplier: None,
            include_session: false,
            filters: SearchFilters::default(),
        }
    }

    fn make_service() -> (tempfile::TempDir, RetrievalService) {
        let dir = tempdir().unwrap();
        let store = StoreEngine::open(dir.path().join("s.redb")).unwrap();
        let text_index = Arc::new(TextIndex::in_memory().unwrap());
        let vector_index = Arc::new(VectorIndex::new(32));
        let embedding = Arc::new(EmbeddingAdapter::new(EmbeddingConfig { dim: 32, ..EmbeddingConfig::default() }));
        let rerank = Arc::new(RerankAdapter::new(memory_palace_core::RerankConfig::default()));
        let memory = store.create("core", "a", "Prefer concise code over clever code", 0, "").unwrap();
        text_index.rebuild(std::iter::once((memory.id, memory.content.as_str()))).unwrap();
        let pipeline = Arc::new(RetrievalPipeline::new(
            RetrievalConfig::default(),
            store,
            text_index,
            vector_index,
            embedding,
            rerank,
            GovernanceConfig::default(),
        ));
        (dir, RetrievalService::new(pipeline))
    }

    #[tokio::test]
    async fn search_memory_routes_to_the_pipeline_and_returns_hits() {
        let (_dir, mut service) = make_service();
        let op = search_op("concise", 5);
        let resp = ServiceExt::ready(&mut service).await.unwrap().call(op).await.unwrap();
        let OperationResponse::SearchResults { hits, .. } = resp else { panic!("expected SearchResults") };
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "Prefer concise code over clever code");
    }

    #[tokio::test]
    async fn zero_max_results_is_rejected() {
        let (_dir, mut service) = make_service();
        let op = search_op("concise", 0);
        let err = ServiceExt::ready(&mut service).await.unwrap().call(op).await.unwrap_err();
        assert!(matches!(err, OperationError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn max_results_above_ceiling_is_rejected() {
        let (_dir, mut service) = make_service();
        let op = search_op("concise", 51);
        let err = ServiceExt::ready(&mut service).await.unwrap().call(op).await.unwrap_err();
        assert!(matches!(err, OperationError::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn max_results_at_ceiling_is_accepted() {
        let (_dir, mut service) = make_service();
        let op = search_op("concise", 50);
        ServiceExt::ready(&mut service).await.unwrap().call(op).await.unwrap();
    }

    #[tokio::test]
    async fn unrelated_operation_is_rejected() {
        let (_dir, mut service) = make_service();
        let op = Operation::RebuildIndex { ctx: ctx(), reason: "manual".to_string() };
        let err = ServiceExt::ready(&mut service).await.unwrap().call(op).await.unwrap_err();
        assert!(matches!(err, OperationError::Internal(_)));
    }
}
