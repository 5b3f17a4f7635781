//! HTTP handlers for the control plane: the nine tool operations routed
//! through the operation pipeline, plus the governance maintenance surface
//! that bypasses it.
//!
//! `AppState` carries the boxed, middleware-wrapped operation pipeline
//! behind a `tokio::sync::Mutex` -- `tower::Service::call` takes `&mut
//! self` and the built pipeline isn't `Clone`, so concurrent HTTP handlers
//! serialize on acquiring it rather than each holding their own copy.

use std::future::poll_fn;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use memory_palace_core::{ReviewAction, SearchMode};
use serde::{Deserialize, Serialize};
use tower::Service;
use uuid::Uuid;

use crate::auth::{authorize, extract_presented_key, AuthDenyReason};
use crate::governance::{GovernanceError, GovernanceLoop};
use crate::index_worker::IndexWorker;
use crate::resolver::SystemResolution;
use crate::retrieval::{QueryIntent, SearchFilters};
use crate::service::operation::{
    service_names, CallerOrigin, Operation, OperationContext, OperationError, OperationResponse, UpdatePatch,
};
use crate::snapshot::FieldDiff;
use crate::storage::engine::{PathEntry, StoreError};

type BoxedPipelineFuture = Pin<Box<dyn std::future::Future<Output = Result<OperationResponse, OperationError>> + Send>>;
type BoxedPipeline =
    Box<dyn Service<Operation, Response = OperationResponse, Error = OperationError, Future = BoxedPipelineFuture> + Send>;

/// Type-erases a built operation pipeline so it can live in `AppState`.
/// Mirrors [`crate::service::router::OperationRouter`]'s own `ServiceWrapper`.
pub fn box_pipeline<S>(pipeline: S) -> BoxedPipeline
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send + 'static,
    S::Future: Send + 'static,
{
    struct Wrapper<S>(S);

    impl<S> Service<Operation> for Wrapper<S>
    where
        S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send,
        S::Future: Send + 'static,
    {
        type Response = OperationResponse;
        type Error = OperationError;
        type Future = BoxedPipelineFuture;

        fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
            self.0.poll_ready(cx)
        }

        fn call(&mut self, op: Operation) -> Self::Future {
            Box::pin(self.0.call(op))
        }
    }

    Box::new(Wrapper(pipeline))
}

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<tokio::sync::Mutex<BoxedPipeline>>,
    governance: Arc<GovernanceLoop>,
    index: Arc<IndexWorker>,
    auth: memory_palace_core::AuthConfig,
    session_id: String,
    call_timeout_ms: u64,
    next_call_id: Arc<AtomicU64>,
}

impl AppState {
    #[must_use]
    pub fn new(
        pipeline: BoxedPipeline,
        governance: Arc<GovernanceLoop>,
        index: Arc<IndexWorker>,
        auth: memory_palace_core::AuthConfig,
        session_id: String,
        call_timeout_ms: u64,
    ) -> Self {
        Self {
            pipeline: Arc::new(tokio::sync::Mutex::new(pipeline)),
            governance,
            index,
            auth,
            session_id,
            call_timeout_ms,
            next_call_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn ctx(&self, service_name: &'static str) -> OperationContext {
        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let mut ctx = OperationContext::new(call_id, self.session_id.clone(), service_name, self.call_timeout_ms);
        ctx.caller_origin = CallerOrigin::HttpControlPlane;
        ctx
    }

    async fn dispatch(&self, op: Operation) -> Result<OperationResponse, OperationError> {
        let mut pipeline = self.pipeline.lock().await;
        poll_fn(|cx| pipeline.poll_ready(cx)).await?;
        pipeline.call(op).await
    }
}

/// Reads `X-MCP-API-Key`/`Authorization` and the peer IP, rejecting the
/// request before it ever reaches the operation pipeline.
fn check_auth(state: &AppState, headers: &HeaderMap, peer: Option<SocketAddr>) -> Result<(), ApiError> {
    let presented = extract_presented_key(
        headers.get("x-mcp-api-key").and_then(|v| v.to_str().ok()),
        headers.get("authorization").and_then(|v| v.to_str().ok()),
    );
    authorize(&state.auth, presented, peer.map(|a| a.ip())).map_err(ApiError::from_auth)
}

/// Uniform error body returned to HTTP clients: a machine-readable `reason`
/// tag plus an optional human message.
#[derive(Debug, Serialize)]
struct ErrorBody {
    reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, reason: &'static str) -> Self {
        Self { status, body: ErrorBody { reason, message: None } }
    }

    fn with_message(status: StatusCode, reason: &'static str, message: impl Into<String>) -> Self {
        Self { status, body: ErrorBody { reason, message: Some(message.into()) } }
    }

    fn from_auth(reason: AuthDenyReason) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, reason.as_str())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<OperationError> for ApiError {
    fn from(err: OperationError) -> Self {
        match err {
            OperationError::UnknownService { .. } => Self::with_message(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", err.to_string()),
            OperationError::InvalidRequest { message } => Self::with_message(StatusCode::BAD_REQUEST, "invalid_request", message),
            OperationError::Timeout { .. } => Self::new(StatusCode::GATEWAY_TIMEOUT, "operation_timeout"),
            OperationError::Overloaded => Self::new(StatusCode::SERVICE_UNAVAILABLE, "overloaded"),
            OperationError::Resolver(resolver_err) => from_resolver_error(&resolver_err),
            OperationError::Concurrency(concurrency_err) => from_concurrency_error(concurrency_err),
            OperationError::Internal(anyhow_err) => from_internal_error(&anyhow_err),
        }
    }
}

fn from_resolver_error(err: &memory_palace_core::ResolverError) -> ApiError {
    use memory_palace_core::{AddressError, ResolverError};
    match err {
        ResolverError::Address(AddressError::InvalidDomain) => ApiError::new(StatusCode::BAD_REQUEST, "invalid_domain"),
        ResolverError::Address(AddressError::InvalidPath | AddressError::Malformed) => {
            ApiError::new(StatusCode::BAD_REQUEST, "invalid_path")
        }
        ResolverError::NotFound => ApiError::new(StatusCode::NOT_FOUND, "address_not_found"),
        ResolverError::AmbiguousPatch => ApiError::new(StatusCode::CONFLICT, "address_ambiguous_patch"),
    }
}

fn from_concurrency_error(err: memory_palace_core::ConcurrencyError) -> ApiError {
    use memory_palace_core::ConcurrencyError;
    match err {
        ConcurrencyError::LaneTimeout => ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "lane_timeout"),
        ConcurrencyError::StaleState => ApiError::new(StatusCode::CONFLICT, "stale_state"),
        ConcurrencyError::QueueFull => ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "queue_full"),
    }
}

/// Domain services wrap [`StoreError`] as `anyhow::Error` before returning
/// `OperationError::Internal`; downcast back to the typed error so the
/// store's specific conflict/not-found kinds still reach the client.
fn from_internal_error(err: &anyhow::Error) -> ApiError {
    match err.downcast_ref::<StoreError>() {
        Some(StoreError::NotFound) => ApiError::new(StatusCode::NOT_FOUND, "address_not_found"),
        Some(StoreError::PatchNotFound) => ApiError::new(StatusCode::CONFLICT, "patch_not_found"),
        Some(StoreError::PatchAmbiguous) => ApiError::new(StatusCode::CONFLICT, "address_ambiguous_patch"),
        Some(StoreError::InvalidTitle) => ApiError::new(StatusCode::BAD_REQUEST, "invalid_path"),
        _ => ApiError::with_message(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", err.to_string()),
    }
}

impl From<GovernanceError> for ApiError {
    fn from(err: GovernanceError) -> Self {
        match err {
            GovernanceError::ReviewNotFound => Self::new(StatusCode::NOT_FOUND, "review_not_found"),
            GovernanceError::ReviewExpired => Self::new(StatusCode::GONE, "review_expired"),
            GovernanceError::PhraseMismatch => Self::new(StatusCode::BAD_REQUEST, "confirmation_phrase_mismatch"),
            GovernanceError::StaleState => Self::new(StatusCode::CONFLICT, "stale_state"),
            GovernanceError::LimitReached => Self::new(StatusCode::SERVICE_UNAVAILABLE, "pending_reviews_full"),
        }
    }
}

// -- read_memory --------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ReadMemoryRequest {
    pub address: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum MemoryResponseBody {
    Memory { memory: memory_palace_core::Memory, breadcrumbs: Vec<PathEntry> },
    System { resolution: SystemResolutionBody },
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum SystemResolutionBody {
    Boot { core: Vec<memory_palace_core::Memory>, recent: Vec<memory_palace_core::Memory> },
    Index { total_live: usize, total_deprecated: usize },
    Recent { memories: Vec<memory_palace_core::Memory> },
}

impl From<SystemResolution> for SystemResolutionBody {
    fn from(resolution: SystemResolution) -> Self {
        match resolution {
            SystemResolution::Boot { core, recent } => Self::Boot { core, recent },
            SystemResolution::Index { total_live, total_deprecated } => Self::Index { total_live, total_deprecated },
            SystemResolution::Recent(memories) => Self::Recent { memories },
        }
    }
}

pub async fn read_memory(
    State(state): State<AppState>,
    Query(query): Query<ReadMemoryRequest>,
) -> Result<Json<MemoryResponseBody>, ApiError> {
    // Browse reads are unauthenticated; no check_auth call here.
    let ctx = state.ctx(service_names::MEMORY);
    let response = state.dispatch(Operation::ReadMemory { ctx, address: query.address }).await?;
    match response {
        OperationResponse::MemoryResolved { memory, breadcrumbs } => Ok(Json(MemoryResponseBody::Memory { memory, breadcrumbs })),
        OperationResponse::SystemResolved(resolution) => Ok(Json(MemoryResponseBody::System { resolution: resolution.into() })),
        other => Err(unexpected_response(other)),
    }
}

// -- create_memory -------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateMemoryRequest {
    pub domain: String,
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub disclosure: String,
    /// Terminal path segment (`[a-z0-9_-]+`). Omit to use `path` as the full
    /// explicit path, or -- if `path` ends in `/` -- to get a unique
    /// auto-numbered title under it.
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MemoryWrittenBody {
    pub memory: memory_palace_core::Memory,
    pub action: crate::guard::GuardAction,
    pub method: crate::guard::GuardMethod,
    pub degrade_reasons: Vec<memory_palace_core::DegradeReason>,
}

pub async fn create_memory(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<CreateMemoryRequest>,
) -> Result<Json<MemoryWrittenBody>, ApiError> {
    check_auth(&state, &headers, Some(peer))?;
    let ctx = state.ctx(service_names::MEMORY);
    let response = state
        .dispatch(Operation::CreateMemory {
            ctx,
            domain: body.domain,
            path: body.path,
            content: body.content,
            priority: body.priority,
            disclosure: body.disclosure,
            title: body.title,
        })
        .await?;
    memory_written_body(response)
}

fn memory_written_body(response: OperationResponse) -> Result<Json<MemoryWrittenBody>, ApiError> {
    match response {
        OperationResponse::MemoryWritten { memory, action, method, degrade_reasons } => {
            Ok(Json(MemoryWrittenBody { memory, action, method, degrade_reasons }))
        }
        other => Err(unexpected_response(other)),
    }
}

// -- update_memory --------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpdatePatchBody {
    Patch { old: String, new: String },
    Append { tail: String },
    Meta { priority: Option<u32>, disclosure: Option<String> },
}

impl From<UpdatePatchBody> for UpdatePatch {
    fn from(body: UpdatePatchBody) -> Self {
        match body {
            UpdatePatchBody::Patch { old, new } => Self::Patch { old, new },
            UpdatePatchBody::Append { tail } => Self::Append { tail },
            UpdatePatchBody::Meta { priority, disclosure } => Self::Meta { priority, disclosure },
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemoryRequest {
    pub address: String,
    #[serde(flatten)]
    pub patch: UpdatePatchBody,
}

pub async fn update_memory(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<UpdateMemoryRequest>,
) -> Result<Json<MemoryWrittenBody>, ApiError> {
    check_auth(&state, &headers, Some(peer))?;
    let ctx = state.ctx(service_names::MEMORY);
    let response =
        state.dispatch(Operation::UpdateMemory { ctx, address: body.address, patch: body.patch.into() }).await?;
    memory_written_body(response)
}

// -- delete_memory --------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DeleteMemoryRequest {
    pub domain: String,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct DeletedBody {
    pub remaining_paths: usize,
}

pub async fn delete_memory(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<DeleteMemoryRequest>,
) -> Result<Json<DeletedBody>, ApiError> {
    check_auth(&state, &headers, Some(peer))?;
    let ctx = state.ctx(service_names::MEMORY);
    let response = state.dispatch(Operation::DeleteMemory { ctx, domain: body.domain, path: body.path }).await?;
    match response {
        OperationResponse::Deleted { remaining_paths } => Ok(Json(DeletedBody { remaining_paths })),
        other => Err(unexpected_response(other)),
    }
}

// -- add_alias -------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AddAliasRequest {
    pub domain: String,
    pub path: String,
    pub target_address: String,
}

#[derive(Debug, Serialize)]
pub struct AliasAddedBody {
    pub memory_id: Uuid,
}

pub async fn add_alias(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<AddAliasRequest>,
) -> Result<Json<AliasAddedBody>, ApiError> {
    check_auth(&state, &headers, Some(peer))?;
    let ctx = state.ctx(service_names::MEMORY);
    let response = state
        .dispatch(Operation::AddAlias { ctx, domain: body.domain, path: body.path, target_address: body.target_address })
        .await?;
    match response {
        OperationResponse::AliasAdded { memory_id } => Ok(Json(AliasAddedBody { memory_id })),
        other => Err(unexpected_response(other)),
    }
}

// -- search_memory ---------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct SearchFiltersBody {
    pub domain: Option<String>,
    pub path_prefix: Option<String>,
    pub max_priority: Option<u32>,
    pub updated_after: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<SearchFiltersBody> for SearchFilters {
    fn from(body: SearchFiltersBody) -> Self {
        Self {
            domain: body.domain,
            path_prefix: body.path_prefix,
            max_priority: body.max_priority,
            updated_after: body.updated_after,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchMemoryRequest {
    pub query: String,
    #[serde(default = "default_search_limit")]
    pub max_results: usize,
    #[serde(default)]
    pub mode: Option<SearchMode>,
    #[serde(default)]
    pub candidate_multiplier: Option<usize>,
    #[serde(default)]
    pub include_session: bool,
    #[serde(default)]
    pub filters: SearchFiltersBody,
}

fn default_search_limit() -> usize {
    10
}

#[derive(Debug, Serialize)]
pub struct SearchResultsBody {
    pub query: String,
    pub query_effective: String,
    pub mode_requested: SearchMode,
    pub mode_applied: SearchMode,
    pub intent: QueryIntent,
    pub strategy_template: &'static str,
    pub hits: Vec<crate::retrieval::RetrievalHit>,
    pub session_count: usize,
    pub global_count: usize,
    pub degrade_reasons: Vec<memory_palace_core::DegradeReason>,
    pub degraded: bool,
}

pub async fn search_memory(
    State(state): State<AppState>,
    Json(body): Json<SearchMemoryRequest>,
) -> Result<Json<SearchResultsBody>, ApiError> {
    // Reads are unauthenticated; `check_auth` is intentionally skipped here
    // too, matching `read_memory`.
    let ctx = state.ctx(service_names::RETRIEVAL);
    let response = state
        .dispatch(Operation::SearchMemory {
            ctx,
            query: body.query,
            max_results: body.max_results,
            mode_override: body.mode,
            candidate_multiplier: body.candidate_multiplier,
            include_session: body.include_session,
            filters: body.filters.into(),
        })
        .await?;
    match response {
        OperationResponse::SearchResults {
            query,
            query_effective,
            mode_requested,
            mode_applied,
            intent,
            strategy_template,
            hits,
            session_count,
            global_count,
            degrade_reasons,
            degraded,
        } => Ok(Json(SearchResultsBody {
            query,
            query_effective,
            mode_requested,
            mode_applied,
            intent,
            strategy_template,
            hits,
            session_count,
            global_count,
            degrade_reasons,
            degraded,
        })),
        other => Err(unexpected_response(other)),
    }
}

// -- compact_context -------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CompactContextRequest {
    pub address: String,
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
}

fn default_max_lines() -> usize {
    8
}

#[derive(Debug, Serialize)]
pub struct GistBody {
    pub text: String,
    pub from_llm: bool,
}

pub async fn compact_context(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<CompactContextRequest>,
) -> Result<Json<GistBody>, ApiError> {
    check_auth(&state, &headers, Some(peer))?;
    let ctx = state.ctx(service_names::MEMORY);
    let response = state.dispatch(Operation::CompactContext { ctx, address: body.address, max_lines: body.max_lines }).await?;
    match response {
        OperationResponse::Gist { text, from_llm } => Ok(Json(GistBody { text, from_llm })),
        other => Err(unexpected_response(other)),
    }
}

// -- rebuild_index / index_status / retry ----------------------------------

#[derive(Debug, Deserialize)]
pub struct RebuildIndexRequest {
    #[serde(default = "default_rebuild_reason")]
    pub reason: String,
}

fn default_rebuild_reason() -> String {
    "operator requested".to_string()
}

#[derive(Debug, Serialize)]
pub struct JobQueuedBody {
    pub job_id: Uuid,
    pub queued: bool,
    pub deduped: bool,
    pub dropped: bool,
}

pub async fn rebuild_index(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<RebuildIndexRequest>,
) -> Result<Json<JobQueuedBody>, ApiError> {
    check_auth(&state, &headers, Some(peer))?;
    let ctx = state.ctx(service_names::INDEX);
    let response = state.dispatch(Operation::RebuildIndex { ctx, reason: body.reason }).await?;
    match response {
        OperationResponse::JobQueued { job_id } => Ok(Json(JobQueuedBody { job_id, queued: true, deduped: false, dropped: false })),
        other => Err(unexpected_response(other)),
    }
}

#[derive(Debug, Deserialize)]
pub struct IndexStatusQuery {
    pub job_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct JobStatusBody {
    pub job: Option<memory_palace_core::IndexJob>,
    pub queue_len: usize,
}

pub async fn index_status(
    State(state): State<AppState>,
    Query(query): Query<IndexStatusQuery>,
) -> Result<Json<JobStatusBody>, ApiError> {
    let ctx = state.ctx(service_names::INDEX);
    let response = state.dispatch(Operation::IndexStatus { ctx, job_id: query.job_id }).await?;
    match response {
        OperationResponse::JobStatus { job } => Ok(Json(JobStatusBody { job, queue_len: state.index.queue_len() })),
        other => Err(unexpected_response(other)),
    }
}

#[derive(Debug, Deserialize)]
pub struct RetryJobRequest {
    pub job_id: Uuid,
}

pub async fn retry_index_job(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<RetryJobRequest>,
) -> Result<Json<JobQueuedBody>, ApiError> {
    check_auth(&state, &headers, Some(peer))?;
    let job_id = state
        .index
        .retry(body.job_id)
        .map_err(|e| ApiError::from(OperationError::Concurrency(e)))?;
    Ok(Json(JobQueuedBody { job_id, queued: true, deduped: false, dropped: false }))
}

// -- vitality/cleanup -------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PrepareCleanupRequest {
    pub reviewer: String,
    pub action: ReviewAction,
    #[serde(default = "default_cleanup_limit")]
    pub limit: usize,
}

fn default_cleanup_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
pub struct PrepareCleanupBody {
    pub review: memory_palace_core::CleanupReview,
}

pub async fn prepare_cleanup(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<PrepareCleanupRequest>,
) -> Result<Json<PrepareCleanupBody>, ApiError> {
    check_auth(&state, &headers, Some(peer))?;
    let review = state.governance.prepare_cleanup_review(&body.reviewer, body.action, body.limit)?;
    Ok(Json(PrepareCleanupBody { review }))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmCleanupRequest {
    pub review_id: Uuid,
    pub confirmation_phrase: String,
}

#[derive(Debug, Serialize)]
pub struct ConfirmCleanupBody {
    pub status: &'static str,
    pub deleted_count: usize,
    pub kept_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
}

pub async fn confirm_cleanup(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<ConfirmCleanupRequest>,
) -> Result<Json<ConfirmCleanupBody>, ApiError> {
    check_auth(&state, &headers, Some(peer))?;
    let outcome = state.governance.confirm_review(body.review_id, &body.confirmation_phrase).await?;
    Ok(Json(ConfirmCleanupBody {
        status: "confirmed",
        deleted_count: outcome.deleted.len(),
        kept_count: outcome.kept.len(),
        skipped_count: outcome.skipped.len(),
        error_count: 0,
    }))
}

// -- snapshot ledger ---------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct SnapshotListBody {
    pub snapshots: Vec<memory_palace_core::Snapshot>,
}

pub async fn list_snapshots(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<SnapshotListBody>, ApiError> {
    check_auth(&state, &headers, Some(peer))?;
    let ctx = state.ctx(service_names::MEMORY);
    let response = state.dispatch(Operation::ListSnapshots { ctx }).await?;
    match response {
        OperationResponse::SnapshotList { snapshots } => Ok(Json(SnapshotListBody { snapshots })),
        other => Err(unexpected_response(other)),
    }
}

#[derive(Debug, Deserialize)]
pub struct DiffSnapshotRequest {
    pub resource_id: String,
    pub current: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct SnapshotDiffBody {
    pub diffs: Vec<FieldDiff>,
}

pub async fn diff_snapshot(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<DiffSnapshotRequest>,
) -> Result<Json<SnapshotDiffBody>, ApiError> {
    check_auth(&state, &headers, Some(peer))?;
    let ctx = state.ctx(service_names::MEMORY);
    let response = state.dispatch(Operation::DiffSnapshot { ctx, resource_id: body.resource_id, current: body.current }).await?;
    match response {
        OperationResponse::SnapshotDiff { diffs } => Ok(Json(SnapshotDiffBody { diffs })),
        other => Err(unexpected_response(other)),
    }
}

#[derive(Debug, Deserialize)]
pub struct ResourceIdRequest {
    pub resource_id: String,
}

#[derive(Debug, Serialize)]
pub struct SnapshotRolledBackBody {
    pub resource_id: String,
    pub restored: bool,
}

pub async fn rollback_snapshot(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<ResourceIdRequest>,
) -> Result<Json<SnapshotRolledBackBody>, ApiError> {
    check_auth(&state, &headers, Some(peer))?;
    let ctx = state.ctx(service_names::MEMORY);
    let response = state.dispatch(Operation::RollbackSnapshot { ctx, resource_id: body.resource_id }).await?;
    match response {
        OperationResponse::SnapshotRolledBack { resource_id, restored } => Ok(Json(SnapshotRolledBackBody { resource_id, restored })),
        other => Err(unexpected_response(other)),
    }
}

#[derive(Debug, Serialize)]
pub struct SnapshotApprovedBody {
    pub resource_id: String,
}

pub async fn approve_snapshot(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(body): Json<ResourceIdRequest>,
) -> Result<Json<SnapshotApprovedBody>, ApiError> {
    check_auth(&state, &headers, Some(peer))?;
    let ctx = state.ctx(service_names::MEMORY);
    let response = state.dispatch(Operation::ApproveSnapshot { ctx, resource_id: body.resource_id }).await?;
    match response {
        OperationResponse::SnapshotApproved { resource_id } => Ok(Json(SnapshotApprovedBody { resource_id })),
        other => Err(unexpected_response(other)),
    }
}

#[derive(Debug, Serialize)]
pub struct SnapshotsClearedBody {
    pub count: usize,
}

pub async fn clear_snapshots(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<SnapshotsClearedBody>, ApiError> {
    check_auth(&state, &headers, Some(peer))?;
    let ctx = state.ctx(service_names::MEMORY);
    let response = state.dispatch(Operation::ClearSnapshots { ctx }).await?;
    match response {
        OperationResponse::SnapshotsCleared { count } => Ok(Json(SnapshotsClearedBody { count })),
        other => Err(unexpected_response(other)),
    }
}

fn unexpected_response(response: OperationResponse) -> ApiError {
    ApiError::with_message(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        format!("domain service returned an unexpected response shape: {response:?}"),
    )
}
