//! The typed operation surface: one variant per MCP tool contract,
//! dispatched through the Tower pipeline to the domain service that owns it.

use memory_palace_core::{DegradeReason, IndexJob, Memory, MemoryId, SearchMode, Snapshot};
use uuid::Uuid;

use crate::guard::{GuardAction, GuardMethod};
use crate::resolver::SystemResolution;
use crate::retrieval::{QueryIntent, RetrievalHit, SearchFilters};
use crate::snapshot::FieldDiff;
use crate::storage::engine::PathEntry;

/// Where a call originated. Carried through for audit logging; every
/// engine-internal call (decay sweep, sleep consolidation) uses `System`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerOrigin {
    McpClient,
    HttpControlPlane,
    System,
}

/// Context threaded through every operation. `service_name` selects which
/// domain service the [`crate::service::router::OperationRouter`] dispatches to.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub call_id: u64,
    pub session_id: String,
    pub service_name: &'static str,
    pub caller_origin: CallerOrigin,
    pub call_timeout_ms: u64,
}

impl OperationContext {
    #[must_use]
    pub fn new(call_id: u64, session_id: impl Into<String>, service_name: &'static str, call_timeout_ms: u64) -> Self {
        Self {
            call_id,
            session_id: session_id.into(),
            service_name,
            caller_origin: CallerOrigin::McpClient,
            call_timeout_ms,
        }
    }
}

/// Names under which domain services register with the
/// [`crate::service::router::OperationRouter`].
pub mod service_names {
    pub const MEMORY: &str = "memory";
    pub const RETRIEVAL: &str = "retrieval";
    pub const INDEX: &str = "index";
}

/// What kind of content change `UpdateMemory` performs.
#[derive(Debug, Clone)]
pub enum UpdatePatch {
    /// Replace the unique occurrence of `old` with `new`.
    Patch { old: String, new: String },
    /// Append to the end of the content.
    Append { tail: String },
    /// Metadata-only; bypasses the Write Guard.
    Meta { priority: Option<u32>, disclosure: Option<String> },
}

/// One of the nine MCP tool calls.
#[derive(Debug, Clone)]
pub enum Operation {
    ReadMemory {
        ctx: OperationContext,
        address: String,
    },
    CreateMemory {
        ctx: OperationContext,
        domain: String,
        path: String,
        content: String,
        priority: u32,
        disclosure: String,
        /// Optional terminal path segment (`[a-z0-9_-]+`). When absent and
        /// `path` ends in `/`, the store assigns a unique numeric token
        /// under that parent.
        title: Option<String>,
    },
    UpdateMemory {
        ctx: OperationContext,
        address: String,
        patch: UpdatePatch,
    },
    DeleteMemory {
        ctx: OperationContext,
        domain: String,
        path: String,
    },
    AddAlias {
        ctx: OperationContext,
        domain: String,
        path: String,
        target_address: String,
    },
    SearchMemory {
        ctx: OperationContext,
        query: String,
        max_results: usize,
        mode_override: Option<SearchMode>,
        candidate_multiplier: Option<usize>,
        include_session: bool,
        filters: SearchFilters,
    },
    CompactContext {
        ctx: OperationContext,
        address: String,
        max_lines: usize,
    },
    RebuildIndex {
        ctx: OperationContext,
        reason: String,
    },
    IndexStatus {
        ctx: OperationContext,
        job_id: Option<Uuid>,
    },
    ListSnapshots {
        ctx: OperationContext,
    },
    DiffSnapshot {
        ctx: OperationContext,
        resource_id: String,
        current: serde_json::Value,
    },
    RollbackSnapshot {
        ctx: OperationContext,
        resource_id: String,
    },
    ApproveSnapshot {
        ctx: OperationContext,
        resource_id: String,
    },
    ClearSnapshots {
        ctx: OperationContext,
    },
}

impl Operation {
    #[must_use]
    pub fn ctx(&self) -> &OperationContext {
        match self {
            Self::ReadMemory { ctx, .. }
            | Self::CreateMemory { ctx, .. }
            | Self::UpdateMemory { ctx, .. }
            | Self::DeleteMemory { ctx, .. }
            | Self::AddAlias { ctx, .. }
            | Self::SearchMemory { ctx, .. }
            | Self::CompactContext { ctx, .. }
            | Self::RebuildIndex { ctx, .. }
            | Self::IndexStatus { ctx, .. }
            | Self::ListSnapshots { ctx, .. }
            | Self::DiffSnapshot { ctx, .. }
            | Self::RollbackSnapshot { ctx, .. }
            | Self::ApproveSnapshot { ctx, .. }
            | Self::ClearSnapshots { ctx, .. } => ctx,
        }
    }
}

/// Successful response from a domain service.
#[derive(Debug, Clone)]
pub enum OperationResponse {
    MemoryResolved {
        memory: Memory,
        breadcrumbs: Vec<PathEntry>,
    },
    /// A `system://` pseudo-address resolution (`boot`/`index`/`recent`),
    /// which doesn't name a single memory.
    SystemResolved(SystemResolution),
    MemoryWritten {
        memory: Memory,
        action: GuardAction,
        method: GuardMethod,
        degrade_reasons: Vec<DegradeReason>,
    },
    Deleted {
        remaining_paths: usize,
    },
    AliasAdded {
        memory_id: MemoryId,
    },
    SearchResults {
        query: String,
        query_effective: String,
        mode_requested: SearchMode,
        mode_applied: SearchMode,
        intent: QueryIntent,
        strategy_template: &'static str,
        hits: Vec<RetrievalHit>,
        session_count: usize,
        global_count: usize,
        degrade_reasons: Vec<DegradeReason>,
        degraded: bool,
    },
    Gist {
        text: String,
        from_llm: bool,
    },
    JobQueued {
        job_id: Uuid,
    },
    JobStatus {
        job: Option<IndexJob>,
    },
    SnapshotList {
        snapshots: Vec<Snapshot>,
    },
    SnapshotDiff {
        diffs: Vec<FieldDiff>,
    },
    SnapshotRolledBack {
        resource_id: String,
        restored: bool,
    },
    SnapshotApproved {
        resource_id: String,
    },
    SnapshotsCleared {
        count: usize,
    },
}

/// Errors returned by operation handlers and the pipeline middleware that
/// wraps them.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("unknown service: {name}")]
    UnknownService { name: String },
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("server overloaded, try again later")]
    Overloaded,
    #[error(transparent)]
    Resolver(#[from] memory_palace_core::ResolverError),
    #[error(transparent)]
    Concurrency(#[from] memory_palace_core::ConcurrencyError),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
