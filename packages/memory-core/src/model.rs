//! Domain entities: `Memory`, `Path`, `Gist`, `Snapshot`, `IndexJob`,
//! `CleanupReview`, and the small enums that tag their lifecycle states.
//!
//! These are plain data; no I/O and no business rules live here. The engine
//! crate owns the operations that create, mutate, and retire them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound of [`Memory::vitality_score`].
pub const VITALITY_MAX: f64 = 100.0;
/// Lower bound of [`Memory::vitality_score`]; decay never pushes below this.
pub const VITALITY_FLOOR: f64 = 0.0;

/// A stable memory identifier.
pub type MemoryId = Uuid;

/// A single long-term memory record.
///
/// `vitality_score` is monotonically non-increasing between accesses: decay
/// ticks lower it, an access raises it by `REINFORCE_DELTA` (clamped to
/// [`VITALITY_MAX`]), never the other way around on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: MemoryId,
    pub content: String,
    /// Non-negative; lower value means higher precedence.
    pub priority: u32,
    pub disclosure: String,
    pub vitality_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    /// Set when the last path referencing this memory is removed. Never
    /// cleared by the write path; deprecated memories are read-only.
    pub deprecated: bool,
    /// Set when this memory was superseded by a rollup/consolidation write.
    pub migrated_to: Option<MemoryId>,
    pub content_hash: String,
}

impl Memory {
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.deprecated
    }
}

/// A `(domain, path)` alias pointing at a [`Memory`]. One memory may have
/// many paths; deleting a path does not remove the memory while any other
/// path survives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    pub domain: String,
    pub path: String,
    pub memory_id: MemoryId,
}

/// Tag naming how a [`Gist`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GistMethod {
    /// Produced by a remote LLM call.
    Llm,
    /// Produced by the local extractive fallback (no LLM configured/reachable).
    Extractive,
}

/// A short summary of a memory's content, keyed by content hash so a stale
/// gist is detected and rewritten the next time the source content changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gist {
    pub memory_id: MemoryId,
    pub source_content_hash: String,
    pub gist_text: String,
    pub gist_method: GistMethod,
    /// In `[0, 1]`.
    pub quality: f64,
}

/// Which kind of record a [`Snapshot`] preserves the pre-state of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Memory,
    Path,
}

/// The write operation a [`Snapshot`] was captured ahead of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    ModifyContent,
    ModifyMeta,
    Delete,
    CreateAlias,
}

/// Opaque pre-mutation state blob, carried verbatim so `Diff`/`Rollback`
/// don't need to know the shape of every resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreState(pub serde_json::Value);

/// A per-session, pre-mutation record captured before every write. The
/// `(session_id, resource_id)` pair is the review key: at most one pending
/// snapshot exists per key at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub session_id: String,
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub operation_type: OperationType,
    pub snapshot_time: DateTime<Utc>,
    pub pre_state: PreState,
}

/// The kind of background task an [`IndexJob`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    RebuildIndex,
    ReindexMemory,
    SleepConsolidation,
}

/// [`IndexJob`] state machine. Terminal states are `Succeeded`, `Failed`,
/// `Cancelled`, and `Dropped`; once reached they never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Cancelling,
    Cancelled,
    Succeeded,
    Failed,
    Dropped,
}

impl JobState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Cancelled | Self::Dropped
        )
    }
}

/// A queued or completed background index task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexJob {
    pub job_id: Uuid,
    pub task_type: TaskType,
    pub memory_id: Option<MemoryId>,
    pub reason: String,
    pub state: JobState,
    pub requested_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub degrade_reasons: Vec<String>,
}

impl IndexJob {
    /// The dedup key used while a job is queued: a second enqueue with the
    /// same key collapses into the existing queued job.
    #[must_use]
    pub fn dedup_key(&self) -> (TaskType, Option<MemoryId>) {
        (self.task_type, self.memory_id)
    }
}

/// What a [`CleanupReview`] will do to its selections on confirm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Delete,
    Keep,
}

/// One memory chosen for a cleanup review, pinned to the store state it was
/// selected against so a concurrent mutation is detected as `stale_state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSelection {
    pub memory_id: MemoryId,
    pub state_hash: String,
    /// Live paths resolving to this memory at selection time. A `Delete`
    /// confirm skips any selection whose current count is still above 1 --
    /// other paths still depend on it.
    pub path_count: usize,
}

/// A one-shot, TTL-bound, human-confirmed cleanup request. Consumed on a
/// successful confirm; a second confirm with the same arguments then reports
/// `review_not_found`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupReview {
    pub review_id: Uuid,
    pub token: String,
    pub action: ReviewAction,
    pub reviewer: String,
    pub selections: Vec<ReviewSelection>,
    pub confirmation_phrase: String,
    pub expires_at: DateTime<Utc>,
}

impl CleanupReview {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Machine-readable tag appended to a response when a non-critical stage
/// falls back instead of failing the caller outright. Mirrors the "External"
/// and "Queue" error-kind families from the error design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeReason {
    EmbeddingRequestFailed,
    RerankerRequestFailed,
    WriteGuardException,
    CompactGistLlmEmpty,
    QueryPreprocessFailed,
    IndexEnqueueDropped,
}

impl DegradeReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmbeddingRequestFailed => "embedding_request_failed",
            Self::RerankerRequestFailed => "reranker_request_failed",
            Self::WriteGuardException => "write_guard_exception",
            Self::CompactGistLlmEmpty => "compact_gist_llm_empty",
            Self::QueryPreprocessFailed => "query_preprocess_failed",
            Self::IndexEnqueueDropped => "index_enqueue_dropped",
        }
    }
}

impl std::fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
