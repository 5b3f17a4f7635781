//! `MemoryService`: owns `read_memory`, `create_memory`, `update_memory`,
//! `delete_memory`, `add_alias`, and `compact_context` -- everything that
//! touches a single memory record through the Write Guard/Write Lane/
//! Snapshot Ledger chain.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use memory_palace_core::{DegradeReason, Gist, GistMethod, Memory, MemoryId, TaskType};
use tower::Service;

use crate::external::embedding::EmbeddingAdapter;
use crate::external::llm::LlmAdapter;
use crate::guard::{Candidate, GuardAction, GuardMethod, WriteGuard};
use crate::index_worker::IndexWorker;
use crate::lane::WriteLane;
use crate::resolver::Resolver;
use crate::service::domain::internal;
use crate::service::operation::{Operation, OperationError, OperationResponse, UpdatePatch};
use crate::snapshot::SnapshotLedger;
use crate::storage::engine::{content_hash, StoreError};
use crate::storage::vector_index::VectorIndex;
use crate::storage::StoreEngine;

/// Bound on how long a single guard/gist remote call is allowed to take
/// before the caller falls back to a local result. Not config-driven: it's
/// an internal safety margin, not a tunable knob.
const REMOTE_STAGE_TIMEOUT: Duration = Duration::from_secs(5);

type BoxFuture = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

struct Inner {
    resolver: Resolver,
    store: StoreEngine,
    guard: WriteGuard,
    lane: Arc<WriteLane>,
    snapshot: SnapshotLedger,
    index: Arc<IndexWorker>,
    vector_index: Arc<VectorIndex>,
    embedding: Arc<EmbeddingAdapter>,
    llm: Arc<LlmAdapter>,
    governance: memory_palace_core::GovernanceConfig,
}

#[derive(Clone)]
pub struct MemoryService {
    inner: Arc<Inner>,
}

impl MemoryService {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        resolver: Resolver,
        store: StoreEngine,
        guard: WriteGuard,
        lane: Arc<WriteLane>,
        snapshot: SnapshotLedger,
        index: Arc<IndexWorker>,
        vector_index: Arc<VectorIndex>,
        embedding: Arc<EmbeddingAdapter>,
        llm: Arc<LlmAdapter>,
        governance: memory_palace_core::GovernanceConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                resolver,
                store,
                guard,
                lane,
                snapshot,
                index,
                vector_index,
                embedding,
                llm,
                governance,
            }),
        }
    }
}

impl Service<Operation> for MemoryService {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = BoxFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move { inner.handle(op).await })
    }
}

impl Inner {
    async fn handle(&self, op: Operation) -> Result<OperationResponse, OperationError> {
        match op {
            Operation::ReadMemory { address, .. } => self.read_memory(&address),
            Operation::CreateMemory { ctx, domain, path, content, priority, disclosure, title } => {
                self.create_memory(&ctx.session_id, &domain, &path, &content, priority, &disclosure, title.as_deref()).await
            }
            Operation::UpdateMemory { ctx, address, patch } => self.update_memory(&ctx.session_id, &address, patch).await,
            Operation::DeleteMemory { domain, path, .. } => self.delete_memory(&domain, &path).await,
            Operation::AddAlias { domain, path, target_address, .. } => {
                self.add_alias(&domain, &path, &target_address).await
            }
            Operation::CompactContext { address, max_lines, .. } => self.compact_context(&address, max_lines).await,
            Operation::ListSnapshots { ctx } => self.list_snapshots(&ctx.session_id),
            Operation::DiffSnapshot { ctx, resource_id, current } => self.diff_snapshot(&ctx.session_id, &resource_id, &current),
            Operation::RollbackSnapshot { ctx, resource_id } => self.rollback_snapshot(&ctx.session_id, &resource_id).await,
            Operation::ApproveSnapshot { ctx, resource_id } => self.approve_snapshot(&ctx.session_id, &resource_id),
            Operation::ClearSnapshots { ctx } => self.clear_snapshots(&ctx.session_id),
            other => Err(OperationError::Internal(anyhow::anyhow!(
                "operation not routed to memory service: {other:?}"
            ))),
        }
    }

    fn read_memory(&self, raw: &str) -> Result<OperationResponse, OperationError> {
        if let Some(system) = self.resolver.resolve_system(raw)? {
            return Ok(OperationResponse::SystemResolved(system));
        }
        let resolved = self.resolver.resolve(raw)?;
        let _ = self.store.record_access(resolved.memory.id, self.governance.reinforce_delta, self.governance.vitality_max);
        Ok(OperationResponse::MemoryResolved { memory: resolved.memory, breadcrumbs: resolved.breadcrumbs })
    }

    /// Candidate corpus the Write Guard arbitrates a proposal against: every
    /// live memory. The store's scale (a single agent's long-term memory)
    /// keeps a brute-force scan cheap enough not to need domain scoping.
    fn candidates(&self) -> Vec<Candidate> {
        self.store.list_all().into_iter().filter(Memory::is_live).map(|m| Candidate { id: m.id, content: m.content }).collect()
    }

    async fn create_memory(
        &self,
        session_id: &str,
        domain: &str,
        path: &str,
        content: &str,
        priority: u32,
        disclosure: &str,
        title: Option<&str>,
    ) -> Result<OperationResponse, OperationError> {
        let path = self.resolve_create_path(domain, path, title).map_err(OperationError::Internal)?;
        let path = path.as_str();
        let candidates = self.candidates();
        let embedding_vec = if self.embedding.is_enabled() {
            self.embedding.embed(content, REMOTE_STAGE_TIMEOUT).await.ok()
        } else {
            None
        };
        let embedding_pair = embedding_vec.as_ref().map(|v| (self.vector_index.as_ref(), v.clone()));
        let verdict = self.guard.evaluate(content, &candidates, embedding_pair, REMOTE_STAGE_TIMEOUT).await;

        let record_key = format!("{domain}://{path}");
        let store = self.store.clone();
        let snapshot = SnapshotLedgerHandle(&self.snapshot);
        let session_id_owned = session_id.to_string();
        let domain_owned = domain.to_string();
        let path_owned = path.to_string();
        let content_owned = content.to_string();
        let disclosure_owned = disclosure.to_string();
        let target_id = verdict.target_id;
        let action = verdict.action;
        let reinforce_delta = self.governance.reinforce_delta;
        let vitality_max = self.governance.vitality_max;

        let memory = self
            .lane
            .run(&record_key, move || async move {
                match action {
                    GuardAction::Add => store.create(&domain_owned, &path_owned, &content_owned, priority, &disclosure_owned).map_err(anyhow::Error::from),
                    GuardAction::Update => {
                        let id = target_id.expect("update verdict carries a target");
                        let before = store.get_memory(id).map(|m| m.content).unwrap_or_default();
                        snapshot.capture_content(&session_id_owned, id, &before)?;
                        store.update_patch(id, &before, &content_owned).map_err(anyhow::Error::from)
                    }
                    GuardAction::Noop => {
                        let id = target_id.expect("noop verdict carries a target");
                        store.record_access(id, reinforce_delta, vitality_max).map_err(anyhow::Error::from)?;
                        store.get_memory(id).ok_or_else(|| anyhow::anyhow!("address_not_found"))
                    }
                    GuardAction::Delete => Err(anyhow::anyhow!("write guard produced an unexpected delete verdict")),
                }
            })
            .await
            .map_err(OperationError::from)?
            .map_err(OperationError::Internal)?;

        let degrade_reasons = self.enqueue_reindex(memory.id);
        Ok(OperationResponse::MemoryWritten { memory, action: verdict.action, method: verdict.method, degrade_reasons })
    }

    async fn update_memory(&self, session_id: &str, address: &str, patch: UpdatePatch) -> Result<OperationResponse, OperationError> {
        let resolved = self.resolver.resolve(address)?;
        let id = resolved.memory.id;
        let record_key = id.to_string();
        let store = self.store.clone();
        let snapshot = SnapshotLedgerHandle(&self.snapshot);
        let session_id_owned = session_id.to_string();
        let before = resolved.memory.content.clone();

        // `update_memory` always targets an address the caller already
        // picked, so it bypasses the Write Guard's arbitration ladder --
        // that only runs for `create_memory`'s ambiguous-target decision.
        let method = GuardMethod::Bypass;

        let memory = self
            .lane
            .run(&record_key, move || async move {
                match patch {
                    UpdatePatch::Patch { old, new } => {
                        snapshot.capture_content(&session_id_owned, id, &before)?;
                        store.update_patch(id, &old, &new).map_err(anyhow::Error::from)
                    }
                    UpdatePatch::Append { tail } => {
                        snapshot.capture_content(&session_id_owned, id, &before)?;
                        store.update_append(id, &tail).map_err(anyhow::Error::from)
                    }
                    UpdatePatch::Meta { priority, disclosure } => {
                        snapshot.capture_content(&session_id_owned, id, &before)?;
                        store.update_meta(id, priority, disclosure).map_err(anyhow::Error::from)
                    }
                }
            })
            .await
            .map_err(OperationError::from)?
            .map_err(OperationError::Internal)?;

        let degrade_reasons = self.enqueue_reindex(memory.id);
        Ok(OperationResponse::MemoryWritten { memory, action: GuardAction::Update, method, degrade_reasons })
    }

    async fn delete_memory(&self, domain: &str, path: &str) -> Result<OperationResponse, OperationError> {
        let memory_id = self.store.resolve_path(domain, path);
        let record_key = match memory_id {
            Some(id) => id.to_string(),
            None => format!("{domain}://{path}"),
        };
        let store = self.store.clone();
        let domain_owned = domain.to_string();
        let path_owned = path.to_string();

        let remaining = self
            .lane
            .run(&record_key, move || async move { store.delete_path(&domain_owned, &path_owned) })
            .await
            .map_err(OperationError::from)?
            .map_err(internal)?;

        if let Some(id) = memory_id {
            let _ = self.enqueue_reindex(id);
        }
        Ok(OperationResponse::Deleted { remaining_paths: remaining })
    }

    async fn add_alias(&self, domain: &str, path: &str, target_address: &str) -> Result<OperationResponse, OperationError> {
        let resolved = self.resolver.resolve(target_address)?;
        let target_id = resolved.memory.id;
        let record_key = format!("{domain}://{path}");
        let store = self.store.clone();
        let domain_owned = domain.to_string();
        let path_owned = path.to_string();

        self.lane
            .run(&record_key, move || async move { store.add_alias(&domain_owned, &path_owned, target_id) })
            .await
            .map_err(OperationError::from)?
            .map_err(internal)?;

        Ok(OperationResponse::AliasAdded { memory_id: target_id })
    }

    async fn compact_context(&self, address: &str, max_lines: usize) -> Result<OperationResponse, OperationError> {
        let resolved = self.resolver.resolve(address)?;
        let (text, from_llm) = self.llm.gist(&resolved.memory.content, max_lines, REMOTE_STAGE_TIMEOUT).await;

        let gist = Gist {
            memory_id: resolved.memory.id,
            source_content_hash: content_hash(&resolved.memory.content),
            gist_text: text.clone(),
            gist_method: if from_llm { GistMethod::Llm } else { GistMethod::Extractive },
            quality: if from_llm { 0.8 } else { 0.5 },
        };
        self.store.upsert_gist(gist).map_err(internal)?;
        Ok(OperationResponse::Gist { text, from_llm })
    }

    /// Queues a background reindex of `id`, degrading rather than failing
    /// the write if the index queue is full.
    fn enqueue_reindex(&self, id: MemoryId) -> Vec<DegradeReason> {
        match self.index.enqueue(TaskType::ReindexMemory, Some(id), "memory write") {
            Ok(_) => Vec::new(),
            Err(_) => vec![DegradeReason::IndexEnqueueDropped],
        }
    }

    /// Resolves `create_memory`'s final terminal path. An explicit `title`
    /// is validated and appended under `path` as the parent; with no title
    /// and a `path` ending in `/`, a unique numeric token is assigned under
    /// that parent. Otherwise `path` is used verbatim, unchanged from
    /// before titles existed.
    fn resolve_create_path(&self, domain: &str, path: &str, title: Option<&str>) -> Result<String, anyhow::Error> {
        if let Some(title) = title {
            if !is_valid_title(title) {
                return Err(anyhow::Error::from(StoreError::InvalidTitle));
            }
            let parent = path.trim_end_matches('/');
            return Ok(if parent.is_empty() { title.to_string() } else { format!("{parent}/{title}") });
        }
        if let Some(parent) = path.strip_suffix('/') {
            return Ok(format!("{parent}/{}", self.next_auto_title(domain, parent)));
        }
        Ok(path.to_string())
    }

    /// Smallest positive integer not already a direct child of `parent`.
    /// Racing two title-less creates under the same parent can pick the
    /// same token; the caller's lane key is per-path, not per-parent, so
    /// this is best-effort rather than collision-proof.
    fn next_auto_title(&self, domain: &str, parent: &str) -> String {
        let taken: std::collections::HashSet<String> =
            self.store.list_children(domain, parent).into_iter().filter_map(|p| p.path.rsplit('/').next().map(str::to_string)).collect();
        let mut n: u64 = 1;
        loop {
            let candidate = n.to_string();
            if !taken.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn list_snapshots(&self, session_id: &str) -> Result<OperationResponse, OperationError> {
        let snapshots = self.snapshot.list(session_id).map_err(internal)?;
        Ok(OperationResponse::SnapshotList { snapshots })
    }

    fn diff_snapshot(&self, session_id: &str, resource_id: &str, current: &serde_json::Value) -> Result<OperationResponse, OperationError> {
        let diffs = self.snapshot.diff(session_id, resource_id, current).map_err(internal)?;
        Ok(OperationResponse::SnapshotDiff { diffs })
    }

    /// Applies the preserved pre-state back through the Write Lane, keyed
    /// by the same record key a fresh write to this memory would use, so a
    /// rollback can't race a concurrent write to the same record.
    async fn rollback_snapshot(&self, session_id: &str, resource_id: &str) -> Result<OperationResponse, OperationError> {
        let Some(snapshot) = self.snapshot.take_for_rollback(session_id, resource_id).map_err(internal)? else {
            return Ok(OperationResponse::SnapshotRolledBack { resource_id: resource_id.to_string(), restored: false });
        };

        let store = self.store.clone();
        let pre_state = snapshot.pre_state.0.clone();
        let resource_id_owned = resource_id.to_string();
        self.lane
            .run(resource_id, move || async move {
                match snapshot.resource_type {
                    memory_palace_core::ResourceType::Memory => {
                        let id: MemoryId = resource_id_owned.parse().map_err(|_| anyhow::anyhow!("invalid memory id in snapshot"))?;
                        let mut memory = store.get_memory(id).ok_or_else(|| anyhow::anyhow!("address_not_found"))?;
                        if let Some(content) = pre_state.get("content").and_then(serde_json::Value::as_str) {
                            memory.content = content.to_string();
                            memory.content_hash = content_hash(&memory.content);
                        }
                        if let Some(deprecated) = pre_state.get("deprecated").and_then(serde_json::Value::as_bool) {
                            memory.deprecated = deprecated;
                        }
                        memory.updated_at = chrono::Utc::now();
                        store.restore_memory(memory).map_err(anyhow::Error::from)
                    }
                    memory_palace_core::ResourceType::Path => Err(anyhow::anyhow!("path rollback not supported by this snapshot")),
                }
            })
            .await
            .map_err(OperationError::from)?
            .map_err(OperationError::Internal)?;

        let id: MemoryId = resource_id.parse().map_err(|_| OperationError::Internal(anyhow::anyhow!("invalid memory id")))?;
        let _ = self.enqueue_reindex(id);
        Ok(OperationResponse::SnapshotRolledBack { resource_id: resource_id.to_string(), restored: true })
    }

    fn approve_snapshot(&self, session_id: &str, resource_id: &str) -> Result<OperationResponse, OperationError> {
        self.snapshot.approve(session_id, resource_id).map_err(internal)?;
        Ok(OperationResponse::SnapshotApproved { resource_id: resource_id.to_string() })
    }

    fn clear_snapshots(&self, session_id: &str) -> Result<OperationResponse, OperationError> {
        let count = self.snapshot.clear(session_id).map_err(internal)?;
        Ok(OperationResponse::SnapshotsCleared { count })
    }
}

/// Thin wrapper so the snapshot capture call inside a `lane.run` closure
/// reads as one step instead of three positional arguments repeated at every
/// call site.
struct SnapshotLedgerHandle<'a>(&'a SnapshotLedger);

impl SnapshotLedgerHandle<'_> {
    fn capture_content(&self, session_id: &str, id: MemoryId, content: &str) -> Result<(), anyhow::Error> {
        self.0
            .capture(
                session_id,
                &id.to_string(),
                memory_palace_core::ResourceType::Memory,
                memory_palace_core::OperationType::ModifyContent,
                serde_json::json!({ "content": content }),
            )
            .map_err(anyhow::Error::from)
    }
}

/// `[a-z0-9_-]+`, matching the store's `InvalidTitle` contract.
fn is_valid_title(title: &str) -> bool {
    !title.is_empty() && title.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}
