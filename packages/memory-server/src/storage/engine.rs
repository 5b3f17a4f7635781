//! The Store: the only component permitted to mutate Memory and Path
//! records. All access outside the Write Lane
//! is read-only.
//!
//! Durability is `redb`-backed, following the indexed-entry-table pattern
//! used elsewhere in this codebase family: a `TableDefinition<&str, &[u8]>`
//! holding JSON-serialized rows, with a `DashMap` read cache warmed on every
//! write so the hot path (reads, which must stay lock-free at the request
//! level) never waits on a redb read transaction.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use memory_palace_core::{Memory, MemoryId, VITALITY_MAX};
use redb::{Database, ReadableTable, TableDefinition};
use thiserror::Error;

const MEMORIES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("memories");
const PATHS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("paths");
const GISTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("gists");

/// Errors surfaced by the Store: conflict and addressing failures that
/// originate below the Resolver.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("address_not_found")]
    NotFound,
    #[error("patch_not_found")]
    PatchNotFound,
    #[error("address_ambiguous_patch")]
    PatchAmbiguous,
    #[error("title must match [a-z0-9_-]+")]
    InvalidTitle,
    #[error(transparent)]
    Redb(#[from] redb::Error),
    #[error(transparent)]
    Transaction(#[from] redb::TransactionError),
    #[error(transparent)]
    Table(#[from] redb::TableError),
    #[error(transparent)]
    Storage(#[from] redb::StorageError),
    #[error(transparent)]
    Commit(#[from] redb::CommitError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// A breadcrumb path entry returned alongside a resolved memory.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PathEntry {
    pub domain: String,
    pub path: String,
}

/// The durable store. Cheap to clone: internally `Arc`-wrapped state.
#[derive(Clone)]
pub struct StoreEngine {
    db: Arc<Database>,
    /// `memory_id -> Memory`, warmed on every write.
    memory_cache: Arc<DashMap<MemoryId, Memory>>,
    /// `"domain/path" -> memory_id`, warmed on every write.
    path_cache: Arc<DashMap<String, MemoryId>>,
}

fn path_key(domain: &str, path: &str) -> String {
    format!("{domain}://{path}")
}

impl StoreEngine {
    /// Opens (or creates) the store file at `path`, ensuring every table
    /// exists, then warms the caches from the on-disk tables.
    pub fn open(path: impl AsRef<FsPath>) -> Result<Self, StoreError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Storage(redb::StorageError::Io(e))
            })?;
        }
        let db = Database::create(&path)?;
        {
            let tx = db.begin_write()?;
            tx.open_table(MEMORIES_TABLE)?;
            tx.open_table(PATHS_TABLE)?;
            tx.open_table(GISTS_TABLE)?;
            tx.commit()?;
        }
        let engine = Self {
            db: Arc::new(db),
            memory_cache: Arc::new(DashMap::new()),
            path_cache: Arc::new(DashMap::new()),
        };
        engine.warm_caches()?;
        Ok(engine)
    }

    fn warm_caches(&self) -> Result<(), StoreError> {
        let tx = self.db.begin_read()?;
        let memories = tx.open_table(MEMORIES_TABLE)?;
        for row in memories.iter()? {
            let (_, value) = row?;
            let memory: Memory = serde_json::from_slice(value.value())?;
            self.memory_cache.insert(memory.id, memory);
        }
        let paths = tx.open_table(PATHS_TABLE)?;
        for row in paths.iter()? {
            let (key, value) = row?;
            let memory_id: MemoryId = value.value().parse().map_err(|_| StoreError::NotFound)?;
            self.path_cache.insert(key.value().to_string(), memory_id);
        }
        Ok(())
    }

    /// Shares the underlying `redb::Database` handle so sibling owners
    /// (Snapshot Ledger, Index Worker, Governance Loop) can open their own
    /// tables in the same file without the Store mediating their access.
    #[must_use]
    pub fn db_handle(&self) -> Arc<Database> {
        Arc::clone(&self.db)
    }

    #[must_use]
    pub fn get_memory(&self, id: MemoryId) -> Option<Memory> {
        self.memory_cache.get(&id).map(|r| r.value().clone())
    }

    #[must_use]
    pub fn resolve_path(&self, domain: &str, path: &str) -> Option<MemoryId> {
        self.path_cache.get(&path_key(domain, path)).map(|r| *r.value())
    }

    /// All `(domain, path)` entries that resolve to `id`.
    #[must_use]
    pub fn paths_for_memory(&self, id: MemoryId) -> Vec<PathEntry> {
        self.path_cache
            .iter()
            .filter(|entry| *entry.value() == id)
            .filter_map(|entry| {
                let (domain, path) = entry.key().split_once("://")?;
                Some(PathEntry {
                    domain: domain.to_string(),
                    path: path.to_string(),
                })
            })
            .collect()
    }

    /// All paths directly under `domain://prefix` one level deep.
    #[must_use]
    pub fn list_children(&self, domain: &str, prefix: &str) -> Vec<PathEntry> {
        let search_prefix = if prefix.is_empty() {
            format!("{domain}://")
        } else {
            format!("{domain}://{prefix}/")
        };
        self.path_cache
            .iter()
            .filter_map(|entry| {
                let key = entry.key();
                let rest = key.strip_prefix(&search_prefix)?;
                if rest.is_empty() || rest.contains('/') {
                    return None;
                }
                let (domain, path) = key.split_once("://")?;
                Some(PathEntry {
                    domain: domain.to_string(),
                    path: path.to_string(),
                })
            })
            .collect()
    }

    /// Live memories with no surviving path -- should only transiently exist
    /// between a path delete and the memory being marked deprecated.
    #[must_use]
    pub fn list_orphans(&self) -> Vec<Memory> {
        let referenced: std::collections::HashSet<MemoryId> =
            self.path_cache.iter().map(|e| *e.value()).collect();
        self.memory_cache
            .iter()
            .filter(|e| e.value().is_live() && !referenced.contains(e.key()))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Every memory currently in the store, live or deprecated.
    #[must_use]
    pub fn list_all(&self) -> Vec<Memory> {
        self.memory_cache.iter().map(|e| e.value().clone()).collect()
    }

    /// Candidates for cleanup review: live, vitality at or below `threshold`,
    /// untouched for at least `inactive_days`, most-stale first.
    #[must_use]
    pub fn list_cleanup_candidates(
        &self,
        threshold: f64,
        inactive_days: i64,
        limit: usize,
    ) -> Vec<Memory> {
        let now = Utc::now();
        let mut candidates: Vec<Memory> = self
            .memory_cache
            .iter()
            .map(|e| e.value().clone())
            .filter(|m| {
                m.is_live()
                    && m.vitality_score <= threshold
                    && (now - m.last_accessed_at) >= chrono::Duration::days(inactive_days)
            })
            .collect();
        candidates.sort_by_key(|m| m.last_accessed_at);
        candidates.truncate(limit);
        candidates
    }

    fn persist_memory(&self, memory: &Memory) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(memory)?;
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(MEMORIES_TABLE)?;
            table.insert(memory.id.to_string().as_str(), bytes.as_slice())?;
        }
        tx.commit()?;
        self.memory_cache.insert(memory.id, memory.clone());
        Ok(())
    }

    fn persist_path(&self, domain: &str, path: &str, memory_id: MemoryId) -> Result<(), StoreError> {
        let key = path_key(domain, path);
        let value = memory_id.to_string();
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(PATHS_TABLE)?;
            table.insert(key.as_str(), value.as_str())?;
        }
        tx.commit()?;
        self.path_cache.insert(key, memory_id);
        Ok(())
    }

    fn remove_path(&self, domain: &str, path: &str) -> Result<(), StoreError> {
        let key = path_key(domain, path);
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(PATHS_TABLE)?;
            table.remove(key.as_str())?;
        }
        tx.commit()?;
        self.path_cache.remove(&key);
        Ok(())
    }

    /// Creates a new Memory and binds `domain://path` to it. Title
    /// uniqueness under the parent is the caller's (Resolver's) job since it
    /// requires knowledge of sibling addresses.
    pub fn create(
        &self,
        domain: &str,
        path: &str,
        content: &str,
        priority: u32,
        disclosure: &str,
    ) -> Result<Memory, StoreError> {
        let now = Utc::now();
        let memory = Memory {
            id: MemoryId::new_v4(),
            content: content.to_string(),
            priority,
            disclosure: disclosure.to_string(),
            vitality_score: VITALITY_MAX,
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            access_count: 0,
            deprecated: false,
            migrated_to: None,
            content_hash: content_hash(content),
        };
        self.persist_memory(&memory)?;
        self.persist_path(domain, path, memory.id)?;
        Ok(memory)
    }

    /// Binds an additional `(domain, path)` to an existing memory.
    pub fn add_alias(
        &self,
        domain: &str,
        path: &str,
        target: MemoryId,
    ) -> Result<(), StoreError> {
        if self.get_memory(target).is_none() {
            return Err(StoreError::NotFound);
        }
        self.persist_path(domain, path, target)
    }

    /// Replaces exactly one occurrence of `old` with `new`. `old` must occur
    /// exactly once in the current content.
    pub fn update_patch(&self, id: MemoryId, old: &str, new: &str) -> Result<Memory, StoreError> {
        let mut memory = self.get_memory(id).ok_or(StoreError::NotFound)?;
        let occurrences = memory.content.matches(old).count();
        match occurrences {
            0 => Err(StoreError::PatchNotFound),
            1 => {
                memory.content = memory.content.replacen(old, new, 1);
                memory.content_hash = content_hash(&memory.content);
                memory.updated_at = Utc::now();
                self.persist_memory(&memory)?;
                Ok(memory)
            }
            _ => Err(StoreError::PatchAmbiguous),
        }
    }

    /// Appends `tail` to the current content.
    pub fn update_append(&self, id: MemoryId, tail: &str) -> Result<Memory, StoreError> {
        let mut memory = self.get_memory(id).ok_or(StoreError::NotFound)?;
        memory.content.push_str(tail);
        memory.content_hash = content_hash(&memory.content);
        memory.updated_at = Utc::now();
        self.persist_memory(&memory)?;
        Ok(memory)
    }

    /// Updates priority and/or disclosure only. Never touches `content` or
    /// `content_hash`, so callers must not trigger a reindex for this path.
    pub fn update_meta(
        &self,
        id: MemoryId,
        priority: Option<u32>,
        disclosure: Option<String>,
    ) -> Result<Memory, StoreError> {
        let mut memory = self.get_memory(id).ok_or(StoreError::NotFound)?;
        if let Some(priority) = priority {
            memory.priority = priority;
        }
        if let Some(disclosure) = disclosure {
            memory.disclosure = disclosure;
        }
        memory.updated_at = Utc::now();
        self.persist_memory(&memory)?;
        Ok(memory)
    }

    /// Removes one path. The memory becomes `deprecated` iff that was its
    /// last surviving path. Returns the surviving path count.
    pub fn delete_path(&self, domain: &str, path: &str) -> Result<usize, StoreError> {
        let target = self.resolve_path(domain, path).ok_or(StoreError::NotFound)?;
        self.remove_path(domain, path)?;
        let remaining = self.paths_for_memory(target).len();
        if remaining == 0 {
            if let Some(mut memory) = self.get_memory(target) {
                memory.deprecated = true;
                self.persist_memory(&memory)?;
            }
        }
        Ok(remaining)
    }

    /// Marks an access: bumps `access_count`, reinforces vitality, and
    /// updates `last_accessed_at`. Called by the Resolver and Retrieval
    /// Pipeline on every successful read.
    pub fn record_access(&self, id: MemoryId, reinforce_delta: f64, vitality_max: f64) -> Result<(), StoreError> {
        if let Some(mut memory) = self.get_memory(id) {
            memory.access_count += 1;
            memory.last_accessed_at = Utc::now();
            memory.vitality_score = (memory.vitality_score + reinforce_delta).min(vitality_max);
            self.persist_memory(&memory)?;
        }
        Ok(())
    }

    pub fn get_gist(&self, id: MemoryId) -> Result<Option<memory_palace_core::Gist>, StoreError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(GISTS_TABLE)?;
        match table.get(id.to_string().as_str())? {
            None => Ok(None),
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
        }
    }

    pub fn upsert_gist(&self, gist: &memory_palace_core::Gist) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(gist)?;
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(GISTS_TABLE)?;
            table.insert(gist.memory_id.to_string().as_str(), bytes.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Restores `memory` to exactly the given state, bypassing vitality
    /// reinforcement. Used by Snapshot Ledger rollback.
    pub fn restore_memory(&self, memory: Memory) -> Result<(), StoreError> {
        self.persist_memory(&memory)
    }

    /// Restores a `(domain, path)` binding, used by rollback of a delete.
    pub fn restore_path(&self, domain: &str, path: &str, memory_id: MemoryId) -> Result<(), StoreError> {
        self.persist_path(domain, path, memory_id)
    }
}

/// Content-addressing hash used for `Memory::content_hash` and gist staleness
/// checks. `blake3` is already in the dependency set for exactly this.
#[must_use]
pub fn content_hash(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_tmp() -> StoreEngine {
        let dir = tempdir().unwrap();
        StoreEngine::open(dir.path().join("store.redb")).unwrap()
    }

    #[test]
    fn create_and_resolve_roundtrip() {
        let store = open_tmp();
        let memory = store.create("core", "agent/style", "Prefer concise code", 0, "").unwrap();
        assert_eq!(store.resolve_path("core", "agent/style"), Some(memory.id));
        assert_eq!(store.get_memory(memory.id).unwrap().content, "Prefer concise code");
    }

    #[test]
    fn patch_ambiguous_on_multiple_matches() {
        let store = open_tmp();
        let memory = store.create("notes", "r/1", "alpha beta alpha", 0, "").unwrap();
        let err = store.update_patch(memory.id, "alpha", "gamma").unwrap_err();
        assert!(matches!(err, StoreError::PatchAmbiguous));
    }

    #[test]
    fn patch_not_found_when_old_absent() {
        let store = open_tmp();
        let memory = store.create("notes", "r/2", "hello world", 0, "").unwrap();
        let err = store.update_patch(memory.id, "missing", "x").unwrap_err();
        assert!(matches!(err, StoreError::PatchNotFound));
    }

    #[test]
    fn patch_replaces_unique_match() {
        let store = open_tmp();
        let memory = store.create("notes", "r/3", "alpha beta gamma", 0, "").unwrap();
        let updated = store.update_patch(memory.id, "beta", "delta").unwrap();
        assert_eq!(updated.content, "alpha delta gamma");
    }

    #[test]
    fn delete_last_path_deprecates_memory() {
        let store = open_tmp();
        let memory = store.create("core", "solo", "content", 0, "").unwrap();
        let remaining = store.delete_path("core", "solo").unwrap();
        assert_eq!(remaining, 0);
        assert!(store.get_memory(memory.id).unwrap().deprecated);
    }

    #[test]
    fn delete_one_of_two_paths_survives() {
        let store = open_tmp();
        let memory = store.create("core", "a", "content", 0, "").unwrap();
        store.add_alias("core", "b", memory.id).unwrap();
        let remaining = store.delete_path("core", "a").unwrap();
        assert_eq!(remaining, 1);
        assert!(!store.get_memory(memory.id).unwrap().deprecated);
    }

    #[test]
    fn list_children_is_one_level_deep() {
        let store = open_tmp();
        store.create("core", "agent/style", "x", 0, "").unwrap();
        store.create("core", "agent/style/nested", "y", 0, "").unwrap();
        let children = store.list_children("core", "agent");
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].path, "agent/style");
    }

    #[test]
    fn record_access_reinforces_vitality_and_bumps_count() {
        let store = open_tmp();
        let memory = store.create("core", "x", "content", 0, "").unwrap();
        let decayed = Memory {
            vitality_score: 10.0,
            ..store.get_memory(memory.id).unwrap()
        };
        store.restore_memory(decayed).unwrap();
        store.record_access(memory.id, 5.0, 100.0).unwrap();
        let after = store.get_memory(memory.id).unwrap();
        assert_eq!(after.vitality_score, 15.0);
        assert_eq!(after.access_count, 1);
    }

    #[test]
    fn reopen_warms_caches_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.redb");
        let id = {
            let store = StoreEngine::open(&path).unwrap();
            store.create("core", "x", "content", 0, "").unwrap().id
        };
        let reopened = StoreEngine::open(&path).unwrap();
        assert_eq!(reopened.get_memory(id).unwrap().content, "content");
        assert_eq!(reopened.resolve_path("core", "x"), Some(id));
    }
}
