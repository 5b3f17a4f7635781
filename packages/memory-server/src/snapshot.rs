//! Snapshot Ledger: one pre-mutation snapshot per `(session_id, resource_id)`
//! key. The Write Lane captures a snapshot before every mutating
//! operation; a session can later `list`/`diff`/`rollback`/`approve` its
//! pending snapshots. `rollback` only hands back the preserved pre-state --
//! applying it goes through the Write Lane like any other write, so a
//! rollback can't race a fresh write to the same record.
//!
//! Backed by the same `redb` file as the Store (shared `Database` handle),
//! in its own table, following the same JSON-row pattern as
//! [`crate::storage::engine::StoreEngine`].

use std::sync::Arc;

use memory_palace_core::{OperationType, PreState, ResourceType, Snapshot};
use redb::{Database, ReadableTable, TableDefinition};
use thiserror::Error;

const SNAPSHOTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot_not_found")]
    NotFound,
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

/// A single top-level field that differs between a snapshot's pre-state and
/// a caller-supplied current state.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FieldDiff {
    pub field: String,
    pub before: serde_json::Value,
    pub after: serde_json::Value,
}

fn snapshot_key(session_id: &str, resource_id: &str) -> String {
    format!("{session_id}\u{1}{resource_id}")
}

pub struct SnapshotLedger {
    db: Arc<Database>,
}

impl SnapshotLedger {
    /// Opens against an already-initialized `redb::Database`, ensuring its
    /// own table exists.
    pub fn open(db: Arc<Database>) -> Result<Self, SnapshotError> {
        {
            let tx = db.begin_write()?;
            tx.open_table(SNAPSHOTS_TABLE)?;
            tx.commit()?;
        }
        Ok(Self { db })
    }

    /// Captures the pre-state of `resource_id` ahead of a write. Overwrites
    /// any existing pending snapshot for the same key -- only the most
    /// recent pre-state within a session is kept.
    pub fn capture(
        &self,
        session_id: &str,
        resource_id: &str,
        resource_type: ResourceType,
        operation_type: OperationType,
        pre_state: serde_json::Value,
    ) -> Result<(), SnapshotError> {
        let snapshot = Snapshot {
            session_id: session_id.to_string(),
            resource_id: resource_id.to_string(),
            resource_type,
            operation_type,
            snapshot_time: chrono::Utc::now(),
            pre_state: PreState(pre_state),
        };
        let bytes = serde_json::to_vec(&snapshot)?;
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(SNAPSHOTS_TABLE)?;
            table.insert(snapshot_key(session_id, resource_id).as_str(), bytes.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }

    #[must_use]
    pub fn get(&self, session_id: &str, resource_id: &str) -> Option<Snapshot> {
        self.read_one(&snapshot_key(session_id, resource_id)).ok().flatten()
    }

    /// All pending snapshots for a session, most recent first.
    pub fn list(&self, session_id: &str) -> Result<Vec<Snapshot>, SnapshotError> {
        let prefix = format!("{session_id}\u{1}");
        let tx = self.db.begin_read()?;
        let table = tx.open_table(SNAPSHOTS_TABLE)?;
        let mut found = Vec::new();
        for row in table.iter()? {
            let (key, value) = row?;
            if key.value().starts_with(&prefix) {
                found.push(serde_json::from_slice::<Snapshot>(value.value())?);
            }
        }
        found.sort_by(|a, b| b.snapshot_time.cmp(&a.snapshot_time));
        Ok(found)
    }

    /// Shows what changed between the preserved pre-state and `current`,
    /// one entry per top-level field that differs. Both sides must be JSON
    /// objects; non-object values are reported as a single `"value"` field.
    pub fn diff(&self, session_id: &str, resource_id: &str, current: &serde_json::Value) -> Result<Vec<FieldDiff>, SnapshotError> {
        let snapshot = self
            .get(session_id, resource_id)
            .ok_or(SnapshotError::NotFound)?;
        Ok(diff_values(&snapshot.pre_state.0, current))
    }

    /// Removes and returns the pending snapshot so the caller can restore
    /// its pre-state through the Write Lane. `Ok(None)` if nothing is
    /// pending for this key.
    pub fn take_for_rollback(&self, session_id: &str, resource_id: &str) -> Result<Option<Snapshot>, SnapshotError> {
        self.remove(session_id, resource_id)
    }

    /// Discards the pending snapshot without restoring anything -- the
    /// write it shadows is accepted as final.
    pub fn approve(&self, session_id: &str, resource_id: &str) -> Result<(), SnapshotError> {
        self.remove(session_id, resource_id)?;
        Ok(())
    }

    /// Discards every pending snapshot for a session (e.g. on session end).
    pub fn clear(&self, session_id: &str) -> Result<usize, SnapshotError> {
        let keys: Vec<String> = self.list(session_id)?.iter().map(|s| snapshot_key(session_id, &s.resource_id)).collect();
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(SNAPSHOTS_TABLE)?;
            for key in &keys {
                table.remove(key.as_str())?;
            }
        }
        tx.commit()?;
        Ok(keys.len())
    }

    fn remove(&self, session_id: &str, resource_id: &str) -> Result<Option<Snapshot>, SnapshotError> {
        let key = snapshot_key(session_id, resource_id);
        let existing = self.read_one(&key)?;
        if existing.is_some() {
            let tx = self.db.begin_write()?;
            {
                let mut table = tx.open_table(SNAPSHOTS_TABLE)?;
                table.remove(key.as_str())?;
            }
            tx.commit()?;
        }
        Ok(existing)
    }

    fn read_one(&self, key: &str) -> Result<Option<Snapshot>, SnapshotError> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(SNAPSHOTS_TABLE)?;
        match table.get(key)? {
            None => Ok(None),
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
        }
    }
}

fn diff_values(before: &serde_json::Value, after: &serde_json::Value) -> Vec<FieldDiff> {
    match (before, after) {
        (serde_json::Value::Object(b), serde_json::Value::Object(a)) => {
            let mut fields: Vec<&String> = b.keys().chain(a.keys()).collect();
            fields.sort();
            fields.dedup();
            fields
                .into_iter()
                .filter_map(|field| {
                    let bv = b.get(field).cloned().unwrap_or(serde_json::Value::Null);
                    let av = a.get(field).cloned().unwrap_or(serde_json::Value::Null);
                    if bv == av {
                        None
                    } else {
                        Some(FieldDiff { field: field.clone(), before: bv, after: av })
                    }
                })
                .collect()
        }
        _ if before == after => Vec::new(),
        _ => vec![FieldDiff {
            field: "value".to_string(),
            before: before.clone(),
            after: after.clone(),
        }],
    }
}
