//! Governance Loop: background vitality decay, the two-phase cleanup review
//! (prepare/confirm), and sleep consolidation (dedup + rollup previews).
//! Confirm and apply both go through the Write Lane like any
//! other mutation; prepare and preview are read-only.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use memory_palace_core::{CleanupReview, GovernanceConfig, Memory, MemoryId, ReviewAction, ReviewSelection};
use rand::Rng;
use thiserror::Error;
use uuid::Uuid;

use crate::lane::WriteLane;
use crate::storage::engine::content_hash;
use crate::storage::vector_index::VectorIndex;
use crate::storage::StoreEngine;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GovernanceError {
    #[error("review_not_found")]
    ReviewNotFound,
    #[error("review_expired")]
    ReviewExpired,
    #[error("confirmation_phrase_mismatch")]
    PhraseMismatch,
    #[error("stale_state")]
    StaleState,
    #[error("pending_review_limit_reached")]
    LimitReached,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmOutcome {
    pub review_id: Uuid,
    pub deleted: Vec<MemoryId>,
    pub kept: Vec<MemoryId>,
    /// `Delete` selections left untouched because the memory still has more
    /// than one live path at confirm time.
    pub skipped: Vec<MemoryId>,
}

/// A candidate pair for dedup, or a candidate group for rollup, produced by
/// `sleep_consolidation` before anything is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupSuggestion {
    pub keep: MemoryId,
    pub redundant: MemoryId,
    pub similarity: f64,
}

pub struct GovernanceLoop {
    config: GovernanceConfig,
    store: StoreEngine,
    lane: Arc<WriteLane>,
    pending: DashMap<Uuid, CleanupReview>,
}

impl GovernanceLoop {
    #[must_use]
    pub fn new(config: GovernanceConfig, store: StoreEngine, lane: Arc<WriteLane>) -> Self {
        Self { config, store, lane, pending: DashMap::new() }
    }

    /// Exponential decay toward the floor with the configured half-life.
    /// Applied to every live memory; bypasses the Write Lane since decay is
    /// a scheduled background sweep, not a caller-triggered write.
    pub fn decay_tick(&self) {
        let now = Utc::now();
        for memory in self.store.list_all().into_iter().filter(Memory::is_live) {
            let elapsed_days = (now - memory.last_accessed_at).num_seconds() as f64 / 86_400.0;
            if elapsed_days <= 0.0 {
                continue;
            }
            let decayed = memory.vitality_score * 0.5_f64.powf(elapsed_days / self.config.decay_half_life_days);
            let floored = decayed.max(self.config.vitality_floor);
            if (floored - memory.vitality_score).abs() < f64::EPSILON {
                continue;
            }
            let _ = self.store.restore_memory(Memory { vitality_score: floored, ..memory });
        }
    }

    /// Selects cleanup candidates and opens a pending, TTL-bound review.
    /// Rejects once `max_pending_reviews` is already outstanding.
    pub fn prepare_cleanup_review(
        &self,
        reviewer: &str,
        action: ReviewAction,
        limit: usize,
    ) -> Result<CleanupReview, GovernanceError> {
        self.pending.retain(|_, r| !r.is_expired(Utc::now()));
        if self.pending.len() >= self.config.max_pending_reviews {
            return Err(GovernanceError::LimitReached);
        }

        let candidates = self.store.list_cleanup_candidates(self.config.cleanup_threshold, self.config.cleanup_inactive_days, limit);
        let selections = candidates
            .iter()
            .map(|m| ReviewSelection {
                memory_id: m.id,
                state_hash: selection_state_hash(m),
                path_count: self.store.paths_for_memory(m.id).len(),
            })
            .collect();

        let review = CleanupReview {
            review_id: Uuid::new_v4(),
            token: random_token(),
            action,
            reviewer: reviewer.to_string(),
            selections,
            confirmation_phrase: random_phrase(),
            expires_at: Utc::now() + chrono::Duration::from_std(self.config.cleanup_review_ttl).unwrap_or_default(),
        };
        self.pending.insert(review.review_id, review.clone());
        Ok(review)
    }

    /// Confirms a pending review: verifies the phrase, expiry, and that
    /// every selection's store state hasn't moved since `prepare`, then (for
    /// `ReviewAction::Delete`) retires each selection through the Write
    /// Lane. `ReviewAction::Keep` just discharges the review.
    pub async fn confirm_review(&self, review_id: Uuid, confirmation_phrase: &str) -> Result<ConfirmOutcome, GovernanceError> {
        let review = self.pending.get(&review_id).map(|r| r.clone()).ok_or(GovernanceError::ReviewNotFound)?;

        if review.is_expired(Utc::now()) {
            self.pending.remove(&review_id);
            return Err(GovernanceError::ReviewExpired);
        }
        if review.confirmation_phrase != confirmation_phrase {
            return Err(GovernanceError::PhraseMismatch);
        }

        for selection in &review.selections {
            let Some(current) = self.store.get_memory(selection.memory_id) else {
                return Err(GovernanceError::StaleState);
            };
            if selection_state_hash(&current) != selection.state_hash {
                return Err(GovernanceError::StaleState);
            }
        }

        self.pending.remove(&review_id);

        let mut deleted = Vec::new();
        let mut kept = Vec::new();
        let mut skipped = Vec::new();
        match review.action {
            ReviewAction::Keep => {
                let vitality_max = self.config.vitality_max;
                for selection in &review.selections {
                    let id = selection.memory_id;
                    let store = self.store.clone();
                    self.lane
                        .run(&id.to_string(), move || async move {
                            if let Some(mut memory) = store.get_memory(id) {
                                memory.vitality_score = vitality_max;
                                memory.last_accessed_at = Utc::now();
                                let _ = store.restore_memory(memory);
                            }
                        })
                        .await
                        .map_err(|_| GovernanceError::StaleState)?;
                    kept.push(id);
                }
            }
            ReviewAction::Delete => {
                for selection in &review.selections {
                    let id = selection.memory_id;
                    if self.store.paths_for_memory(id).len() > 1 {
                        skipped.push(id);
                        continue;
                    }
                    let store = self.store.clone();
                    self.lane
                        .run(&id.to_string(), move || async move {
                            if let Some(mut memory) = store.get_memory(id) {
                                memory.deprecated = true;
                                let _ = store.restore_memory(memory);
                            }
                        })
                        .await
                        .map_err(|_| GovernanceError::StaleState)?;
                    deleted.push(id);
                }
            }
        }

        Ok(ConfirmOutcome { review_id, deleted, kept, skipped })
    }

    #[must_use]
    pub fn pending_review(&self, review_id: Uuid) -> Option<CleanupReview> {
        self.pending.get(&review_id).map(|r| r.clone())
    }

    /// Finds near-duplicate live memories by cosine similarity over
    /// `vector_index`, above `sleep_dedup_threshold`. Only applies (marking
    /// the redundant memory `migrated_to` the kept one) when
    /// `sleep_dedup_apply` is set; otherwise this is preview-only.
    pub async fn sleep_consolidation(&self, vector_index: &VectorIndex) -> Vec<DedupSuggestion> {
        let mut live: Vec<Memory> = self.store.list_all().into_iter().filter(Memory::is_live).collect();
        // Oldest first, so the kept side of a pair is always the one that
        // existed first regardless of store iteration order.
        live.sort_by_key(|m| m.created_at);
        let mut suggestions = Vec::new();
        let mut consumed = std::collections::HashSet::new();

        for memory in &live {
            if consumed.contains(&memory.id) {
                continue;
            }
            let Some(vector) = vector_index.get(memory.id) else { continue };
            for hit in vector_index.search(&vector, 5) {
                if hit.memory_id == memory.id || consumed.contains(&hit.memory_id) {
                    continue;
                }
                if f64::from(hit.similarity) >= self.config.sleep_dedup_threshold {
                    suggestions.push(DedupSuggestion { keep: memory.id, redundant: hit.memory_id, similarity: f64::from(hit.similarity) });
                    consumed.insert(hit.memory_id);
                }
            }
        }

        if self.config.sleep_dedup_apply {
            for suggestion in &suggestions {
                let keep = suggestion.keep;
                let redundant = suggestion.redundant;
                let store = self.store.clone();
                let _ = self
                    .lane
                    .run(&redundant.to_string(), move || async move {
                        if let Some(mut memory) = store.get_memory(redundant) {
                            memory.deprecated = true;
                            memory.migrated_to = Some(keep);
                            let _ = store.restore_memory(memory);
                        }
                    })
                    .await;
            }
        }

        suggestions
    }
}

fn selection_state_hash(memory: &Memory) -> String {
    content_hash(&format!("{}|{}|{}", memory.vitality_score, memory.updated_at, memory.deprecated))
}

fn random_token() -> String {
    let mut rng = rand::thread_rng();
    (0..16).map(|_| char::from(rng.sample(rand::distributions::Alphanumeric))).collect()
}

const PHRASE_WORDS: &[&str] = &["correct", "horse", "battery", "staple", "maple", "ember", "quartz", "willow"];

fn random_phrase() -> String {
    let mut rng = rand::thread_rng();
    (0..3).map(|_| PHRASE_WORDS[rng.gen_range(0..PHRASE_WORDS.len())]).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn governance() -> (tempfile::TempDir, GovernanceLoop) {
        let dir = tempdir().unwrap();
        let store = StoreEngine::open(dir.path().join("s.redb")).unwrap();
        let lane = Arc::new(WriteLane::new(4, Duration::from_secs(5)));
        let config = GovernanceConfig { cleanup_review_ttl: Duration::from_secs(1), max_pending_reviews: 2, ..GovernanceConfig::default() };
        (dir, GovernanceLoop::new(config, store, lane))
    }

    #[test]
    fn decay_reduces_vitality_of_stale_memory() {
        let (_dir, gov) = governance();
        let memory = gov.store.create("core", "a", "x", 0, "").unwrap();
        let aged = Memory {
            last_accessed_at: Utc::now() - chrono::Duration::days(28),
            ..gov.store.get_memory(memory.id).unwrap()
        };
        gov.store.restore_memory(aged).unwrap();
        gov.decay_tick();
        let after = gov.store.get_memory(memory.id).unwrap();
        assert!(after.vitality_score < memory_palace_core::VITALITY_MAX);
    }

    #[tokio::test]
    async fn confirm_delete_deprecates_selected_memories() {
        let (_dir, gov) = governance();
        let memory = gov.store.create("core", "a", "stale content", 0, "").unwrap();
        let stale = Memory {
            vitality_score: 1.0,
            last_accessed_at: Utc::now() - chrono::Duration::days(200),
            ..gov.store.get_memory(memory.id).unwrap()
        };
        gov.store.restore_memory(stale).unwrap();

        let review = gov.prepare_cleanup_review("operator", ReviewAction::Delete, 10).unwrap();
        assert_eq!(review.selections.len(), 1);

        let outcome = gov.confirm_review(review.review_id, &review.confirmation_phrase).await.unwrap();
        assert_eq!(outcome.deleted, vec![memory.id]);
        assert!(gov.store.get_memory(memory.id).unwrap().deprecated);
    }

    #[tokio::test]
    async fn confirm_rejects_wrong_phrase() {
        let (_dir, gov) = governance();
        let review = gov.prepare_cleanup_review("operator", ReviewAction::Keep, 10).unwrap();
        let err = gov.confirm_review(review.review_id, "wrong phrase").await.unwrap_err();
        assert_eq!(err, GovernanceError::PhraseMismatch);
    }

    #[tokio::test]
    async fn confirm_detects_stale_state() {
        let (_dir, gov) = governance();
        let memory = gov.store.create("core", "a", "stale content", 0, "").unwrap();
        let stale = Memory {
            vitality_score: 1.0,
            last_accessed_at: Utc::now() - chrono::Duration::days(200),
            ..gov.store.get_memory(memory.id).unwrap()
        };
        gov.store.restore_memory(stale).unwrap();
        let review = gov.prepare_cleanup_review("operator", ReviewAction::Delete, 10).unwrap();

        gov.store.record_access(memory.id, 5.0, 100.0).unwrap();

        let err = gov.confirm_review(review.review_id, &review.confirmation_phrase).await.unwrap_err();
        assert_eq!(err, GovernanceError::StaleState);
    }

    #[tokio::test]
    async fn confirm_delete_skips_memory_with_extra_live_path() {
        let (_dir, gov) = governance();
        let memory = gov.store.create("core", "a", "stale content", 0, "").unwrap();
        let stale = Memory {
            vitality_score: 1.0,
            last_accessed_at: Utc::now() - chrono::Duration::days(200),
            ..gov.store.get_memory(memory.id).unwrap()
        };
        gov.store.restore_memory(stale).unwrap();

        let review = gov.prepare_cleanup_review("operator", ReviewAction::Delete, 10).unwrap();
        gov.store.add_alias("core", "b", memory.id).unwrap();

        let outcome = gov.confirm_review(review.review_id, &review.confirmation_phrase).await.unwrap();
        assert_eq!(outcome.deleted, Vec::<MemoryId>::new());
        assert_eq!(outcome.skipped, vec![memory.id]);
        assert!(!gov.store.get_memory(memory.id).unwrap().deprecated);
    }

    #[tokio::test]
    async fn confirm_keep_bumps_vitality_to_max() {
        let (_dir, gov) = governance();
        let memory = gov.store.create("core", "a", "content", 0, "").unwrap();
        let low = Memory {
            vitality_score: 5.0,
            last_accessed_at: Utc::now() - chrono::Duration::days(200),
            ..gov.store.get_memory(memory.id).unwrap()
        };
        gov.store.restore_memory(low).unwrap();

        let review = gov.prepare_cleanup_review("operator", ReviewAction::Keep, 10).unwrap();
        let outcome = gov.confirm_review(review.review_id, &review.confirmation_phrase).await.unwrap();
        assert_eq!(outcome.kept, vec![memory.id]);
        assert_eq!(gov.store.get_memory(memory.id).unwrap().vitality_score, memory_palace_core::GovernanceConfig::default().vitality_max);
    }

    #[test]
    fn prepare_rejects_past_pending_limit() {
        let (_dir, gov) = governance();
        gov.prepare_cleanup_review("a", ReviewAction::Keep, 10).unwrap();
        gov.prepare_cleanup_review("b", ReviewAction::Keep, 10).unwrap();
        let err = gov.prepare_cleanup_review("c", ReviewAction::Keep, 10).unwrap_err();
        assert_eq!(err, GovernanceError::LimitReached);
    }

    #[tokio::test]
    async fn sleep_consolidation_finds_near_duplicate_preview_only() {
        let (_dir, gov) = governance();
        let keep = gov.store.create("core", "a", "first copy", 0, "").unwrap();
        let redundant = gov.store.create("core", "b", "near duplicate copy", 0, "").unwrap();

        let index = VectorIndex::new(4);
        index.upsert(keep.id, vec![1.0, 0.0, 0.0, 0.0]);
        index.upsert(redundant.id, vec![0.99, 0.01, 0.0, 0.0]);

        let suggestions = gov.sleep_consolidation(&index).await;
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].keep, keep.id);
        assert_eq!(suggestions[0].redundant, redundant.id);
        assert!(!gov.store.get_memory(redundant.id).unwrap().deprecated);
    }
}
