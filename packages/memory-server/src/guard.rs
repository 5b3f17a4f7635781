//! Write Guard: the pure pre-write decision function.
//!
//! Given a proposed write and a view over existing content, returns one of
//! `{ADD, UPDATE(target), NOOP(target), DELETE(target)}` plus a method tag
//! and confidence. Never mutates the store; the Write Lane is the only
//! caller and is the one that acts on the verdict.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use memory_palace_core::{MemoryId, WriteGuardLlmConfig};

use crate::external::llm::LlmClassifier;
use crate::storage::vector_index::VectorIndex;

/// The guard's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardAction {
    Add,
    Update,
    Noop,
    Delete,
}

/// Which signal produced the verdict. Exactly the five tags the decision
/// ladder requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardMethod {
    Embedding,
    Keyword,
    Llm,
    Bypass,
    Fallback,
}

/// The guard's full verdict, returned to the Write Lane.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardVerdict {
    pub action: GuardAction,
    pub target_id: Option<MemoryId>,
    pub method: GuardMethod,
    pub reason: String,
    pub confidence: f64,
}

/// One existing memory as seen by the guard: enough to compare against a
/// proposal without needing the full `Memory` record.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: MemoryId,
    pub content: String,
}

pub struct WriteGuard {
    config: WriteGuardLlmConfig,
    llm: Option<Arc<dyn LlmClassifier>>,
}

impl WriteGuard {
    #[must_use]
    pub fn new(config: WriteGuardLlmConfig, llm: Option<Arc<dyn LlmClassifier>>) -> Self {
        Self { config, llm }
    }

    /// Metadata-only updates bypass the ladder entirely.
    #[must_use]
    pub fn bypass(target_id: MemoryId) -> GuardVerdict {
        GuardVerdict {
            action: GuardAction::Update,
            target_id: Some(target_id),
            method: GuardMethod::Bypass,
            reason: "metadata-only update".to_string(),
            confidence: 1.0,
        }
    }

    /// Runs the decision ladder: semantic match, then keyword match, then
    /// optional LLM arbitration, defaulting to ADD.
    pub async fn evaluate(
        &self,
        proposal: &str,
        candidates: &[Candidate],
        embedding: Option<(&VectorIndex, Vec<f32>)>,
        llm_timeout: Duration,
    ) -> GuardVerdict {
        if let Some((vector_index, proposal_vec)) = embedding {
            if let Some(verdict) = self.semantic_stage(proposal, vector_index, &proposal_vec, candidates) {
                return verdict;
            }
        }

        if let Some(verdict) = self.keyword_stage(proposal, candidates) {
            return verdict;
        }

        if self.config.enabled {
            if let Some(llm) = &self.llm {
                if let Some(best) = best_keyword_candidate(proposal, candidates) {
                    if best.1 >= self.config.llm_consult_threshold {
                        if let Ok(verdict) = llm.classify(&best.0.content, proposal, llm_timeout).await {
                            return GuardVerdict {
                                action: verdict.action,
                                target_id: Some(best.0.id),
                                method: GuardMethod::Llm,
                                reason: verdict.reason,
                                confidence: best.1,
                            };
                        }
                    }
                }
            }
        }

        GuardVerdict {
            action: GuardAction::Add,
            target_id: None,
            method: GuardMethod::Fallback,
            reason: "no existing memory matched; adding new".to_string(),
            confidence: 0.0,
        }
    }

    fn semantic_stage(
        &self,
        proposal: &str,
        vector_index: &VectorIndex,
        proposal_vec: &[f32],
        candidates: &[Candidate],
    ) -> Option<GuardVerdict> {
        let hits = vector_index.search(proposal_vec, 1);
        let top = hits.first()?;
        let similarity = f64::from(top.similarity);
        let candidate = candidates.iter().find(|c| c.id == top.memory_id)?;

        if similarity >= self.config.sem_noop_threshold {
            return Some(GuardVerdict {
                action: GuardAction::Noop,
                target_id: Some(candidate.id),
                method: GuardMethod::Embedding,
                reason: "semantic duplicate of existing memory".to_string(),
                confidence: similarity,
            });
        }

        if similarity >= self.config.sem_update_low && supersedes(proposal, &candidate.content) {
            return Some(GuardVerdict {
                action: GuardAction::Update,
                target_id: Some(candidate.id),
                method: GuardMethod::Embedding,
                reason: "semantic near-match classified as supersession".to_string(),
                confidence: similarity,
            });
        }

        None
    }

    fn keyword_stage(&self, proposal: &str, candidates: &[Candidate]) -> Option<GuardVerdict> {
        let (candidate, score) = best_keyword_candidate(proposal, candidates)?;

        if score >= self.config.kw_noop_threshold {
            return Some(GuardVerdict {
                action: GuardAction::Noop,
                target_id: Some(candidate.id),
                method: GuardMethod::Keyword,
                reason: "keyword duplicate of existing memory".to_string(),
                confidence: score,
            });
        }

        if score >= self.config.kw_update_threshold && supersedes(proposal, &candidate.content) {
            return Some(GuardVerdict {
                action: GuardAction::Update,
                target_id: Some(candidate.id),
                method: GuardMethod::Keyword,
                reason: "keyword near-match classified as supersession".to_string(),
                confidence: score,
            });
        }

        None
    }
}

fn best_keyword_candidate<'a>(proposal: &str, candidates: &'a [Candidate]) -> Option<(&'a Candidate, f64)> {
    let proposal_tokens = token_set(proposal);
    candidates
        .iter()
        .map(|c| (c, jaccard(&proposal_tokens, &token_set(&c.content))))
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

/// Heuristic: a proposal "supersedes" a candidate if it is
/// meaningfully longer, or shares most of its tokens with it.
fn supersedes(proposal: &str, candidate: &str) -> bool {
    let proposal_len = proposal.chars().count() as f64;
    let candidate_len = candidate.chars().count().max(1) as f64;
    if proposal_len > candidate_len * 1.2 {
        return true;
    }
    let overlap = jaccard(&token_set(proposal), &token_set(candidate));
    overlap >= 0.6
}

fn token_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|s| s.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn guard() -> WriteGuard {
        WriteGuard::new(WriteGuardLlmConfig::default(), None)
    }

    #[tokio::test]
    async fn identical_content_noops_via_keyword() {
        let g = guard();
        let existing = Candidate { id: Uuid::new_v4(), content: "Prefer concise code".to_string() };
        let verdict = g.evaluate("Prefer concise code", &[existing.clone()], None, Duration::from_millis(10)).await;
        assert_eq!(verdict.action, GuardAction::Noop);
        assert_eq!(verdict.target_id, Some(existing.id));
        assert_eq!(verdict.method, GuardMethod::Keyword);
    }

    #[tokio::test]
    async fn unrelated_content_defaults_to_add() {
        let g = guard();
        let existing = Candidate { id: Uuid::new_v4(), content: "Prefer concise code".to_string() };
        let verdict = g
            .evaluate("Completely unrelated topic about gardening", &[existing], None, Duration::from_millis(10))
            .await;
        assert_eq!(verdict.action, GuardAction::Add);
        assert_eq!(verdict.method, GuardMethod::Fallback);
    }

    #[tokio::test]
    async fn longer_overlapping_content_supersedes() {
        let g = guard();
        let existing = Candidate { id: Uuid::new_v4(), content: "Prefer concise code".to_string() };
        let proposal = "Prefer concise code that is also well documented and has clear names throughout";
        let verdict = g.evaluate(proposal, &[existing.clone()], None, Duration::from_millis(10)).await;
        assert_eq!(verdict.action, GuardAction::Update);
        assert_eq!(verdict.target_id, Some(existing.id));
    }

    #[tokio::test]
    async fn bypass_is_always_update_with_bypass_method() {
        let id = Uuid::new_v4();
        let verdict = WriteGuard::bypass(id);
        assert_eq!(verdict.action, GuardAction::Update);
        assert_eq!(verdict.method, GuardMethod::Bypass);
        assert_eq!(verdict.target_id, Some(id));
    }

    #[test]
    fn jaccard_of_identical_sets_is_one() {
        let a = token_set("alpha beta");
        assert_eq!(jaccard(&a, &a), 1.0);
    }

    #[test]
    fn jaccard_of_disjoint_sets_is_zero() {
        let a = token_set("alpha");
        let b = token_set("beta");
        assert_eq!(jaccard(&a, &b), 0.0);
    }
}
