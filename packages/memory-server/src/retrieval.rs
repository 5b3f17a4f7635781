//! Retrieval Pipeline: preprocess -> intent classify -> strategy select ->
//! keyword/vector stages -> merge -> rerank -> filter & cut -> degrade
//! reporting. Every stage that touches a remote dependency degrades rather
//! than fails: a skipped or failed stage appends a [`DegradeReason`] and the
//! pipeline keeps going with whatever signal it still has, downgrading the
//! reported mode when it has to.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use memory_palace_core::{DegradeReason, GovernanceConfig, Memory, MemoryId, RetrievalConfig, SearchMode};

use crate::external::embedding::EmbeddingAdapter;
use crate::external::rerank::RerankAdapter;
use crate::storage::text_index::TextIndex;
use crate::storage::vector_index::VectorIndex;
use crate::storage::StoreEngine;

/// How many of the most recently touched live memories make up the seeded
/// "session ring" when `include_session` is set. This codebase has no
/// per-session access log, so the ring is approximated from store-wide
/// recency rather than a true session-scoped history.
const SESSION_RING_SIZE: usize = 5;

/// A classification of query purpose, selecting a retrieval strategy
/// template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Factual,
    Exploratory,
    Temporal,
    Causal,
    Unknown,
}

impl QueryIntent {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Factual => "factual",
            Self::Exploratory => "exploratory",
            Self::Temporal => "temporal",
            Self::Causal => "causal",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub fn strategy_template(self) -> &'static str {
        match self {
            Self::Factual => "factual_high_precision",
            Self::Exploratory => "exploratory_high_recall",
            Self::Temporal => "temporal_time_filtered",
            Self::Causal => "causal_wide_pool",
            Self::Unknown => "default",
        }
    }
}

/// One scored result, content included so the caller doesn't need a second
/// store round-trip. `session` is set when the hit came from the seeded
/// session ring rather than the scored candidate pool.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RetrievalHit {
    pub memory_id: MemoryId,
    pub content: String,
    pub score: f64,
    pub session: bool,
}

/// Post-retrieval narrowing applied during the filter & cut stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    pub domain: Option<String>,
    pub path_prefix: Option<String>,
    pub max_priority: Option<u32>,
    pub updated_after: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub query_effective: String,
    pub mode_requested: SearchMode,
    pub mode_applied: SearchMode,
    pub intent: QueryIntent,
    pub strategy_template: &'static str,
    pub hits: Vec<RetrievalHit>,
    pub session_count: usize,
    pub global_count: usize,
    pub degrade_reasons: Vec<DegradeReason>,
}

/// A retrieval request. `mode_override` wins over the configured default;
/// `always_include` forces specific memories into the result ahead of
/// everything else (e.g. the caller's own session breadcrumbs).
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub query: String,
    pub max_results: usize,
    pub mode_override: Option<SearchMode>,
    pub candidate_multiplier: Option<usize>,
    pub include_session: bool,
    pub filters: SearchFilters,
    pub always_include: Vec<MemoryId>,
    pub remote_timeout: Duration,
}

pub struct RetrievalPipeline {
    config: RetrievalConfig,
    store: StoreEngine,
    text_index: Arc<TextIndex>,
    vector_index: Arc<VectorIndex>,
    embedding: Arc<EmbeddingAdapter>,
    rerank: Arc<RerankAdapter>,
    reinforce_delta: f64,
    vitality_max: f64,
}

impl RetrievalPipeline {
    /// Shares `text_index`/`vector_index`/`embedding` with the Index Worker
    /// so a reindex is immediately visible to the next search.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RetrievalConfig,
        store: StoreEngine,
        text_index: Arc<TextIndex>,
        vector_index: Arc<VectorIndex>,
        embedding: Arc<EmbeddingAdapter>,
        rerank: Arc<RerankAdapter>,
        governance: GovernanceConfig,
    ) -> Self {
        Self {
            config,
            store,
            text_index,
            vector_index,
            embedding,
            rerank,
            reinforce_delta: governance.reinforce_delta,
            vitality_max: governance.vitality_max,
        }
    }

    pub async fn search(&self, request: &RetrievalRequest) -> RetrievalResult {
        let mut degrade_reasons = Vec::new();

        // 1. Preprocess.
        let query_effective = match preprocess(&request.query) {
            Some(q) => q,
            None => {
                degrade_reasons.push(DegradeReason::QueryPreprocessFailed);
                request.query.clone()
            }
        };

        // 2. Intent classify.
        let intent = classify_intent(&query_effective, &self.config);

        // 3. Strategy select.
        let strategy = StrategyParams::for_intent(intent, &self.config);
        let multiplier = request.candidate_multiplier.unwrap_or(strategy.candidate_multiplier).clamp(1, 20);
        let pool_size = request.max_results.saturating_mul(multiplier).max(request.max_results).max(1);

        let mode_requested = request.mode_override.unwrap_or(self.config.default_mode);
        let mut mode_applied = mode_requested;

        let mut scored: HashMap<MemoryId, f64> = HashMap::new();

        // 4. Keyword stage.
        if matches!(mode_requested, SearchMode::Keyword | SearchMode::Hybrid) {
            match self.text_index.search(&query_effective, pool_size) {
                Ok(hits) => {
                    let max_score = hits.iter().map(|h| h.score).fold(0.0_f32, f32::max).max(1e-6);
                    for hit in hits {
                        let normalized = f64::from(hit.score / max_score) * strategy.keyword_weight;
                        *scored.entry(hit.memory_id).or_insert(0.0) += normalized;
                    }
                }
                Err(_) => degrade_reasons.push(DegradeReason::QueryPreprocessFailed),
            }
        }

        // 5. Vector stage, optional; downgrades `mode_applied` on failure.
        if matches!(mode_requested, SearchMode::Semantic | SearchMode::Hybrid) && self.embedding.is_enabled() {
            match self.embedding.embed(&query_effective, request.remote_timeout).await {
                Ok(vector) => {
                    for hit in self.vector_index.search(&vector, pool_size) {
                        let normalized = f64::from(hit.similarity.clamp(0.0, 1.0)) * strategy.semantic_weight;
                        *scored.entry(hit.memory_id).or_insert(0.0) += normalized;
                    }
                }
                Err(_) => {
                    degrade_reasons.push(DegradeReason::EmbeddingRequestFailed);
                    if mode_requested == SearchMode::Hybrid {
                        mode_applied = SearchMode::Keyword;
                    }
                }
            }
        }

        // Session inclusion: seed the candidate set with a ring of recently
        // touched live memories, tagged so they surface in `results` even
        // without a keyword/vector hit.
        let mut session_ids: HashSet<MemoryId> = HashSet::new();
        if request.include_session {
            for memory in self.session_ring() {
                session_ids.insert(memory.id);
                scored.entry(memory.id).or_insert(0.0);
            }
        }

        // 6. Merge: score descending, then lower priority, then more recent
        // `updated_at`, then lower id.
        let mut ranked: Vec<(MemoryId, f64)> = scored.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.total_cmp(&a.1).then_with(|| match (self.store.get_memory(a.0), self.store.get_memory(b.0)) {
                (Some(ma), Some(mb)) => {
                    ma.priority.cmp(&mb.priority).then_with(|| mb.updated_at.cmp(&ma.updated_at)).then_with(|| a.0.cmp(&b.0))
                }
                _ => std::cmp::Ordering::Equal,
            })
        });
        ranked.truncate(pool_size);

        // 7. Rerank, optional.
        if self.config.reranker_enabled && !ranked.is_empty() {
            let candidates: Vec<Memory> = ranked.iter().filter_map(|(id, _)| self.store.get_memory(*id)).collect();
            let documents: Vec<&str> = candidates.iter().map(|m| m.content.as_str()).collect();
            match self.rerank.rerank(&query_effective, &documents, request.remote_timeout).await {
                Ok(scores) => {
                    for ((_, score), rerank_score) in ranked.iter_mut().zip(scores) {
                        *score = *score * (1.0 - strategy.rerank_weight) + f64::from(rerank_score) * strategy.rerank_weight;
                    }
                    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
                }
                Err(_) => degrade_reasons.push(DegradeReason::RerankerRequestFailed),
            }
        }

        // 8. Filter & cut.
        let time_cutoff = strategy.time_window_days.map(|days| Utc::now() - chrono::Duration::days(days));
        let mut hits = Vec::new();
        let mut seen = HashSet::new();
        for id in &request.always_include {
            if let Some(memory) = self.store.get_memory(*id) {
                if memory.is_live() && seen.insert(*id) {
                    hits.push(RetrievalHit {
                        memory_id: *id,
                        content: chunk(&memory.content, self.config.chunk_size),
                        score: f64::MAX,
                        session: session_ids.contains(id),
                    });
                }
            }
        }
        for (id, score) in ranked {
            if hits.len() >= request.max_results {
                break;
            }
            if !seen.insert(id) {
                continue;
            }
            let is_session_hit = session_ids.contains(&id);
            let Some(memory) = self.store.get_memory(id) else { continue };
            if !memory.is_live() {
                continue;
            }
            if score < strategy.min_score && !is_session_hit {
                continue;
            }
            if let Some(cutoff) = time_cutoff {
                if memory.updated_at < cutoff {
                    continue;
                }
            }
            if let Some(max_priority) = request.filters.max_priority {
                if memory.priority > max_priority {
                    continue;
                }
            }
            if let Some(updated_after) = request.filters.updated_after {
                if memory.updated_at < updated_after {
                    continue;
                }
            }
            if request.filters.domain.is_some() || request.filters.path_prefix.is_some() {
                let paths = self.store.paths_for_memory(id);
                let matches = paths.iter().any(|p| {
                    request.filters.domain.as_deref().is_none_or(|d| d == p.domain)
                        && request.filters.path_prefix.as_deref().is_none_or(|prefix| p.path.starts_with(prefix))
                });
                if !matches {
                    continue;
                }
            }
            hits.push(RetrievalHit { memory_id: id, content: chunk(&memory.content, self.config.chunk_size), score, session: is_session_hit });
        }

        for hit in &hits {
            let _ = self.store.record_access(hit.memory_id, self.reinforce_delta, self.vitality_max);
        }

        // 9. Degrade reporting is implicit: `degraded` is derived by the
        // caller from `degrade_reasons.is_empty()`.
        let session_count = hits.iter().filter(|h| h.session).count();
        let global_count = hits.len() - session_count;

        RetrievalResult {
            query_effective,
            mode_requested,
            mode_applied,
            intent,
            strategy_template: intent.strategy_template(),
            hits,
            session_count,
            global_count,
            degrade_reasons,
        }
    }

    fn session_ring(&self) -> Vec<Memory> {
        let mut memories: Vec<Memory> = self.store.list_all().into_iter().filter(Memory::is_live).collect();
        memories.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));
        memories.truncate(SESSION_RING_SIZE);
        memories
    }
}

/// Per-template retrieval parameters: how wide a candidate pool to pull,
/// how to split keyword/semantic/rerank weight, and whether a time window
/// or minimum score applies.
struct StrategyParams {
    candidate_multiplier: usize,
    keyword_weight: f64,
    semantic_weight: f64,
    rerank_weight: f64,
    time_window_days: Option<i64>,
    min_score: f64,
}

impl StrategyParams {
    fn for_intent(intent: QueryIntent, config: &RetrievalConfig) -> Self {
        match intent {
            QueryIntent::Factual => Self {
                candidate_multiplier: 3,
                keyword_weight: 0.65,
                semantic_weight: 0.35,
                rerank_weight: config.reranker_weight,
                time_window_days: None,
                min_score: 0.05,
            },
            QueryIntent::Exploratory => Self {
                candidate_multiplier: 8,
                keyword_weight: 0.4,
                semantic_weight: 0.6,
                rerank_weight: config.reranker_weight,
                time_window_days: None,
                min_score: 0.0,
            },
            QueryIntent::Temporal => Self {
                candidate_multiplier: 5,
                keyword_weight: 0.5,
                semantic_weight: 0.5,
                rerank_weight: config.reranker_weight,
                time_window_days: Some(30),
                min_score: 0.0,
            },
            QueryIntent::Causal => Self {
                candidate_multiplier: 10,
                keyword_weight: 0.45,
                semantic_weight: 0.55,
                rerank_weight: config.reranker_weight,
                time_window_days: None,
                min_score: 0.0,
            },
            QueryIntent::Unknown => Self {
                candidate_multiplier: 4,
                keyword_weight: config.hybrid_keyword_weight,
                semantic_weight: config.hybrid_semantic_weight,
                rerank_weight: config.reranker_weight,
                time_window_days: None,
                min_score: 0.0,
            },
        }
    }
}

const TEMPORAL_MARKERS: &[&str] =
    &["yesterday", "today", "tomorrow", "last week", "last month", "last year", " ago", "recently", "this week", "this month", " when ", "before", "after", "date"];
const CAUSAL_MARKERS: &[&str] = &["why", "because", "cause", "caused", "reason", "due to"];
const EXPLORATORY_MARKERS: &[&str] = &["list", "kinds of", "what kinds", "examples", "example of", "options", "types of", "which ones"];
const FACTUAL_MARKERS: &[&str] = &["what is", "define", "definition", "who is", "where is", "meaning of"];

fn marker_score(padded_lower: &str, markers: &[&str]) -> f64 {
    let hits = markers.iter().filter(|m| padded_lower.contains(*m)).count();
    (hits as f64 * 0.5).min(1.0)
}

/// `keyword_scoring_v2`: scores the query against marker phrases for each of
/// the four named intents, then picks one per the selection rule: a clear
/// top score wins outright; an entirely weak signal defaults to `factual`;
/// a near-tie among two or more candidates is reported as `unknown`.
fn classify_intent(query: &str, config: &RetrievalConfig) -> QueryIntent {
    let padded_lower = format!(" {} ", query.to_lowercase());
    let mut scores = [
        (QueryIntent::Temporal, marker_score(&padded_lower, TEMPORAL_MARKERS)),
        (QueryIntent::Causal, marker_score(&padded_lower, CAUSAL_MARKERS)),
        (QueryIntent::Exploratory, marker_score(&padded_lower, EXPLORATORY_MARKERS)),
        (QueryIntent::Factual, marker_score(&padded_lower, FACTUAL_MARKERS)),
    ];
    scores.sort_by(|a, b| b.1.total_cmp(&a.1));

    let top_score = scores[0].1;
    let runner_up = scores[1].1;

    if top_score > 0.0 && top_score - runner_up >= config.intent_strong_margin {
        return scores[0].0;
    }
    if scores.iter().all(|(_, s)| *s < config.intent_floor) {
        return QueryIntent::Factual;
    }
    let within_margin = scores.iter().filter(|(_, s)| (top_score - s) <= config.intent_ambiguous_margin).count();
    if within_margin >= 2 {
        return QueryIntent::Unknown;
    }
    scores[0].0
}

/// Trims and collapses whitespace. `None` if the result is empty, signaling
/// the caller to fall back to the raw query and record a degrade reason.
fn preprocess(query: &str) -> Option<String> {
    let collapsed = query.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn chunk(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        content.to_string()
    } else {
        content.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_palace_core::EmbeddingConfig;
    use tempfile::tempdir;

    fn request(query: &str) -> RetrievalRequest {
        RetrievalRequest {
            query: query.to_string(),
            max_results: 5,
            mode_override: None,
            candidate_multiplier: None,
            include_session: false,
            filters: SearchFilters::default(),
            always_include: vec![],
            remote_timeout: Duration::from_millis(50),
        }
    }

    fn pipeline() -> (tempfile::TempDir, RetrievalPipeline) {
        let dir = tempdir().unwrap();
        let store = StoreEngine::open(dir.path().join("s.redb")).unwrap();
        let text_index = Arc::new(TextIndex::in_memory().unwrap());
        let vector_index = Arc::new(VectorIndex::new(32));
        let embedding = Arc::new(EmbeddingAdapter::new(EmbeddingConfig { dim: 32, ..EmbeddingConfig::default() }));
        let rerank = Arc::new(RerankAdapter::new(memory_palace_core::RerankConfig::default()));
        (
            dir,
            RetrievalPipeline::new(RetrievalConfig::default(), store, text_index, vector_index, embedding, rerank, GovernanceConfig::default()),
        )
    }

    #[tokio::test]
    async fn keyword_hit_surfaces_in_hybrid_mode() {
        let (_dir, pipeline) = pipeline();
        let memory = pipeline.store.create("core", "a", "Prefer concise code over clever code", 0, "").unwrap();
        pipeline.text_index.rebuild(std::iter::once((memory.id, memory.content.as_str()))).unwrap();

        let result = pipeline.search(&request("concise")).await;
        assert_eq!(result.hits[0].memory_id, memory.id);
    }

    #[tokio::test]
    async fn always_include_is_first_regardless_of_score() {
        let (_dir, pipeline) = pipeline();
        let unrelated = pipeline.store.create("core", "a", "completely unrelated", 0, "").unwrap();
        let forced = pipeline.store.create("core", "b", "also unrelated", 0, "").unwrap();
        pipeline.text_index.rebuild(
            [(unrelated.id, unrelated.content.as_str()), (forced.id, forced.content.as_str())].into_iter(),
        ).unwrap();

        let mut req = request("unrelated");
        req.always_include = vec![forced.id];
        let result = pipeline.search(&req).await;
        assert_eq!(result.hits[0].memory_id, forced.id);
    }

    #[tokio::test]
    async fn deprecated_memories_are_filtered_out() {
        let (_dir, pipeline) = pipeline();
        let memory = pipeline.store.create("core", "a", "some unique phrase here", 0, "").unwrap();
        pipeline.text_index.rebuild(std::iter::once((memory.id, memory.content.as_str()))).unwrap();
        pipeline.store.delete_path("core", "a").unwrap();

        let result = pipeline.search(&request("unique phrase")).await;
        assert!(result.hits.is_empty());
    }

    #[tokio::test]
    async fn domain_filter_excludes_other_domains() {
        let (_dir, pipeline) = pipeline();
        let memory = pipeline.store.create("notes", "a", "filtered phrase here", 0, "").unwrap();
        pipeline.text_index.rebuild(std::iter::once((memory.id, memory.content.as_str()))).unwrap();

        let mut req = request("filtered phrase");
        req.filters.domain = Some("core".to_string());
        let result = pipeline.search(&req).await;
        assert!(result.hits.is_empty());
    }

    #[tokio::test]
    async fn temporal_intent_excludes_stale_candidates() {
        let (_dir, pipeline) = pipeline();
        let memory = pipeline.store.create("core", "a", "meetings last week about rollout", 0, "").unwrap();
        pipeline.text_index.rebuild(std::iter::once((memory.id, memory.content.as_str()))).unwrap();
        let stale = Memory { updated_at: Utc::now() - chrono::Duration::days(90), ..pipeline.store.get_memory(memory.id).unwrap() };
        pipeline.store.restore_memory(stale).unwrap();

        let result = pipeline.search(&request("meetings last week")).await;
        assert_eq!(result.intent, QueryIntent::Temporal);
        assert_eq!(result.strategy_template, "temporal_time_filtered");
        assert!(result.hits.is_empty());
    }

    #[test]
    fn preprocess_collapses_whitespace() {
        assert_eq!(preprocess("  hello   world  ").as_deref(), Some("hello world"));
    }

    #[test]
    fn preprocess_empty_query_returns_none() {
        assert_eq!(preprocess("   "), None);
    }

    #[test]
    fn causal_query_picks_causal_intent() {
        let config = RetrievalConfig::default();
        assert_eq!(classify_intent("why did the deployment fail", &config), QueryIntent::Causal);
    }

    #[test]
    fn exploratory_query_picks_exploratory_intent() {
        let config = RetrievalConfig::default();
        assert_eq!(classify_intent("what kinds of rollback options do we have", &config), QueryIntent::Exploratory);
    }

    #[test]
    fn temporal_query_picks_temporal_intent() {
        let config = RetrievalConfig::default();
        assert_eq!(classify_intent("meetings last week", &config), QueryIntent::Temporal);
    }

    #[test]
    fn weak_signal_defaults_to_factual() {
        let config = RetrievalConfig::default();
        assert_eq!(classify_intent("store.resolve_path", &config), QueryIntent::Factual);
    }

    #[test]
    fn near_tie_reports_unknown() {
        let config = RetrievalConfig::default();
        assert_eq!(classify_intent("why did we decide the reason last week", &config), QueryIntent::Unknown);
    }
}
