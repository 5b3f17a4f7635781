//! Per-subsystem configuration value types.
//!
//! One struct per component, each with a `Default` impl holding its
//! documented default. All of it is read once at process start
//! (`memory-paladmin`'s `AppConfig::from_env`); changing a value requires a
//! restart.

use std::time::Duration;

/// Vitality decay, cleanup review, and sleep-consolidation knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct GovernanceConfig {
    pub vitality_max: f64,
    pub vitality_floor: f64,
    pub reinforce_delta: f64,
    pub decay_half_life_days: f64,
    pub cleanup_threshold: f64,
    pub cleanup_inactive_days: i64,
    pub cleanup_review_ttl: Duration,
    pub max_pending_reviews: usize,
    pub sleep_dedup_threshold: f64,
    pub sleep_rollup_max_chars: usize,
    pub sleep_dedup_apply: bool,
    pub sleep_rollup_apply: bool,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            vitality_max: 100.0,
            vitality_floor: 0.0,
            reinforce_delta: 5.0,
            decay_half_life_days: 14.0,
            cleanup_threshold: 10.0,
            cleanup_inactive_days: 90,
            cleanup_review_ttl: Duration::from_secs(900),
            max_pending_reviews: 16,
            sleep_dedup_threshold: 0.92,
            sleep_rollup_max_chars: 2000,
            sleep_dedup_apply: false,
            sleep_rollup_apply: false,
        }
    }
}

/// Write Lane admission knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteLaneConfig {
    pub global_concurrency: usize,
    pub lane_wait_timeout: Duration,
}

impl Default for WriteLaneConfig {
    fn default() -> Self {
        Self {
            global_concurrency: 8,
            lane_wait_timeout: Duration::from_secs(10),
        }
    }
}

/// Index Worker queue and retry knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexWorkerConfig {
    pub queue_capacity: usize,
    pub recent_jobs_ring: usize,
    pub defer_on_write: bool,
    pub max_remote_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for IndexWorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            recent_jobs_ring: 50,
            defer_on_write: true,
            max_remote_retries: 3,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Retrieval pipeline default mode and stage weights.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalConfig {
    pub default_mode: SearchMode,
    pub hybrid_keyword_weight: f64,
    pub hybrid_semantic_weight: f64,
    pub reranker_weight: f64,
    pub reranker_enabled: bool,
    pub chunk_size: usize,
    pub intent_strong_margin: f64,
    pub intent_floor: f64,
    pub intent_ambiguous_margin: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_mode: SearchMode::Hybrid,
            hybrid_keyword_weight: 0.5,
            hybrid_semantic_weight: 0.5,
            reranker_weight: 0.3,
            reranker_enabled: false,
            chunk_size: 1000,
            intent_strong_margin: 0.2,
            intent_floor: 0.05,
            intent_ambiguous_margin: 0.05,
        }
    }
}

/// Requested (or applied) retrieval mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Keyword,
    Semantic,
    Hybrid,
}

/// Which backend serves embeddings: `none` disables the vector stage
/// entirely, `hash` is the deterministic local fallback, `router`/`api` call
/// out over HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    None,
    Hash,
    Router,
    Api,
}

/// Embedding adapter endpoint and model knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub dim: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Hash,
            api_base: None,
            api_key: None,
            model: None,
            dim: 256,
        }
    }
}

/// Rerank adapter endpoint knobs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RerankConfig {
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

/// Write Guard LLM arbitration knobs (also the fallback source for
/// `compact_context`'s gist LLM config when unset there).
#[derive(Debug, Clone, PartialEq)]
pub struct WriteGuardLlmConfig {
    pub enabled: bool,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub sem_noop_threshold: f64,
    pub sem_update_low: f64,
    pub kw_noop_threshold: f64,
    pub kw_update_threshold: f64,
    pub llm_consult_threshold: f64,
}

impl Default for WriteGuardLlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base: None,
            api_key: None,
            model: None,
            sem_noop_threshold: 0.93,
            sem_update_low: 0.80,
            kw_noop_threshold: 0.85,
            kw_update_threshold: 0.65,
            llm_consult_threshold: 0.55,
        }
    }
}

/// Resolver domain allowlist and `system://boot` bundle.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolverConfig {
    pub valid_domains: Vec<String>,
    pub core_memory_uris: Vec<String>,
}

/// HTTP control-plane auth knobs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AuthConfig {
    pub api_key: Option<String>,
    pub allow_insecure_local: bool,
}

/// Migration-lock acquisition knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationConfig {
    pub lock_file: String,
    pub lock_timeout: Duration,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            lock_file: "memory_palace.migrate.lock".to_string(),
            lock_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn governance_defaults_within_documented_bounds() {
        let cfg = GovernanceConfig::default();
        assert!(cfg.vitality_floor < cfg.vitality_max);
        assert!(cfg.max_pending_reviews > 0);
    }

    #[test]
    fn write_lane_defaults_are_nonzero() {
        let cfg = WriteLaneConfig::default();
        assert!(cfg.global_concurrency > 0);
        assert!(cfg.lane_wait_timeout > Duration::ZERO);
    }

    #[test]
    fn retrieval_defaults_to_hybrid() {
        assert_eq!(RetrievalConfig::default().default_mode, SearchMode::Hybrid);
    }

    #[test]
    fn embedding_defaults_to_local_hash_fallback() {
        assert_eq!(EmbeddingConfig::default().backend, EmbeddingBackend::Hash);
    }
}
