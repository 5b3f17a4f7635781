//! Top-level configuration: aggregates every per-subsystem config struct
//! plus the service and network layers.

use std::env;
use std::time::Duration;

use memory_palace_core::{
    AuthConfig, EmbeddingBackend, EmbeddingConfig, GovernanceConfig, IndexWorkerConfig,
    MigrationConfig, RerankConfig, ResolverConfig, RetrievalConfig, SearchMode, WriteGuardLlmConfig,
    WriteLaneConfig,
};

use crate::network::config::NetworkConfig;
use crate::service::config::ServiceConfig;

/// Every knob in the engine, read once at process start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub governance: GovernanceConfig,
    pub write_lane: WriteLaneConfig,
    pub index_worker: IndexWorkerConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub rerank: RerankConfig,
    pub write_guard_llm: WriteGuardLlmConfig,
    pub resolver: ResolverConfig,
    pub auth: AuthConfig,
    pub migration: MigrationConfig,
    pub service: ServiceConfig,
    pub network: NetworkConfig,
    pub store_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            governance: GovernanceConfig::default(),
            write_lane: WriteLaneConfig::default(),
            index_worker: IndexWorkerConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            rerank: RerankConfig::default(),
            write_guard_llm: WriteGuardLlmConfig::default(),
            resolver: ResolverConfig::default(),
            auth: AuthConfig::default(),
            migration: MigrationConfig::default(),
            service: ServiceConfig::default(),
            network: NetworkConfig::default(),
            store_path: "memory_palace.redb".to_string(),
        }
    }
}

impl AppConfig {
    /// Reads every documented env var over the defaults. Unset
    /// variables keep their default; malformed ones are ignored (the
    /// default wins) rather than failing startup.
    #[must_use]
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        f64_var("VITALITY_MAX", &mut cfg.governance.vitality_max);
        f64_var("VITALITY_FLOOR", &mut cfg.governance.vitality_floor);
        f64_var("REINFORCE_DELTA", &mut cfg.governance.reinforce_delta);
        f64_var("DECAY_HALF_LIFE_DAYS", &mut cfg.governance.decay_half_life_days);
        f64_var("CLEANUP_THRESHOLD", &mut cfg.governance.cleanup_threshold);
        i64_var("CLEANUP_INACTIVE_DAYS", &mut cfg.governance.cleanup_inactive_days);
        duration_secs_var("CLEANUP_REVIEW_TTL_SECONDS", &mut cfg.governance.cleanup_review_ttl);
        usize_var("MAX_PENDING_REVIEWS", &mut cfg.governance.max_pending_reviews);
        bool_var("SLEEP_DEDUP_APPLY", &mut cfg.governance.sleep_dedup_apply);
        bool_var("SLEEP_ROLLUP_APPLY", &mut cfg.governance.sleep_rollup_apply);

        usize_var("GLOBAL_CONCURRENCY", &mut cfg.write_lane.global_concurrency);
        duration_secs_var("LANE_WAIT_TIMEOUT", &mut cfg.write_lane.lane_wait_timeout);

        usize_var("INDEX_QUEUE_CAPACITY", &mut cfg.index_worker.queue_capacity);
        usize_var("INDEX_RECENT_JOBS_RING", &mut cfg.index_worker.recent_jobs_ring);
        bool_var("INDEX_DEFER_ON_WRITE", &mut cfg.index_worker.defer_on_write);

        if let Ok(v) = env::var("SEARCH_DEFAULT_MODE") {
            cfg.retrieval.default_mode = match v.to_lowercase().as_str() {
                "keyword" => SearchMode::Keyword,
                "semantic" => SearchMode::Semantic,
                _ => SearchMode::Hybrid,
            };
        }
        f64_var("RETRIEVAL_HYBRID_KEYWORD_WEIGHT", &mut cfg.retrieval.hybrid_keyword_weight);
        f64_var("RETRIEVAL_HYBRID_SEMANTIC_WEIGHT", &mut cfg.retrieval.hybrid_semantic_weight);
        f64_var("RETRIEVAL_RERANKER_WEIGHT", &mut cfg.retrieval.reranker_weight);
        bool_var("RETRIEVAL_RERANKER_ENABLED", &mut cfg.retrieval.reranker_enabled);
        usize_var("RETRIEVAL_CHUNK_SIZE", &mut cfg.retrieval.chunk_size);

        if let Ok(v) = env::var("RETRIEVAL_EMBEDDING_BACKEND") {
            cfg.embedding.backend = match v.to_lowercase().as_str() {
                "none" => EmbeddingBackend::None,
                "router" => EmbeddingBackend::Router,
                "api" => EmbeddingBackend::Api,
                _ => EmbeddingBackend::Hash,
            };
        }
        opt_string_var("RETRIEVAL_EMBEDDING_API_BASE", &mut cfg.embedding.api_base);
        opt_string_var("RETRIEVAL_EMBEDDING_API_KEY", &mut cfg.embedding.api_key);
        opt_string_var("RETRIEVAL_EMBEDDING_MODEL", &mut cfg.embedding.model);
        usize_var("RETRIEVAL_EMBEDDING_DIM", &mut cfg.embedding.dim);

        opt_string_var("RETRIEVAL_RERANKER_API_BASE", &mut cfg.rerank.api_base);
        opt_string_var("RETRIEVAL_RERANKER_API_KEY", &mut cfg.rerank.api_key);
        opt_string_var("RETRIEVAL_RERANKER_MODEL", &mut cfg.rerank.model);

        bool_var("WRITE_GUARD_LLM_ENABLED", &mut cfg.write_guard_llm.enabled);
        opt_string_var("WRITE_GUARD_LLM_API_BASE", &mut cfg.write_guard_llm.api_base);
        opt_string_var("WRITE_GUARD_LLM_API_KEY", &mut cfg.write_guard_llm.api_key);
        opt_string_var("WRITE_GUARD_LLM_MODEL", &mut cfg.write_guard_llm.model);

        if let Ok(v) = env::var("VALID_DOMAINS") {
            cfg.resolver.valid_domains = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Ok(v) = env::var("CORE_MEMORY_URIS") {
            cfg.resolver.core_memory_uris = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }

        opt_string_var("MCP_API_KEY", &mut cfg.auth.api_key);
        bool_var("MCP_API_KEY_ALLOW_INSECURE_LOCAL", &mut cfg.auth.allow_insecure_local);

        if let Ok(v) = env::var("DB_MIGRATION_LOCK_FILE") {
            cfg.migration.lock_file = v;
        }
        duration_secs_var("DB_MIGRATION_LOCK_TIMEOUT", &mut cfg.migration.lock_timeout);

        if let Ok(v) = env::var("MEMORY_PALACE_STORE_PATH") {
            cfg.store_path = v;
        }

        cfg
    }
}

fn f64_var(name: &str, slot: &mut f64) {
    if let Ok(v) = env::var(name) {
        if let Ok(parsed) = v.parse() {
            *slot = parsed;
        }
    }
}

fn i64_var(name: &str, slot: &mut i64) {
    if let Ok(v) = env::var(name) {
        if let Ok(parsed) = v.parse() {
            *slot = parsed;
        }
    }
}

fn usize_var(name: &str, slot: &mut usize) {
    if let Ok(v) = env::var(name) {
        if let Ok(parsed) = v.parse() {
            *slot = parsed;
        }
    }
}

fn bool_var(name: &str, slot: &mut bool) {
    if let Ok(v) = env::var(name) {
        if let Ok(parsed) = v.parse() {
            *slot = parsed;
        }
    }
}

fn duration_secs_var(name: &str, slot: &mut Duration) {
    if let Ok(v) = env::var(name) {
        if let Ok(parsed) = v.parse::<u64>() {
            *slot = Duration::from_secs(parsed);
        }
    }
}

fn opt_string_var(name: &str, slot: &mut Option<String>) {
    if let Ok(v) = env::var(name) {
        *slot = Some(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_app_config_matches_subsystem_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.retrieval.default_mode, SearchMode::Hybrid);
        assert_eq!(cfg.embedding.backend, EmbeddingBackend::Hash);
    }
}
