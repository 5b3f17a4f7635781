//! Service-layer configuration for the operation routing framework.

/// Controls operation timeouts, concurrency limits, and the background
/// sweep interval. Folded into [`crate::config::AppConfig`] at the top level.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Unique identifier for this engine instance, used in logs and job reasons.
    pub node_id: String,
    /// Default timeout for operations in milliseconds, used when a caller
    /// doesn't override `call_timeout_ms`.
    pub default_operation_timeout_ms: u64,
    /// Maximum number of concurrent operations before load shedding.
    pub max_concurrent_operations: u32,
    /// Interval between governance sweeps (decay tick) in milliseconds.
    pub governance_sweep_interval_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            default_operation_timeout_ms: 30_000,
            max_concurrent_operations: 64,
            governance_sweep_interval_ms: 3_600_000,
        }
    }
}
