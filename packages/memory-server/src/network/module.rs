//! Network module with deferred startup lifecycle.
//!
//! Implements the deferred startup pattern: `new()` creates resources,
//! `start()` binds the TCP listener, and `serve()` starts accepting
//! connections. This separation allows the composition root to finish
//! wiring the engine (store, resolver, domain services) before the listener
//! is bound, and to bind the listener before the process starts accepting
//! traffic.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::NetworkConfig;
use super::handlers::{
    add_alias, approve_snapshot, clear_snapshots, compact_context, confirm_cleanup, create_memory,
    delete_memory, diff_snapshot, index_status, list_snapshots, prepare_cleanup, read_memory,
    rebuild_index, retry_index_job, rollback_snapshot, search_memory, update_memory, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;

/// Manages the HTTP control-plane server lifecycle.
///
/// Follows the deferred startup pattern:
/// 1. `new()` -- allocates the shutdown controller
/// 2. `start()` -- binds the TCP listener to the configured address
/// 3. `serve()` -- begins accepting connections until shutdown is signalled
pub struct NetworkModule {
    config: NetworkConfig,
    state: AppState,
    listener: Option<TcpListener>,
    shutdown: Arc<ShutdownController>,
}

impl NetworkModule {
    /// Creates a new network module without binding any port. `state`
    /// carries the already-wired operation pipeline and governance/index
    /// handles; this module only owns the HTTP transport around it.
    #[must_use]
    pub fn new(config: NetworkConfig, state: AppState) -> Self {
        Self { config, state, listener: None, shutdown: Arc::new(ShutdownController::new()) }
    }

    /// Returns a shared reference to the shutdown controller, so the
    /// composition root can trigger shutdown from a signal handler.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the axum router with every control-plane route and the
    /// shared HTTP middleware stack.
    ///
    /// Routes:
    /// - `GET /memory` -- `read_memory`
    /// - `POST /memory` -- `create_memory`
    /// - `PATCH /memory` -- `update_memory`
    /// - `DELETE /memory` -- `delete_memory`
    /// - `POST /memory/alias` -- `add_alias`
    /// - `POST /memory/compact` -- `compact_context`
    /// - `POST /search` -- `search_memory`
    /// - `POST /index/rebuild` -- `rebuild_index`
    /// - `GET /index/status` -- `index_status`
    /// - `POST /index/retry` -- `retry_index_job`
    /// - `POST /vitality/cleanup/prepare` -- `prepare_cleanup`
    /// - `POST /vitality/cleanup/confirm` -- `confirm_cleanup`
    /// - `GET /snapshots` -- `list_snapshots`
    /// - `POST /snapshots/diff` -- `diff_snapshot`
    /// - `POST /snapshots/rollback` -- `rollback_snapshot`
    /// - `POST /snapshots/approve` -- `approve_snapshot`
    /// - `POST /snapshots/clear` -- `clear_snapshots`
    #[must_use]
    pub fn build_router(&self) -> Router {
        let layers = build_http_layers(&self.config);

        Router::new()
            .route("/memory", get(read_memory).post(create_memory).patch(update_memory).delete(delete_memory))
            .route("/memory/alias", post(add_alias))
            .route("/memory/compact", post(compact_context))
            .route("/search", post(search_memory))
            .route("/index/rebuild", post(rebuild_index))
            .route("/index/status", get(index_status))
            .route("/index/retry", post(retry_index_job))
            .route("/vitality/cleanup/prepare", post(prepare_cleanup))
            .route("/vitality/cleanup/confirm", post(confirm_cleanup))
            .route("/snapshots", get(list_snapshots))
            .route("/snapshots/diff", post(diff_snapshot))
            .route("/snapshots/rollback", post(rollback_snapshot))
            .route("/snapshots/approve", post(approve_snapshot))
            .route("/snapshots/clear", post(clear_snapshots))
            .layer(layers)
            .with_state(self.state.clone())
    }

    /// Binds the TCP listener to the configured host and port.
    ///
    /// Returns the actual bound port, which may differ from the configured
    /// port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!("control plane listening on {}:{}", self.config.host, port);

        self.listener = Some(listener);
        Ok(port)
    }

    /// Starts serving connections until the shutdown signal fires.
    ///
    /// Consumes `self` because the listener is moved into the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a fatal I/O error.
    ///
    /// # Panics
    ///
    /// Panics if `start()` was not called before `serve()`.
    pub async fn serve(mut self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let router = self.build_router();
        let listener = self.listener.take().expect("start() must be called before serve()");
        let shutdown_ctrl = Arc::clone(&self.shutdown);

        shutdown_ctrl.set_ready();

        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown)
            .await?;

        drain(shutdown_ctrl).await;
        Ok(())
    }
}

/// Transitions to `Draining`, then waits for in-flight requests to finish
/// (up to 30 seconds) before the process exits.
async fn drain(shutdown_ctrl: Arc<ShutdownController>) {
    shutdown_ctrl.trigger_shutdown();
    let drained = shutdown_ctrl.wait_for_drain(Duration::from_secs(30)).await;
    if drained {
        info!("control plane drained all in-flight requests");
    } else {
        warn!("drain timeout expired with in-flight requests remaining");
    }
}
