//! `memory-paladmin`: the composition root. Wires the store, side-indices,
//! domain services, and HTTP control plane together, then runs until a
//! shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use memory_palace_core::TaskType;
use memory_palace_server::external::llm::LlmClassifier;
use memory_palace_server::external::{EmbeddingAdapter, LlmAdapter, RerankAdapter};
use memory_palace_server::governance::GovernanceLoop;
use memory_palace_server::index_worker::IndexTaskExecutor;
use memory_palace_server::network::handlers::box_pipeline;
use memory_palace_server::resolver::Resolver;
use memory_palace_server::retrieval::RetrievalPipeline;
use memory_palace_server::service::domain::{IndexService, MemoryService, RetrievalService};
use memory_palace_server::service::middleware::build_operation_pipeline;
use memory_palace_server::service::operation::service_names;
use memory_palace_server::service::OperationRouter;
use memory_palace_server::storage::{StoreEngine, TextIndex, VectorIndex};
use memory_palace_server::{AppConfig, AppState, IndexWorker, NetworkModule, SnapshotLedger, WriteGuard, WriteLane};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Memory Palace engine: durable long-term memory for a single agent,
/// exposed over HTTP.
#[derive(Parser, Debug)]
#[command(name = "memory-paladmin", version)]
struct Cli {
    /// Bind address for the HTTP control plane, e.g. 127.0.0.1:8077.
    #[arg(long, env = "MEMORY_PALACE_BIND")]
    bind: Option<String>,

    /// Path to the redb store file.
    #[arg(long, env = "MEMORY_PALACE_STORE_PATH")]
    store_path: Option<String>,

    /// Directory for the tantivy full-text index. Defaults to a sibling of
    /// the store file.
    #[arg(long, env = "MEMORY_PALACE_TEXT_INDEX_PATH")]
    text_index_path: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("MEMORY_PALACE_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?
        .block_on(run())
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::from_env();
    if let Some(store_path) = cli.store_path {
        config.store_path = store_path;
    }
    if let Some(bind) = &cli.bind {
        let (host, port) = bind.rsplit_once(':').context("--bind must be host:port")?;
        config.network.host = host.to_string();
        config.network.port = port.parse().context("--bind port must be a number")?;
    }

    info!(store_path = %config.store_path, "starting memory-paladmin");

    let store = StoreEngine::open(&config.store_path).context("opening store")?;
    let db = store.db_handle();

    let text_index_path = cli.text_index_path.unwrap_or_else(|| format!("{}.textindex", config.store_path));
    let text_index = Arc::new(TextIndex::open_or_create(&text_index_path).context("opening text index")?);
    let vector_index = Arc::new(VectorIndex::new(config.embedding.dim));
    let embedding = Arc::new(EmbeddingAdapter::new(config.embedding.clone()));
    let rerank = Arc::new(RerankAdapter::new(config.rerank.clone()));
    let llm = Arc::new(LlmAdapter::new(config.write_guard_llm.clone()));

    let lane = Arc::new(WriteLane::new(config.write_lane.global_concurrency, config.write_lane.lane_wait_timeout));
    let snapshot = SnapshotLedger::open(db).context("opening snapshot ledger")?;
    let resolver = Resolver::new(config.resolver.clone(), store.clone());
    let llm_classifier: Arc<dyn LlmClassifier> = llm.clone();
    let guard = WriteGuard::new(config.write_guard_llm.clone(), Some(llm_classifier));

    let index_worker = Arc::new(IndexWorker::new(config.index_worker.clone()));
    let governance = Arc::new(GovernanceLoop::new(config.governance.clone(), store.clone(), Arc::clone(&lane)));

    let retrieval_pipeline = Arc::new(RetrievalPipeline::new(
        config.retrieval.clone(),
        store.clone(),
        Arc::clone(&text_index),
        Arc::clone(&vector_index),
        Arc::clone(&embedding),
        Arc::clone(&rerank),
        config.governance.clone(),
    ));

    let memory_service = MemoryService::new(
        resolver,
        store.clone(),
        guard,
        Arc::clone(&lane),
        snapshot,
        Arc::clone(&index_worker),
        Arc::clone(&vector_index),
        Arc::clone(&embedding),
        llm,
        config.governance.clone(),
    );
    let retrieval_service = RetrievalService::new(Arc::clone(&retrieval_pipeline));
    let index_service = IndexService::new(
        Arc::clone(&index_worker),
        store.clone(),
        Arc::clone(&text_index),
        Arc::clone(&vector_index),
        Arc::clone(&embedding),
        Arc::clone(&governance),
    );

    let mut router = OperationRouter::new();
    router.register(service_names::MEMORY, memory_service);
    router.register(service_names::RETRIEVAL, retrieval_service);
    router.register(service_names::INDEX, index_service.clone());
    let pipeline = build_operation_pipeline(router, &config.service);

    let app_state = AppState::new(
        box_pipeline(pipeline),
        Arc::clone(&governance),
        Arc::clone(&index_worker),
        config.auth.clone(),
        Uuid::new_v4().to_string(),
        config.service.default_operation_timeout_ms,
    );

    let mut network = NetworkModule::new(config.network.clone(), app_state);
    network.start().await.context("binding HTTP control plane")?;
    let shutdown_ctrl = network.shutdown_controller();

    let _ = index_worker.enqueue(TaskType::RebuildIndex, None, "startup");

    let executor: Arc<dyn IndexTaskExecutor> = Arc::new(index_service);
    let index_shutdown = shutdown_ctrl.shutdown_receiver();
    let worker_handle = {
        let index_worker = Arc::clone(&index_worker);
        tokio::spawn(async move { index_worker.run(executor, index_shutdown).await })
    };

    let decay_shutdown = shutdown_ctrl.shutdown_receiver();
    let decay_handle = tokio::spawn(decay_loop(governance, config.service.governance_sweep_interval_ms, decay_shutdown));

    let shutdown_signal = {
        let shutdown_ctrl = Arc::clone(&shutdown_ctrl);
        async move {
            wait_for_termination().await;
            shutdown_ctrl.trigger_shutdown();
        }
    };

    network.serve(shutdown_signal).await.context("serving HTTP control plane")?;

    worker_handle.abort();
    decay_handle.abort();
    Ok(())
}

/// Runs `decay_tick` on a fixed interval until shutdown fires.
async fn decay_loop(governance: Arc<GovernanceLoop>, interval_ms: u64, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1_000)));
    loop {
        tokio::select! {
            _ = ticker.tick() => governance.decay_tick(),
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!("failed to install SIGTERM handler: {e}");
            std::future::pending::<()>().await;
            unreachable!()
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    info!("shutdown signal received");
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
