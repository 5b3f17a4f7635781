//! Memory Palace engine: the embedded store, write lane, retrieval pipeline,
//! vitality governance loop, and HTTP control plane around them.
//!
//! [`config::AppConfig`] aggregates every subsystem's configuration, read
//! once at process start by the `memory-paladmin` binary, which owns the
//! composition root -- wiring the store, resolver, domain services, and
//! network module together.

pub mod auth;
pub mod config;
pub mod external;
pub mod governance;
pub mod guard;
pub mod index_worker;
pub mod lane;
pub mod network;
pub mod resolver;
pub mod retrieval;
pub mod service;
pub mod snapshot;
pub mod storage;

pub use config::AppConfig;
pub use governance::{GovernanceError, GovernanceLoop};
pub use guard::{GuardAction, GuardMethod, WriteGuard};
pub use index_worker::IndexWorker;
pub use lane::WriteLane;
pub use network::{AppState, NetworkConfig, NetworkModule};
pub use resolver::Resolver;
pub use retrieval::RetrievalPipeline;
pub use snapshot::SnapshotLedger;
pub use storage::{StoreEngine, StoreError, TextIndex, VectorIndex};
