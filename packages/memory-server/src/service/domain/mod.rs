//! Domain services: the concrete `tower::Service<Operation>` implementations
//! that the [`crate::service::router::OperationRouter`] dispatches to. Each
//! one composes the already-built engine pieces (Resolver, Write Guard,
//! Write Lane, Snapshot Ledger, Index Worker, Retrieval Pipeline, Governance
//! Loop) to carry out its slice of the nine MCP tool operations.

pub mod index_service;
pub mod memory_service;
pub mod retrieval_service;

pub use index_service::IndexService;
pub use memory_service::MemoryService;
pub use retrieval_service::RetrievalService;

use crate::service::operation::OperationError;

/// Wraps any `std::error::Error` as an [`OperationError::Internal`], the
/// catch-all for domain errors that don't have their own pipeline-level
/// variant (store, snapshot, and tantivy errors).
pub(crate) fn internal<E>(err: E) -> OperationError
where
    E: std::error::Error + Send + Sync + 'static,
{
    OperationError::Internal(err.into())
}
