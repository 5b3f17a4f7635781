//! The operation pipeline: typed operations, the Tower middleware stack
//! that wraps every call, the domain services that carry them out, and the
//! router that dispatches between them.

pub mod config;
pub mod domain;
pub mod middleware;
pub mod operation;
pub mod router;

pub use config::ServiceConfig;
pub use operation::{CallerOrigin, Operation, OperationContext, OperationError, OperationResponse, UpdatePatch};
pub use router::OperationRouter;
