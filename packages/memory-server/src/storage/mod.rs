//! Durable storage: the embedded record store plus its full-text and vector
//! side-indices.
//!
//! [`engine::StoreEngine`] owns the on-disk redb tables for every entity in
//! the data model. [`text_index::TextIndex`] and [`vector_index::VectorIndex`]
//! are the Index Worker's two side-indices, rebuilt from the engine's
//! authoritative records rather than participating in the write transaction
//! directly -- the Store is the single source of truth.

pub mod engine;
pub mod text_index;
pub mod vector_index;

pub use engine::{StoreEngine, StoreError};
pub use text_index::TextIndex;
pub use vector_index::VectorIndex;
