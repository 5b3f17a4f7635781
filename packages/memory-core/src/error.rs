//! Error kinds shared by every subsystem in the engine crate.
//!
//! Semantic, not language-bound: stable string tags that cross the HTTP and
//! tool-call boundary unchanged. One `thiserror` enum per concern rather
//! than a single catch-all.

use thiserror::Error;

use crate::address::AddressError;

/// Concurrency and queue-admission failures common to every write path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConcurrencyError {
    #[error("lane_timeout")]
    LaneTimeout,
    #[error("stale_state")]
    StaleState,
    #[error("queue_full")]
    QueueFull,
}

/// Resolver-facing errors: either malformed addressing or a resolved
/// address that doesn't name a live record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolverError {
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error("address_not_found")]
    NotFound,
    #[error("address_ambiguous_patch")]
    AmbiguousPatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolver_error_wraps_address_error() {
        let err: ResolverError = AddressError::Malformed.into();
        assert_eq!(err, ResolverError::Address(AddressError::Malformed));
    }

    #[test]
    fn error_tags_match_spec_vocabulary() {
        assert_eq!(ConcurrencyError::LaneTimeout.to_string(), "lane_timeout");
        assert_eq!(ConcurrencyError::StaleState.to_string(), "stale_state");
        assert_eq!(ConcurrencyError::QueueFull.to_string(), "queue_full");
        assert_eq!(ResolverError::NotFound.to_string(), "address_not_found");
        assert_eq!(ResolverError::AmbiguousPatch.to_string(), "address_ambiguous_patch");
    }
}
