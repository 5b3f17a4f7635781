//! `domain://path` addressing.
//!
//! An [`Address`] is the stable identifier clients use to refer to a memory
//! or alias. Syntactic validation (charset, non-empty segments) lives here;
//! semantic validation against the configured domain allowlist is the
//! Resolver's job, since only it knows the runtime configuration.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

static TOKEN_RE_CELL: OnceLock<Regex> = OnceLock::new();

fn token_re() -> &'static Regex {
    TOKEN_RE_CELL.get_or_init(|| Regex::new(r"^[a-z0-9_-]+$").expect("static regex is valid"))
}

/// The reserved domain for pseudo-addresses (`system://boot`, etc.).
pub const SYSTEM_DOMAIN: &str = "system";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must be of the form domain://path")]
    Malformed,
    #[error("invalid_domain")]
    InvalidDomain,
    #[error("invalid_path")]
    InvalidPath,
}

/// A parsed `domain://path` address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub domain: String,
    pub path: String,
}

impl Address {
    /// Parses `raw` into an [`Address`], checking syntax only (charset,
    /// non-empty segments). Does not check the domain against an allowlist.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let (domain, path) = raw.split_once("://").ok_or(AddressError::Malformed)?;

        if domain.is_empty() || !token_re().is_match(domain) {
            return Err(AddressError::InvalidDomain);
        }

        if path.is_empty() {
            return Err(AddressError::InvalidPath);
        }
        for segment in path.split('/') {
            if segment.is_empty() || !token_re().is_match(segment) {
                return Err(AddressError::InvalidPath);
            }
        }

        Ok(Self {
            domain: domain.to_string(),
            path: path.to_string(),
        })
    }

    /// Path split into its slash-separated tokens.
    #[must_use]
    pub fn segments(&self) -> Vec<&str> {
        self.path.split('/').collect()
    }

    /// The final path segment, used as the default title when creating a
    /// memory without an explicit one.
    #[must_use]
    pub fn leaf(&self) -> &str {
        self.segments().last().copied().unwrap_or("")
    }

    /// The address of the parent: all but the last path segment. `None` if
    /// this address is already at the domain root.
    #[must_use]
    pub fn parent(&self) -> Option<Address> {
        let segments = self.segments();
        if segments.len() <= 1 {
            return None;
        }
        let parent_path = segments[..segments.len() - 1].join("/");
        Some(Address {
            domain: self.domain.clone(),
            path: parent_path,
        })
    }

    #[must_use]
    pub fn is_system(&self) -> bool {
        self.domain == SYSTEM_DOMAIN
    }

    #[must_use]
    pub fn child(&self, leaf: &str) -> Address {
        Address {
            domain: self.domain.clone(),
            path: format!("{}/{}", self.path, leaf),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.domain, self.path)
    }
}

/// Checks whether `title` is a valid explicit title: `[a-z0-9_-]+`.
#[must_use]
pub fn is_valid_title(title: &str) -> bool {
    !title.is_empty() && token_re().is_match(title)
}

/// The three well-known `system://` pseudo-addresses the Resolver expands
/// without consulting the Store's path table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemAddress {
    /// `system://boot` -- core-memory bundle plus most-recently-accessed.
    Boot,
    /// `system://index` -- compact index summary.
    Index,
    /// `system://recent[/N]` -- last N modified memories (default 10, max 100).
    Recent(usize),
}

impl SystemAddress {
    pub const DEFAULT_RECENT: usize = 10;
    pub const MAX_RECENT: usize = 100;

    /// Recognizes a `system://...` address as one of the pseudo-addresses.
    /// Returns `Ok(None)` for a non-system address, not an error.
    pub fn parse(addr: &Address) -> Result<Option<Self>, AddressError> {
        if !addr.is_system() {
            return Ok(None);
        }
        let segments = addr.segments();
        match segments.as_slice() {
            ["boot"] => Ok(Some(Self::Boot)),
            ["index"] => Ok(Some(Self::Index)),
            ["recent"] => Ok(Some(Self::Recent(Self::DEFAULT_RECENT))),
            ["recent", n] => {
                let n: usize = n.parse().map_err(|_| AddressError::InvalidPath)?;
                if n == 0 || n > Self::MAX_RECENT {
                    return Err(AddressError::InvalidPath);
                }
                Ok(Some(Self::Recent(n)))
            }
            _ => Err(AddressError::InvalidPath),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_address() {
        let addr = Address::parse("core://agent/style").unwrap();
        assert_eq!(addr.domain, "core");
        assert_eq!(addr.path, "agent/style");
        assert_eq!(addr.segments(), vec!["agent", "style"]);
    }

    #[test]
    fn rejects_malformed_address() {
        assert_eq!(Address::parse("no-scheme-here"), Err(AddressError::Malformed));
    }

    #[test]
    fn rejects_uppercase_domain() {
        assert_eq!(
            Address::parse("Core://agent/style"),
            Err(AddressError::InvalidDomain)
        );
    }

    #[test]
    fn rejects_empty_path_segment() {
        assert_eq!(
            Address::parse("core://agent//style"),
            Err(AddressError::InvalidPath)
        );
    }

    #[test]
    fn rejects_path_with_disallowed_chars() {
        assert_eq!(
            Address::parse("core://agent/Style!"),
            Err(AddressError::InvalidPath)
        );
    }

    #[test]
    fn parent_of_root_segment_is_none() {
        let addr = Address::parse("core://style").unwrap();
        assert_eq!(addr.parent(), None);
    }

    #[test]
    fn parent_strips_leaf_segment() {
        let addr = Address::parse("core://agent/style").unwrap();
        assert_eq!(addr.parent().unwrap().path, "agent");
    }

    #[test]
    fn system_boot_parses() {
        let addr = Address::parse("system://boot").unwrap();
        assert_eq!(SystemAddress::parse(&addr).unwrap(), Some(SystemAddress::Boot));
    }

    #[test]
    fn system_recent_default() {
        let addr = Address::parse("system://recent").unwrap();
        assert_eq!(
            SystemAddress::parse(&addr).unwrap(),
            Some(SystemAddress::Recent(10))
        );
    }

    #[test]
    fn system_recent_with_n() {
        let addr = Address::parse("system://recent/42").unwrap();
        assert_eq!(
            SystemAddress::parse(&addr).unwrap(),
            Some(SystemAddress::Recent(42))
        );
    }

    #[test]
    fn system_recent_over_max_rejected() {
        let addr = Address::parse("system://recent/101").unwrap();
        assert!(SystemAddress::parse(&addr).is_err());
    }

    #[test]
    fn non_system_domain_returns_none() {
        let addr = Address::parse("core://agent/style").unwrap();
        assert_eq!(SystemAddress::parse(&addr).unwrap(), None);
    }

    #[test]
    fn title_validation() {
        assert!(is_valid_title("agent-style_2"));
        assert!(!is_valid_title(""));
        assert!(!is_valid_title("Agent"));
        assert!(!is_valid_title("has space"));
    }
}
