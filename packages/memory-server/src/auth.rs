//! HTTP control-plane authentication: `X-MCP-API-Key` / `Authorization: Bearer`
//! against the configured key, with an explicit loopback bypass.

use std::net::IpAddr;

use memory_palace_core::AuthConfig;
use subtle::ConstantTimeEq;

/// Why a request was rejected. Surfaced verbatim as the HTTP error body's
/// `reason` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDenyReason {
    InvalidOrMissingApiKey,
    ApiKeyNotConfigured,
    InsecureLocalOverrideRequiresLoopback,
}

impl AuthDenyReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidOrMissingApiKey => "invalid_or_missing_api_key",
            Self::ApiKeyNotConfigured => "api_key_not_configured",
            Self::InsecureLocalOverrideRequiresLoopback => "insecure_local_override_requires_loopback",
        }
    }
}

/// Checks a presented key (from either header) against `config`, with the
/// loopback bypass considered only when no key was configured at all.
pub fn authorize(config: &AuthConfig, presented: Option<&str>, peer_ip: Option<IpAddr>) -> Result<(), AuthDenyReason> {
    match &config.api_key {
        Some(expected) => match presented {
            Some(key) if constant_time_eq(key, expected) => Ok(()),
            _ => Err(AuthDenyReason::InvalidOrMissingApiKey),
        },
        None => {
            if !config.allow_insecure_local {
                return Err(AuthDenyReason::ApiKeyNotConfigured);
            }
            match peer_ip {
                Some(ip) if is_loopback(ip) => Ok(()),
                _ => Err(AuthDenyReason::InsecureLocalOverrideRequiresLoopback),
            }
        }
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn is_loopback(ip: IpAddr) -> bool {
    ip.is_loopback()
}

/// Extracts the presented key from either supported header, preferring
/// `X-MCP-API-Key` when both are present.
#[must_use]
pub fn extract_presented_key<'a>(x_mcp_api_key: Option<&'a str>, authorization: Option<&'a str>) -> Option<&'a str> {
    if let Some(key) = x_mcp_api_key {
        return Some(key);
    }
    authorization?.strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(api_key: Option<&str>, allow_insecure_local: bool) -> AuthConfig {
        AuthConfig { api_key: api_key.map(String::from), allow_insecure_local }
    }

    #[test]
    fn matching_key_is_authorized() {
        let cfg = cfg(Some("secret"), false);
        assert!(authorize(&cfg, Some("secret"), None).is_ok());
    }

    #[test]
    fn wrong_key_is_denied() {
        let cfg = cfg(Some("secret"), false);
        assert_eq!(authorize(&cfg, Some("nope"), None).unwrap_err(), AuthDenyReason::InvalidOrMissingApiKey);
    }

    #[test]
    fn missing_key_with_no_config_and_no_bypass_is_denied() {
        let cfg = cfg(None, false);
        assert_eq!(authorize(&cfg, None, None).unwrap_err(), AuthDenyReason::ApiKeyNotConfigured);
    }

    #[test]
    fn bypass_allows_loopback_when_unconfigured() {
        let cfg = cfg(None, true);
        let loopback: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(authorize(&cfg, None, Some(loopback)).is_ok());
    }

    #[test]
    fn bypass_rejects_non_loopback() {
        let cfg = cfg(None, true);
        let remote: IpAddr = "203.0.113.5".parse().unwrap();
        assert_eq!(
            authorize(&cfg, None, Some(remote)).unwrap_err(),
            AuthDenyReason::InsecureLocalOverrideRequiresLoopback
        );
    }

    #[test]
    fn extract_prefers_mcp_header_over_bearer() {
        assert_eq!(extract_presented_key(Some("a"), Some("Bearer b")), Some("a"));
        assert_eq!(extract_presented_key(None, Some("Bearer b")), Some("b"));
        assert_eq!(extract_presented_key(None, Some("Basic xyz")), None);
        assert_eq!(extract_presented_key(None, None), None);
    }
}
