//! Resolver: translates `domain://path` addresses, including the `system://`
//! pseudo-address family, into store records. Pure over the store snapshot
//! at call time -- it never mutates.

use memory_palace_core::{Address, Memory, MemoryId, ResolverConfig, ResolverError, SystemAddress};

use crate::storage::engine::PathEntry;
use crate::storage::StoreEngine;

/// A resolved memory plus the breadcrumb of paths leading to it.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub memory: Memory,
    pub breadcrumbs: Vec<PathEntry>,
}

/// A `system://` pseudo-address response: these don't resolve to a single
/// memory, so they're reported distinctly from [`Resolved`].
#[derive(Debug, Clone)]
pub enum SystemResolution {
    /// `system://boot`: the configured core-memory bundle plus the N most
    /// recently accessed memories.
    Boot { core: Vec<Memory>, recent: Vec<Memory> },
    /// `system://index`: a compact index summary.
    Index { total_live: usize, total_deprecated: usize },
    /// `system://recent[/N]`: the last N modified memories.
    Recent(Vec<Memory>),
}

pub struct Resolver {
    config: ResolverConfig,
    store: StoreEngine,
}

impl Resolver {
    #[must_use]
    pub fn new(config: ResolverConfig, store: StoreEngine) -> Self {
        Self { config, store }
    }

    fn check_domain(&self, domain: &str) -> Result<(), ResolverError> {
        if domain == memory_palace_core::SYSTEM_DOMAIN || self.config.valid_domains.iter().any(|d| d == domain) {
            Ok(())
        } else {
            Err(memory_palace_core::AddressError::InvalidDomain.into())
        }
    }

    /// Parses and resolves `raw` against the configured domain allowlist.
    pub fn resolve(&self, raw: &str) -> Result<Resolved, ResolverError> {
        let addr = Address::parse(raw)?;
        self.check_domain(&addr.domain)?;
        let id = self
            .store
            .resolve_path(&addr.domain, &addr.path)
            .ok_or(ResolverError::NotFound)?;
        self.resolve_id(id)
    }

    fn resolve_id(&self, id: MemoryId) -> Result<Resolved, ResolverError> {
        let memory = self.store.get_memory(id).ok_or(ResolverError::NotFound)?;
        let breadcrumbs = self.store.paths_for_memory(id);
        Ok(Resolved { memory, breadcrumbs })
    }

    /// Resolves a `system://...` pseudo-address. Returns `Ok(None)` for a
    /// non-system address so callers fall through to [`Resolver::resolve`].
    pub fn resolve_system(&self, raw: &str) -> Result<Option<SystemResolution>, ResolverError> {
        let addr = Address::parse(raw)?;
        let Some(system) = SystemAddress::parse(&addr)? else {
            return Ok(None);
        };
        Ok(Some(match system {
            SystemAddress::Boot => {
                let core = self
                    .config
                    .core_memory_uris
                    .iter()
                    .filter_map(|uri| self.resolve(uri).ok())
                    .map(|r| r.memory)
                    .collect();
                let recent = self.recent(SystemAddress::DEFAULT_RECENT);
                SystemResolution::Boot { core, recent }
            }
            SystemAddress::Index => {
                let (live, deprecated) = self.count_live_and_deprecated();
                SystemResolution::Index {
                    total_live: live,
                    total_deprecated: deprecated,
                }
            }
            SystemAddress::Recent(n) => SystemResolution::Recent(self.recent(n)),
        }))
    }

    fn recent(&self, n: usize) -> Vec<Memory> {
        let mut memories: Vec<Memory> = self.store.list_all().into_iter().filter(Memory::is_live).collect();
        memories.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        memories.truncate(n);
        memories
    }

    fn count_live_and_deprecated(&self) -> (usize, usize) {
        let all = self.store.list_all();
        let live = all.iter().filter(|m| m.is_live()).count();
        (live, all.len() - live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_resolver() -> (tempfile::TempDir, Resolver) {
        let dir = tempdir().unwrap();
        let store = StoreEngine::open(dir.path().join("s.redb")).unwrap();
        let config = ResolverConfig {
            valid_domains: vec!["core".to_string(), "notes".to_string()],
            core_memory_uris: vec![],
        };
        (dir, Resolver::new(config, store))
    }

    #[test]
    fn resolves_known_domain() {
        let (_dir, resolver) = make_resolver();
        resolver.store.create("core", "agent/style", "content", 0, "").unwrap();
        let resolved = resolver.resolve("core://agent/style").unwrap();
        assert_eq!(resolved.memory.content, "content");
        assert_eq!(resolved.breadcrumbs.len(), 1);
    }

    #[test]
    fn rejects_domain_outside_allowlist() {
        let (_dir, resolver) = make_resolver();
        let err = resolver.resolve("unknown://x").unwrap_err();
        assert!(matches!(
            err,
            ResolverError::Address(memory_palace_core::AddressError::InvalidDomain)
        ));
    }

    #[test]
    fn system_recent_defaults_to_ten() {
        let (_dir, resolver) = make_resolver();
        for i in 0..15 {
            resolver.store.create("core", &format!("m{i}"), "x", 0, "").unwrap();
        }
        let Some(SystemResolution::Recent(recent)) = resolver.resolve_system("system://recent").unwrap() else {
            panic!("expected recent resolution");
        };
        assert_eq!(recent.len(), 10);
    }

    #[test]
    fn system_index_counts_live_and_deprecated() {
        let (_dir, resolver) = make_resolver();
        resolver.store.create("core", "a", "x", 0, "").unwrap();
        resolver.store.create("core", "b", "y", 0, "").unwrap();
        resolver.store.delete_path("core", "b").unwrap();
        let Some(SystemResolution::Index { total_live, total_deprecated }) =
            resolver.resolve_system("system://index").unwrap()
        else {
            panic!("expected index resolution");
        };
        assert_eq!(total_live, 1);
        assert_eq!(total_deprecated, 1);
    }

    #[test]
    fn non_system_address_returns_none() {
        let (_dir, resolver) = make_resolver();
        assert!(resolver.resolve_system("core://x").unwrap().is_none());
    }
}
