//! Session cache for index listings and dependency metadata.
//!
//! Append-only: an entry, once stored, is never replaced, so concurrent
//! prefetch tasks and the resolver thread can share one cache. Failures are
//! not cached.

use std::collections::HashMap;
use std::sync::Arc;

use jewel_core::dependency::Dependency;
use jewel_core::platform::Platform;
use jewel_core::version::Version;
use parking_lot::RwLock;

use crate::error::SourceError;
use crate::index::IndexEntry;

pub type SpecKey = (String, Version, Platform);

#[derive(Debug, Default)]
pub struct SpecCache {
    versions: RwLock<HashMap<String, Arc<[IndexEntry]>>>,
    dependencies: RwLock<HashMap<SpecKey, Arc<[Dependency]>>>,
}

impl SpecCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn versions(&self, name: &str) -> Option<Arc<[IndexEntry]>> {
        self.versions.read().get(name).cloned()
    }

    /// Store a listing unless one is already present; returns the stored one.
    ///
    /// Entries that carry their dependencies also seed the dependency cache.
    pub fn insert_versions(&self, name: &str, entries: Vec<IndexEntry>) -> Arc<[IndexEntry]> {
        for entry in &entries {
            if let Some(deps) = &entry.dependencies {
                self.insert_dependencies(
                    (name.to_string(), entry.version.clone(), entry.platform.clone()),
                    deps.clone(),
                );
            }
        }
        self.versions
            .write()
            .entry(name.to_string())
            .or_insert_with(|| entries.into())
            .clone()
    }

    pub fn dependencies(
        &self,
        name: &str,
        version: &Version,
        platform: &Platform,
    ) -> Option<Arc<[Dependency]>> {
        self.dependencies
            .read()
            .get(&(name.to_string(), version.clone(), platform.clone()))
            .cloned()
    }

    pub fn insert_dependencies(&self, key: SpecKey, deps: Vec<Dependency>) -> Arc<[Dependency]> {
        self.dependencies
            .write()
            .entry(key)
            .or_insert_with(|| deps.into())
            .clone()
    }

    /// Cached listing for `name`, running `fetch` on a miss.
    pub fn versions_or_fetch<F>(
        &self,
        name: &str,
        fetch: F,
    ) -> Result<Arc<[IndexEntry]>, SourceError>
    where
        F: FnOnce() -> Result<Vec<IndexEntry>, SourceError>,
    {
        if let Some(entries) = self.versions(name) {
            return Ok(entries);
        }
        let entries = fetch()?;
        Ok(self.insert_versions(name, entries))
    }

    /// Cached dependencies of one build, running `fetch` on a miss.
    pub fn dependencies_or_fetch<F>(
        &self,
        name: &str,
        version: &Version,
        platform: &Platform,
        fetch: F,
    ) -> Result<Arc<[Dependency]>, SourceError>
    where
        F: FnOnce() -> Result<Vec<Dependency>, SourceError>,
    {
        if let Some(deps) = self.dependencies(name, version, platform) {
            return Ok(deps);
        }
        let deps = fetch()?;
        let key = (name.to_string(), version.clone(), platform.clone());
        Ok(self.insert_dependencies(key, deps))
    }

    pub fn contains_versions(&self, name: &str) -> bool {
        self.versions.read().contains_key(name)
    }

    /// Number of cached listings.
    pub fn len(&self) -> usize {
        self.versions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(version: &str, deps: Option<Vec<Dependency>>) -> IndexEntry {
        IndexEntry {
            version: Version::parse(version).unwrap(),
            platform: Platform::Ruby,
            dependencies: deps,
        }
    }

    #[test]
    fn first_insert_wins() {
        let cache = SpecCache::new();
        cache.insert_versions("rack", vec![entry("1.0", None)]);
        let stored = cache.insert_versions("rack", vec![entry("2.0", None)]);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].version.to_string(), "1.0");
    }

    #[test]
    fn fetch_runs_once() {
        let cache = SpecCache::new();
        let mut calls = 0;
        for _ in 0..3 {
            cache
                .versions_or_fetch("rack", || {
                    calls += 1;
                    Ok(vec![entry("1.0", None)])
                })
                .unwrap();
        }
        assert_eq!(calls, 1);
        assert!(cache.contains_versions("rack"));
    }

    #[test]
    fn failures_are_not_cached() {
        let cache = SpecCache::new();
        let err = cache.versions_or_fetch("rack", || {
            Err(SourceError::Fetch {
                name: "rack".into(),
                message: "timeout".into(),
            })
        });
        assert!(err.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn listings_seed_dependencies() {
        let cache = SpecCache::new();
        let dep = Dependency::new("rack", &[">= 2"]).unwrap();
        cache.insert_versions("rails", vec![entry("7.1", Some(vec![dep.clone()]))]);
        let deps = cache
            .dependencies("rails", &Version::parse("7.1").unwrap(), &Platform::Ruby)
            .unwrap();
        assert_eq!(&*deps, &[dep]);
    }
}
