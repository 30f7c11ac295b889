//! Remote package indexes.
//!
//! The resolver never performs I/O itself. A [`PackageIndex`] is the seam a
//! network-backed index (compact index, full index, a mirror) plugs into;
//! [`StaticIndex`] is the in-memory implementation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};

use jewel_core::dependency::Dependency;
use jewel_core::platform::Platform;
use jewel_core::version::Version;

use crate::error::SourceError;

/// One listed build of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub version: Version,
    pub platform: Platform,
    /// `None` when the listing does not carry dependency metadata and it must
    /// be fetched separately.
    pub dependencies: Option<Vec<Dependency>>,
}

impl IndexEntry {
    pub fn new(version: Version, platform: Platform, dependencies: Vec<Dependency>) -> Self {
        Self {
            version,
            platform,
            dependencies: Some(dependencies),
        }
    }
}

pub trait PackageIndex: Send + Sync + Debug {
    /// Identity of the index, e.g. its URL.
    fn url(&self) -> &str;

    /// Every build of `name` the index knows about.
    ///
    /// An unknown package is an empty listing, not an error.
    fn list_versions(&self, name: &str) -> Result<Vec<IndexEntry>, SourceError>;

    /// Dependency metadata of one build.
    fn fetch_dependencies(
        &self,
        name: &str,
        version: &Version,
        platform: &Platform,
    ) -> Result<Vec<Dependency>, SourceError> {
        self.list_versions(name)?
            .into_iter()
            .find(|e| &e.version == version && &e.platform == platform)
            .and_then(|e| e.dependencies)
            .ok_or_else(|| SourceError::MissingSpec {
                name: name.to_string(),
                version: version.to_string(),
                source_id: self.url().to_string(),
            })
    }
}

/// An index held entirely in memory.
///
/// Lazy mode withholds dependency metadata from listings so that it is only
/// served through [`PackageIndex::fetch_dependencies`]. Failures can be
/// injected per package or per build.
#[derive(Debug, Default)]
pub struct StaticIndex {
    url: String,
    packages: BTreeMap<String, Vec<IndexEntry>>,
    lazy: bool,
    failing_listings: BTreeSet<String>,
    failing_specs: BTreeSet<(String, Version)>,
    listing_calls: AtomicUsize,
    spec_calls: AtomicUsize,
}

impl StaticIndex {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn add(&mut self, name: &str, entry: IndexEntry) -> &mut Self {
        self.packages.entry(name.to_string()).or_default().push(entry);
        self
    }

    /// Make every listing of `name` fail.
    pub fn fail_listing(&mut self, name: &str) -> &mut Self {
        self.failing_listings.insert(name.to_string());
        self
    }

    /// Make dependency fetches for one version of `name` fail.
    pub fn fail_spec(&mut self, name: &str, version: Version) -> &mut Self {
        self.failing_specs.insert((name.to_string(), version));
        self
    }

    /// How many times `list_versions` has been called.
    pub fn listing_calls(&self) -> usize {
        self.listing_calls.load(Ordering::Relaxed)
    }

    /// How many times `fetch_dependencies` has been called.
    pub fn spec_calls(&self) -> usize {
        self.spec_calls.load(Ordering::Relaxed)
    }
}

impl PackageIndex for StaticIndex {
    fn url(&self) -> &str {
        &self.url
    }

    fn list_versions(&self, name: &str) -> Result<Vec<IndexEntry>, SourceError> {
        self.listing_calls.fetch_add(1, Ordering::Relaxed);
        if self.failing_listings.contains(name) {
            return Err(SourceError::Fetch {
                name: name.to_string(),
                message: format!("{} is unreachable", self.url),
            });
        }
        let entries = self.packages.get(name).cloned().unwrap_or_default();
        if !self.lazy {
            return Ok(entries);
        }
        Ok(entries
            .into_iter()
            .map(|e| IndexEntry {
                dependencies: None,
                ..e
            })
            .collect())
    }

    fn fetch_dependencies(
        &self,
        name: &str,
        version: &Version,
        platform: &Platform,
    ) -> Result<Vec<Dependency>, SourceError> {
        self.spec_calls.fetch_add(1, Ordering::Relaxed);
        if self
            .failing_specs
            .contains(&(name.to_string(), version.clone()))
        {
            return Err(SourceError::Fetch {
                name: name.to_string(),
                message: format!("metadata for {version} could not be downloaded"),
            });
        }
        self.packages
            .get(name)
            .and_then(|entries| {
                entries
                    .iter()
                    .find(|e| &e.version == version && &e.platform == platform)
            })
            .and_then(|e| e.dependencies.clone())
            .ok_or_else(|| SourceError::MissingSpec {
                name: name.to_string(),
                version: version.to_string(),
                source_id: self.url.clone(),
            })
    }
}
