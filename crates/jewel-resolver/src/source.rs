//! Candidate sources and the precedence rules that combine them.
//!
//! Sources are consulted in a fixed order: runtime metadata, installed
//! packages, pinned (path/git) sources, then remote indexes. The first
//! source with any satisfying candidate answers the query. The lockfile is
//! layered on top as a preference: locked versions are tried first unless
//! the package is unlocked.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use jewel_core::config::ResolverConfig;
use jewel_core::constraint::VersionConstraint;
use jewel_core::dependency::{Dependency, SourceRef};
use jewel_core::lockfile::Lockfile;
use jewel_core::platform::{Platform, PlatformScorer};
use jewel_core::version::Version;
use jewel_util::errors::JewelError;
use tracing::{debug, warn};

use crate::cache::SpecCache;
use crate::candidate::{CandidateSummary, PackageCandidate, SourceId, SourceKind};
use crate::error::SourceError;
use crate::index::{IndexEntry, PackageIndex};

/// Policy shared by every query of one resolution.
#[derive(Debug, Clone, Copy)]
pub struct QueryContext<'a> {
    pub config: &'a ResolverConfig,
    pub scorer: &'a dyn PlatformScorer,
}

impl<'a> QueryContext<'a> {
    pub fn new(config: &'a ResolverConfig, scorer: &'a dyn PlatformScorer) -> Self {
        Self { config, scorer }
    }

    pub fn platforms(&self) -> &[Platform] {
        &self.config.platforms
    }

    /// Best score of `platform` over the targets it installs on; `None`
    /// when it installs on none of them.
    pub fn score(&self, platform: &Platform) -> Option<i64> {
        self.config
            .platforms
            .iter()
            .filter(|target| platform.matches(target))
            .map(|target| self.scorer.score(platform, target))
            .min()
    }

    /// Releases before prereleases, newest first, then best platform
    /// score, then platform text, then source precedence.
    pub fn order(&self, a: &CandidateSummary, b: &CandidateSummary) -> Ordering {
        a.version
            .is_prerelease()
            .cmp(&b.version.is_prerelease())
            .then_with(|| b.version.cmp(&a.version))
            .then_with(|| self.score(&a.platform).cmp(&self.score(&b.platform)))
            .then_with(|| a.platform.cmp(&b.platform))
            .then_with(|| a.source.cmp(&b.source))
    }

    pub fn sort(&self, candidates: &mut [CandidateSummary]) {
        candidates.sort_by(|a, b| self.order(a, b));
    }

    fn admits(&self, constraint: &VersionConstraint, version: &Version, platform: &Platform) -> bool {
        constraint.allows(version, self.config.allow_prerelease) && self.score(platform).is_some()
    }
}

/// Virtual packages describing the environment (`ruby`, `rubygems`).
#[derive(Debug, Clone, Default)]
pub struct MetadataSource {
    packages: BTreeMap<String, Version>,
}

impl MetadataSource {
    pub fn from_runtime(runtime: &BTreeMap<String, Version>) -> Self {
        Self {
            packages: runtime.clone(),
        }
    }

    pub fn provides(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    fn candidates_for(&self, name: &str, constraint: &VersionConstraint) -> Vec<CandidateSummary> {
        self.packages
            .get(name)
            .filter(|version| constraint.satisfied_by(version))
            .map(|version| {
                CandidateSummary::new(name, version.clone(), Platform::Ruby, SourceId::metadata())
            })
            .into_iter()
            .collect()
    }
}

/// A build known with its full metadata.
#[derive(Debug, Clone)]
pub struct LocalSpec {
    pub version: Version,
    pub platform: Platform,
    pub dependencies: Vec<Dependency>,
}

impl LocalSpec {
    pub fn new(version: Version, dependencies: Vec<Dependency>) -> Self {
        Self {
            version,
            platform: Platform::Ruby,
            dependencies,
        }
    }

    pub fn on(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }
}

/// Builds held in memory: installed packages, a path or git checkout, or
/// the lockfile.
#[derive(Debug, Clone)]
pub struct LocalSource {
    id: SourceId,
    specs: BTreeMap<String, Vec<LocalSpec>>,
}

impl LocalSource {
    pub fn new(id: SourceId) -> Self {
        Self {
            id,
            specs: BTreeMap::new(),
        }
    }

    pub fn installed() -> Self {
        Self::new(SourceId::installed())
    }

    pub fn pinned(source: &SourceRef) -> Self {
        Self::new(SourceId::pinned(source))
    }

    /// The locked builds of a previous resolution.
    pub fn from_lockfile(lockfile: &Lockfile) -> Result<Self, JewelError> {
        let mut source = Self::new(SourceId::locked());
        for package in &lockfile.package {
            let spec = LocalSpec::new(package.version.clone(), package.parsed_dependencies()?)
                .on(package.platform.clone());
            source.add(&package.name, spec);
        }
        Ok(source)
    }

    pub fn add(&mut self, name: &str, spec: LocalSpec) -> &mut Self {
        self.specs.entry(name.to_string()).or_default().push(spec);
        self
    }

    pub fn id(&self) -> &SourceId {
        &self.id
    }

    pub fn provides(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    /// The first recorded version of `name`.
    pub fn version_of(&self, name: &str) -> Option<&Version> {
        self.specs.get(name)?.first().map(|s| &s.version)
    }

    fn candidates_for(
        &self,
        name: &str,
        constraint: &VersionConstraint,
        ctx: &QueryContext<'_>,
    ) -> Vec<CandidateSummary> {
        // A locked prerelease was admitted when it was locked.
        let prerelease_ok = ctx.config.allow_prerelease || self.id.kind == SourceKind::Locked;
        let mut found: Vec<CandidateSummary> = self
            .specs
            .get(name)
            .into_iter()
            .flatten()
            .filter(|s| constraint.allows(&s.version, prerelease_ok))
            .filter(|s| ctx.score(&s.platform).is_some())
            .map(|s| CandidateSummary::new(name, s.version.clone(), s.platform.clone(), self.id.clone()))
            .collect();
        ctx.sort(&mut found);
        found
    }

    fn materialize(&self, summary: &CandidateSummary) -> Result<PackageCandidate, SourceError> {
        self.specs
            .get(&summary.name)
            .into_iter()
            .flatten()
            .find(|s| s.version == summary.version && s.platform == summary.platform)
            .map(|s| PackageCandidate::new(summary.clone(), s.dependencies.clone()))
            .ok_or_else(|| SourceError::MissingSpec {
                name: summary.name.clone(),
                version: summary.version.to_string(),
                source_id: self.id.to_string(),
            })
    }
}

/// A remote index behind a session cache.
#[derive(Debug, Clone)]
pub struct RemoteSource {
    id: SourceId,
    index: Arc<dyn PackageIndex>,
    cache: Arc<SpecCache>,
}

impl RemoteSource {
    pub fn new(index: Arc<dyn PackageIndex>) -> Self {
        Self::with_cache(index, Arc::new(SpecCache::new()))
    }

    /// Share `cache` with other holders, e.g. a prefetcher or a later resolution.
    pub fn with_cache(index: Arc<dyn PackageIndex>, cache: Arc<SpecCache>) -> Self {
        Self {
            id: SourceId::remote(index.url()),
            index,
            cache,
        }
    }

    pub fn id(&self) -> &SourceId {
        &self.id
    }

    pub fn cache(&self) -> &Arc<SpecCache> {
        &self.cache
    }

    /// Every listed build of `name`, fetched at most once per session.
    pub fn versions(&self, name: &str) -> Result<Arc<[IndexEntry]>, SourceError> {
        self.cache
            .versions_or_fetch(name, || self.index.list_versions(name))
    }

    pub fn dependencies(
        &self,
        name: &str,
        version: &Version,
        platform: &Platform,
    ) -> Result<Arc<[Dependency]>, SourceError> {
        self.cache.dependencies_or_fetch(name, version, platform, || {
            self.index.fetch_dependencies(name, version, platform)
        })
    }

    fn candidates_for(
        &self,
        name: &str,
        constraint: &VersionConstraint,
        ctx: &QueryContext<'_>,
    ) -> Result<Vec<CandidateSummary>, SourceError> {
        let entries = self.versions(name)?;
        let mut found: Vec<CandidateSummary> = entries
            .iter()
            .filter(|e| ctx.admits(constraint, &e.version, &e.platform))
            .map(|e| CandidateSummary::new(name, e.version.clone(), e.platform.clone(), self.id.clone()))
            .collect();
        ctx.sort(&mut found);
        Ok(found)
    }

    fn materialize(&self, summary: &CandidateSummary) -> Result<PackageCandidate, SourceError> {
        let deps = self.dependencies(&summary.name, &summary.version, &summary.platform)?;
        Ok(PackageCandidate::new(summary.clone(), deps.to_vec()))
    }
}

/// Every kind of place candidates come from.
#[derive(Debug, Clone)]
pub enum CandidateSource {
    Metadata(MetadataSource),
    Installed(LocalSource),
    Pinned(LocalSource),
    Locked(LocalSource),
    Remote(RemoteSource),
}

impl CandidateSource {
    pub fn id(&self) -> SourceId {
        match self {
            CandidateSource::Metadata(_) => SourceId::metadata(),
            CandidateSource::Installed(s)
            | CandidateSource::Pinned(s)
            | CandidateSource::Locked(s) => s.id().clone(),
            CandidateSource::Remote(s) => s.id().clone(),
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            CandidateSource::Metadata(_) => SourceKind::Metadata,
            CandidateSource::Installed(_) => SourceKind::Installed,
            CandidateSource::Pinned(_) => SourceKind::Pinned,
            CandidateSource::Locked(_) => SourceKind::Locked,
            CandidateSource::Remote(_) => SourceKind::Remote,
        }
    }

    /// Summaries of `name` satisfying `constraint` and installable on at
    /// least one target platform, in preference order.
    pub fn candidates_for(
        &self,
        name: &str,
        constraint: &VersionConstraint,
        ctx: &QueryContext<'_>,
    ) -> Result<Vec<CandidateSummary>, SourceError> {
        match self {
            CandidateSource::Metadata(s) => Ok(s.candidates_for(name, constraint)),
            CandidateSource::Installed(s)
            | CandidateSource::Pinned(s)
            | CandidateSource::Locked(s) => Ok(s.candidates_for(name, constraint, ctx)),
            CandidateSource::Remote(s) => s.candidates_for(name, constraint, ctx),
        }
    }

    pub fn materialize(&self, summary: &CandidateSummary) -> Result<PackageCandidate, SourceError> {
        match self {
            CandidateSource::Metadata(_) => Ok(PackageCandidate::new(summary.clone(), Vec::new())),
            CandidateSource::Installed(s)
            | CandidateSource::Pinned(s)
            | CandidateSource::Locked(s) => s.materialize(summary),
            CandidateSource::Remote(s) => s.materialize(summary),
        }
    }
}

/// Why a search returned nothing even though candidates may exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refusal {
    /// Frozen mode and the package has no locked build.
    NotInLockfile,
    /// The dependency names a pinned source that is not registered.
    UnknownSource(String),
}

/// Outcome of one [`SourceSet::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub candidates: Vec<CandidateSummary>,
    /// Sources that failed while being consulted.
    pub errors: Vec<SourceError>,
    pub refusal: Option<Refusal>,
}

impl SearchResult {
    fn found(candidates: Vec<CandidateSummary>) -> Self {
        Self {
            candidates,
            ..Self::default()
        }
    }

    fn refused(refusal: Refusal) -> Self {
        Self {
            refusal: Some(refusal),
            ..Self::default()
        }
    }
}

/// The prioritised collection of sources a resolution draws from.
#[derive(Debug, Clone, Default)]
pub struct SourceSet {
    sources: Vec<CandidateSource>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set seeded with the runtime packages named in `config`.
    pub fn from_config(config: &ResolverConfig) -> Self {
        let mut set = Self::new();
        if !config.runtime.is_empty() {
            set.add(CandidateSource::Metadata(MetadataSource::from_runtime(
                &config.runtime,
            )));
        }
        set
    }

    /// Register a source. Sources stay ordered by kind; within a kind,
    /// earlier registrations win.
    pub fn add(&mut self, source: CandidateSource) -> &mut Self {
        let position = self
            .sources
            .iter()
            .position(|s| s.kind() > source.kind())
            .unwrap_or(self.sources.len());
        self.sources.insert(position, source);
        self
    }

    pub fn add_remote(&mut self, index: Arc<dyn PackageIndex>) -> &mut Self {
        self.add(CandidateSource::Remote(RemoteSource::new(index)))
    }

    /// Prefer the builds recorded in `lockfile`, replacing any earlier one.
    pub fn with_lockfile(&mut self, lockfile: &Lockfile) -> Result<&mut Self, JewelError> {
        let locked = LocalSource::from_lockfile(lockfile)?;
        self.sources.retain(|s| s.kind() != SourceKind::Locked);
        Ok(self.add(CandidateSource::Locked(locked)))
    }

    pub fn sources(&self) -> &[CandidateSource] {
        &self.sources
    }

    pub fn remotes(&self) -> impl Iterator<Item = &RemoteSource> {
        self.sources.iter().filter_map(|s| match s {
            CandidateSource::Remote(remote) => Some(remote),
            _ => None,
        })
    }

    pub fn locked(&self) -> Option<&LocalSource> {
        self.sources.iter().find_map(|s| match s {
            CandidateSource::Locked(locked) => Some(locked),
            _ => None,
        })
    }

    fn metadata(&self) -> Option<&MetadataSource> {
        self.sources.iter().find_map(|s| match s {
            CandidateSource::Metadata(metadata) => Some(metadata),
            _ => None,
        })
    }

    /// Candidates for `dependency` under the merged `constraint`.
    pub fn search(
        &self,
        dependency: &Dependency,
        constraint: &VersionConstraint,
        ctx: &QueryContext<'_>,
    ) -> SearchResult {
        let name = dependency.name.as_str();

        if let Some(metadata) = self.metadata().filter(|m| m.provides(name)) {
            return SearchResult::found(metadata.candidates_for(name, constraint));
        }

        if ctx.config.frozen {
            return match self.locked().filter(|l| l.provides(name)) {
                Some(locked) => SearchResult::found(locked.candidates_for(name, constraint, ctx)),
                None => SearchResult::refused(Refusal::NotInLockfile),
            };
        }

        let mut result = SearchResult::default();
        let mut from_remote = false;
        if let Some(pin) = &dependency.source {
            let id = SourceId::pinned(pin);
            let Some(source) = self.sources.iter().find(|s| s.id() == id) else {
                return SearchResult::refused(Refusal::UnknownSource(pin.to_string()));
            };
            match source.candidates_for(name, constraint, ctx) {
                Ok(found) => result.candidates = found,
                Err(e) => result.errors.push(e),
            }
        } else {
            let searched = self.sources.iter().filter(|s| {
                matches!(
                    s.kind(),
                    SourceKind::Installed | SourceKind::Pinned | SourceKind::Remote
                )
            });
            for source in searched {
                match source.candidates_for(name, constraint, ctx) {
                    Ok(found) if !found.is_empty() => {
                        from_remote = source.kind() == SourceKind::Remote;
                        result.candidates = found;
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(package = name, source = %source.id(), "{e}");
                        result.errors.push(e);
                    }
                }
            }
            if result.candidates.is_empty() {
                from_remote = true;
            }
        }

        self.prefer_locked(name, constraint, ctx, from_remote, &mut result.candidates);
        result
    }

    /// Move the locked version to the front, or order by closeness to it when
    /// the package is unlocked for a conservative update.
    ///
    /// A locked build no remote lists any more is offered from the lockfile,
    /// but never in place of an installed or pinned answer.
    fn prefer_locked(
        &self,
        name: &str,
        constraint: &VersionConstraint,
        ctx: &QueryContext<'_>,
        offer_locked: bool,
        candidates: &mut Vec<CandidateSummary>,
    ) {
        let Some(locked) = self.locked() else {
            return;
        };
        let Some(locked_version) = locked.version_of(name) else {
            return;
        };

        if ctx.config.is_unlocked(name) {
            if ctx.config.conservative_update {
                conservative_order(locked_version, candidates);
            }
            return;
        }
        if !constraint.satisfied_by(locked_version) {
            debug!(package = name, locked = %locked_version, "Locked version no longer satisfies {constraint}");
            return;
        }

        let (mut preferred, rest): (Vec<_>, Vec<_>) = std::mem::take(candidates)
            .into_iter()
            .partition(|c| &c.version == locked_version);
        if preferred.is_empty() && offer_locked {
            preferred = locked.candidates_for(name, constraint, ctx);
        }
        preferred.extend(rest);
        *candidates = preferred;
    }

    /// Materialize a summary through the source that listed it.
    pub fn materialize(&self, summary: &CandidateSummary) -> Result<PackageCandidate, SourceError> {
        let source = self
            .sources
            .iter()
            .find(|s| s.id() == summary.source)
            .ok_or_else(|| SourceError::UnknownSource {
                source_id: summary.source.to_string(),
            })?;
        source.materialize(summary)
    }
}

/// Same major.minor as the locked version first, then same major, then
/// other upgrades, then downgrades. Existing order holds within a tier.
fn conservative_order(locked: &Version, candidates: &mut [CandidateSummary]) {
    let (major, minor) = locked.major_minor();
    candidates.sort_by_key(|c| {
        let (m, n) = c.version.major_minor();
        if &c.version < locked {
            3
        } else if (m, n) == (major, minor) {
            0
        } else if m == major {
            1
        } else {
            2
        }
    });
}
