//! Concrete `(name, version, platform)` options and the activations built from them.
//!
//! A [`CandidateSummary`] is what a source lists cheaply. Turning it into a
//! [`PackageCandidate`] with its dependency list goes through
//! [`SourceSet::materialize`](crate::source::SourceSet::materialize), which
//! is where expensive metadata fetches happen.

use std::fmt;
use std::hash::{Hash, Hasher};

use jewel_core::dependency::{Dependency, SourceRef};
use jewel_core::platform::Platform;
use jewel_core::version::Version;

use crate::requirement::Requirement;

/// Kinds of candidate sources, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
    /// Virtual packages provided by the environment (`ruby`, `rubygems`).
    Metadata,
    Installed,
    /// Path or git sources.
    Pinned,
    Locked,
    Remote,
}

/// Identity of a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId {
    pub kind: SourceKind,
    pub name: String,
}

impl SourceId {
    pub fn metadata() -> Self {
        Self {
            kind: SourceKind::Metadata,
            name: "runtime".to_string(),
        }
    }

    pub fn installed() -> Self {
        Self {
            kind: SourceKind::Installed,
            name: "installed".to_string(),
        }
    }

    pub fn locked() -> Self {
        Self {
            kind: SourceKind::Locked,
            name: "lockfile".to_string(),
        }
    }

    pub fn pinned(source: &SourceRef) -> Self {
        Self {
            kind: SourceKind::Pinned,
            name: source.to_string(),
        }
    }

    pub fn remote(url: &str) -> Self {
        Self {
            kind: SourceKind::Remote,
            name: url.to_string(),
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SourceKind::Remote => write!(f, "remote {}", self.name),
            _ => f.write_str(&self.name),
        }
    }
}

/// A listed option: cheap to produce, no dependency information.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateSummary {
    pub name: String,
    pub version: Version,
    pub platform: Platform,
    pub source: SourceId,
}

impl CandidateSummary {
    pub fn new(name: &str, version: Version, platform: Platform, source: SourceId) -> Self {
        Self {
            name: name.to_string(),
            version,
            platform,
            source,
        }
    }
}

impl fmt::Display for CandidateSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.platform.is_generic() {
            write!(f, "{} ({})", self.name, self.version)
        } else {
            write!(f, "{} ({}-{})", self.name, self.version, self.platform)
        }
    }
}

/// A materialized candidate: a summary plus its declared dependencies.
///
/// Equality and hashing use the summary only.
#[derive(Debug, Clone)]
pub struct PackageCandidate {
    pub summary: CandidateSummary,
    pub dependencies: Vec<Dependency>,
}

impl PackageCandidate {
    pub fn new(summary: CandidateSummary, dependencies: Vec<Dependency>) -> Self {
        Self {
            summary,
            dependencies,
        }
    }

    pub fn name(&self) -> &str {
        &self.summary.name
    }

    pub fn version(&self) -> &Version {
        &self.summary.version
    }

    pub fn platform(&self) -> &Platform {
        &self.summary.platform
    }

    pub fn source(&self) -> &SourceId {
        &self.summary.source
    }
}

impl PartialEq for PackageCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.summary == other.summary
    }
}

impl Eq for PackageCandidate {}

impl Hash for PackageCandidate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.summary.hash(state);
    }
}

impl fmt::Display for PackageCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.summary.fmt(f)
    }
}

/// The binding made at one decision point: a version of a package, with
/// one build per activated platform.
#[derive(Debug)]
pub struct Activation {
    pub name: String,
    pub version: Version,
    /// Platform builds, sorted by platform.
    pub candidates: Vec<PackageCandidate>,
    /// The requirements this activation was chosen to satisfy.
    pub requirements: Vec<Requirement>,
    /// Index of the decision point that made this activation.
    pub decision: usize,
}

impl Activation {
    pub fn platforms(&self) -> Vec<&Platform> {
        self.candidates.iter().map(|c| c.platform()).collect()
    }

    /// Whether a build is bound for every platform in `platforms`.
    pub fn covers(&self, platforms: &[Platform]) -> bool {
        platforms
            .iter()
            .all(|target| self.candidates.iter().any(|c| c.platform().matches(target)))
    }

    /// Union of the builds' dependencies, first declaration wins.
    pub fn dependencies(&self) -> Vec<&Dependency> {
        let mut seen: Vec<&Dependency> = Vec::new();
        for dep in self.candidates.iter().flat_map(|c| &c.dependencies) {
            if !seen.contains(&dep) {
                seen.push(dep);
            }
        }
        seen
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.version)?;
        if self.candidates.iter().any(|c| !c.platform().is_generic()) {
            let platforms: Vec<String> = self.platforms().iter().map(|p| p.to_string()).collect();
            write!(f, " [{}]", platforms.join(", "))?;
        }
        Ok(())
    }
}
