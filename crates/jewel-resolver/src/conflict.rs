//! Conflicts found during search, the bookkeeping that drives backjumping,
//! and the report shown when resolution fails.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use jewel_core::platform::Platform;

use crate::candidate::Activation;
use crate::requirement::{Requester, Requirement};

/// Why a requirement could not be met.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictCause {
    /// An existing activation does not satisfy the requirement.
    Incompatible,
    /// No source lists a satisfying candidate.
    NoCandidate,
    /// The merged requirements on one name exclude every version.
    EmptyIntersection,
    /// Sources failed and nothing else was available.
    FetchFailed(String),
    /// A platform-wide requirement found no version built for these platforms.
    PlatformIncomplete(Vec<Platform>),
    /// Frozen mode and the package is not in the lockfile.
    NotInLockfile,
    /// The requirement names a source that is not registered.
    UnknownSource(String),
    /// Requirements on one name are pinned to different sources.
    SourceMismatch(Vec<String>),
    /// Every candidate of a decision failed; the failures are the
    /// conflict's `underlying` list.
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct Conflict {
    pub name: String,
    /// The requirement that could not be met.
    pub requirement: Requirement,
    /// All requirements on `name` involved, `requirement` included.
    pub requirements: Vec<Requirement>,
    pub conflicting_activation: Option<Arc<Activation>>,
    pub cause: ConflictCause,
    /// Path from the root request set to `requirement`.
    pub requester_chain: Vec<Requirement>,
    pub underlying: Vec<Conflict>,
}

impl Conflict {
    pub fn new(requirement: Requirement, requirements: Vec<Requirement>, cause: ConflictCause) -> Self {
        Self {
            name: requirement.name().to_string(),
            requester_chain: requirement.chain(),
            requirement,
            requirements,
            conflicting_activation: None,
            cause,
            underlying: Vec::new(),
        }
    }

    pub fn with_activation(mut self, activation: Arc<Activation>) -> Self {
        self.conflicting_activation = Some(activation);
        self
    }

    pub fn with_underlying(mut self, underlying: Vec<Conflict>) -> Self {
        self.underlying = underlying;
        self
    }

    /// Decisions whose choices produced this conflict: the requesters of
    /// the involved requirements and the conflicting activation.
    pub fn culprits(&self) -> BTreeSet<usize> {
        let mut culprits: BTreeSet<usize> = self
            .requirements
            .iter()
            .chain(std::iter::once(&self.requirement))
            .filter_map(|r| r.requester.decision())
            .collect();
        if let Some(activation) = &self.conflicting_activation {
            culprits.insert(activation.decision);
        }
        culprits
    }

    /// Concrete failures beneath exhaustion chains, deduplicated.
    pub fn leaves(&self) -> Vec<&Conflict> {
        let mut leaves: Vec<&Conflict> = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, leaves: &mut Vec<&'a Conflict>) {
        if self.cause == ConflictCause::Exhausted && !self.underlying.is_empty() {
            for conflict in &self.underlying {
                conflict.collect_leaves(leaves);
            }
        } else if !leaves.iter().any(|seen| seen.same_as(self)) {
            leaves.push(self);
        }
    }

    fn same_as(&self, other: &Conflict) -> bool {
        self.name == other.name
            && self.cause == other.cause
            && self.requirements.len() == other.requirements.len()
            && self
                .requirements
                .iter()
                .zip(&other.requirements)
                .all(|(a, b)| a.to_string() == b.to_string() && a.requester.to_string() == b.requester.to_string())
            && match (&self.conflicting_activation, &other.conflicting_activation) {
                (Some(a), Some(b)) => a.version == b.version,
                (None, None) => true,
                _ => false,
            }
    }

    /// Every package name the conflict's requester chains pass through.
    pub fn involved_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        let chains = self
            .requirements
            .iter()
            .map(Requirement::chain)
            .chain(self.conflicting_activation.iter().flat_map(|a| a.requirements.iter().map(Requirement::chain)));
        for chain in chains {
            for requirement in chain {
                names.insert(requirement.name().to_string());
            }
        }
        names
    }
}

/// Per-decision bookkeeping for conflict-directed backjumping.
#[derive(Debug, Default)]
pub struct ConflictTracker {
    conflicts: Vec<Conflict>,
    conflict_sets: Vec<BTreeSet<usize>>,
    touched: BTreeMap<String, BTreeSet<usize>>,
}

impl ConflictTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register decision `index`, made for `name`.
    pub fn open(&mut self, index: usize, name: &str) {
        self.conflict_sets.truncate(index);
        self.conflict_sets.push(BTreeSet::new());
        self.touch(index, name);
    }

    /// Note that decision `index` introduced requirements on `name`.
    pub fn touch(&mut self, index: usize, name: &str) {
        self.touched.entry(name.to_string()).or_default().insert(index);
    }

    pub fn record(&mut self, conflict: Conflict) {
        self.conflicts.push(conflict);
    }

    /// Every conflict recorded so far.
    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    /// The decisions blamed so far for the failures of decision `index`.
    pub fn conflict_set(&self, index: usize) -> BTreeSet<usize> {
        self.conflict_sets.get(index).cloned().unwrap_or_default()
    }

    /// Live decisions that chose or required `name`, oldest first.
    pub fn states_since(&self, name: &str) -> Vec<usize> {
        self.touched
            .get(name)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The most recent culprit, with the remaining culprits folded into
    /// its conflict set. `None` means no decision can be revised.
    pub fn backjump_target(&mut self, culprits: &BTreeSet<usize>) -> Option<usize> {
        let target = *culprits.iter().next_back()?;
        let set = self.conflict_sets.get_mut(target)?;
        set.extend(culprits.iter().copied().filter(|&c| c != target));
        Some(target)
    }

    /// Forget decisions at `len` and later.
    pub fn truncate(&mut self, len: usize) {
        self.conflict_sets.truncate(len);
        for decisions in self.touched.values_mut() {
            decisions.retain(|&d| d < len);
        }
        self.touched.retain(|_, decisions| !decisions.is_empty());
    }
}

/// Human-readable explanation of an unsatisfiable resolution.
#[derive(Debug, Clone, Default)]
pub struct ConflictReport {
    pub conflicts: Vec<Conflict>,
}

impl ConflictReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A report of the concrete failures behind `conflict`.
    pub fn from_conflict(conflict: &Conflict) -> Self {
        Self {
            conflicts: conflict.leaves().into_iter().cloned().collect(),
        }
    }

    pub fn add(&mut self, conflict: Conflict) {
        self.conflicts.push(conflict);
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    /// Every package name appearing in the report's requester chains.
    pub fn involved_names(&self) -> BTreeSet<String> {
        self.conflicts.iter().flat_map(Conflict::involved_names).collect()
    }
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.conflicts.is_empty() {
            return write!(f, "No conflicts.");
        }
        for (i, conflict) in self.conflicts.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{conflict}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Could not find compatible versions for package \"{}\":", self.name)?;
        for requirement in &self.requirements {
            write_chain(f, &requirement.chain())?;
        }
        if let Some(activation) = &self.conflicting_activation {
            writeln!(f, "  {} was resolved to {}, requested by", activation.name, activation.version)?;
            for requirement in &activation.requirements {
                write_chain(f, &requirement.chain())?;
            }
        }
        match &self.cause {
            ConflictCause::Incompatible | ConflictCause::Exhausted => Ok(()),
            ConflictCause::NoCandidate => {
                writeln!(f, "  No version of {} matches {}", self.name, self.requirement.constraint())
            }
            ConflictCause::EmptyIntersection => {
                writeln!(f, "  No version of {} satisfies all of these requirements", self.name)
            }
            ConflictCause::FetchFailed(message) => {
                writeln!(f, "  Metadata for {} could not be fetched: {message}", self.name)
            }
            ConflictCause::PlatformIncomplete(platforms) => {
                let platforms: Vec<String> = platforms.iter().map(|p| p.to_string()).collect();
                match &self.conflicting_activation {
                    Some(activation) => writeln!(
                        f,
                        "  {} ({}) was bound without a build for every platform: {}",
                        self.name,
                        activation.version,
                        platforms.join(", ")
                    ),
                    None => writeln!(
                        f,
                        "  No version of {} has builds for every platform: {}",
                        self.name,
                        platforms.join(", ")
                    ),
                }
            }
            ConflictCause::NotInLockfile => {
                writeln!(f, "  {} is not in the lockfile and the lockfile is frozen", self.name)
            }
            ConflictCause::UnknownSource(source) => {
                writeln!(f, "  The source {source} is not configured")
            }
            ConflictCause::SourceMismatch(sources) => {
                writeln!(
                    f,
                    "  The requirements on {} are pinned to different sources: {}",
                    self.name,
                    sources.join(", ")
                )
            }
        }
    }
}

/// One requirement chain, root first: each step names the version that
/// was chosen and the dependency that led onwards.
fn write_chain(f: &mut fmt::Formatter<'_>, chain: &[Requirement]) -> fmt::Result {
    let Some((last, steps)) = chain.split_last() else {
        return Ok(());
    };
    let mut indent = String::from("  ");
    if steps.is_empty() && matches!(last.requester, Requester::Root) {
        return writeln!(f, "{indent}{last} was requested directly");
    }
    for (i, step) in steps.iter().enumerate() {
        let resolved = match &chain[i + 1].requester {
            Requester::Package(activation) => activation.version.to_string(),
            Requester::Root => "?".to_string(),
        };
        writeln!(f, "{indent}{step} was resolved to {resolved}, which depends on")?;
        indent.push_str("  ");
    }
    writeln!(f, "{indent}{last}")
}
