use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use jewel_util::errors::JewelError;

use crate::constraint::VersionConstraint;
use crate::platform::Platform;

/// A request for a package satisfying a version constraint.
///
/// Declared either by the root request set or by a package's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub name: String,
    pub constraint: VersionConstraint,
    /// Only applies when resolving for one of these platforms.
    pub platforms: Option<Vec<Platform>>,
    /// Pins the dependency to a path or git source.
    pub source: Option<SourceRef>,
    /// Needs a build for every resolving platform, bound as one decision.
    pub all_platforms: bool,
    pub kind: DependencyKind,
}

/// Whether a dependency is needed at runtime or only for development.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DependencyKind {
    #[default]
    Runtime,
    Development,
}

/// A pinned, non-registry source a dependency must come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceRef {
    Path(PathBuf),
    Git { uri: String, reference: Option<String> },
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Path(path) => write!(f, "path {}", path.display()),
            SourceRef::Git {
                uri,
                reference: Some(reference),
            } => write!(f, "git {uri} ({reference})"),
            SourceRef::Git {
                uri,
                reference: None,
            } => write!(f, "git {uri}"),
        }
    }
}

impl Dependency {
    /// Build a runtime dependency from one or more constraint strings.
    ///
    /// Fails with `MalformedConstraint` before any resolution starts.
    pub fn new<S: AsRef<str>>(name: &str, constraints: &[S]) -> Result<Self, JewelError> {
        Ok(Self::with_constraint(
            name,
            VersionConstraint::parse_all(constraints)?,
        ))
    }

    pub fn with_constraint(name: &str, constraint: VersionConstraint) -> Self {
        Self {
            name: name.to_string(),
            constraint,
            platforms: None,
            source: None,
            all_platforms: false,
            kind: DependencyKind::Runtime,
        }
    }

    pub fn with_platforms(mut self, platforms: Vec<Platform>) -> Self {
        self.platforms = Some(platforms);
        self
    }

    pub fn with_source(mut self, source: SourceRef) -> Self {
        self.source = Some(source);
        self
    }

    pub fn for_all_platforms(mut self) -> Self {
        self.all_platforms = true;
        self
    }

    pub fn development(mut self) -> Self {
        self.kind = DependencyKind::Development;
        self
    }

    pub fn is_runtime(&self) -> bool {
        self.kind == DependencyKind::Runtime
    }

    /// Whether the dependency applies when resolving for `resolving`.
    pub fn applies_to(&self, resolving: &[Platform]) -> bool {
        match &self.platforms {
            None => true,
            Some(filter) => filter.iter().any(|p| resolving.contains(p)),
        }
    }
}

impl FromStr for Dependency {
    type Err = JewelError;

    /// Parse `name` or `name (constraint)`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (name, constraint) = match s.split_once('(') {
            Some((name, rest)) => {
                let inner = rest.strip_suffix(')').ok_or_else(|| {
                    JewelError::MalformedConstraint {
                        constraint: s.to_string(),
                        reason: "unclosed parenthesis".to_string(),
                    }
                })?;
                (name.trim(), VersionConstraint::parse(inner)?)
            }
            None => (s, VersionConstraint::any()),
        };
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(JewelError::Generic {
                message: format!("Invalid dependency name in {s:?}"),
            });
        }
        Ok(Self::with_constraint(name, constraint))
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.constraint)
    }
}
