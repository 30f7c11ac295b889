//! Version constraints: an AND-list of `(operator, version)` clauses.
//!
//! Supports: `= 1.0`, `!= 1.0`, `> 1.0`, `< 1.0`, `>= 1.0`, `<= 1.0`,
//! `~> 1.4` (pessimistic: `>= 1.4, < 2`), and bare versions (exact).
//! The empty list and `>= 0` match any version.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use jewel_util::errors::JewelError;

use crate::version::{Segment, Version};

/// Comparison operator of a single clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Op {
    Eq,
    NotEq,
    Gt,
    Lt,
    Ge,
    Le,
    Pessimistic,
}

impl Op {
    pub fn as_str(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::NotEq => "!=",
            Op::Gt => ">",
            Op::Lt => "<",
            Op::Ge => ">=",
            Op::Le => "<=",
            Op::Pessimistic => "~>",
        }
    }
}

/// Longest operators first so `>=` is not read as `>`.
const OPERATORS: [(&str, Op); 7] = [
    ("~>", Op::Pessimistic),
    (">=", Op::Ge),
    ("<=", Op::Le),
    ("!=", Op::NotEq),
    (">", Op::Gt),
    ("<", Op::Lt),
    ("=", Op::Eq),
];

/// A single `(operator, version)` predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Clause {
    pub op: Op,
    pub version: Version,
}

impl Clause {
    pub fn new(op: Op, version: Version) -> Self {
        Self { op, version }
    }

    pub fn parse(text: &str) -> Result<Self, JewelError> {
        let s = text.trim();
        let malformed = |reason: &str| JewelError::MalformedConstraint {
            constraint: text.to_string(),
            reason: reason.to_string(),
        };
        if s.is_empty() {
            return Err(malformed("empty clause"));
        }

        let (op, rest) = OPERATORS
            .iter()
            .find_map(|(token, op)| s.strip_prefix(token).map(|rest| (*op, rest)))
            .unwrap_or((Op::Eq, s));

        let rest = rest.trim();
        if rest.is_empty() {
            return Err(malformed("missing version"));
        }
        let version = Version::parse(rest).map_err(|_| malformed("invalid version"))?;
        Ok(Self { op, version })
    }

    pub fn satisfied_by(&self, version: &Version) -> bool {
        let target = &self.version;
        match self.op {
            Op::Eq => version == target,
            Op::NotEq => version != target,
            Op::Gt => version > target,
            Op::Lt => version < target,
            Op::Ge => version >= target,
            Op::Le => version <= target,
            Op::Pessimistic => version >= target && version.release() < target.bump(),
        }
    }

    fn is_default(&self) -> bool {
        self.op == Op::Ge
            && self
                .version
                .segments()
                .iter()
                .all(|s| *s == Segment::Numeric(0))
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op.as_str(), self.version)
    }
}

/// An AND-combination of clauses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VersionConstraint {
    clauses: Vec<Clause>,
}

impl VersionConstraint {
    /// The constraint that matches every version.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn exact(version: Version) -> Self {
        Self {
            clauses: vec![Clause::new(Op::Eq, version)],
        }
    }

    /// Parse a comma-separated clause list. Blank text matches any version.
    pub fn parse(text: &str) -> Result<Self, JewelError> {
        if text.trim().is_empty() {
            return Ok(Self::any());
        }
        let clauses = text
            .split(',')
            .map(Clause::parse)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| match e {
                JewelError::MalformedConstraint { reason, .. } => {
                    JewelError::MalformedConstraint {
                        constraint: text.to_string(),
                        reason,
                    }
                }
                other => other,
            })?;
        Ok(Self::from_clauses(clauses))
    }

    /// Parse several constraint strings and AND them together.
    pub fn parse_all<S: AsRef<str>>(texts: &[S]) -> Result<Self, JewelError> {
        texts.iter().try_fold(Self::any(), |acc, text| {
            Ok(acc.intersect(&Self::parse(text.as_ref())?))
        })
    }

    pub fn from_clauses(clauses: Vec<Clause>) -> Self {
        let mut constraint = Self::any();
        for clause in clauses {
            constraint.push(clause);
        }
        constraint
    }

    fn push(&mut self, clause: Clause) {
        if clause.is_default() || self.clauses.contains(&clause) {
            return;
        }
        self.clauses.push(clause);
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_any(&self) -> bool {
        self.clauses.is_empty()
    }

    /// A single `=` clause.
    pub fn is_exact(&self) -> bool {
        matches!(self.clauses.as_slice(), [Clause { op: Op::Eq, .. }])
    }

    /// Whether any clause names a prerelease, which opts the constraint in
    /// to matching prerelease versions.
    pub fn mentions_prerelease(&self) -> bool {
        self.clauses.iter().any(|c| c.version.is_prerelease())
    }

    /// Pure predicate over versions, independent of prerelease policy.
    pub fn satisfied_by(&self, version: &Version) -> bool {
        self.clauses.iter().all(|c| c.satisfied_by(version))
    }

    /// [`satisfied_by`](Self::satisfied_by) plus the prerelease opt-in rule.
    pub fn allows(&self, version: &Version, allow_prerelease: bool) -> bool {
        self.satisfied_by(version)
            && (!version.is_prerelease() || allow_prerelease || self.mentions_prerelease())
    }

    /// Both constraints must hold.
    pub fn intersect(&self, other: &VersionConstraint) -> VersionConstraint {
        let mut merged = self.clone();
        for clause in &other.clauses {
            merged.push(clause.clone());
        }
        merged
    }

    /// Whether no version can satisfy every clause.
    ///
    /// Decided from the tightest lower/upper bounds, `=` pins and `!=`
    /// holes. Pessimistic upper bounds are read as plain `<` bounds, so the
    /// answer can only err towards "satisfiable".
    pub fn is_unsatisfiable(&self) -> bool {
        if let Some(pin) = self.clauses.iter().find(|c| c.op == Op::Eq) {
            return !self.satisfied_by(&pin.version);
        }

        let mut lower: Option<Bound> = None;
        let mut upper: Option<Bound> = None;
        for clause in &self.clauses {
            let v = &clause.version;
            match clause.op {
                Op::Gt => tighten_lower(&mut lower, Bound::new(v.clone(), false)),
                Op::Ge => tighten_lower(&mut lower, Bound::new(v.clone(), true)),
                Op::Lt => tighten_upper(&mut upper, Bound::new(v.clone(), false)),
                Op::Le => tighten_upper(&mut upper, Bound::new(v.clone(), true)),
                Op::Pessimistic => {
                    tighten_lower(&mut lower, Bound::new(v.clone(), true));
                    tighten_upper(&mut upper, Bound::new(v.bump(), false));
                }
                Op::Eq | Op::NotEq => {}
            }
        }

        let (Some(lower), Some(upper)) = (lower, upper) else {
            return false;
        };
        match lower.version.cmp(&upper.version) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => {
                !(lower.inclusive && upper.inclusive)
                    || self
                        .clauses
                        .iter()
                        .any(|c| c.op == Op::NotEq && c.version == lower.version)
            }
        }
    }
}

struct Bound {
    version: Version,
    inclusive: bool,
}

impl Bound {
    fn new(version: Version, inclusive: bool) -> Self {
        Self { version, inclusive }
    }
}

fn tighten_lower(current: &mut Option<Bound>, candidate: Bound) {
    let replace = match current {
        None => true,
        Some(existing) => match candidate.version.cmp(&existing.version) {
            Ordering::Greater => true,
            Ordering::Equal => !candidate.inclusive,
            Ordering::Less => false,
        },
    };
    if replace {
        *current = Some(candidate);
    }
}

fn tighten_upper(current: &mut Option<Bound>, candidate: Bound) {
    let replace = match current {
        None => true,
        Some(existing) => match candidate.version.cmp(&existing.version) {
            Ordering::Less => true,
            Ordering::Equal => !candidate.inclusive,
            Ordering::Greater => false,
        },
    };
    if replace {
        *current = Some(candidate);
    }
}

impl FromStr for VersionConstraint {
    type Err = JewelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clauses.is_empty() {
            return f.write_str(">= 0");
        }
        let rendered: Vec<String> = self.clauses.iter().map(|c| c.to_string()).collect();
        f.write_str(&rendered.join(", "))
    }
}
