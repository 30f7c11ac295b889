//! Gem version parsing and ordering.
//!
//! Versions are a sequence of segments split on `.` and on digit/letter
//! boundaries (`1.0.b2` is `1, 0, "b", 2`):
//! - Numeric segments compare as numbers
//! - At the same position a letter segment sorts before a numeric one,
//!   which makes `1.0.pre` sort before `1.0`
//! - Missing trailing segments count as `0`, so `1.0 == 1.0.0`

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use jewel_util::errors::JewelError;
use serde::{Deserialize, Serialize};

/// A parsed gem version with comparable segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    original: String,
    segments: Vec<Segment>,
}

/// One component of a [`Version`].
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Segment {
    Numeric(u64),
    Text(String),
}

impl Version {
    /// Parse a version string. Blank input is version `0`.
    pub fn parse(version: &str) -> Result<Self, JewelError> {
        let trimmed = version.trim();
        if trimmed.is_empty() {
            return Ok(Self {
                original: "0".to_string(),
                segments: vec![Segment::Numeric(0)],
            });
        }

        let malformed = || JewelError::MalformedVersion {
            version: version.to_string(),
        };

        if !trimmed.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(malformed());
        }

        // `1.0-rc1` is read as `1.0.pre.rc1`
        let normalized = trimmed.replace('-', ".pre.");
        let mut segments = Vec::new();
        for piece in normalized.split('.') {
            if piece.is_empty() || !piece.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(malformed());
            }
            split_runs(piece, &mut segments).ok_or_else(malformed)?;
        }

        Ok(Self {
            original: trimmed.to_string(),
            segments,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// A version is a prerelease if any segment contains letters.
    pub fn is_prerelease(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Text(_)))
    }

    /// The release this version belongs to (`1.2.0.a` -> `1.2.0`).
    pub fn release(&self) -> Version {
        if !self.is_prerelease() {
            return self.clone();
        }
        Self::from_numbers(self.numeric_prefix())
    }

    /// The next version after dropping the last release segment
    /// (`5.3.1` -> `5.4`, `5.3.1.b2` -> `5.4`, `5` -> `6`).
    pub fn bump(&self) -> Version {
        let mut numbers = self.numeric_prefix();
        if numbers.len() > 1 {
            numbers.pop();
        }
        match numbers.last_mut() {
            Some(last) => *last += 1,
            None => numbers.push(1),
        }
        Self::from_numbers(numbers)
    }

    /// The `major.minor` prefix, padded with zeros.
    pub fn major_minor(&self) -> (u64, u64) {
        let numbers = self.numeric_prefix();
        (
            numbers.first().copied().unwrap_or(0),
            numbers.get(1).copied().unwrap_or(0),
        )
    }

    fn numeric_prefix(&self) -> Vec<u64> {
        self.segments
            .iter()
            .map_while(|s| match s {
                Segment::Numeric(n) => Some(*n),
                Segment::Text(_) => None,
            })
            .collect()
    }

    fn from_numbers(numbers: Vec<u64>) -> Version {
        let original = numbers
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(".");
        Self {
            original,
            segments: numbers.into_iter().map(Segment::Numeric).collect(),
        }
    }

    /// Segments without trailing zeros; equal versions share this form.
    fn canonical(&self) -> &[Segment] {
        let mut end = self.segments.len();
        while end > 0 && self.segments[end - 1] == Segment::Numeric(0) {
            end -= 1;
        }
        &self.segments[..end]
    }
}

/// Split `b2` into `Text("b"), Numeric(2)`. Returns `None` on numeric overflow.
fn split_runs(piece: &str, segments: &mut Vec<Segment>) -> Option<()> {
    let mut current = String::new();
    let mut digits = false;
    for ch in piece.chars() {
        let is_digit = ch.is_ascii_digit();
        if !current.is_empty() && is_digit != digits {
            segments.push(classify(&current, digits)?);
            current.clear();
        }
        digits = is_digit;
        current.push(ch);
    }
    if !current.is_empty() {
        segments.push(classify(&current, digits)?);
    }
    Some(())
}

fn classify(token: &str, digits: bool) -> Option<Segment> {
    if digits {
        token.parse::<u64>().ok().map(Segment::Numeric)
    } else {
        Some(Segment::Text(token.to_string()))
    }
}

impl FromStr for Version {
    type Err = JewelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = JewelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.original
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical().hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let max_len = self.segments.len().max(other.segments.len());
        for i in 0..max_len {
            let ord = compare_segments(self.segments.get(i), other.segments.get(i));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

const ZERO: Segment = Segment::Numeric(0);

fn compare_segments(a: Option<&Segment>, b: Option<&Segment>) -> Ordering {
    match (a.unwrap_or(&ZERO), b.unwrap_or(&ZERO)) {
        (Segment::Numeric(a), Segment::Numeric(b)) => a.cmp(b),
        (Segment::Text(a), Segment::Text(b)) => a.cmp(b),
        (Segment::Text(_), Segment::Numeric(_)) => Ordering::Less,
        (Segment::Numeric(_), Segment::Text(_)) => Ordering::Greater,
    }
}
