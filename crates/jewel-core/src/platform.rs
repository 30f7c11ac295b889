//! Platforms a gem can be built for, and how well a build suits a target.

use std::fmt;
use std::str::FromStr;

use jewel_util::errors::JewelError;
use serde::{Deserialize, Serialize};

/// A gem platform: the generic `ruby` platform or a `cpu-os[-version]` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Platform {
    /// Pure-Ruby build, installable anywhere.
    Ruby,
    Specific {
        cpu: Option<String>,
        os: String,
        version: Option<String>,
    },
}

impl Platform {
    pub fn specific(cpu: Option<&str>, os: &str, version: Option<&str>) -> Self {
        Platform::Specific {
            cpu: cpu.map(str::to_string),
            os: os.to_string(),
            version: version.map(str::to_string),
        }
    }

    pub fn is_generic(&self) -> bool {
        matches!(self, Platform::Ruby)
    }

    /// Whether a build for `self` can be installed on `target`.
    ///
    /// Generic builds install everywhere; a specific build never installs on
    /// the generic target. CPUs match when equal, when either side is absent
    /// or `universal`, or when an `arm` build meets an `armv*` target.
    pub fn matches(&self, target: &Platform) -> bool {
        match (self, target) {
            (Platform::Ruby, _) => true,
            (Platform::Specific { .. }, Platform::Ruby) => false,
            (
                Platform::Specific {
                    cpu: build_cpu,
                    os: build_os,
                    version: build_version,
                },
                Platform::Specific {
                    cpu: target_cpu,
                    os: target_os,
                    version: target_version,
                },
            ) => {
                cpu_compatible(build_cpu.as_deref(), target_cpu.as_deref())
                    && build_os == target_os
                    && match (build_version, target_version) {
                        (Some(a), Some(b)) => a == b,
                        _ => true,
                    }
            }
        }
    }
}

fn cpu_compatible(build: Option<&str>, target: Option<&str>) -> bool {
    match (build, target) {
        (None, _) | (_, None) => true,
        (Some("universal"), _) | (_, Some("universal")) => true,
        (Some("arm"), Some(t)) => t.starts_with("arm"),
        (Some(b), Some(t)) => b == t,
    }
}

impl FromStr for Platform {
    type Err = JewelError;

    /// Parse `ruby`, `os` (e.g. `java`), `cpu-os` or `cpu-os-version`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s == "ruby" {
            return Ok(Platform::Ruby);
        }
        let parts: Vec<&str> = s.splitn(3, '-').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(JewelError::MalformedPlatform {
                platform: s.to_string(),
            });
        }
        Ok(match parts.as_slice() {
            [os] => Platform::specific(None, os, None),
            [cpu, os] => Platform::specific(Some(cpu), os, None),
            [cpu, os, version] => Platform::specific(Some(cpu), os, Some(version)),
            _ => unreachable!("splitn(3) yields between one and three parts"),
        })
    }
}

impl TryFrom<String> for Platform {
    type Error = JewelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Platform> for String {
    fn from(value: Platform) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Ruby => f.write_str("ruby"),
            Platform::Specific { cpu, os, version } => {
                let parts: Vec<&str> = [cpu.as_deref(), Some(os.as_str()), version.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect();
                f.write_str(&parts.join("-"))
            }
        }
    }
}

/// Ranks how well a build platform suits a target platform. Lower is better.
pub trait PlatformScorer: Send + Sync + fmt::Debug {
    fn score(&self, build: &Platform, target: &Platform) -> i64;
}

/// Score used for generic builds: worse than any specific match.
pub const GENERIC_SCORE: i64 = 1_000_000;

/// Exact match beats everything; generic builds rank last; otherwise
/// mismatches are penalised by OS, then CPU (x10), then OS version (x100).
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultScorer;

impl PlatformScorer for DefaultScorer {
    fn score(&self, build: &Platform, target: &Platform) -> i64 {
        if build == target {
            return -1;
        }
        let (
            Platform::Specific {
                cpu: build_cpu,
                os: build_os,
                version: build_version,
            },
            Platform::Specific {
                cpu: target_cpu,
                os: target_os,
                version: target_version,
            },
        ) = (build, target)
        else {
            return GENERIC_SCORE;
        };

        let os = i64::from(build_os != target_os);
        let cpu = match (build_cpu.as_deref(), target_cpu.as_deref()) {
            (b, t) if b == t => 0,
            (Some("arm"), Some(t)) if t.starts_with("arm") => 0,
            (None, _) | (Some("universal"), _) => 1,
            _ => 2,
        };
        let version = match (build_version, target_version) {
            (b, t) if b == t => 0,
            (None, _) => 1,
            _ => 2,
        };
        os + cpu * 10 + version * 100
    }
}
