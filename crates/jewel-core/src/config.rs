use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use jewel_util::errors::JewelError;
use serde::{Deserialize, Serialize};

use crate::platform::Platform;
use crate::version::Version;

/// Resolver settings, loaded from `jewel.toml` and `JEWEL_*` variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResolverConfig {
    /// Consider prerelease versions even when a constraint does not name one.
    #[serde(default)]
    pub allow_prerelease: bool,

    /// Platforms the resolution must be installable on.
    #[serde(default = "default_platforms")]
    pub platforms: Vec<Platform>,

    /// Prefer the smallest move away from locked versions when unlocking.
    #[serde(default)]
    pub conservative_update: bool,

    /// Fail rather than pick anything that is not already locked.
    #[serde(default)]
    pub frozen: bool,

    /// Packages whose lock preference is dropped.
    #[serde(default)]
    pub unlock: Unlock,

    /// Virtual packages provided by the environment, e.g. `ruby = "3.3.0"`.
    #[serde(default)]
    pub runtime: BTreeMap<String, Version>,

    #[serde(default = "default_prefetch_concurrency")]
    pub prefetch_concurrency: usize,

    #[serde(default = "default_prefetch_depth")]
    pub prefetch_depth: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            allow_prerelease: false,
            platforms: default_platforms(),
            conservative_update: false,
            frozen: false,
            unlock: Unlock::None,
            runtime: BTreeMap::new(),
            prefetch_concurrency: default_prefetch_concurrency(),
            prefetch_depth: default_prefetch_depth(),
        }
    }
}

fn default_platforms() -> Vec<Platform> {
    vec![Platform::Ruby]
}

fn default_prefetch_concurrency() -> usize {
    8
}

fn default_prefetch_depth() -> usize {
    1
}

/// Which locked packages may move.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "UnlockRepr", into = "UnlockRepr")]
pub enum Unlock {
    #[default]
    None,
    All,
    Names(BTreeSet<String>),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum UnlockRepr {
    Keyword(String),
    Names(BTreeSet<String>),
}

impl TryFrom<UnlockRepr> for Unlock {
    type Error = String;

    fn try_from(value: UnlockRepr) -> Result<Self, Self::Error> {
        match value {
            UnlockRepr::Keyword(k) if k == "none" => Ok(Unlock::None),
            UnlockRepr::Keyword(k) if k == "all" => Ok(Unlock::All),
            UnlockRepr::Keyword(k) => Err(format!(
                "unlock must be \"none\", \"all\" or a list of names, got {k:?}"
            )),
            UnlockRepr::Names(names) => Ok(Unlock::Names(names)),
        }
    }
}

impl From<Unlock> for UnlockRepr {
    fn from(value: Unlock) -> Self {
        match value {
            Unlock::None => UnlockRepr::Keyword("none".to_string()),
            Unlock::All => UnlockRepr::Keyword("all".to_string()),
            Unlock::Names(names) => UnlockRepr::Names(names),
        }
    }
}

impl Unlock {
    pub fn includes(&self, name: &str) -> bool {
        match self {
            Unlock::None => false,
            Unlock::All => true,
            Unlock::Names(names) => names.contains(name),
        }
    }
}

impl ResolverConfig {
    /// Load the configuration from `path`, or return defaults if the file doesn't exist.
    pub fn load(path: &Path) -> miette::Result<Self> {
        if !path.is_file() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| JewelError::Config {
            message: format!("Failed to read {}: {e}", path.display()),
        })?;
        Ok(Self::from_toml_str(&content)?)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, JewelError> {
        let config: Self = toml::from_str(content).map_err(|e| JewelError::Config {
            message: format!("Failed to parse config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), JewelError> {
        if self.platforms.is_empty() {
            return Err(JewelError::Config {
                message: "platforms must name at least one platform".to_string(),
            });
        }
        if self.prefetch_concurrency == 0 {
            return Err(JewelError::Config {
                message: "prefetch-concurrency must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Overlay `JEWEL_*` environment variables.
    pub fn apply_env(self) -> Result<Self, JewelError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Overlay variables read through `lookup`.
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self, JewelError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("JEWEL_FROZEN") {
            self.frozen = parse_flag("JEWEL_FROZEN", &v)?;
        }
        if let Some(v) = lookup("JEWEL_ALLOW_PRERELEASE") {
            self.allow_prerelease = parse_flag("JEWEL_ALLOW_PRERELEASE", &v)?;
        }
        if let Some(v) = lookup("JEWEL_CONSERVATIVE") {
            self.conservative_update = parse_flag("JEWEL_CONSERVATIVE", &v)?;
        }
        if let Some(v) = lookup("JEWEL_PLATFORMS") {
            self.platforms = v
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.parse())
                .collect::<Result<Vec<Platform>, _>>()
                .map_err(|e| JewelError::Config {
                    message: format!("JEWEL_PLATFORMS: {e}"),
                })?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn is_unlocked(&self, name: &str) -> bool {
        self.unlock.includes(name)
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, JewelError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        other => Err(JewelError::Config {
            message: format!("{key} must be a boolean, got {other:?}"),
        }),
    }
}
