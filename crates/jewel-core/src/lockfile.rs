use std::collections::BTreeMap;
use std::path::Path;

use jewel_util::errors::JewelError;
use serde::{Deserialize, Serialize};

use crate::dependency::Dependency;
use crate::platform::Platform;
use crate::version::Version;

/// Persisted record of a previous successful resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Lockfile {
    #[serde(default)]
    pub package: Vec<LockedPackage>,
}

/// A single locked package build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockedPackage {
    pub name: String,
    pub version: Version,
    #[serde(default = "generic_platform")]
    pub platform: Platform,
    #[serde(default)]
    pub source: Option<String>,
    /// Declared dependencies as `name (constraint)` strings.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

fn generic_platform() -> Platform {
    Platform::Ruby
}

impl LockedPackage {
    /// Parse the recorded dependency strings.
    pub fn parsed_dependencies(&self) -> Result<Vec<Dependency>, JewelError> {
        self.dependencies.iter().map(|d| d.parse()).collect()
    }
}

impl Lockfile {
    /// Load and parse a `Jewel.lock` file from the given path.
    pub fn from_path(path: &Path) -> miette::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| JewelError::Lockfile {
            message: format!("Failed to read lockfile {}: {e}", path.display()),
        })?;
        Ok(Self::from_toml_str(&content)?)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, JewelError> {
        toml::from_str(content).map_err(|e| JewelError::Lockfile {
            message: format!("Failed to parse lockfile: {e}"),
        })
    }

    /// Serialize the lockfile to a pretty-printed TOML string.
    pub fn to_string_pretty(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Write the lockfile to `path`.
    pub fn write_to(&self, path: &Path) -> miette::Result<()> {
        let content = self.to_string_pretty().map_err(|e| JewelError::Lockfile {
            message: format!("Failed to serialize lockfile: {e}"),
        })?;
        std::fs::write(path, content).map_err(JewelError::Io)?;
        Ok(())
    }

    /// Locked builds per package name, in file order.
    pub fn locked_versions(&self) -> BTreeMap<String, Vec<(Version, Platform)>> {
        let mut locked: BTreeMap<String, Vec<(Version, Platform)>> = BTreeMap::new();
        for pkg in &self.package {
            locked
                .entry(pkg.name.clone())
                .or_default()
                .push((pkg.version.clone(), pkg.platform.clone()));
        }
        locked
    }

    /// The locked version of a package, if any.
    pub fn locked_version(&self, name: &str) -> Option<&Version> {
        self.package
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.version)
    }
}
