use miette::Diagnostic;
use thiserror::Error;

/// Unified error type for Jewel's data layer.
#[derive(Debug, Error, Diagnostic)]
pub enum JewelError {
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A version string does not follow the `1.2.3.pre` grammar.
    #[error("Malformed version number string {version:?}")]
    MalformedVersion { version: String },

    /// A version constraint could not be parsed.
    #[error("Malformed version constraint {constraint:?}: {reason}")]
    #[diagnostic(help("Use operators like `= 1.0`, `>= 1.2, < 2`, or `~> 1.4`"))]
    MalformedConstraint { constraint: String, reason: String },

    /// A platform string could not be parsed.
    #[error("Malformed platform {platform:?}")]
    MalformedPlatform { platform: String },

    /// Invalid or malformed resolver configuration.
    #[error("Configuration error: {message}")]
    #[diagnostic(help("Check your jewel.toml and JEWEL_* environment variables"))]
    Config { message: String },

    /// The lockfile could not be read or parsed.
    #[error("Lockfile error: {message}")]
    Lockfile { message: String },

    /// Catch-all for miscellaneous errors.
    #[error("{message}")]
    Generic { message: String },
}

/// Convenience alias for `miette::Result<T>`.
pub type JewelResult<T> = miette::Result<T>;
