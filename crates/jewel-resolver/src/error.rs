//! Resolver outcomes and source failures.

use jewel_util::errors::JewelError;
use miette::Diagnostic;
use thiserror::Error;

use crate::conflict::ConflictReport;

/// Failure reported by a candidate source or the index behind it.
///
/// Never fatal on its own: the resolver downgrades it to "candidate
/// unavailable" and only reports it when no alternative remains.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("Failed to fetch {name}: {message}")]
    Fetch { name: String, message: String },

    #[error("No source registered for {source_id}")]
    UnknownSource { source_id: String },

    #[error("{name} ({version}) is not available from {source_id}")]
    MissingSpec {
        name: String,
        version: String,
        source_id: String,
    },
}

/// Terminal outcome of a resolution that did not succeed.
#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    /// No combination of versions satisfies every requirement.
    #[error("Could not resolve dependencies.\n\n{report}")]
    #[diagnostic(help(
        "Relax one of the conflicting requirements, or unlock the packages involved"
    ))]
    Unsatisfiable { report: ConflictReport },

    /// The cancellation flag was raised between decisions.
    #[error("Resolution aborted")]
    Aborted,

    /// The blocking resolver task did not complete.
    #[error("Resolver task failed: {message}")]
    Task { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] JewelError),
}

impl ResolveError {
    pub fn is_unsatisfiable(&self) -> bool {
        matches!(self, ResolveError::Unsatisfiable { .. })
    }

    /// The conflict report of an unsatisfiable resolution.
    pub fn report(&self) -> Option<&ConflictReport> {
        match self {
            ResolveError::Unsatisfiable { report } => Some(report),
            _ => None,
        }
    }
}
