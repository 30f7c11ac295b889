//! Dependency resolution engine.
//!
//! Given root dependencies and a set of candidate sources, finds one version
//! per package (one build per platform for platform-wide dependencies) that
//! satisfies every declared constraint, or explains why none exists.
//!
//! The search is a step-wise state machine with conflict-directed
//! backjumping; see [`resolver::Resolver`].

pub mod cache;
pub mod candidate;
pub mod conflict;
pub mod error;
pub mod graph;
pub mod index;
pub mod prefetch;
pub mod requirement;
pub mod resolver;
pub mod source;
pub mod state;

pub use error::{ResolveError, SourceError};
pub use resolver::{resolve, Resolution, Resolver};
