//! Shared utilities for Jewel.
//!
//! This crate provides the cross-cutting concerns used by the other Jewel
//! crates: the unified error type and the logging bootstrap.

pub mod errors;
pub mod logging;
