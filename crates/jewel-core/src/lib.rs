//! Core data types for Jewel.
//!
//! This crate defines the values the resolver reasons about: gem-style
//! versions and version constraints, platforms, dependency declarations,
//! the lockfile model and the resolver configuration.
//!
//! This crate is intentionally free of async code and network I/O.

pub mod config;
pub mod constraint;
pub mod dependency;
pub mod lockfile;
pub mod platform;
pub mod version;
