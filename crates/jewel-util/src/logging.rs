//! `tracing` subscriber bootstrap for processes embedding the resolver.

use tracing_subscriber::EnvFilter;

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "JEWEL_LOG";

/// Build the filter from `JEWEL_LOG`, then `RUST_LOG`, then `default_directive`.
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install a stderr fmt subscriber.
///
/// Returns `false` when a global subscriber was already installed, which makes
/// repeated calls from tests harmless.
pub fn init(default_directive: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directive))
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
