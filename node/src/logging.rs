//! Installs the process-wide tracing subscriber. One call per process,
//! made once at the top of `main` before anything else logs.

use tracing_subscriber::EnvFilter;

/// Installs a `fmt` layer filtered by `RUST_LOG`, falling back to
/// `default_level` when the environment variable is unset or invalid.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
