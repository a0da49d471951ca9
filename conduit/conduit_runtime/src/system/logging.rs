//! Log output for Conduit processes.

use tracing_subscriber::EnvFilter;

/// Install a formatted subscriber filtering at `level`.
///
/// `RUST_LOG` takes precedence when set. Installing twice is a no-op, so
/// tests may call this freely.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
