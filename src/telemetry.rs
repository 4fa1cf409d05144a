//! Log output for hosts embedding the core.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `filter` (`RUST_LOG` syntax).
///
/// An invalid filter falls back to `info`. Returns `false` if a global
/// subscriber was already installed, in which case nothing changes.
pub fn init_tracing(filter: &str) -> bool {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
