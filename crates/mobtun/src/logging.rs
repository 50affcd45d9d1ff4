//! Log subscriber setup for hosts that don't install their own

use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Install a compact fmt subscriber filtered at `level`.
///
/// `RUST_LOG` takes precedence when set. Returns `false` if a global
/// subscriber was already installed, so repeated calls are harmless.
pub fn init(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .is_ok()
}
