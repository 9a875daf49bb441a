//! Tracing setup for the tool binaries
//!
//! The library only emits events; installing a subscriber is left to `main`.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber on stderr
///
/// `RUST_LOG` takes precedence. Otherwise `info` when `verbose`, `warn`
/// when not. Calling this twice is harmless.
pub fn init(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
