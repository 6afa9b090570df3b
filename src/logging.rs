//! Log subscriber setup for binaries, tests and benchmarks.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the application. [`init`] installs a formatted subscriber filtered by
//! `RUST_LOG` and can be called any number of times.

use tracing_subscriber::EnvFilter;


/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "titan_engine=info";

/// Installs a global `tracing` subscriber.
///
/// Returns `false` if a subscriber was already installed.
pub fn init() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}
