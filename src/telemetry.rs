//! Logging setup

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// Filter comes from `RUST_LOG` when set, otherwise `default_filter`
/// (e.g. `"polychat=debug"`). Later calls are no-ops, so embedding
/// applications that install their own subscriber first win.
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .ok();
}
