//! Tracing setup for binaries embedding the client.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_DIRECTIVE: &str = "chathub=debug";

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive`. A second call is a no-op.
pub fn init(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
