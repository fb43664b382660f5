//! Logging setup for pipeline binaries and tests.
//!
//! Library code only emits `tracing` events; subscribers are the caller's
//! business. This helper installs a stderr subscriber honoring RUST_LOG.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize a stderr subscriber. Safe to call more than once; later
/// calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sentinel_pipeline=debug"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
    }
}
