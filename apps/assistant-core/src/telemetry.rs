//! Tracing Setup
//!
//! Structured logging via `tracing-subscriber` with an `RUST_LOG`-style
//! environment filter.
//!
//! # Usage
//!
//! ```ignore
//! assistant_core::telemetry::init("info");
//! ```

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber. `default_filter` applies when
/// `RUST_LOG` is unset. Safe to call more than once; later calls are no-ops.
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init("info");
        init("debug");
    }
}
