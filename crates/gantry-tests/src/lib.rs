//! Integration test infrastructure for Gantry.
//!
//! Provides workflow fixtures and an in-process harness that wires the
//! coordinator to the in-memory adapters and drives runs with scripted
//! job outcomes.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,gantry_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}
