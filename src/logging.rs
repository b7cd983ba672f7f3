//! Structured logging setup.
//!
//! Everything is written to **stderr**; stdout belongs to the host that
//! launched the provider. Filtering follows `RUST_LOG`.
//!
//! ```bash
//! # Default: info
//! RUST_LOG=info ./provider
//!
//! # Watch change-token fetches and retries
//! RUST_LOG=hemmer_provider_aws::waf=debug ./provider
//!
//! # Every describe call while waiting for Kinesis
//! RUST_LOG=info,hemmer_provider_aws::kinesis=debug ./provider
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}

/// Install the stderr subscriber at `info` unless `RUST_LOG` says otherwise.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Like [`init_logging`] with a different fallback level.
///
/// ```ignore
/// hemmer_provider_aws::init_logging_with_default("debug");
/// ```
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(stderr_layer())
        .init();
}

/// Install the subscriber unless one is already set.
///
/// Returns `false` if a subscriber was already installed.
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(env_filter("info"))
        .with(stderr_layer())
        .try_init()
        .is_ok()
}
