//! # bazaar-logging
//!
//! Global `tracing` subscriber setup.
//!
//! Output goes to stderr, either compact human-readable lines or JSON
//! lines with span context. `RUST_LOG` takes precedence over the filter
//! built from [`LoggingSettings`].

#![deny(unsafe_code)]

use bazaar_settings::LoggingSettings;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Build the env filter: `RUST_LOG` if set, otherwise the settings directive.
pub fn build_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.filter_directive()))
}

/// Initialize the global tracing subscriber. Call once at startup.
///
/// Later calls are no-ops.
pub fn init_logging(settings: &LoggingSettings) {
    let filter = build_filter(settings);

    if settings.json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr);
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact();
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init();
    }
}

/// Initialize a test subscriber at `level`, ignoring repeat calls.
pub fn init_test_logging(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_test_writer()
        .try_init();
}
