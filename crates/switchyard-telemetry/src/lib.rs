//! Logging setup for Switchyard
//!
//! Installs a `tracing-subscriber` registry with an env filter and a fmt
//! layer that writes either human-readable or JSON lines.

use switchyard_config::{LogFormat, TelemetryConfig};
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber
///
/// `log_filter` is used when no telemetry section is configured. An
/// invalid filter directive falls back to `info`.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been installed
pub fn init(config: Option<&TelemetryConfig>, log_filter: &str) -> anyhow::Result<()> {
    let directive = config.map_or(log_filter, |c| c.log_filter.as_str());
    let format = config.map_or(LogFormat::Pretty, |c| c.format);

    tracing_subscriber::registry()
        .with(fmt_layer(format))
        .with(build_filter(directive))
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

/// Parse a filter directive, falling back to `info` when it is invalid
pub fn build_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn fmt_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Pretty => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}
