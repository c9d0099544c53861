//! Process-wide `tracing` subscriber setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{LogConfig, LogFormat};

/// Builds the filter from the base level plus per-target overrides.
///
/// # Errors
///
/// Fails if a directive does not parse.
pub fn build_env_filter(config: &LogConfig) -> anyhow::Result<EnvFilter> {
    let mut directives = vec![config.level.clone()];
    for (target, level) in &config.targets {
        directives.push(format!("{target}={level}"));
    }
    let filter = directives.join(",");
    EnvFilter::try_new(&filter).map_err(|e| anyhow::anyhow!("invalid tracing filter {filter:?}: {e}"))
}

/// Installs the global subscriber writing to stderr.
///
/// # Errors
///
/// Fails for an invalid filter, or when a global subscriber is already set
/// (including by an earlier call). Nothing is replaced in that case.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let filter = build_env_filter(config)?;
    let layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_filter(filter)
            .boxed(),
    };
    tracing_subscriber::registry().with(layer).try_init()?;
    tracing::debug!(level = %config.level, format = ?config.format, "logging initialized");
    Ok(())
}
