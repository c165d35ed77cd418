//! Tracing setup for procchan
//!
//! Hosts log to stdout. Workers must never write logs to stdout because it
//! carries the IPC frames, so their subscriber writes to stderr.

use anyhow::Result;
use procchan_config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Where formatted log lines go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Stdout,
    Stderr,
}

/// Initialize logging from configuration for a host process
pub fn init_logging_from_config(config: &LoggingConfig) -> Result<()> {
    init_with_target(config, LogTarget::Stdout)
}

/// Initialize logging for a worker process (stderr only)
pub fn init_worker_logging(config: &LoggingConfig) -> Result<()> {
    init_with_target(config, LogTarget::Stderr)
}

/// Initialize simple tracing for basic console output
pub fn init_simple_tracing(log_level: &str) -> Result<()> {
    let env_filter = build_filter(log_level);

    // Use try_init to avoid panic if global subscriber already set
    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

fn init_with_target(config: &LoggingConfig, target: LogTarget) -> Result<()> {
    let env_filter = build_filter(&config.filter_directives());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_ansi(target == LogTarget::Stdout);

    let result = match (config.format, target) {
        (LogFormat::Json, LogTarget::Stdout) => builder.json().try_init(),
        (LogFormat::Json, LogTarget::Stderr) => {
            builder.json().with_writer(std::io::stderr).try_init()
        }
        (LogFormat::Compact, LogTarget::Stdout) => builder.compact().try_init(),
        (LogFormat::Compact, LogTarget::Stderr) => {
            builder.compact().with_writer(std::io::stderr).try_init()
        }
        (LogFormat::Pretty, LogTarget::Stdout) => builder.pretty().try_init(),
        (LogFormat::Pretty, LogTarget::Stderr) => {
            builder.pretty().with_writer(std::io::stderr).try_init()
        }
        (LogFormat::Text, LogTarget::Stdout) => builder.try_init(),
        (LogFormat::Text, LogTarget::Stderr) => builder.with_writer(std::io::stderr).try_init(),
    };

    if result.is_err() {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

/// Configured directives win; `RUST_LOG` is the fallback, then `info`.
fn build_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
