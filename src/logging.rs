/*!
 * Logging and tracing initialization
 */

use std::fs::OpenOptions;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::ConsoleConfig;
use crate::error::{Result, SacristanError};

/// Initialize structured logging based on configuration.
///
/// Without a log file, compact human-readable lines go to stderr so
/// they never interleave with command output on stdout. With a log
/// file, JSON lines are appended; an existing file is never truncated.
pub fn init_logging(config: &ConsoleConfig) -> Result<()> {
    let env_filter = build_filter(config)?;

    match &config.log_file {
        None => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_span_events(FmtSpan::NONE)
                .compact();
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
        }
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    SacristanError::Config(format!(
                        "failed to open log file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
            let fmt_layer = fmt::layer()
                .with_writer(file)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE)
                .with_ansi(false)
                .json();
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
        }
    }

    Ok(())
}

/// Env filter honouring `RUST_LOG`, falling back to the configured
/// level. `verbose` wins over `log_level`.
fn build_filter(config: &ConsoleConfig) -> Result<EnvFilter> {
    let log_level = if config.verbose {
        Level::DEBUG
    } else {
        config.log_level.to_tracing_level()
    };

    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("sacristan={log_level}")))
        .map_err(|e| SacristanError::Config(format!("failed to create log filter: {e}")))
}

/// Capture-friendly subscriber for tests. Safe to call repeatedly.
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("sacristan=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_filter_builds_for_every_level() {
        for log_level in [
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ] {
            let config = ConsoleConfig {
                log_level,
                ..Default::default()
            };
            assert!(build_filter(&config).is_ok());
        }
    }

    #[test]
    fn test_verbose_wins_over_configured_level() {
        init_test_logging();
        let config = ConsoleConfig {
            log_level: LogLevel::Error,
            verbose: true,
            ..Default::default()
        };
        assert!(build_filter(&config).is_ok());
        tracing::debug!("captured by the test writer");
    }
}
