//! Shared tracing setup for binaries and tests.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::FmtSubscriber;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    Pretty,
    #[default]
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            other => return Err(format!("unknown log format: {other}")),
        })
    }
}

fn env_filter(default_level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy()
}

/// Configure the global logger.
///
/// `RUST_LOG` overrides `default_level`. Calling this more than once is a
/// no-op, the first subscriber stays installed.
pub fn configure_global_logger(default_level: Level, format: LogFormat) {
    let builder = FmtSubscriber::builder()
        .with_env_filter(env_filter(default_level))
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true);

    let result = match format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish()),
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish()),
        LogFormat::Compact => tracing::subscriber::set_global_default(builder.compact().finish()),
    };

    if result.is_err() {
        tracing::debug!("global logger already configured");
    }
}

/// Install a subscriber that writes through the test harness so output is
/// captured per test.
pub fn init_test() {
    let subscriber = FmtSubscriber::builder()
        .with_test_writer()
        .with_env_filter(env_filter(Level::TRACE))
        .with_file(true)
        .with_line_number(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_format() {
        assert_eq!(LogFormat::Json, "json".parse().unwrap());
        assert_eq!(LogFormat::Pretty, "pretty".parse().unwrap());
        assert_eq!(LogFormat::Compact, "compact".parse().unwrap());
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn configure_twice() {
        init_test();
        configure_global_logger(Level::INFO, LogFormat::Compact);
    }
}
