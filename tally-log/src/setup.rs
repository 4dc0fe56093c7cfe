use std::env;

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, prelude::*};

use crate::CRATE_NAMES;

/// Controls the log format.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    #[default]
    Auto,

    /// Pretty printing with colors.
    ///
    /// ```text
    ///  INFO  tally_storage::storage: evicted expired partitions
    /// ```
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2020-12-04T12:10:32Z  INFO tally_storage::storage: evicted expired partitions
    /// ```
    Simplified,

    /// Dump out JSON lines.
    ///
    /// ```text
    /// {"timestamp":"2020-12-04T12:11:08.729716Z","level":"INFO","target":"tally_storage::storage","message":"evicted expired partitions"}
    /// ```
    Json,
}

/// The logging level parameter.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Disables all logging.
    Off,
    /// The "error" level.
    Error,
    /// The "warn" level.
    Warn,
    /// The "info" level.
    #[default]
    Info,
    /// The "debug" level.
    Debug,
    /// The "trace" level.
    Trace,
}

impl Level {
    /// Returns the tracing [`LevelFilter`].
    pub const fn level_filter(&self) -> LevelFilter {
        match self {
            Level::Off => LevelFilter::OFF,
            Level::Error => LevelFilter::ERROR,
            Level::Warn => LevelFilter::WARN,
            Level::Info => LevelFilter::INFO,
            Level::Debug => LevelFilter::DEBUG,
            Level::Trace => LevelFilter::TRACE,
        }
    }
}

/// Controls the logging system.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// The log level for Tally.
    pub level: Level,

    /// Controls the log output format.
    ///
    /// Defaults to [`LogFormat::Auto`], which detects the best format based on the TTY.
    pub format: LogFormat,
}

/// Builds the filter used when `RUST_LOG` is not set.
///
/// Third-party crates log at `INFO`, all workspace crates at `TRACE`. The configured level is
/// applied on top of this filter.
fn default_filters() -> EnvFilter {
    let mut env_filter = EnvFilter::new("INFO");

    for name in CRATE_NAMES {
        if let Ok(directive) = format!("{name}=TRACE").parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    env_filter
}

/// Initialize the logging system.
///
/// Calling this more than once keeps the first subscriber and ignores subsequent calls.
///
/// # Example
///
/// ```
/// let log_config = tally_log::LogConfig {
///     level: tally_log::Level::Debug,
///     ..Default::default()
/// };
///
/// tally_log::init(&log_config);
/// ```
pub fn init(config: &LogConfig) {
    let subscriber = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let format = match (config.format, console::user_attended_stderr()) {
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => {
            subscriber.compact().without_time().boxed()
        }
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => {
            subscriber.with_ansi(false).boxed()
        }
        (LogFormat::Json, _) => subscriber
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
    };

    let env_filter = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) => EnvFilter::new(value),
        Err(_) => default_filters(),
    };

    tracing_subscriber::registry()
        .with(format.with_filter(config.level.level_filter()))
        .with(env_filter)
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: LogConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.level, Level::Info);
        assert_eq!(config.format, LogFormat::Auto);
    }

    #[test]
    fn test_config_lowercase() {
        let config: LogConfig =
            serde_json::from_str(r#"{"level": "trace", "format": "json"}"#).unwrap();
        assert_eq!(config.level.level_filter(), LevelFilter::TRACE);
        assert_eq!(config.format, LogFormat::Json);
    }
}
