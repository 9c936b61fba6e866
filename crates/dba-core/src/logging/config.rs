//! Logging configuration.
//!
//! Sources, lowest precedence first:
//! - `RUST_LOG` (the most verbose level it names)
//! - `DBA_LOG`, `DBA_LOG_FORMAT` and `DBA_LOG_TIMESTAMPS`
//! - CLI flags (`--print-output`, `--log-format`, `--no-color`)

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::filter::{LevelFilter, Targets};

/// Where log lines are rendered for a person or for a log shipper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    #[value(alias = "console", alias = "pretty")]
    Human,
    /// One JSON object per line.
    #[value(alias = "json")]
    Jsonl,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
    }
}

/// Ordered from most to least verbose.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    /// Failures and skipped actions only.
    #[default]
    #[value(alias = "warning")]
    Warn,
    Error,
    #[value(alias = "none", alias = "quiet")]
    Off,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Off => "off",
        }
    }

    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Off => LevelFilter::OFF,
        }
    }

    fn from_filter(filter: LevelFilter) -> Self {
        Self::value_variants()
            .iter()
            .copied()
            .find(|level| level.as_filter() == filter)
            .unwrap_or_default()
    }

    /// Most verbose level named anywhere in a `RUST_LOG` style directive
    /// list, or `None` when the list does not parse as plain targets.
    fn from_directives(directives: &str) -> Option<Self> {
        let targets: Targets = directives.parse().ok()?;
        let max = targets
            .iter()
            .map(|(_, filter)| filter)
            .chain(targets.default_level())
            .max()?;
        Some(Self::from_filter(max))
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// ANSI colors for human output; only honoured when stderr is a terminal.
    pub color: bool,
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::Human,
            level: LogLevel::Warn,
            color: false,
            timestamps: true,
        }
    }
}

impl LogConfig {
    /// Resolve from the process environment, then apply CLI overrides.
    pub fn from_env(cli_level: Option<LogLevel>, cli_format: Option<LogFormat>) -> Self {
        Self::from_vars(|key| std::env::var(key).ok(), cli_level, cli_format)
    }

    /// [`from_env`](Self::from_env) over an arbitrary variable lookup.
    pub fn from_vars<F>(var: F, cli_level: Option<LogLevel>, cli_format: Option<LogFormat>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_level = match var("DBA_LOG") {
            Some(val) => val.parse().ok(),
            None => var("RUST_LOG").and_then(|val| LogLevel::from_directives(&val)),
        };
        let env_format = var("DBA_LOG_FORMAT").and_then(|val| val.parse().ok());
        let env_timestamps = var("DBA_LOG_TIMESTAMPS").map(|val| {
            !matches!(val.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off")
        });

        let defaults = LogConfig::default();
        LogConfig {
            level: cli_level.or(env_level).unwrap_or(defaults.level),
            format: cli_format.or(env_format).unwrap_or(defaults.format),
            timestamps: env_timestamps.unwrap_or(defaults.timestamps),
            ..defaults
        }
    }

    /// At least debug level, with colors allowed.
    pub fn verbose(mut self) -> Self {
        self.level = self.level.min(LogLevel::Debug);
        self.color = true;
        self
    }

    pub fn with_color(mut self, enabled: bool) -> Self {
        self.color = enabled;
        self
    }

    /// Env-filter directives covering the library and the binary.
    pub fn filter_directives(&self) -> String {
        format!("dba_core={level},dba={level}", level = self.level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn format_aliases_ignore_case() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Jsonl));
        assert_eq!("pretty".parse::<LogFormat>(), Ok(LogFormat::Human));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn level_aliases_and_display() {
        assert_eq!("warning".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert_eq!("Quiet".parse::<LogLevel>(), Ok(LogLevel::Off));
        assert!("loud".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::Debug.to_string(), "debug");
    }

    #[test]
    fn empty_environment_is_quiet() {
        let config = LogConfig::from_vars(lookup(&[]), None, None);
        assert_eq!(config, LogConfig::default());
        assert_eq!(config.level, LogLevel::Warn);
        assert!(!config.color);
    }

    #[test]
    fn dba_log_shadows_rust_log() {
        let config = LogConfig::from_vars(
            lookup(&[("DBA_LOG", "error"), ("RUST_LOG", "debug"), ("DBA_LOG_FORMAT", "jsonl")]),
            None,
            None,
        );
        assert_eq!(config.level, LogLevel::Error);
        assert_eq!(config.format, LogFormat::Jsonl);
    }

    #[test]
    fn rust_log_takes_most_verbose_directive() {
        let config = LogConfig::from_vars(
            lookup(&[("RUST_LOG", "warn,dba_core=trace,hyper=info")]),
            None,
            None,
        );
        assert_eq!(config.level, LogLevel::Trace);

        let config = LogConfig::from_vars(lookup(&[("RUST_LOG", "info")]), None, None);
        assert_eq!(config.level, LogLevel::Info);
    }

    #[test]
    fn unparseable_env_values_keep_defaults() {
        let config = LogConfig::from_vars(
            lookup(&[("DBA_LOG", "loud"), ("DBA_LOG_FORMAT", "xml")]),
            None,
            None,
        );
        assert_eq!(config, LogConfig::default());
    }

    #[test]
    fn timestamps_can_be_turned_off() {
        assert!(LogConfig::from_vars(lookup(&[]), None, None).timestamps);
        let config = LogConfig::from_vars(lookup(&[("DBA_LOG_TIMESTAMPS", "Off")]), None, None);
        assert!(!config.timestamps);
        let config = LogConfig::from_vars(lookup(&[("DBA_LOG_TIMESTAMPS", "1")]), None, None);
        assert!(config.timestamps);
    }

    #[test]
    fn cli_beats_environment() {
        let config = LogConfig::from_vars(
            lookup(&[("DBA_LOG", "error"), ("DBA_LOG_FORMAT", "jsonl")]),
            Some(LogLevel::Info),
            Some(LogFormat::Human),
        );
        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.format, LogFormat::Human);
    }

    #[test]
    fn verbose_never_lowers_detail() {
        let config = LogConfig::default().verbose();
        assert_eq!(config.level, LogLevel::Debug);
        assert!(config.color);

        let config = LogConfig {
            level: LogLevel::Trace,
            ..LogConfig::default()
        }
        .verbose();
        assert_eq!(config.level, LogLevel::Trace);
    }

    #[test]
    fn directives_cover_library_and_binary() {
        let config = LogConfig {
            level: LogLevel::Debug,
            ..LogConfig::default()
        };
        assert_eq!(config.filter_directives(), "dba_core=debug,dba=debug");
    }
}
