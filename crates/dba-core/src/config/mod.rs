//! Runtime configuration for the poll loop.
//!
//! Configuration comes from command-line flags (with `DBA_*` environment
//! fallbacks handled by clap) and is validated once at startup. After that it
//! is read-only for the lifetime of the process.

pub mod policy;

pub use policy::{ConnectPolicy, SkipReason, DEFAULT_EXCLUDED_PORTS, DEFAULT_MIN_PORT};

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default bridge executable, resolved through `PATH`.
pub const DEFAULT_BRIDGE_PATH: &str = "adb";

/// Default wait after launching connect attempts.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 2000;

/// Default wait between poll cycles.
pub const DEFAULT_LOOP_DELAY_MS: u64 = 1000;

/// Default timeout for one snapshot or disconnect command.
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 10_000;

/// Errors that can occur while building the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("bridge executable path is empty")]
    EmptyBridgePath,

    #[error("bridge executable `{name}` not found: {reason}")]
    BridgeNotFound { name: String, reason: String },

    #[error("invalid value for {flag}: {message}")]
    InvalidValue { flag: &'static str, message: String },
}

impl From<ConfigError> for dba_common::Error {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::BridgeNotFound { .. } => {
                dba_common::Error::CapabilityMissing(err.to_string())
            }
            ConfigError::InvalidValue { flag, message } => dba_common::Error::InvalidFlag {
                flag: flag.to_string(),
                value: message,
            },
            ConfigError::EmptyBridgePath => dba_common::Error::Config(err.to_string()),
        }
    }
}

/// Validated poll loop configuration.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Full path of the bridge executable.
    pub bridge_path: PathBuf,
    /// Which endpoints are eligible for connection.
    pub policy: ConnectPolicy,
    /// Write the bridge's max-port environment setting before each cycle.
    pub limit_port: bool,
    /// Wait after launching connect attempts before the hung-attempt check.
    pub settle_delay: Duration,
    /// Wait between cycles.
    pub loop_delay: Duration,
    /// Timeout for each blocking external command.
    pub command_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            bridge_path: PathBuf::from(DEFAULT_BRIDGE_PATH),
            policy: ConnectPolicy::default(),
            limit_port: true,
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            loop_delay: Duration::from_millis(DEFAULT_LOOP_DELAY_MS),
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
        }
    }
}

impl PollConfig {
    /// Executable file name used to find connect attempts in the process list.
    pub fn bridge_executable(&self) -> String {
        self.bridge_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.bridge_path.to_string_lossy().into_owned())
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bridge_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyBridgePath);
        }
        if self.command_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                flag: "--command-timeout",
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Resolve the bridge executable to a full path.
///
/// An existing path is used as given; anything else is looked up on `PATH`.
pub fn resolve_bridge_path(raw: &str) -> Result<PathBuf, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ConfigError::EmptyBridgePath);
    }
    let path = Path::new(raw);
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    which::which(raw).map_err(|e| ConfigError::BridgeNotFound {
        name: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_flags() {
        let config = PollConfig::default();
        assert_eq!(config.bridge_path, PathBuf::from("adb"));
        assert_eq!(config.policy.min_port, 5550);
        assert!(config.limit_port);
        assert_eq!(config.settle_delay, Duration::from_millis(2000));
        assert_eq!(config.loop_delay, Duration::from_millis(1000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bridge_executable_is_file_name() {
        let config = PollConfig {
            bridge_path: PathBuf::from("/opt/platform-tools/adb"),
            ..PollConfig::default()
        };
        assert_eq!(config.bridge_executable(), "adb");
    }

    #[test]
    fn validate_rejects_empty_path_and_zero_timeout() {
        let config = PollConfig {
            bridge_path: PathBuf::new(),
            ..PollConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyBridgePath)
        ));

        let config = PollConfig {
            command_timeout: Duration::ZERO,
            ..PollConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn resolve_rejects_empty_and_unknown() {
        assert!(matches!(
            resolve_bridge_path("  "),
            Err(ConfigError::EmptyBridgePath)
        ));
        assert!(matches!(
            resolve_bridge_path("definitely-not-a-real-bridge-binary-4821"),
            Err(ConfigError::BridgeNotFound { .. })
        ));
    }

    #[test]
    fn resolve_accepts_existing_file() {
        // The test binary itself is a file that certainly exists.
        let exe = std::env::current_exe().unwrap();
        let resolved = resolve_bridge_path(exe.to_str().unwrap()).unwrap();
        assert_eq!(resolved, exe);
    }

    #[test]
    fn config_error_maps_to_common_error() {
        let err: dba_common::Error = ConfigError::BridgeNotFound {
            name: "adb".into(),
            reason: "cannot find binary path".into(),
        }
        .into();
        assert_eq!(err.category(), dba_common::ErrorCategory::Platform);
    }
}
