//! Error types for Device Bridge Autoconnect.
//!
//! Errors carry a stable numeric code, a category for grouping, and a
//! recoverability hint. Only configuration and capability errors are fatal;
//! everything raised inside a poll cycle is logged and the loop continues.
//!
//! # Human-Facing Output
//!
//! ```text
//! ✗ Configuration Error
//!   Reason: configuration error: --min-port must be between 0 and 65535
//!   Fix: Check the flag values; run with --help for usage.
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Flag values and startup configuration.
    Config,
    /// Socket table, device list, and process list collection.
    Collection,
    /// Connect, disconnect, and terminate actions.
    Action,
    /// Pipes and process spawning.
    Io,
    /// Missing external tools.
    Platform,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Config => "config",
            ErrorCategory::Collection => "collection",
            ErrorCategory::Action => "action",
            ErrorCategory::Io => "io",
            ErrorCategory::Platform => "platform",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for Device Bridge Autoconnect.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid value for {flag}: {value}")]
    InvalidFlag { flag: String, value: String },

    // Collection errors (20-29)
    #[error("snapshot collection failed: {0}")]
    Collection(String),

    #[error("command `{command}` timed out after {millis}ms")]
    CommandTimeout { command: String, millis: u64 },

    // Action errors (40-49)
    #[error("action failed: {0}")]
    ActionFailed(String),

    #[error("process {pid} not found")]
    ProcessNotFound { pid: u32 },

    #[error("permission denied signalling process {pid}")]
    PermissionDenied { pid: u32 },

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Platform errors (70-79)
    #[error("capability not available: {0}")]
    CapabilityMissing(String),
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Collection errors
    /// - 40-49: Action errors
    /// - 60-69: I/O errors
    /// - 70-79: Platform errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidFlag { .. } => 11,
            Error::Collection(_) => 20,
            Error::CommandTimeout { .. } => 21,
            Error::ActionFailed(_) => 40,
            Error::ProcessNotFound { .. } => 41,
            Error::PermissionDenied { .. } => 42,
            Error::Io(_) => 60,
            Error::CapabilityMissing(_) => 70,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::InvalidFlag { .. } => ErrorCategory::Config,
            Error::Collection(_) | Error::CommandTimeout { .. } => ErrorCategory::Collection,
            Error::ActionFailed(_)
            | Error::ProcessNotFound { .. }
            | Error::PermissionDenied { .. } => ErrorCategory::Action,
            Error::Io(_) => ErrorCategory::Io,
            Error::CapabilityMissing(_) => ErrorCategory::Platform,
        }
    }

    /// Whether a later poll cycle may succeed where this one failed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Error::Config(_)
                | Error::InvalidFlag { .. }
                | Error::PermissionDenied { .. }
                | Error::CapabilityMissing(_)
        )
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) | Error::InvalidFlag { .. } => {
                "Check the flag values; run with --help for usage."
            }
            Error::Collection(_) => {
                "Check that netstat/ss and the adb client run from this shell."
            }
            Error::CommandTimeout { .. } => {
                "The command hung. If persistent, restart the adb server with 'adb kill-server'."
            }
            Error::ActionFailed(_) => "The action is retried on the next poll cycle.",
            Error::ProcessNotFound { .. } => {
                "The process exited before it could be terminated. Nothing to do."
            }
            Error::PermissionDenied { .. } => {
                "The connect attempt belongs to another user. Run as the same user as the adb server."
            }
            Error::Io(_) => "Retried on the next poll cycle.",
            Error::CapabilityMissing(_) => {
                "Install the Android platform tools or pass --adb-path with the full executable path."
            }
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) | Error::InvalidFlag { .. } => "Configuration Error",
            Error::Collection(_) => "Snapshot Collection Error",
            Error::CommandTimeout { .. } => "Command Timeout",
            Error::ActionFailed(_) => "Action Failed",
            Error::ProcessNotFound { .. } => "Process Not Found",
            Error::PermissionDenied { .. } => "Permission Denied",
            Error::Io(_) => "I/O Error",
            Error::CapabilityMissing(_) => "Missing Capability",
        }
    }

    /// Formats the error as headline, reason, and fix lines.
    pub fn to_human(&self) -> String {
        format!(
            "✗ {}\n  Reason: {}\n  Fix: {}",
            self.headline(),
            self,
            self.remediation()
        )
    }
}

/// Serialisable form of [`Error`], embedded in cycle reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: u32,
    pub category: ErrorCategory,
    pub message: String,
    pub recoverable: bool,
    /// Variant fields (pid, command, flag) keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let context: Vec<(&str, Value)> = match err {
            Error::ProcessNotFound { pid } | Error::PermissionDenied { pid } => {
                vec![("pid", json!(pid))]
            }
            Error::CommandTimeout { command, millis } => {
                vec![("command", json!(command)), ("timeout_ms", json!(millis))]
            }
            Error::InvalidFlag { flag, value } => {
                vec![("flag", json!(flag)), ("value", json!(value))]
            }
            _ => Vec::new(),
        };

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            context: context
                .into_iter()
                .map(|(key, value)| (key.to_owned(), value))
                .collect(),
        }
    }
}

impl StructuredError {
    /// Attach one more context entry. Values that fail to serialise are dropped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.context.insert(key.into(), value);
        }
        self
    }
}
