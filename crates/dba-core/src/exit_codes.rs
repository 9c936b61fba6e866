//! Exit codes for the dba CLI.
//!
//! Exit code ranges:
//! - 0-9: Operational outcomes
//! - 10-19: User/environment errors (recoverable by user action)
//! - 20-29: Internal errors (bugs, should be reported)

use dba_common::ErrorCategory;

/// Exit codes for dba.
///
/// These codes are a stable contract for supervisors and scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Clean run (a bounded run whose cycles all succeeded)
    Clean = 0,

    /// The single `--once` cycle failed
    CycleFailed = 3,

    /// Invalid arguments, or `--help`
    ArgsError = 10,

    /// Bridge executable or platform tool missing
    CapabilityError = 11,

    /// Internal error (bug - please report)
    InternalError = 20,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == ExitCode::Clean
    }

    /// Exit code for a startup error.
    pub fn for_error(err: &dba_common::Error) -> Self {
        match err.category() {
            ErrorCategory::Config => ExitCode::ArgsError,
            ErrorCategory::Platform => ExitCode::CapabilityError,
            _ => ExitCode::InternalError,
        }
    }

    /// Error code name as a string constant (for JSON output).
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::CycleFailed => "ERR_CYCLE",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::CapabilityError => "ERR_CAPABILITY",
            ExitCode::InternalError => "ERR_INTERNAL",
        }
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
