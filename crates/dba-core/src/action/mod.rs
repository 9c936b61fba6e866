//! Action execution: talking to the bridge and controlling processes.

pub mod bridge;
pub mod process;

pub use bridge::{AdbClient, BridgeClient, MAX_PORT_ENV};
#[cfg(unix)]
pub use process::PsProcessControl;
pub use process::{
    platform_process_control, PlatformProcessControl, ProcessControl, TasklistProcessControl,
};

use crate::collect::ToolError;
use dba_common::ProcessId;
use thiserror::Error;

/// Errors from bridge commands and process control.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("process {pid} not found")]
    ProcessNotFound { pid: ProcessId },

    #[error("permission denied for process {pid}")]
    PermissionDenied { pid: ProcessId },

    #[error("action failed: {0}")]
    Failed(String),
}

impl From<ActionError> for dba_common::Error {
    fn from(err: ActionError) -> Self {
        match err {
            ActionError::Tool(e) => e.into(),
            ActionError::ProcessNotFound { pid } => dba_common::Error::ProcessNotFound { pid: pid.0 },
            ActionError::PermissionDenied { pid } => {
                dba_common::Error::PermissionDenied { pid: pid.0 }
            }
            ActionError::Failed(msg) => dba_common::Error::ActionFailed(msg),
        }
    }
}
