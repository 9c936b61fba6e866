//! Socket table sources.
//!
//! The poll loop only needs the raw text of the platform's listening-socket
//! table; the snapshot parsers understand every format listed here.

use super::tool_runner::{ToolError, ToolRunner, ToolSpec};
use std::time::Duration;

/// Produces the raw socket-table dump for one cycle.
pub trait SocketTableSource {
    fn read_socket_table(&mut self) -> Result<String, ToolError>;
}

/// Command that lists TCP sockets on this platform.
///
/// - Windows: `netstat -a -n -o -p TCP`
/// - Linux: `ss -ltn`
/// - macOS and other unixes: `lsof -nP -iTCP -sTCP:LISTEN`
pub fn platform_socket_command() -> ToolSpec {
    if cfg!(windows) {
        ToolSpec::new("netstat", ["-a", "-n", "-o", "-p", "TCP"])
    } else if cfg!(target_os = "linux") {
        ToolSpec::new("ss", ["-ltn"])
    } else {
        ToolSpec::new("lsof", ["-nP", "-iTCP", "-sTCP:LISTEN"])
    }
}

/// Reads the socket table by running the platform command.
#[derive(Debug, Clone)]
pub struct SystemSocketTable {
    runner: ToolRunner,
    spec: ToolSpec,
}

impl SystemSocketTable {
    pub fn new(runner: ToolRunner, timeout: Duration) -> Self {
        Self::with_command(runner, platform_socket_command().with_timeout(timeout))
    }

    /// Use a custom command instead of the platform default.
    pub fn with_command(runner: ToolRunner, spec: ToolSpec) -> Self {
        Self { runner, spec }
    }
}

impl SocketTableSource for SystemSocketTable {
    fn read_socket_table(&mut self) -> Result<String, ToolError> {
        let output = self.runner.run(&self.spec)?;
        // lsof exits 1 when nothing is listening; an empty table is still a table.
        if !output.success() && !output.stdout.is_empty() {
            tracing::debug!(
                command = %output.command,
                exit_code = ?output.exit_code,
                "socket table command exited non-zero, using its output"
            );
            return Ok(output.stdout_str());
        }
        Ok(output.into_success()?.stdout_str())
    }
}
