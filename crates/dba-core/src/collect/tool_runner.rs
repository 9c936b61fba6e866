//! Tool runner with timeout and output cap.
//!
//! All external commands (socket table, device list, process list,
//! disconnect, start-server) go through here:
//!
//! - Per-command timeout; the child is killed when it expires
//! - Output size cap to bound memory
//! - Pipes drained on helper threads so a chatty child cannot block
//! - Background launch for fire-and-forget connect attempts
//!
//! # Example
//!
//! ```ignore
//! use dba_core::collect::tool_runner::{ToolRunner, ToolSpec};
//!
//! let runner = ToolRunner::with_defaults();
//! let output = runner.run(&ToolSpec::new("adb", ["devices", "-l"]))?;
//! println!("{}", output.stdout_str());
//! ```

use serde::Serialize;
use std::io::Read;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Default timeout per command in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Default maximum output size in bytes (4MB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 4 * 1024 * 1024;

/// Polling interval while waiting for a child to exit.
const WAIT_POLL_MS: u64 = 10;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Errors that can occur during tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("command failed to spawn: {command}: {reason}")]
    SpawnFailed { command: String, reason: String },

    #[error("command `{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("command `{command}` exited with status {code}: {stderr}")]
    NonZeroExit {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("command `{command}` killed by signal")]
    Killed { command: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ToolError> for dba_common::Error {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::Timeout { command, timeout } => dba_common::Error::CommandTimeout {
                command,
                millis: timeout.as_millis() as u64,
            },
            ToolError::Io(e) => dba_common::Error::Io(e),
            other => dba_common::Error::Collection(other.to_string()),
        }
    }
}

/// Output from a tool execution.
#[derive(Debug, Clone, Serialize)]
pub struct ToolOutput {
    /// Command line that was executed.
    pub command: String,

    /// Standard output (may be truncated).
    pub stdout: Vec<u8>,

    /// Standard error (may be truncated).
    pub stderr: Vec<u8>,

    /// Exit code (if the process exited normally).
    pub exit_code: Option<i32>,

    /// Whether either stream was truncated.
    pub truncated: bool,

    /// Execution duration.
    pub duration: Duration,
}

impl ToolOutput {
    /// Get stdout as string (lossy UTF-8 conversion).
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as string (lossy UTF-8 conversion).
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero exit into an error.
    pub fn into_success(self) -> Result<Self, ToolError> {
        match self.exit_code {
            Some(0) => Ok(self),
            Some(code) => Err(ToolError::NonZeroExit {
                command: self.command.clone(),
                code,
                stderr: self.stderr_str().trim().to_string(),
            }),
            None => Err(ToolError::Killed {
                command: self.command,
            }),
        }
    }
}

/// Specification for a tool to run.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Command to execute.
    pub command: String,

    /// Arguments to pass.
    pub args: Vec<String>,

    /// Extra environment variables.
    pub env: Vec<(String, String)>,

    /// Override timeout (None = use default).
    pub timeout: Option<Duration>,

    /// Do not capture output (for commands that leave daemons behind).
    pub discard_output: bool,
}

impl ToolSpec {
    /// Create a new tool specification.
    pub fn new<I, S>(command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            timeout: None,
            discard_output: false,
        }
    }

    /// Set custom timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add environment variables.
    pub fn with_env<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.env.extend(vars);
        self
    }

    /// Send stdout/stderr to the null device.
    pub fn discarding_output(mut self) -> Self {
        self.discard_output = true;
        self
    }

    /// Human-readable command line for logs and errors.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }

    fn build(&self) -> Command {
        let mut command = Command::new(&self.command);
        command.args(&self.args);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            command.creation_flags(CREATE_NO_WINDOW);
        }
        command
    }
}

/// Configuration for the tool runner.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Default timeout per command.
    pub default_timeout: Duration,

    /// Maximum output size per stream in bytes.
    pub max_output_bytes: usize,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

/// Runs external commands with timeout and output limits.
#[derive(Debug, Clone, Default)]
pub struct ToolRunner {
    config: ToolConfig,
}

impl ToolRunner {
    /// Create a new tool runner with the given configuration.
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    /// Create a tool runner with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ToolConfig::default())
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// Run a command to completion and capture its output.
    ///
    /// A command still running at its deadline is killed and reported as
    /// [`ToolError::Timeout`]. A non-zero exit is not an error here; use
    /// [`ToolOutput::into_success`] where it should be.
    pub fn run(&self, spec: &ToolSpec) -> Result<ToolOutput, ToolError> {
        let timeout = spec.timeout.unwrap_or(self.config.default_timeout);
        let command_line = spec.display();
        debug!(command = %command_line, timeout_ms = timeout.as_millis() as u64, "running tool");

        let start = Instant::now();
        let (stdout_cfg, stderr_cfg) = if spec.discard_output {
            (Stdio::null(), Stdio::null())
        } else {
            (Stdio::piped(), Stdio::piped())
        };
        let mut child = spec
            .build()
            .stdin(Stdio::null())
            .stdout(stdout_cfg)
            .stderr(stderr_cfg)
            .spawn()
            .map_err(|e| ToolError::SpawnFailed {
                command: command_line.clone(),
                reason: e.to_string(),
            })?;

        let truncated = Arc::new(AtomicBool::new(false));
        let stdout_reader = spawn_reader(child.stdout.take(), self.config.max_output_bytes, &truncated);
        let stderr_reader = spawn_reader(child.stderr.take(), self.config.max_output_bytes, &truncated);

        let deadline = start + timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                warn!(command = %command_line, pid = child.id(), "command timed out, killing");
                kill_child(&mut child);
                // Reader threads may still hold pipes inherited by
                // grandchildren; they are left to finish on their own.
                return Err(ToolError::Timeout {
                    command: command_line,
                    timeout,
                });
            }
            thread::sleep(Duration::from_millis(WAIT_POLL_MS));
        };

        let stdout = join_reader(stdout_reader);
        let stderr = join_reader(stderr_reader);
        let duration = start.elapsed();

        trace!(
            command = %command_line,
            duration_ms = duration.as_millis() as u64,
            exit_code = ?status.code(),
            "tool execution complete"
        );

        Ok(ToolOutput {
            command: command_line,
            stdout,
            stderr,
            exit_code: status.code(),
            truncated: truncated.load(Ordering::Relaxed),
            duration,
        })
    }

    /// Launch a command in the background without waiting for it.
    ///
    /// Output goes to the null device. The caller owns the returned handle
    /// and is responsible for reaping or killing it.
    pub fn spawn_detached(&self, spec: &ToolSpec) -> Result<Child, ToolError> {
        let command_line = spec.display();
        let child = spec
            .build()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ToolError::SpawnFailed {
                command: command_line.clone(),
                reason: e.to_string(),
            })?;
        debug!(command = %command_line, pid = child.id(), "launched background tool");
        Ok(child)
    }
}

/// Either half of a child's captured output.
enum Pipe {
    Out(ChildStdout),
    Err(ChildStderr),
}

impl Read for Pipe {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Pipe::Out(p) => p.read(buf),
            Pipe::Err(p) => p.read(buf),
        }
    }
}

impl From<ChildStdout> for Pipe {
    fn from(p: ChildStdout) -> Self {
        Pipe::Out(p)
    }
}

impl From<ChildStderr> for Pipe {
    fn from(p: ChildStderr) -> Self {
        Pipe::Err(p)
    }
}

fn spawn_reader<P: Into<Pipe>>(
    pipe: Option<P>,
    limit: usize,
    truncated: &Arc<AtomicBool>,
) -> Option<thread::JoinHandle<Vec<u8>>> {
    let mut pipe: Pipe = pipe?.into();
    let truncated = Arc::clone(truncated);
    Some(thread::spawn(move || {
        let mut buf = Vec::with_capacity(limit.min(64 * 1024));
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    let space = limit.saturating_sub(buf.len());
                    if n > space {
                        truncated.store(true, Ordering::Relaxed);
                    }
                    buf.extend_from_slice(&chunk[..n.min(space)]);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        buf
    }))
}

fn join_reader(handle: Option<thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    match handle {
        Some(h) => h.join().unwrap_or_else(|_| {
            warn!("output reader thread panicked");
            Vec::new()
        }),
        None => Vec::new(),
    }
}

fn kill_child(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!(pid = child.id(), error = %e, "kill after timeout failed");
    }
    let _ = child.wait();
}
