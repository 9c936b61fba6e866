//! Process listing and forced termination for hung connect attempts.

use super::ActionError;
use crate::collect::{
    extract_process_entry, extract_tasklist_entry, ProcessEntry, ToolError, ToolRunner, ToolSpec,
};
use dba_common::ProcessId;
use std::time::Duration;
use tracing::debug;

/// Lists and kills processes by executable name and pid.
pub trait ProcessControl {
    /// Running processes whose executable matches `executable`.
    fn list(&mut self, executable: &str) -> Result<Vec<ProcessEntry>, ActionError>;

    /// Forcefully terminate one process.
    fn terminate(&mut self, pid: ProcessId) -> Result<(), ActionError>;
}

/// Process control for the platform this binary runs on.
#[cfg(unix)]
pub type PlatformProcessControl = PsProcessControl;
#[cfg(not(unix))]
pub type PlatformProcessControl = TasklistProcessControl;

pub fn platform_process_control(runner: ToolRunner, timeout: Duration) -> PlatformProcessControl {
    PlatformProcessControl::new(runner, timeout)
}

fn reject_reserved_pid(pid: ProcessId) -> Result<(), ActionError> {
    // 0 and 1 address the caller's process group and init, never an attempt.
    if pid.0 <= 1 {
        return Err(ActionError::Failed(format!("refusing to terminate pid {pid}")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unix: ps + kill(2)
// ---------------------------------------------------------------------------

/// Bytes of an executable name Linux keeps in a task's `comm`.
#[cfg(unix)]
const LINUX_COMM_LEN: usize = 15;

/// Cut `name` to at most `max` bytes, backing off to a char boundary.
#[cfg(unix)]
fn truncate_name(name: &str, max: usize) -> &str {
    if name.len() <= max {
        return name;
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// The name `ps -o comm=` reports for a process running `executable`.
#[cfg(unix)]
fn comm_name(executable: &str) -> &str {
    if cfg!(target_os = "linux") {
        truncate_name(executable, LINUX_COMM_LEN)
    } else {
        executable
    }
}

/// `ps -A -o pid=,comm=` for listing, `SIGKILL` for termination.
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct PsProcessControl {
    runner: ToolRunner,
    timeout: Duration,
}

#[cfg(unix)]
impl PsProcessControl {
    pub fn new(runner: ToolRunner, timeout: Duration) -> Self {
        Self { runner, timeout }
    }
}

#[cfg(unix)]
impl ProcessControl for PsProcessControl {
    fn list(&mut self, executable: &str) -> Result<Vec<ProcessEntry>, ActionError> {
        let spec = ToolSpec::new("ps", ["-A", "-o", "pid=,comm="]).with_timeout(self.timeout);
        let output = self.runner.run(&spec)?.into_success()?;
        Ok(output
            .stdout_str()
            .lines()
            .filter_map(extract_process_entry)
            .filter(|entry| entry.matches_executable(comm_name(executable)))
            .collect())
    }

    fn terminate(&mut self, pid: ProcessId) -> Result<(), ActionError> {
        reject_reserved_pid(pid)?;
        let raw = i32::try_from(pid.0)
            .map_err(|_| ActionError::Failed(format!("pid {pid} out of range")))?;

        let result = unsafe { libc::kill(raw, libc::SIGKILL) };
        if result == 0 {
            debug!(%pid, "sent SIGKILL");
            return Ok(());
        }

        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => Err(ActionError::ProcessNotFound { pid }),
            Some(libc::EPERM) => Err(ActionError::PermissionDenied { pid }),
            _ => Err(ActionError::Failed(err.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Windows: tasklist + taskkill
// ---------------------------------------------------------------------------

/// `tasklist /FO CSV /NH` for listing, `taskkill /F /PID` for termination.
#[derive(Debug, Clone)]
pub struct TasklistProcessControl {
    runner: ToolRunner,
    timeout: Duration,
}

impl TasklistProcessControl {
    pub fn new(runner: ToolRunner, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    fn image_name(executable: &str) -> String {
        if executable.to_ascii_lowercase().ends_with(".exe") {
            executable.to_string()
        } else {
            format!("{executable}.exe")
        }
    }
}

impl ProcessControl for TasklistProcessControl {
    fn list(&mut self, executable: &str) -> Result<Vec<ProcessEntry>, ActionError> {
        let filter = format!("IMAGENAME eq {}", Self::image_name(executable));
        let spec = ToolSpec::new(
            "tasklist",
            ["/FO".to_string(), "CSV".to_string(), "/NH".to_string(), "/FI".to_string(), filter],
        )
        .with_timeout(self.timeout);
        let output = self.runner.run(&spec)?.into_success()?;
        // With no match tasklist prints an INFO line, which does not parse.
        Ok(output
            .stdout_str()
            .lines()
            .filter_map(extract_tasklist_entry)
            .filter(|entry| entry.matches_executable(executable))
            .collect())
    }

    fn terminate(&mut self, pid: ProcessId) -> Result<(), ActionError> {
        reject_reserved_pid(pid)?;
        let spec = ToolSpec::new("taskkill", ["/F".to_string(), "/PID".to_string(), pid.to_string()])
            .with_timeout(self.timeout);
        match self.runner.run(&spec)?.into_success() {
            Ok(_) => {
                debug!(%pid, "taskkill succeeded");
                Ok(())
            }
            Err(ToolError::NonZeroExit { stderr, .. }) if stderr.contains("not found") => {
                Err(ActionError::ProcessNotFound { pid })
            }
            Err(ToolError::NonZeroExit { stderr, .. }) if stderr.contains("Access is denied") => {
                Err(ActionError::PermissionDenied { pid })
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_name_appends_exe_once() {
        assert_eq!(TasklistProcessControl::image_name("adb"), "adb.exe");
        assert_eq!(TasklistProcessControl::image_name("ADB.EXE"), "ADB.EXE");
    }

    #[cfg(unix)]
    #[test]
    fn names_truncate_on_char_boundaries() {
        assert_eq!(truncate_name("adb", 15), "adb");
        assert_eq!(truncate_name("adb-platform-tools-wrapper", 15), "adb-platform-to");
        // 'é' is two bytes and would straddle the cut.
        assert_eq!(truncate_name("abcdefghijklmné", 15), "abcdefghijklmn");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn long_executable_names_match_truncated_comm() {
        assert_eq!(comm_name("adb-platform-tools-wrapper"), "adb-platform-to");
        assert_eq!(comm_name("adb"), "adb");
    }

    #[test]
    fn reserved_pids_are_refused() {
        let mut control = platform_process_control(ToolRunner::with_defaults(), Duration::from_secs(1));
        assert!(matches!(
            control.terminate(ProcessId(0)),
            Err(ActionError::Failed(_))
        ));
        assert!(matches!(
            control.terminate(ProcessId(1)),
            Err(ActionError::Failed(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn kill_live_child_then_report_not_found() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = ProcessId(child.id());
        let mut control = PsProcessControl::new(ToolRunner::with_defaults(), Duration::from_secs(5));

        control.terminate(pid).unwrap();
        child.wait().unwrap();

        assert!(matches!(
            control.terminate(pid),
            Err(ActionError::ProcessNotFound { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn list_finds_running_sleep() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = ProcessId(child.id());
        let mut control = PsProcessControl::new(ToolRunner::with_defaults(), Duration::from_secs(5));

        let found = control.list("sleep").unwrap();
        child.kill().unwrap();
        child.wait().unwrap();

        assert!(found.iter().any(|entry| entry.pid == pid));
        assert!(found.iter().all(|entry| entry.matches_executable("sleep")));
    }
}
