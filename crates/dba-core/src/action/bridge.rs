//! Bridge client: the `adb` commands one cycle issues.

use super::ActionError;
use crate::collect::{ToolRunner, ToolSpec};
use dba_common::{DeviceSerial, EndpointAddress, ProcessId};
use std::path::PathBuf;
use std::process::Child;
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable that caps the bridge's local transport scan.
pub const MAX_PORT_ENV: &str = "ADB_LOCAL_TRANSPORT_MAX_PORT";

/// Commands the poll loop needs from the debug bridge.
pub trait BridgeClient {
    /// Apply the local transport port limit to subsequent bridge commands.
    fn apply_port_limit(&mut self, max_port: u16) -> Result<(), ActionError>;

    /// Make sure the bridge server is running.
    fn start_server(&mut self) -> Result<(), ActionError>;

    /// Raw `devices -l` output.
    fn list_devices(&mut self) -> Result<String, ActionError>;

    /// Launch `connect <endpoint>` in the background and return its pid.
    fn spawn_connect(&mut self, endpoint: &EndpointAddress) -> Result<ProcessId, ActionError>;

    /// Collect connect attempts that have exited. Returns their pids.
    fn reap_exited(&mut self) -> Vec<ProcessId>;

    /// Run `disconnect <serial>` and wait for it.
    fn disconnect(&mut self, serial: &DeviceSerial) -> Result<(), ActionError>;
}

/// [`BridgeClient`] backed by the `adb` executable.
#[derive(Debug)]
pub struct AdbClient {
    path: PathBuf,
    runner: ToolRunner,
    command_timeout: Duration,
    env: Vec<(String, String)>,
    applied_limit: Option<u16>,
    attempts: Vec<Child>,
}

impl AdbClient {
    pub fn new(path: impl Into<PathBuf>, runner: ToolRunner, command_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            runner,
            command_timeout,
            env: Vec::new(),
            applied_limit: None,
            attempts: Vec::new(),
        }
    }

    fn spec<I, S>(&self, args: I) -> ToolSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ToolSpec::new(self.path.to_string_lossy(), args)
            .with_env(self.env.iter().cloned())
            .with_timeout(self.command_timeout)
    }

    #[cfg(windows)]
    fn persist_port_limit(&self, max_port: u16) -> Result<(), ActionError> {
        let spec = ToolSpec::new(
            "reg.exe",
            [
                "add".to_string(),
                r"HKCU\Environment".to_string(),
                "/v".to_string(),
                MAX_PORT_ENV.to_string(),
                "/t".to_string(),
                "REG_SZ".to_string(),
                "/d".to_string(),
                max_port.to_string(),
                "/f".to_string(),
            ],
        )
        .with_timeout(self.command_timeout)
        .discarding_output();
        self.runner.run(&spec)?.into_success()?;
        Ok(())
    }

    #[cfg(not(windows))]
    fn persist_port_limit(&self, _max_port: u16) -> Result<(), ActionError> {
        Ok(())
    }
}

impl BridgeClient for AdbClient {
    fn apply_port_limit(&mut self, max_port: u16) -> Result<(), ActionError> {
        if self.applied_limit == Some(max_port) {
            return Ok(());
        }
        self.env.retain(|(key, _)| key != MAX_PORT_ENV);
        self.env.push((MAX_PORT_ENV.to_string(), max_port.to_string()));
        self.persist_port_limit(max_port)?;
        self.applied_limit = Some(max_port);
        debug!(max_port, "port limit applied");
        Ok(())
    }

    fn start_server(&mut self) -> Result<(), ActionError> {
        // The server outlives this command and would hold captured pipes open.
        let spec = self.spec(["start-server"]).discarding_output();
        self.runner.run(&spec)?.into_success()?;
        Ok(())
    }

    fn list_devices(&mut self) -> Result<String, ActionError> {
        let output = self.runner.run(&self.spec(["devices", "-l"]))?.into_success()?;
        Ok(output.stdout_str())
    }

    fn spawn_connect(&mut self, endpoint: &EndpointAddress) -> Result<ProcessId, ActionError> {
        let spec = self.spec(["connect".to_string(), endpoint.to_string()]);
        let child = self.runner.spawn_detached(&spec)?;
        let pid = ProcessId(child.id());
        info!(%endpoint, %pid, "connect attempt launched");
        self.attempts.push(child);
        Ok(pid)
    }

    fn reap_exited(&mut self) -> Vec<ProcessId> {
        let mut exited = Vec::new();
        self.attempts.retain_mut(|child| match child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = child.id(), ?status, "connect attempt exited");
                exited.push(ProcessId(child.id()));
                false
            }
            Ok(None) => true,
            Err(e) => {
                debug!(pid = child.id(), error = %e, "cannot poll connect attempt, dropping handle");
                false
            }
        });
        exited
    }

    fn disconnect(&mut self, serial: &DeviceSerial) -> Result<(), ActionError> {
        let spec = self.spec(["disconnect".to_string(), serial.to_string()]);
        self.runner.run(&spec)?.into_success()?;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// A shell script standing in for the bridge binary.
    fn fake_bridge(name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let dir = std::env::temp_dir().join(format!("dba-bridge-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("adb");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn client(path: PathBuf) -> AdbClient {
        AdbClient::new(path, ToolRunner::with_defaults(), Duration::from_secs(5))
    }

    #[test]
    fn list_devices_returns_stdout() {
        let path = fake_bridge(
            "list",
            r#"[ "$1" = devices ] && printf 'List of devices attached\nemulator-5554 offline\n'"#,
        );
        let mut adb = client(path);
        let out = adb.list_devices().unwrap();
        assert!(out.contains("emulator-5554 offline"));
    }

    #[test]
    fn port_limit_reaches_bridge_environment() {
        let path = fake_bridge("env", r#"echo "limit=$ADB_LOCAL_TRANSPORT_MAX_PORT""#);
        let mut adb = client(path);
        adb.apply_port_limit(5550).unwrap();
        adb.apply_port_limit(5600).unwrap();
        let out = adb.list_devices().unwrap();
        assert_eq!(out.trim(), "limit=5600");
    }

    #[test]
    fn disconnect_failure_is_error() {
        let path = fake_bridge("disc", "echo 'error: no such device' >&2; exit 1");
        let mut adb = client(path);
        let err = adb.disconnect(&DeviceSerial::from("emulator-5554")).unwrap_err();
        assert!(err.to_string().contains("no such device"));
    }

    #[test]
    fn connect_attempts_are_reaped_once_exited() {
        let path = fake_bridge("connect", "exit 0");
        let mut adb = client(path);
        let pid = adb
            .spawn_connect(&"127.0.0.1:5555".parse().unwrap())
            .unwrap();
        assert_eq!(adb.attempts.len(), 1);

        let mut reaped = Vec::new();
        for _ in 0..200 {
            reaped.extend(adb.reap_exited());
            if !reaped.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(reaped, vec![pid]);
        assert_eq!(adb.attempts.len(), 0);
    }
}
