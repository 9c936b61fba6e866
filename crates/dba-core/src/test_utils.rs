//! Test utilities for dba-core.
//!
//! Scripted stand-ins for every poll loop collaborator:
//! - [`ScriptedBridge`]: canned device lists, connect attempts that exit or hang
//! - [`ScriptedSocketTable`]: canned socket-table dumps
//! - [`ScriptedProcesses`]: process list and kills backed by a shared [`ProcessTable`]
//! - [`RecordingSleeper`]: records requested sleeps instead of sleeping

use crate::action::{ActionError, BridgeClient, ProcessControl};
use crate::collect::{ProcessEntry, SocketTableSource, ToolError};
use crate::daemon::Sleeper;
use dba_common::{DeviceSerial, EndpointAddress, ProcessId};
use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

// ============================================================================
// Process table
// ============================================================================

#[derive(Debug, Default)]
struct ProcessTableInner {
    entries: Vec<ProcessEntry>,
    kills: Vec<ProcessId>,
}

/// Simulated process table shared by the fake bridge and process control.
#[derive(Debug, Clone, Default)]
pub struct ProcessTable(Rc<RefCell<ProcessTableInner>>);

impl ProcessTable {
    pub fn insert(&self, pid: u32, name: &str) {
        self.0.borrow_mut().entries.push(ProcessEntry {
            pid: ProcessId(pid),
            name: name.to_string(),
        });
    }

    pub fn contains(&self, pid: ProcessId) -> bool {
        self.0.borrow().entries.iter().any(|e| e.pid == pid)
    }

    pub fn entries(&self) -> Vec<ProcessEntry> {
        self.0.borrow().entries.clone()
    }

    /// Every pid terminated so far, in order.
    pub fn kills(&self) -> Vec<ProcessId> {
        self.0.borrow().kills.clone()
    }

    fn kill(&self, pid: ProcessId) -> bool {
        let mut inner = self.0.borrow_mut();
        let before = inner.entries.len();
        inner.entries.retain(|e| e.pid != pid);
        let found = inner.entries.len() != before;
        if found {
            inner.kills.push(pid);
        }
        found
    }
}

// ============================================================================
// Bridge
// ============================================================================

/// One call made against [`ScriptedBridge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCall {
    ApplyPortLimit(u16),
    StartServer,
    ListDevices,
    SpawnConnect(EndpointAddress),
    Disconnect(DeviceSerial),
}

/// [`BridgeClient`] with scripted responses.
///
/// Connect attempts exit immediately unless marked with
/// [`hang_connect`](Self::hang_connect); hung attempts appear in the shared
/// [`ProcessTable`] as `adb` until killed.
#[derive(Debug)]
pub struct ScriptedBridge {
    pub calls: Vec<BridgeCall>,
    table: ProcessTable,
    queued_devices: VecDeque<Result<String, String>>,
    default_devices: String,
    start_server_error: Option<String>,
    failing_connects: BTreeSet<EndpointAddress>,
    hanging_connects: BTreeSet<EndpointAddress>,
    failing_disconnects: BTreeSet<DeviceSerial>,
    pending: Vec<ProcessId>,
    hung: BTreeSet<ProcessId>,
    next_pid: u32,
}

impl ScriptedBridge {
    /// Pid handed to the first connect attempt.
    pub const FIRST_PID: u32 = 40_000;

    pub fn new(table: ProcessTable) -> Self {
        Self {
            calls: Vec::new(),
            table,
            queued_devices: VecDeque::new(),
            default_devices: String::new(),
            start_server_error: None,
            failing_connects: BTreeSet::new(),
            hanging_connects: BTreeSet::new(),
            failing_disconnects: BTreeSet::new(),
            pending: Vec::new(),
            hung: BTreeSet::new(),
            next_pid: Self::FIRST_PID,
        }
    }

    /// Device list returned once the queue is empty.
    pub fn with_devices(mut self, devices: &str) -> Self {
        self.default_devices = devices.to_string();
        self
    }

    /// Queue one device-list response; queued responses are used first.
    pub fn push_devices(mut self, response: Result<String, String>) -> Self {
        self.queued_devices.push_back(response);
        self
    }

    pub fn fail_start_server(mut self, message: &str) -> Self {
        self.start_server_error = Some(message.to_string());
        self
    }

    pub fn fail_connect(mut self, endpoint: EndpointAddress) -> Self {
        self.failing_connects.insert(endpoint);
        self
    }

    pub fn hang_connect(mut self, endpoint: EndpointAddress) -> Self {
        self.hanging_connects.insert(endpoint);
        self
    }

    pub fn fail_disconnect(mut self, serial: DeviceSerial) -> Self {
        self.failing_disconnects.insert(serial);
        self
    }
}

impl BridgeClient for ScriptedBridge {
    fn apply_port_limit(&mut self, max_port: u16) -> Result<(), ActionError> {
        self.calls.push(BridgeCall::ApplyPortLimit(max_port));
        Ok(())
    }

    fn start_server(&mut self) -> Result<(), ActionError> {
        self.calls.push(BridgeCall::StartServer);
        match &self.start_server_error {
            Some(msg) => Err(ActionError::Failed(msg.clone())),
            None => Ok(()),
        }
    }

    fn list_devices(&mut self) -> Result<String, ActionError> {
        self.calls.push(BridgeCall::ListDevices);
        match self.queued_devices.pop_front() {
            Some(response) => response.map_err(ActionError::Failed),
            None => Ok(self.default_devices.clone()),
        }
    }

    fn spawn_connect(&mut self, endpoint: &EndpointAddress) -> Result<ProcessId, ActionError> {
        self.calls.push(BridgeCall::SpawnConnect(*endpoint));
        if self.failing_connects.contains(endpoint) {
            return Err(ActionError::Tool(ToolError::SpawnFailed {
                command: format!("adb connect {endpoint}"),
                reason: "scripted failure".to_string(),
            }));
        }
        let pid = ProcessId(self.next_pid);
        self.next_pid += 1;
        if self.hanging_connects.contains(endpoint) {
            self.table.insert(pid.0, "adb");
            self.hung.insert(pid);
        }
        self.pending.push(pid);
        Ok(pid)
    }

    fn reap_exited(&mut self) -> Vec<ProcessId> {
        // A hung attempt exits only once it has been killed out of the table.
        let (exited, running): (Vec<ProcessId>, Vec<ProcessId>) =
            self.pending.iter().copied().partition(|pid| {
                !self.hung.contains(pid) || !self.table.contains(*pid)
            });
        self.pending = running;
        exited
    }

    fn disconnect(&mut self, serial: &DeviceSerial) -> Result<(), ActionError> {
        self.calls.push(BridgeCall::Disconnect(serial.clone()));
        if self.failing_disconnects.contains(serial) {
            return Err(ActionError::Failed(format!("scripted failure for {serial}")));
        }
        Ok(())
    }
}

// ============================================================================
// Socket table
// ============================================================================

/// [`SocketTableSource`] with scripted dumps.
#[derive(Debug, Clone)]
pub struct ScriptedSocketTable {
    queued: VecDeque<Result<String, String>>,
    default: String,
    pub reads: usize,
}

impl ScriptedSocketTable {
    pub fn new(default: &str) -> Self {
        Self {
            queued: VecDeque::new(),
            default: default.to_string(),
            reads: 0,
        }
    }

    pub fn push(mut self, response: Result<String, String>) -> Self {
        self.queued.push_back(response);
        self
    }
}

impl SocketTableSource for ScriptedSocketTable {
    fn read_socket_table(&mut self) -> Result<String, ToolError> {
        self.reads += 1;
        match self.queued.pop_front() {
            Some(Ok(table)) => Ok(table),
            Some(Err(reason)) => Err(ToolError::SpawnFailed {
                command: "socket table".to_string(),
                reason,
            }),
            None => Ok(self.default.clone()),
        }
    }
}

// ============================================================================
// Process control
// ============================================================================

/// [`ProcessControl`] over a shared [`ProcessTable`].
#[derive(Debug, Clone)]
pub struct ScriptedProcesses {
    table: ProcessTable,
    list_error: Option<String>,
    pub listed: usize,
}

impl ScriptedProcesses {
    pub fn new(table: ProcessTable) -> Self {
        Self {
            table,
            list_error: None,
            listed: 0,
        }
    }

    pub fn fail_list(mut self, message: &str) -> Self {
        self.list_error = Some(message.to_string());
        self
    }
}

impl ProcessControl for ScriptedProcesses {
    fn list(&mut self, executable: &str) -> Result<Vec<ProcessEntry>, ActionError> {
        self.listed += 1;
        if let Some(msg) = &self.list_error {
            return Err(ActionError::Failed(msg.clone()));
        }
        Ok(self
            .table
            .entries()
            .into_iter()
            .filter(|e| e.matches_executable(executable))
            .collect())
    }

    fn terminate(&mut self, pid: ProcessId) -> Result<(), ActionError> {
        if self.table.kill(pid) {
            Ok(())
        } else {
            Err(ActionError::ProcessNotFound { pid })
        }
    }
}

// ============================================================================
// Sleeper
// ============================================================================

/// Records sleeps without waiting.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    pub slept: Vec<Duration>,
}

impl Sleeper for RecordingSleeper {
    fn sleep(&mut self, duration: Duration) {
        self.slept.push(duration);
    }
}
