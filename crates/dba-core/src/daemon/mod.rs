//! Poll loop.
//!
//! One cycle walks `Idle → Preparing → Scanning → Connecting → Settling →
//! Cleaning → Idle`:
//!
//! - **Preparing**: apply the bridge port limit, start the bridge server.
//! - **Scanning**: read the socket table and device list back-to-back, build
//!   a [`ConnectionSnapshot`] and a [`ReconcilePlan`].
//! - **Connecting**: launch one background `connect` per planned endpoint.
//! - **Settling**: after the settle delay, kill attempts that are still
//!   running, exactly once each.
//! - **Cleaning**: re-read the device list and disconnect offline devices.
//!
//! A failure anywhere ends the cycle. It is logged at the cycle boundary and
//! the next cycle starts from scratch; nothing carries over between cycles.
//!
//! All collaborators are injected, so the loop runs against scripted fakes
//! in tests (see [`crate::test_utils`]).

use crate::action::{ActionError, BridgeClient, ProcessControl};
use crate::collect::{parse_offline, ConnectionSnapshot, SocketTableSource};
use crate::config::PollConfig;
use crate::reconcile::{reconcile, ReconcilePlan};
use chrono::{DateTime, Utc};
use dba_common::{DeviceSerial, EndpointAddress, ProcessId, StructuredError};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Phases and errors
// ---------------------------------------------------------------------------

/// Where a cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    Preparing,
    Scanning,
    Connecting,
    Settling,
    Cleaning,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Preparing => "preparing",
            CyclePhase::Scanning => "scanning",
            CyclePhase::Connecting => "connecting",
            CyclePhase::Settling => "settling",
            CyclePhase::Cleaning => "cleaning",
        };
        f.write_str(name)
    }
}

/// A failure that ended one cycle.
#[derive(Debug, Error)]
#[error("{phase} phase failed: {source}")]
pub struct CycleError {
    pub phase: CyclePhase,
    #[source]
    pub source: dba_common::Error,
}

impl CycleError {
    fn at(phase: CyclePhase) -> impl FnOnce(ActionError) -> CycleError {
        move |err| CycleError {
            phase,
            source: err.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// A connect attempt launched this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpawnedAttempt {
    pub endpoint: EndpointAddress,
    pub pid: ProcessId,
}

/// An action that was skipped because it failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionFailure<T> {
    pub target: T,
    pub error: String,
}

/// Sizes of the snapshot a cycle worked from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotCounts {
    pub connected: usize,
    pub candidates: usize,
    pub offline: usize,
    pub skipped: usize,
}

impl From<&ConnectionSnapshot> for SnapshotCounts {
    fn from(snapshot: &ConnectionSnapshot) -> Self {
        Self {
            connected: snapshot.connected.len(),
            candidates: snapshot.candidates.len(),
            offline: snapshot.offline.len(),
            skipped: snapshot.skipped.len(),
        }
    }
}

/// Serializable form of the error that ended a cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleFailure {
    pub phase: CyclePhase,
    pub error: StructuredError,
}

impl From<&CycleError> for CycleFailure {
    fn from(err: &CycleError) -> Self {
        Self {
            phase: err.phase,
            error: StructuredError::from(&err.source).with_context("phase", err.phase.to_string()),
        }
    }
}

/// What one cycle saw and did.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub snapshot: SnapshotCounts,
    pub plan: ReconcilePlan,
    pub launched: Vec<SpawnedAttempt>,
    pub launch_failures: Vec<ActionFailure<EndpointAddress>>,
    /// Attempts that finished on their own before the liveness check.
    pub exited: Vec<ProcessId>,
    pub killed: Vec<ProcessId>,
    pub kill_failures: Vec<ActionFailure<ProcessId>>,
    pub disconnected: Vec<DeviceSerial>,
    pub disconnect_failures: Vec<ActionFailure<DeviceSerial>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<CycleFailure>,
}

impl CycleReport {
    fn new(cycle: u64) -> Self {
        Self {
            cycle,
            started_at: Utc::now(),
            finished_at: None,
            snapshot: SnapshotCounts::default(),
            plan: ReconcilePlan::default(),
            launched: Vec::new(),
            launch_failures: Vec::new(),
            exited: Vec::new(),
            killed: Vec::new(),
            kill_failures: Vec::new(),
            disconnected: Vec::new(),
            disconnect_failures: Vec::new(),
            failure: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Totals over a bounded or interrupted run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub last_report: Option<CycleReport>,
}

// ---------------------------------------------------------------------------
// Sleeping
// ---------------------------------------------------------------------------

/// Waits between phases; injected so tests do not block on the clock.
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

/// The reconciliation loop and its collaborators.
#[derive(Debug)]
pub struct PollLoop<B, S, P, Z> {
    config: PollConfig,
    executable: String,
    bridge: B,
    sockets: S,
    processes: P,
    sleeper: Z,
    phase: CyclePhase,
    cycles: u64,
}

impl<B, S, P, Z> PollLoop<B, S, P, Z>
where
    B: BridgeClient,
    S: SocketTableSource,
    P: ProcessControl,
    Z: Sleeper,
{
    pub fn new(config: PollConfig, bridge: B, sockets: S, processes: P, sleeper: Z) -> Self {
        let executable = config.bridge_executable();
        Self {
            config,
            executable,
            bridge,
            sockets,
            processes,
            sleeper,
            phase: CyclePhase::Idle,
            cycles: 0,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Number of cycles started so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    pub fn bridge(&self) -> &B {
        &self.bridge
    }

    pub fn processes(&self) -> &P {
        &self.processes
    }

    pub fn sleeper(&self) -> &Z {
        &self.sleeper
    }

    /// Run cycles until `max_cycles` is reached, or forever with `None`.
    ///
    /// The loop delay is slept between cycles, not after the last one of a
    /// bounded run.
    pub fn run(&mut self, max_cycles: Option<u64>) -> RunSummary {
        let mut summary = RunSummary::default();
        loop {
            let report = self.run_cycle();
            summary.cycles += 1;
            if !report.succeeded() {
                summary.failed_cycles += 1;
            }
            summary.last_report = Some(report);

            if max_cycles.is_some_and(|max| summary.cycles >= max) {
                return summary;
            }
            self.sleeper.sleep(self.config.loop_delay);
        }
    }

    /// Run one full cycle. Errors are logged here and recorded in the report.
    pub fn run_cycle(&mut self) -> CycleReport {
        self.cycles += 1;
        let mut report = CycleReport::new(self.cycles);
        debug!(cycle = self.cycles, "cycle start");

        if let Err(err) = self.execute(&mut report) {
            error!(
                cycle = report.cycle,
                phase = %err.phase,
                code = err.source.code(),
                error = %err.source,
                "cycle failed"
            );
            report.failure = Some(CycleFailure::from(&err));
        }

        self.phase = CyclePhase::Idle;
        report.finished_at = Some(Utc::now());
        debug!(
            cycle = report.cycle,
            launched = report.launched.len(),
            killed = report.killed.len(),
            disconnected = report.disconnected.len(),
            "cycle complete"
        );
        report
    }

    fn execute(&mut self, report: &mut CycleReport) -> Result<(), CycleError> {
        self.prepare()?;
        let plan = self.scan(report)?;
        let attempts = self.connect(&plan, report);
        report.plan = plan;
        self.sleeper.sleep(self.config.settle_delay);
        self.settle(&attempts, report)?;
        self.clean(report)
    }

    fn prepare(&mut self) -> Result<(), CycleError> {
        self.phase = CyclePhase::Preparing;
        if self.config.limit_port {
            let max_port = self.config.policy.min_port;
            if let Err(err) = self.bridge.apply_port_limit(max_port) {
                warn!(max_port, error = %err, "could not apply port limit");
            }
        }
        self.bridge
            .start_server()
            .map_err(CycleError::at(CyclePhase::Preparing))
    }

    fn scan(&mut self, report: &mut CycleReport) -> Result<ReconcilePlan, CycleError> {
        self.phase = CyclePhase::Scanning;
        let socket_table = self
            .sockets
            .read_socket_table()
            .map_err(|e| CycleError::at(CyclePhase::Scanning)(e.into()))?;
        let device_list = self
            .bridge
            .list_devices()
            .map_err(CycleError::at(CyclePhase::Scanning))?;

        let snapshot = ConnectionSnapshot::capture(&socket_table, &device_list, &self.config.policy);
        report.snapshot = SnapshotCounts::from(&snapshot);
        let plan = reconcile(&snapshot, &self.config.policy);
        debug!(
            connect = plan.to_connect.len(),
            disconnect = plan.to_disconnect.len(),
            skipped = snapshot.skipped.len(),
            "plan computed"
        );
        Ok(plan)
    }

    fn connect(&mut self, plan: &ReconcilePlan, report: &mut CycleReport) -> Vec<SpawnedAttempt> {
        self.phase = CyclePhase::Connecting;
        let mut attempts = Vec::with_capacity(plan.to_connect.len());
        for endpoint in &plan.to_connect {
            debug!(%endpoint, "connecting");
            match self.bridge.spawn_connect(endpoint) {
                Ok(pid) => attempts.push(SpawnedAttempt {
                    endpoint: *endpoint,
                    pid,
                }),
                Err(err) => {
                    info!(%endpoint, error = %err, "connect launch failed, skipping");
                    report.launch_failures.push(ActionFailure {
                        target: *endpoint,
                        error: err.to_string(),
                    });
                }
            }
        }
        report.launched = attempts.clone();
        attempts
    }

    fn settle(
        &mut self,
        attempts: &[SpawnedAttempt],
        report: &mut CycleReport,
    ) -> Result<(), CycleError> {
        self.phase = CyclePhase::Settling;
        if attempts.is_empty() {
            return Ok(());
        }

        // Reap first: an exited child must not be mistaken for a live one,
        // and a reaped pid may already belong to an unrelated process.
        let exited = self.bridge.reap_exited();
        let live: Vec<&SpawnedAttempt> = attempts
            .iter()
            .filter(|attempt| !exited.contains(&attempt.pid))
            .collect();
        report.exited = attempts
            .iter()
            .map(|attempt| attempt.pid)
            .filter(|pid| exited.contains(pid))
            .collect();
        if live.is_empty() {
            return Ok(());
        }

        let running = self
            .processes
            .list(&self.executable)
            .map_err(CycleError::at(CyclePhase::Settling))?;

        for attempt in live {
            if !running.iter().any(|entry| entry.pid == attempt.pid) {
                continue;
            }
            if report.killed.contains(&attempt.pid) {
                continue;
            }
            info!(endpoint = %attempt.endpoint, pid = %attempt.pid, "connect attempt still running, killing");
            match self.processes.terminate(attempt.pid) {
                Ok(()) => report.killed.push(attempt.pid),
                Err(ActionError::ProcessNotFound { pid }) => {
                    debug!(%pid, "attempt exited before it could be killed");
                }
                Err(err) => {
                    warn!(pid = %attempt.pid, error = %err, "could not kill connect attempt");
                    report.kill_failures.push(ActionFailure {
                        target: attempt.pid,
                        error: err.to_string(),
                    });
                }
            }
        }

        // Collect the children just killed.
        self.bridge.reap_exited();
        Ok(())
    }

    fn clean(&mut self, report: &mut CycleReport) -> Result<(), CycleError> {
        self.phase = CyclePhase::Cleaning;
        let device_list = self
            .bridge
            .list_devices()
            .map_err(CycleError::at(CyclePhase::Cleaning))?;

        for serial in parse_offline(&device_list) {
            info!(%serial, "disconnecting offline device");
            match self.bridge.disconnect(&serial) {
                Ok(()) => report.disconnected.push(serial),
                Err(err) => {
                    info!(%serial, error = %err, "disconnect failed, skipping");
                    report.disconnect_failures.push(ActionFailure {
                        target: serial,
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}
