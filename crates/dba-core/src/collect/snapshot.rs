//! Snapshot parsers: whole command dumps into the sets one cycle works on.
//!
//! Parsing is line-oriented and tolerant. A line that does not match what a
//! parser is looking for is dropped; a snapshot never fails because of one
//! malformed line.

use super::extract::{extract_device_status, extract_endpoint};
use crate::config::{ConnectPolicy, SkipReason};
use dba_common::{DeviceSerial, EndpointAddress};
use serde::{Deserialize, Serialize};
use tracing::debug;

const LOOPBACK_MARKER: &str = "127.0.0.1";
const WILDCARD_MARKER: &str = "0.0.0.0";

/// Matches `LISTENING` (Windows netstat), `LISTEN` (ss, netstat) and
/// `(LISTEN)` (lsof).
const LISTEN_MARKER: &str = "LISTEN";

fn has_local_marker(line: &str) -> bool {
    line.contains(LOOPBACK_MARKER) || line.contains(WILDCARD_MARKER)
}

fn is_device_list_chatter(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("List of devices") || line.starts_with('*')
}

/// A listening endpoint that was not selected, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedEndpoint {
    pub endpoint: EndpointAddress,
    pub reason: SkipReason,
}

/// Parsed view of one poll cycle's socket table and device list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSnapshot {
    /// Endpoints the bridge already owns, whatever their status.
    pub connected: Vec<EndpointAddress>,
    /// Listening endpoints eligible for connection, in discovery order.
    pub candidates: Vec<EndpointAddress>,
    /// Serials the bridge reports as offline.
    pub offline: Vec<DeviceSerial>,
    /// Listening endpoints that were filtered out.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedEndpoint>,
}

impl ConnectionSnapshot {
    /// Build a snapshot from two dumps gathered back-to-back.
    pub fn capture(socket_table: &str, device_list: &str, policy: &ConnectPolicy) -> Self {
        let connected = parse_connected(device_list);
        let (candidates, skipped) = parse_listening(socket_table, &connected, policy);
        let offline = parse_offline(device_list);
        Self {
            connected,
            candidates,
            offline,
            skipped,
        }
    }
}

/// Endpoints mentioned on device-list lines that carry a loopback or
/// wildcard address.
pub fn parse_connected(device_list: &str) -> Vec<EndpointAddress> {
    let mut connected = Vec::new();
    for line in device_list.lines() {
        if !has_local_marker(line) {
            continue;
        }
        let Some(endpoint) = extract_endpoint(line) else {
            continue;
        };
        if !connected.contains(&endpoint) {
            debug!(%endpoint, "already connected");
            connected.push(endpoint);
        }
    }
    connected
}

/// Local listening endpoints from the socket table, filtered against the
/// already-connected set and the port policy.
pub fn parse_listening(
    socket_table: &str,
    connected: &[EndpointAddress],
    policy: &ConnectPolicy,
) -> (Vec<EndpointAddress>, Vec<SkippedEndpoint>) {
    let mut candidates: Vec<EndpointAddress> = Vec::new();
    let mut skipped: Vec<SkippedEndpoint> = Vec::new();

    for line in socket_table.lines() {
        if !line.contains(LISTEN_MARKER) || !has_local_marker(line) {
            continue;
        }
        let Some(endpoint) = extract_endpoint(line) else {
            continue;
        };
        // The marker may belong to the remote column; the bind must be local.
        if !endpoint.is_local_bind() {
            continue;
        }
        if candidates.contains(&endpoint) || skipped.iter().any(|s| s.endpoint == endpoint) {
            continue;
        }

        let verdict = if connected.contains(&endpoint) {
            Err(SkipReason::AlreadyConnected)
        } else {
            policy.admits(&endpoint)
        };

        match verdict {
            Ok(()) => candidates.push(endpoint),
            Err(reason) => {
                if reason == SkipReason::AlreadyConnected {
                    debug!(%endpoint, "skipping");
                }
                skipped.push(SkippedEndpoint { endpoint, reason });
            }
        }
    }

    (candidates, skipped)
}

/// Serials of devices whose status is `offline`.
pub fn parse_offline(device_list: &str) -> Vec<DeviceSerial> {
    let mut offline = Vec::new();
    for line in device_list.lines() {
        if is_device_list_chatter(line) {
            continue;
        }
        let Some(record) = extract_device_status(line) else {
            continue;
        };
        if record.status.is_offline() && !offline.contains(&record.serial) {
            offline.push(record.serial);
        }
    }
    offline
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(s: &str) -> EndpointAddress {
        s.parse().unwrap()
    }

    const NETSTAT: &str = "\
Active Connections

  Proto  Local Address          Foreign Address        State           PID
  TCP    0.0.0.0:135            0.0.0.0:0              LISTENING       1032
 [svchost.exe]
  TCP    0.0.0.0:3389           0.0.0.0:0              LISTENING       1200
  TCP    0.0.0.0:5555           0.0.0.0:0              LISTENING       1234
 [HD-Player.exe]
  TCP    127.0.0.1:5037         0.0.0.0:0              LISTENING       4321
  TCP    127.0.0.1:5565         0.0.0.0:0              LISTENING       2222
  TCP    127.0.0.1:5565         127.0.0.1:50122        ESTABLISHED     2222
  TCP    192.168.1.10:5575      0.0.0.0:0              LISTENING       999
  TCP    127.0.0.1:8080         0.0.0.0:0              LISTENING       77
";

    const DEVICES: &str = "\
* daemon not running; starting now at tcp:5037
* daemon started successfully
List of devices attached
127.0.0.1:5565         device product:sdk model:Pixel transport_id:1
emulator-5554          offline transport_id:2
0123456789ABCDEF       unauthorized usb:1-1 transport_id:3
";

    #[test]
    fn connected_set_from_device_list() {
        assert_eq!(parse_connected(DEVICES), vec![ep("127.0.0.1:5565")]);
    }

    #[test]
    fn connected_ignores_remote_devices() {
        let list = "192.168.1.30:5555 device\n";
        assert!(parse_connected(list).is_empty());
    }

    #[test]
    fn listening_candidates_filtered() {
        let connected = parse_connected(DEVICES);
        let (candidates, skipped) =
            parse_listening(NETSTAT, &connected, &ConnectPolicy::default());

        assert_eq!(candidates, vec![ep("0.0.0.0:5555")]);
        assert!(skipped.contains(&SkippedEndpoint {
            endpoint: ep("127.0.0.1:5565"),
            reason: SkipReason::AlreadyConnected,
        }));
        assert!(skipped.contains(&SkippedEndpoint {
            endpoint: ep("0.0.0.0:3389"),
            reason: SkipReason::ExcludedPort,
        }));
        assert!(skipped.contains(&SkippedEndpoint {
            endpoint: ep("127.0.0.1:5037"),
            reason: SkipReason::BelowMinPort,
        }));
        // Non-local bind is ignored outright, not recorded as a skip.
        assert!(!skipped.iter().any(|s| s.endpoint == ep("192.168.1.10:5575")));
    }

    #[test]
    fn listening_requires_marker() {
        let table = "TCP 127.0.0.1:5600 127.0.0.1:50000 ESTABLISHED 10\n";
        let (candidates, _) = parse_listening(table, &[], &ConnectPolicy::default());
        assert!(candidates.is_empty());
    }

    #[test]
    fn listening_understands_ss_and_lsof() {
        let ss = "LISTEN 0      4096     127.0.0.1:5585      0.0.0.0:*\n";
        let lsof = "qemu-syst 812 me 21u IPv4 0x1 0t0 TCP 127.0.0.1:5587 (LISTEN)\n";
        let policy = ConnectPolicy::default();
        assert_eq!(parse_listening(ss, &[], &policy).0, vec![ep("127.0.0.1:5585")]);
        assert_eq!(parse_listening(lsof, &[], &policy).0, vec![ep("127.0.0.1:5587")]);
    }

    #[test]
    fn listening_deduplicates_in_discovery_order() {
        let table = "\
TCP 0.0.0.0:5601 0.0.0.0:0 LISTENING 1
TCP 0.0.0.0:5600 0.0.0.0:0 LISTENING 2
TCP 0.0.0.0:5601 0.0.0.0:0 LISTENING 1
";
        let (candidates, _) = parse_listening(table, &[], &ConnectPolicy::default());
        assert_eq!(candidates, vec![ep("0.0.0.0:5601"), ep("0.0.0.0:5600")]);
    }

    #[test]
    fn offline_set() {
        assert_eq!(parse_offline(DEVICES), vec![DeviceSerial::from("emulator-5554")]);
        assert!(parse_offline("List of devices attached\n\n").is_empty());
    }

    #[test]
    fn capture_combines_everything() {
        let snapshot = ConnectionSnapshot::capture(NETSTAT, DEVICES, &ConnectPolicy::default());
        assert_eq!(snapshot.connected, vec![ep("127.0.0.1:5565")]);
        assert_eq!(snapshot.candidates, vec![ep("0.0.0.0:5555")]);
        assert_eq!(snapshot.offline, vec![DeviceSerial::from("emulator-5554")]);
    }

    #[test]
    fn garbage_input_yields_empty_snapshot() {
        let snapshot = ConnectionSnapshot::capture(
            "\u{0}\u{1}LISTEN\n:::::\n0.0.0.0",
            "bogus\n\n\t\t",
            &ConnectPolicy::default(),
        );
        assert_eq!(snapshot, ConnectionSnapshot::default());
    }
}
