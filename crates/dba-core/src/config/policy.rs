//! Connection policy: which listening endpoints are eligible for `connect`.

use dba_common::EndpointAddress;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Default minimum eligible port.
pub const DEFAULT_MIN_PORT: u16 = 5550;

/// Well-known service ports that are never treated as a device bridge
/// (web servers, databases, caches, RDP).
pub const DEFAULT_EXCLUDED_PORTS: [u16; 13] = [
    8080, 8000, 8888, 1433, 1521, 3306, 5000, 5432, 6379, 27017, 27018, 8443, 3389,
];

/// Why a listening endpoint was not selected for connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The bridge already lists this endpoint.
    AlreadyConnected,
    /// The port is on the deny-list.
    ExcludedPort,
    /// The port is below the configured minimum.
    BelowMinPort,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyConnected => write!(f, "already connected"),
            SkipReason::ExcludedPort => write!(f, "excluded port"),
            SkipReason::BelowMinPort => write!(f, "below minimum port"),
        }
    }
}

/// Static connection policy, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectPolicy {
    /// Ports below this value are ignored.
    pub min_port: u16,
    /// Ports never connected to.
    pub excluded_ports: BTreeSet<u16>,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            min_port: DEFAULT_MIN_PORT,
            excluded_ports: DEFAULT_EXCLUDED_PORTS.into_iter().collect(),
        }
    }
}

impl ConnectPolicy {
    pub fn with_min_port(mut self, min_port: u16) -> Self {
        self.min_port = min_port;
        self
    }

    /// Add ports to the deny-list on top of the defaults.
    pub fn with_excluded_ports<I: IntoIterator<Item = u16>>(mut self, ports: I) -> Self {
        self.excluded_ports.extend(ports);
        self
    }

    /// Check the port rules for one endpoint.
    ///
    /// The deny-list is checked before the minimum so a skip reports the
    /// more specific reason.
    pub fn admits(&self, endpoint: &EndpointAddress) -> Result<(), SkipReason> {
        if self.excluded_ports.contains(&endpoint.port) {
            return Err(SkipReason::ExcludedPort);
        }
        if endpoint.port < self.min_port {
            return Err(SkipReason::BelowMinPort);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(s: &str) -> EndpointAddress {
        s.parse().unwrap()
    }

    #[test]
    fn defaults() {
        let policy = ConnectPolicy::default();
        assert_eq!(policy.min_port, 5550);
        assert_eq!(policy.excluded_ports.len(), 13);
        assert!(policy.excluded_ports.contains(&3389));
    }

    #[test]
    fn admits_by_port() {
        let policy = ConnectPolicy::default();
        assert_eq!(policy.admits(&ep("0.0.0.0:5555")), Ok(()));
        assert_eq!(
            policy.admits(&ep("0.0.0.0:5037")),
            Err(SkipReason::BelowMinPort)
        );
        assert_eq!(
            policy.admits(&ep("127.0.0.1:8080")),
            Err(SkipReason::ExcludedPort)
        );
        // Deny-list wins even when the port is also below the minimum.
        assert_eq!(
            policy.admits(&ep("127.0.0.1:1433")),
            Err(SkipReason::ExcludedPort)
        );
    }

    #[test]
    fn extra_excluded_ports() {
        let policy = ConnectPolicy::default()
            .with_min_port(6000)
            .with_excluded_ports([7001]);
        assert_eq!(
            policy.admits(&ep("0.0.0.0:7001")),
            Err(SkipReason::ExcludedPort)
        );
        assert_eq!(
            policy.admits(&ep("0.0.0.0:5555")),
            Err(SkipReason::BelowMinPort)
        );
        assert_eq!(policy.admits(&ep("0.0.0.0:7002")), Ok(()));
    }
}
