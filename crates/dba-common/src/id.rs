//! Endpoint, device, and process identity types.
//!
//! These are the values that flow between the snapshot parsers, the
//! reconciliation engine, and the action executor. They are immutable once
//! constructed and rebuilt from fresh command output every poll cycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Process ID wrapper with display formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        ProcessId(pid)
    }
}

/// An IPv4 address plus TCP port identifying a device's bridge listener.
///
/// Serializes as the `host:port` text the bridge client uses for serials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointAddress {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl EndpointAddress {
    pub fn new(host: Ipv4Addr, port: u16) -> Self {
        Self { host, port }
    }

    /// True for loopback (`127.0.0.1`) and wildcard (`0.0.0.0`) binds.
    pub fn is_local_bind(&self) -> bool {
        self.host == Ipv4Addr::LOCALHOST || self.host.is_unspecified()
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Error returned when strict `host:port` parsing fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointParseError(pub String);

impl fmt::Display for EndpointParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid endpoint address: {}", self.0)
    }
}

impl std::error::Error for EndpointParseError {}

impl FromStr for EndpointAddress {
    type Err = EndpointParseError;

    /// Strict parse of exactly `a.b.c.d:port`. Free-form text goes through
    /// the extractor in `dba-core` instead.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| EndpointParseError(s.to_string()))?;
        let host: Ipv4Addr = host
            .parse()
            .map_err(|_| EndpointParseError(s.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| EndpointParseError(s.to_string()))?;
        Ok(Self { host, port })
    }
}

impl Serialize for EndpointAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EndpointAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Device identifier as reported by the bridge's device list.
///
/// For network devices this is the `host:port` text; for emulators and USB
/// devices it is an opaque serial such as `emulator-5554`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceSerial(pub String);

impl DeviceSerial {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceSerial {
    fn from(s: &str) -> Self {
        DeviceSerial(s.to_string())
    }
}

impl From<EndpointAddress> for DeviceSerial {
    fn from(endpoint: EndpointAddress) -> Self {
        DeviceSerial(endpoint.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_display_roundtrips_through_from_str() {
        let ep: EndpointAddress = "127.0.0.1:5555".parse().unwrap();
        assert_eq!(ep.host, Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(ep.port, 5555);
        assert_eq!(ep.to_string(), "127.0.0.1:5555");
    }

    #[test]
    fn endpoint_rejects_out_of_range_port() {
        assert!("127.0.0.1:65536".parse::<EndpointAddress>().is_err());
        assert!("127.0.0.1".parse::<EndpointAddress>().is_err());
        assert!("300.0.0.1:5555".parse::<EndpointAddress>().is_err());
    }

    #[test]
    fn local_bind_detection() {
        assert!(EndpointAddress::new(Ipv4Addr::LOCALHOST, 5555).is_local_bind());
        assert!(EndpointAddress::new(Ipv4Addr::UNSPECIFIED, 5555).is_local_bind());
        assert!(!EndpointAddress::new(Ipv4Addr::new(192, 168, 1, 20), 5555).is_local_bind());
    }

    #[test]
    fn endpoint_serializes_as_text() {
        let ep = EndpointAddress::new(Ipv4Addr::UNSPECIFIED, 5555);
        let json = serde_json::to_string(&ep).unwrap();
        assert_eq!(json, "\"0.0.0.0:5555\"");
        let back: EndpointAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ep);
    }
}
