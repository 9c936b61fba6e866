//! Typed facts extracted from command output.

use dba_common::{DeviceSerial, ProcessId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Device state as reported in the bridge's device list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Device,
    Offline,
    Unauthorized,
    Authorizing,
    Connecting,
    NoPermissions,
    Recovery,
    Sideload,
    Bootloader,
    Host,
    Other(String),
}

impl DeviceStatus {
    /// Parse the status token. Unknown tokens are kept verbatim.
    pub fn from_token(token: &str) -> Self {
        match token {
            "device" => DeviceStatus::Device,
            "offline" => DeviceStatus::Offline,
            "unauthorized" => DeviceStatus::Unauthorized,
            "authorizing" => DeviceStatus::Authorizing,
            "connecting" => DeviceStatus::Connecting,
            "no" | "no permissions" => DeviceStatus::NoPermissions,
            "recovery" => DeviceStatus::Recovery,
            "sideload" => DeviceStatus::Sideload,
            "bootloader" => DeviceStatus::Bootloader,
            "host" => DeviceStatus::Host,
            other => DeviceStatus::Other(other.to_string()),
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, DeviceStatus::Offline)
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Device => write!(f, "device"),
            DeviceStatus::Offline => write!(f, "offline"),
            DeviceStatus::Unauthorized => write!(f, "unauthorized"),
            DeviceStatus::Authorizing => write!(f, "authorizing"),
            DeviceStatus::Connecting => write!(f, "connecting"),
            DeviceStatus::NoPermissions => write!(f, "no permissions"),
            DeviceStatus::Recovery => write!(f, "recovery"),
            DeviceStatus::Sideload => write!(f, "sideload"),
            DeviceStatus::Bootloader => write!(f, "bootloader"),
            DeviceStatus::Host => write!(f, "host"),
            DeviceStatus::Other(s) => write!(f, "{s}"),
        }
    }
}

/// One line of the bridge's device list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Leading token; a `host:port` text for network devices.
    pub serial: DeviceSerial,
    pub status: DeviceStatus,
    /// Trailing fields (`product:... model:... transport_id:...`), may be empty.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub details: String,
}

/// A running process as reported by the platform process lister.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub pid: ProcessId,
    pub name: String,
}

impl ProcessEntry {
    /// Whether this process runs the given executable.
    ///
    /// Compares case-insensitively and ignores a trailing `.exe`, so `adb`
    /// matches both `adb` and `ADB.EXE`.
    pub fn matches_executable(&self, executable: &str) -> bool {
        fn stem(name: &str) -> String {
            let lower = name.to_ascii_lowercase();
            match lower.strip_suffix(".exe") {
                Some(s) => s.to_string(),
                None => lower,
            }
        }
        stem(&self.name) == stem(executable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_tokens() {
        assert_eq!(DeviceStatus::from_token("device"), DeviceStatus::Device);
        assert_eq!(DeviceStatus::from_token("offline"), DeviceStatus::Offline);
        assert_eq!(
            DeviceStatus::from_token("weird"),
            DeviceStatus::Other("weird".to_string())
        );
        assert!(DeviceStatus::Offline.is_offline());
        assert!(!DeviceStatus::Unauthorized.is_offline());
        assert_eq!(DeviceStatus::NoPermissions.to_string(), "no permissions");
    }

    #[test]
    fn executable_matching_ignores_exe_suffix_and_case() {
        let entry = ProcessEntry {
            pid: ProcessId(10),
            name: "ADB.EXE".to_string(),
        };
        assert!(entry.matches_executable("adb"));
        assert!(entry.matches_executable("adb.exe"));
        assert!(!entry.matches_executable("adbd"));
    }
}
