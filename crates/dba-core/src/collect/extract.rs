//! Line extractors for socket tables, device lists, and process lists.
//!
//! Every function here takes one line of command output and returns a typed
//! fact or `None`. They never fail and never panic: a line that does not
//! match is simply not a fact, and callers skip it.

use super::types::{DeviceRecord, DeviceStatus, ProcessEntry};
use dba_common::{DeviceSerial, EndpointAddress, ProcessId};
use regex::Regex;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

/// `a.b.c.d:port` with each octet bounded to 0-255.
const ENDPOINT_PATTERN: &str = concat!(
    r"((?:(?:25[0-5]|2[0-4][0-9]|1[0-9][0-9]|[1-9][0-9]|[0-9])\.){3}",
    r"(?:25[0-5]|2[0-4][0-9]|1[0-9][0-9]|[1-9][0-9]|[0-9])):([0-9]{1,5})"
);

fn endpoint_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(ENDPOINT_PATTERN).ok()).as_ref()
}

/// Find the first IPv4 `address:port` occurrence in a line.
///
/// A match has to stand on its own: it may not continue a longer run of
/// digits and dots on the left (`999.1.1.1:80` is not `99.1.1.1:80`) or a
/// digit run on the right, and the port must fit in 16 bits. For socket
/// table rows the local address comes first, which is the one we want.
pub fn extract_endpoint(line: &str) -> Option<EndpointAddress> {
    let re = endpoint_regex()?;
    let bytes = line.as_bytes();
    let mut pos = 0;

    while let Some(caps) = re.captures_at(line, pos) {
        let (Some(whole), Some(host), Some(port)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            break;
        };
        let joined_left = whole.start() > 0
            && matches!(bytes[whole.start() - 1], b'0'..=b'9' | b'.');
        let joined_right = bytes.get(whole.end()).is_some_and(u8::is_ascii_digit);

        if !joined_left && !joined_right {
            if let (Ok(host), Ok(port)) = (
                host.as_str().parse::<Ipv4Addr>(),
                port.as_str().parse::<u16>(),
            ) {
                return Some(EndpointAddress::new(host, port));
            }
        }

        // Inside a rejected match only the port can open another endpoint.
        pos = port.start();
    }

    None
}

/// Split a device-list line into serial, status, and trailing details.
///
/// The serial is the text before the first whitespace run. Lines with fewer
/// than two tokens are not device records.
pub fn extract_device_status(line: &str) -> Option<DeviceRecord> {
    let line = line.trim();
    let (serial, rest) = line.split_once(char::is_whitespace)?;
    let rest = rest.trim();
    if serial.is_empty() || rest.is_empty() {
        return None;
    }

    // "no permissions" is the one status that spans two tokens.
    let (status, details) = if let Some(after) = rest.strip_prefix("no permissions") {
        (DeviceStatus::NoPermissions, after.trim())
    } else {
        match rest.split_once(char::is_whitespace) {
            Some((token, after)) => (DeviceStatus::from_token(token), after.trim()),
            None => (DeviceStatus::from_token(rest), ""),
        }
    };

    Some(DeviceRecord {
        serial: DeviceSerial(serial.to_string()),
        status,
        details: details.to_string(),
    })
}

/// Parse a `ps -A -o pid=,comm=` row: `<pid> <name>`.
///
/// BSD `ps` reports the full executable path in `comm`, so only the file
/// name is kept.
pub fn extract_process_entry(line: &str) -> Option<ProcessEntry> {
    let line = line.trim();
    let (pid, name) = line.split_once(char::is_whitespace)?;
    let pid: u32 = pid.parse().ok()?;
    let name = name.trim();
    let name = name.rsplit('/').next().unwrap_or(name);
    if name.is_empty() {
        return None;
    }
    Some(ProcessEntry {
        pid: ProcessId(pid),
        name: name.to_string(),
    })
}

/// Parse a `tasklist /FO CSV /NH` row: `"adb.exe","1234","Console","1","10,240 K"`.
pub fn extract_tasklist_entry(line: &str) -> Option<ProcessEntry> {
    let line = line.trim();
    let inner = line.strip_prefix('"')?;
    let mut fields = inner.split("\",\"");
    let name = fields.next()?;
    let pid = fields.next()?.trim_end_matches('"');
    let pid: u32 = pid.parse().ok()?;
    if name.is_empty() {
        return None;
    }
    Some(ProcessEntry {
        pid: ProcessId(pid),
        name: name.to_string(),
    })
}
