//! Snapshot collection.
//!
//! This module turns raw command output into the facts one poll cycle works
//! on:
//! - Line extractors for endpoints, device records, and process rows
//! - Snapshot parsers that build the connected/candidate/offline sets
//! - Socket table sources per platform
//! - Tool runner for bounded external command execution

pub mod extract;
pub mod snapshot;
pub mod sources;
pub mod tool_runner;
mod types;

pub use extract::{
    extract_device_status, extract_endpoint, extract_process_entry, extract_tasklist_entry,
};
pub use snapshot::{
    parse_connected, parse_listening, parse_offline, ConnectionSnapshot, SkippedEndpoint,
};
pub use sources::{platform_socket_command, SocketTableSource, SystemSocketTable};
pub use tool_runner::{
    ToolConfig, ToolError, ToolOutput, ToolRunner, ToolSpec, DEFAULT_MAX_OUTPUT_BYTES,
    DEFAULT_TIMEOUT_MS,
};
pub use types::{DeviceRecord, DeviceStatus, ProcessEntry};
