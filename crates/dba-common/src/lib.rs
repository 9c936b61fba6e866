//! Device Bridge Autoconnect common types, IDs, and errors.
//!
//! This crate provides foundational types shared across dba-core modules:
//! - Endpoint, device serial, and process identity types
//! - The unified error type with stable codes

pub mod error;
pub mod id;

pub use error::{Error, ErrorCategory, StructuredError};
pub use id::{DeviceSerial, EndpointAddress, EndpointParseError, ProcessId};
