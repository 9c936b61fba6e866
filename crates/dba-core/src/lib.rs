//! Device Bridge Autoconnect core library.
//!
//! This library provides the pieces of the `dba` poll loop:
//! - Line extractors and snapshot parsers for socket tables and device lists
//! - The reconciliation engine that decides what to connect and disconnect
//! - Bridge client and process control for carrying those decisions out
//! - The poll loop itself, plus configuration, logging, and exit codes
//!
//! The binary entry point is in `main.rs`.

pub mod action;
pub mod collect;
pub mod config;
pub mod daemon;
pub mod exit_codes;
pub mod logging;
pub mod reconcile;

// Re-export test utilities for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
