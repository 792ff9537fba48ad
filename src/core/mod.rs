//! Core functionality for the BLE central
//! This module contains the session layer and the byte-level helpers used on
//! the command boundary.

pub mod bluetooth;
pub mod codec;
pub mod packetizer;

// Re-export commonly used types
pub use bluetooth::{BleError, BleEvent, BleResult, SessionManager};
