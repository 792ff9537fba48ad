//! BLE central session manager library
//! Scanning, per-peripheral connection lifecycles, GATT operations and
//! auto-reconnect above a pluggable radio [`Adapter`](core::bluetooth::Adapter).

// Module declarations
pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod utils;

pub use crate::config::SessionConfig;
pub use crate::core::bluetooth::{Adapter, AdapterEvent, BleError, BleEvent, BleResult, EventKind, SessionManager};
