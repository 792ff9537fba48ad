//! Persistent configuration
//! JSON files loaded with defaults for anything missing.

pub mod session_config;

pub use session_config::SessionConfig;
