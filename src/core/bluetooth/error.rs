//! Error types for the session layer.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// A failure reported by the radio layer, carried through opaquely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterError {
    pub code: Option<i32>,
    pub message: String,
}

impl AdapterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for AdapterError {}

/// Errors returned by every public operation of the crate.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BleError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),
    #[error("Buffer too short: needed {needed} bytes, got {actual}")]
    BufferTooShort { needed: usize, actual: usize },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Peripheral {0} is not connected")]
    NotConnected(String),
    #[error("Peripheral {0} is already connecting")]
    AlreadyConnecting(String),
    #[error("Peripheral {0} is already connected")]
    AlreadyConnected(String),
    #[error("Operation already in progress: {0}")]
    OperationInProgress(String),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),
    #[error("Characteristic {0} is not writable")]
    NotWritable(Uuid),
    #[error("Characteristic {0} does not support notifications")]
    NotNotifiable(Uuid),
    #[error("Characteristic {0} is not readable")]
    NotReadable(Uuid),
}

pub type BleResult<T> = Result<T, BleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_error_display_includes_code() {
        let err = AdapterError::with_code(133, "GATT error");
        assert_eq!(err.to_string(), "GATT error (code 133)");
        assert_eq!(AdapterError::new("gone").to_string(), "gone");
    }

    #[test]
    fn adapter_error_converts_into_ble_error() {
        let err: BleError = AdapterError::new("radio off").into();
        assert_eq!(err, BleError::Adapter(AdapterError::new("radio off")));
        assert_eq!(err.to_string(), "Adapter error: radio off");
    }
}
