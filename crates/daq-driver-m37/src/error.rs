//! Error types for M37 operations.
//!
//! Every failure the driver can report is a variant of [`M37Error`]. Hardware
//! handshake failures, mode conflicts and configuration problems are all
//! returned to the immediate caller; nothing in the driver aborts the process.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for M37 operations.
pub type Result<T> = std::result::Result<T, M37Error>;

/// Errors that can occur when working with an M37 module.
#[derive(Error, Debug)]
pub enum M37Error {
    /// Out-of-range or mode-incompatible request
    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    /// Operation attempted in an incompatible mode combination
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Analog power supply is absent
    #[error("Device not ready: {message}")]
    DeviceNotReady { message: String },

    /// Buffer-ready was not observed within the poll budget
    #[error("Handshake timeout: buffer ready not seen after {polls} polls")]
    Timeout { polls: u32 },

    /// Identity words do not match a known module
    #[error("Illegal module identity: magic={magic:#06x} id={id:#06x}")]
    IllegalIdentity { magic: u16, id: u16 },

    /// The hardware is output-only
    #[error("Operation not supported: {operation}")]
    UnsupportedOperation { operation: &'static str },

    /// Status code owned neither by the driver nor by the output buffer
    #[error("Unknown status code {code:#06x}")]
    UnknownCode { code: u32 },

    /// Block payload is not a valid multiple of the frame size
    #[error("Invalid block size {len} bytes: {expected}")]
    BufferSize { len: usize, expected: String },

    /// The output buffer stayed full for longer than its write timeout
    #[error("Output buffer write timed out after {timeout:?} ({written} bytes accepted)")]
    BufferTimeout { timeout: Duration, written: usize },

    /// Configuration could not be parsed or loaded
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// I/O error from the operating system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking task on the async bridge failed to complete
    #[error("Blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl M37Error {
    pub(crate) fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Check if this error reports a missing analog power supply.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::DeviceNotReady { .. })
    }

    /// Check if this error is a handshake or buffer timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::BufferTimeout { .. })
    }

    /// Check if the request was rejected because of the current mode.
    pub fn is_mode_conflict(&self) -> bool {
        matches!(
            self,
            Self::InvalidState { .. } | Self::InvalidParameter { .. }
        )
    }
}

impl From<toml::de::Error> for M37Error {
    fn from(err: toml::de::Error) -> Self {
        Self::InvalidConfig {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = M37Error::IllegalIdentity {
            magic: 0x5346,
            id: 0x0026,
        };
        assert!(err.to_string().contains("0x5346"));
        assert!(err.to_string().contains("0x0026"));

        let err = M37Error::Timeout { polls: 10 };
        assert!(err.to_string().contains("10 polls"));
    }

    #[test]
    fn test_error_predicates() {
        assert!(M37Error::Timeout { polls: 1 }.is_timeout());
        assert!(M37Error::BufferTimeout {
            timeout: Duration::from_millis(5),
            written: 8
        }
        .is_timeout());
        assert!(M37Error::DeviceNotReady {
            message: "PWR".into()
        }
        .is_not_ready());
        assert!(M37Error::invalid_state("ext trigger").is_mode_conflict());
        assert!(!M37Error::UnknownCode { code: 1 }.is_mode_conflict());
    }
}
