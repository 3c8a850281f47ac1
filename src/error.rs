//! Error types for the device bridge.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use qrbridge::{Result, Error};
//!
//! fn example(link: &mut SerialLink) -> Result<()> {
//!     link.write_all(b"startrotation\n")?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Transport | [`Error::Link`], [`Error::LinkNotFound`] |
//! | Device protocol | [`Error::Protocol`] |
//! | Backend | [`Error::Registration`] |
//! | Work items | [`Error::Decode`], [`Error::UnknownCommand`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::Http`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when bridge configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Serial link unreachable or faulted.
    ///
    /// Returned when the byte-stream connection to the device cannot be
    /// opened, or when a write/read faults mid-operation. A faulted link
    /// always drops its handle before this error propagates.
    #[error("Link error: {message}")]
    Link {
        /// Description of the link fault.
        message: String,
    },

    /// No serial endpoint could be discovered on the host.
    #[error("No serial device found")]
    LinkNotFound,

    // ========================================================================
    // Device Protocol Errors
    // ========================================================================
    /// Device did not follow the chunked-upload handshake.
    ///
    /// Returned when the upload start is not confirmed or a chunk goes
    /// unacknowledged within its poll budget.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Backend Errors
    // ========================================================================
    /// Backend rejected or was unreachable during registration.
    ///
    /// Connection failures, timeouts, and non-success payloads all collapse
    /// to this variant; they are distinguished only in logs.
    #[error("Registration failed: {message}")]
    Registration {
        /// Description of the registration failure.
        message: String,
    },

    // ========================================================================
    // Work Item Errors
    // ========================================================================
    /// Malformed image payload.
    ///
    /// Returned before any device I/O is attempted.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of the decode failure.
        message: String,
    },

    /// Unrecognized work-item kind.
    #[error("Unknown command type: {kind}")]
    UnknownCommand {
        /// The unrecognized command type string.
        kind: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a link error.
    #[inline]
    pub fn link(message: impl Into<String>) -> Self {
        Self::Link {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a registration error.
    #[inline]
    pub fn registration(message: impl Into<String>) -> Self {
        Self::Registration {
            message: message.into(),
        }
    }

    /// Creates a decode error.
    #[inline]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates an unknown command error.
    #[inline]
    pub fn unknown_command(kind: impl Into<String>) -> Self {
        Self::UnknownCommand { kind: kind.into() }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a transport-level error.
    #[inline]
    #[must_use]
    pub fn is_link_error(&self) -> bool {
        matches!(self, Self::Link { .. } | Self::LinkNotFound)
    }

    /// Returns `true` if this is a device protocol error.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed after a reconnect cycle; they are
    /// reported to the backend but never terminate the polling loop.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Link { .. } | Self::Protocol { .. } | Self::Http(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::link("write failed");
        assert_eq!(err.to_string(), "Link error: write failed");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("missing backend url");
        assert_eq!(err.to_string(), "Configuration error: missing backend url");
    }

    #[test]
    fn test_protocol_error_display() {
        let err = Error::protocol("chunk 3 unacknowledged");
        assert_eq!(err.to_string(), "Protocol error: chunk 3 unacknowledged");
    }

    #[test]
    fn test_is_link_error() {
        let link_err = Error::link("test");
        let not_found = Error::LinkNotFound;
        let other_err = Error::config("test");

        assert!(link_err.is_link_error());
        assert!(not_found.is_link_error());
        assert!(!other_err.is_link_error());
    }

    #[test]
    fn test_is_recoverable() {
        let link_err = Error::link("test");
        let proto_err = Error::protocol("test");
        let reg_err = Error::registration("test");
        let config_err = Error::config("test");

        assert!(link_err.is_recoverable());
        assert!(proto_err.is_recoverable());
        assert!(!reg_err.is_recoverable());
        assert!(!config_err.is_recoverable());
    }

    #[test]
    fn test_unknown_command_display() {
        let err = Error::unknown_command("reboot");
        assert_eq!(err.to_string(), "Unknown command type: reboot");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "port not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
