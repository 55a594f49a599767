//! Error types for the FINS client.
//!
//! Synchronous rejections (bad address, bad parameter, full queue, not
//! connected) are returned directly from the request methods as
//! [`FinsError`]. Everything that happens after a transaction ID has been
//! allocated is delivered asynchronously as a [`Failure`], which wraps the
//! error together with the transaction it belongs to.

use std::io;
use thiserror::Error;

use crate::reply::Tag;

/// Result type alias for FINS operations.
pub type Result<T> = std::result::Result<T, FinsError>;

/// Errors that can occur during FINS communication.
#[derive(Debug, Error)]
pub enum FinsError {
    /// The address string does not follow the address grammar, or names an
    /// area that the active PLC family does not map.
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress {
        /// The address as supplied by the caller.
        address: String,
        /// Description of the addressing error.
        reason: String,
    },

    /// Invalid parameter provided.
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// Name of the invalid parameter.
        parameter: String,
        /// Description of why the parameter is invalid.
        reason: String,
    },

    /// A value could not be interpreted as a boolean.
    #[error("Invalid boolean value '{value}'")]
    InvalidBoolean {
        /// The rejected value, rendered as text.
        value: String,
    },

    /// The number of in-flight transactions reached the configured maximum.
    #[error("Queue full: {active} transactions in flight (max {max})")]
    QueueFull {
        /// In-flight count at the time of the request.
        active: usize,
        /// Configured maximum queue depth.
        max: usize,
    },

    /// The transport is not in the connected state.
    #[error("Not connected")]
    NotConnected,

    /// I/O error on the underlying socket.
    #[error("Transport error: {0}")]
    Io(#[from] io::Error),

    /// The FINS/TCP envelope was malformed or carried a non-zero error code.
    #[error("Framing error: {reason}")]
    ProtocolFraming {
        /// Description of the framing problem.
        reason: String,
    },

    /// A reply carried a transaction ID with no waiting sequence.
    #[error("Unexpected SID '{sid}' received")]
    UnexpectedTransactionId {
        /// The SID found in the reply header.
        sid: u8,
    },

    /// A reply carried a command code different from the request's.
    #[error("Unexpected command code response. Expected '{expected}' received '{received}'")]
    UnexpectedCommandCode {
        /// Command code of the originating request.
        expected: String,
        /// Command code found in the reply.
        received: String,
    },

    /// A multiple-read reply listed areas in a different order than requested.
    #[error("Unexpected memory area in response at item {index}: expected 0x{expected:02X}, received 0x{received:02X}")]
    AddressMismatch {
        /// Position of the item in the original address list.
        index: usize,
        /// Area code of the requested address.
        expected: u8,
        /// Area code found in the reply.
        received: u8,
    },

    /// No reply arrived within the transaction's timeout.
    #[error("Communication timeout")]
    Timeout,

    /// A sequence was registered on an ID that is still waiting for a reply.
    #[error("SID {sid} is already waiting a reply")]
    DuplicateActiveId {
        /// The contended SID.
        sid: u8,
    },

    /// A sequence was registered on an ID outside the configured range.
    #[error("Invalid SID {sid}: must be within {min}..={max}")]
    InvalidId {
        /// The rejected SID.
        sid: u8,
        /// Lowest usable SID.
        min: u8,
        /// Highest usable SID.
        max: u8,
    },

    /// The reply payload is too short or otherwise malformed.
    #[error("Invalid response: {reason}")]
    InvalidResponse {
        /// Description of the response error.
        reason: String,
    },

    /// The command code or name is not in the command table.
    #[error("Command '{code}' not recognised")]
    UnrecognisedCommand {
        /// The code or name supplied by the caller.
        code: String,
    },

    /// The PLC answered with a non-normal end code.
    #[error("PLC error {code}: {description}")]
    PlcError {
        /// Four hex digit end code.
        code: String,
        /// Description from the end code table.
        description: String,
    },
}

impl FinsError {
    /// Creates a new `InvalidAddress` error.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_client::FinsError;
    ///
    /// let err = FinsError::invalid_address("Q10", "unknown memory area");
    /// assert_eq!(err.to_string(), "Invalid address 'Q10': unknown memory area");
    /// ```
    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidParameter` error.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_client::FinsError;
    ///
    /// let err = FinsError::invalid_parameter("count", "must be greater than 0");
    /// ```
    pub fn invalid_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidResponse` error.
    pub fn invalid_response(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }

    /// Creates a new `ProtocolFraming` error.
    pub fn framing(reason: impl Into<String>) -> Self {
        Self::ProtocolFraming {
            reason: reason.into(),
        }
    }

    /// Returns true for errors raised before a transaction ID is allocated.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::InvalidAddress { .. }
                | Self::InvalidParameter { .. }
                | Self::InvalidBoolean { .. }
                | Self::QueueFull { .. }
                | Self::NotConnected
                | Self::UnrecognisedCommand { .. }
        )
    }
}

/// An asynchronous failure tied to a transaction.
///
/// Delivered through the request's reply channel when one was supplied,
/// otherwise through [`ClientEvent::Error`](crate::ClientEvent::Error).
#[derive(Debug, Error)]
#[error("{error}")]
pub struct Failure {
    /// What went wrong.
    #[source]
    pub error: FinsError,
    /// Transaction the failure belongs to, when known.
    pub sid: Option<u8>,
    /// The caller's tag, echoed unchanged.
    pub tag: Option<Tag>,
}

impl Failure {
    /// Creates a failure for a known transaction.
    pub fn new(error: FinsError, sid: Option<u8>, tag: Option<Tag>) -> Self {
        Self { error, sid, tag }
    }

    /// Creates a failure that no transaction can be blamed for.
    pub fn detached(error: FinsError) -> Self {
        Self {
            error,
            sid: None,
            tag: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_address_display() {
        let err = FinsError::invalid_address("D", "missing word address");
        assert_eq!(err.to_string(), "Invalid address 'D': missing word address");
    }

    #[test]
    fn test_timeout_display() {
        let err = FinsError::Timeout;
        assert_eq!(err.to_string(), "Communication timeout");
    }

    #[test]
    fn test_unexpected_command_code_display() {
        let err = FinsError::UnexpectedCommandCode {
            expected: "0101".into(),
            received: "0102".into(),
        };
        assert_eq!(
            err.to_string(),
            "Unexpected command code response. Expected '0101' received '0102'"
        );
    }

    #[test]
    fn test_precondition_classification() {
        assert!(FinsError::NotConnected.is_precondition());
        assert!(FinsError::QueueFull { active: 5, max: 5 }.is_precondition());
        assert!(FinsError::invalid_parameter("count", "zero").is_precondition());
        assert!(!FinsError::Timeout.is_precondition());
        assert!(!FinsError::DuplicateActiveId { sid: 3 }.is_precondition());
    }

    #[test]
    fn test_failure_wraps_error() {
        let failure = Failure::new(FinsError::Timeout, Some(7), None);
        assert_eq!(failure.to_string(), "Communication timeout");
        assert_eq!(failure.sid, Some(7));
        assert!(std::error::Error::source(&failure).is_some());
    }
}
