//! FINS response parsing and end code interpretation.
//!
//! # Response Structure
//!
//! | Component | Size | Description |
//! |-----------|------|-------------|
//! | Header | 10 bytes | FINS header, SID at byte 9 |
//! | MRC | 1 byte | Main Request Code, echoed |
//! | SRC | 1 byte | Sub Request Code, echoed |
//! | MRES | 1 byte | Main response code, bit 7 = network relay error |
//! | SRES | 1 byte | Sub response code, bit 6 = non-fatal, bit 7 = fatal CPU error |
//! | Data | Variable | Command specific payload |
//!
//! The flag bits are stripped before the end code is looked up, so a routing
//! warning such as `0x0040` reads as a normal completion with
//! [`EndCode::non_fatal_cpu_error`] set.
//!
//! # Example
//!
//! ```
//! use omron_fins_client::{CommandCode, FinsResponse};
//!
//! let bytes = [
//!     0xC0, 0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x0A, 0x00, 0x01, // header
//!     0x01, 0x01, // MRC, SRC
//!     0x00, 0x00, // end code
//!     0x00, 0x0A, 0x00, 0x14, // data
//! ];
//!
//! let response = FinsResponse::from_bytes(&bytes).unwrap();
//! assert_eq!(response.command(), Some(CommandCode::MemoryAreaRead));
//! assert_eq!(response.end_code.code, "0000");
//! assert_eq!(response.end_code.description, "Normal Completion.");
//! ```

use std::fmt;

use serde::Serialize;

use crate::command::CommandCode;
use crate::constants::end_code_description;
use crate::error::{FinsError, Result};
use crate::header::{FinsHeader, FINS_HEADER_SIZE};

/// Minimum response size: header (10) + MRC (1) + SRC (1) + MRES (1) + SRES (1) = 14 bytes.
pub const MIN_RESPONSE_SIZE: usize = FINS_HEADER_SIZE + 4;

/// Decoded end code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndCode {
    /// Main response code with the relay flag removed.
    pub mres: u8,
    /// Sub response code with the CPU error flags removed.
    pub sres: u8,
    /// A relay node on the route reported an error.
    pub network_relay_error: bool,
    /// The CPU unit has a non-fatal error.
    pub non_fatal_cpu_error: bool,
    /// The CPU unit has a fatal error.
    pub fatal_cpu_error: bool,
    /// Four upper-case hex digits, e.g. `"1103"`.
    pub code: String,
    /// Human readable description.
    pub description: &'static str,
}

impl EndCode {
    /// Decodes the two end code bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_client::EndCode;
    ///
    /// let end = EndCode::from_bytes(0x81, 0x03);
    /// assert!(end.network_relay_error);
    /// assert_eq!(end.code, "0103");
    /// ```
    pub fn from_bytes(main: u8, sub: u8) -> Self {
        let mres = main & 0x7F;
        let sres = sub & 0x3F;
        let code = format!("{mres:02X}{sres:02X}");
        Self {
            mres,
            sres,
            network_relay_error: main & 0x80 != 0,
            non_fatal_cpu_error: sub & 0x40 != 0,
            fatal_cpu_error: sub & 0x80 != 0,
            description: end_code_description(&code),
            code,
        }
    }

    /// Returns whether the command completed normally.
    pub fn is_normal(&self) -> bool {
        self.mres == 0 && self.sres == 0
    }
}

impl fmt::Display for EndCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.description)
    }
}

/// Parsed FINS response.
#[derive(Debug, Clone)]
pub struct FinsResponse {
    /// Response header.
    pub header: FinsHeader,
    /// Main Request Code (MRC).
    pub mrc: u8,
    /// Sub Request Code (SRC).
    pub src: u8,
    /// End code.
    pub end_code: EndCode,
    /// Response data (if any).
    pub data: Vec<u8>,
}

impl FinsResponse {
    /// Parses a FINS response from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::InvalidResponse` if the frame is shorter than
    /// [`MIN_RESPONSE_SIZE`].
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_RESPONSE_SIZE {
            return Err(FinsError::invalid_response(format!(
                "response too short: expected at least {} bytes, got {}",
                MIN_RESPONSE_SIZE,
                data.len()
            )));
        }

        let header = FinsHeader::from_bytes(&data[..FINS_HEADER_SIZE])?;

        Ok(Self {
            header,
            mrc: data[FINS_HEADER_SIZE],
            src: data[FINS_HEADER_SIZE + 1],
            end_code: EndCode::from_bytes(data[FINS_HEADER_SIZE + 2], data[FINS_HEADER_SIZE + 3]),
            data: data[MIN_RESPONSE_SIZE..].to_vec(),
        })
    }

    /// Transaction ID the response claims to answer.
    pub fn sid(&self) -> u8 {
        self.header.sid
    }

    /// The command being answered, if it is one this client sends.
    pub fn command(&self) -> Option<CommandCode> {
        CommandCode::from_bytes(self.mrc, self.src)
    }

    /// Four hex digit command code as received.
    pub fn command_code(&self) -> String {
        format!("{:02X}{:02X}", self.mrc, self.src)
    }

    /// Checks that the response answers `expected`.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::UnexpectedCommandCode` on mismatch.
    pub fn check_command(&self, expected: CommandCode) -> Result<()> {
        if expected.bytes() == [self.mrc, self.src] {
            Ok(())
        } else {
            Err(FinsError::UnexpectedCommandCode {
                expected: expected.code(),
                received: self.command_code(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_response(mrc: u8, src: u8, main: u8, sub: u8, data: &[u8]) -> Vec<u8> {
        let mut bytes = vec![
            0xC0, 0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x0A, 0x00, 0x07, // header
            mrc, src, main, sub,
        ];
        bytes.extend_from_slice(data);
        bytes
    }

    #[test]
    fn test_response_from_bytes() {
        let bytes = make_response(0x01, 0x01, 0x00, 0x00, &[0x12, 0x34]);
        let response = FinsResponse::from_bytes(&bytes).unwrap();

        assert!(response.header.is_response());
        assert_eq!(response.sid(), 0x07);
        assert_eq!(response.command(), Some(CommandCode::MemoryAreaRead));
        assert!(response.end_code.is_normal());
        assert_eq!(response.data, vec![0x12, 0x34]);
    }

    #[test]
    fn test_response_from_bytes_too_short() {
        let bytes = [0xC0, 0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x0A, 0x00, 0x07, 0x01, 0x01, 0x00];
        assert!(FinsResponse::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_end_code_lookup() {
        let end = EndCode::from_bytes(0x11, 0x03);
        assert_eq!(end.code, "1103");
        assert!(!end.is_normal());
        assert_ne!(end.description, crate::constants::UNKNOWN_END_CODE);
    }

    #[test]
    fn test_end_code_flags_masked() {
        let end = EndCode::from_bytes(0x80, 0xC0);
        assert!(end.network_relay_error);
        assert!(end.non_fatal_cpu_error);
        assert!(end.fatal_cpu_error);
        assert_eq!(end.code, "0000");
        assert!(end.is_normal());
    }

    #[test]
    fn test_routing_warning_is_normal() {
        let end = EndCode::from_bytes(0x00, 0x40);
        assert!(end.is_normal());
        assert!(end.non_fatal_cpu_error);
    }

    #[test]
    fn test_unknown_end_code() {
        let end = EndCode::from_bytes(0x7F, 0x3F);
        assert_eq!(end.code, "7F3F");
        assert_eq!(end.description, crate::constants::UNKNOWN_END_CODE);
    }

    #[test]
    fn test_check_command() {
        let response = FinsResponse::from_bytes(&make_response(0x01, 0x04, 0, 0, &[])).unwrap();
        assert!(response.check_command(CommandCode::MultipleMemoryAreaRead).is_ok());
        match response.check_command(CommandCode::MemoryAreaRead) {
            Err(FinsError::UnexpectedCommandCode { expected, received }) => {
                assert_eq!(expected, "0101");
                assert_eq!(received, "0104");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_command() {
        let response = FinsResponse::from_bytes(&make_response(0x22, 0x01, 0, 0, &[])).unwrap();
        assert_eq!(response.command(), None);
        assert_eq!(response.command_code(), "2201");
    }
}
