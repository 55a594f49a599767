//! Protocol constants and lookup tables.
//!
//! Defaults for connecting to a PLC, the end code description table, the
//! FINS/TCP error code table and the flag tables used when decoding a CPU
//! unit status reply.

use std::time::Duration;

/// Default PLC host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default FINS port (UDP and TCP).
pub const DEFAULT_PORT: u16 = 9600;

/// Default reply timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default maximum number of in-flight transactions.
pub const DEFAULT_MAX_QUEUE: usize = 50;

/// Lowest transaction ID handed out by default.
pub const DEFAULT_MIN_SID: u8 = 1;

/// Highest transaction ID handed out by default.
pub const DEFAULT_MAX_SID: u8 = 254;

/// Number of reply times kept for the rolling average.
pub const STATS_SAMPLE_SIZE: usize = 50;

/// Information Control Field for a command that requires a response.
pub const ICF_COMMAND: u8 = 0x80;

/// Default gateway count.
pub const DEFAULT_GCT: u8 = 0x02;

/// Description used when an end code is missing from [`END_CODES`].
pub const UNKNOWN_END_CODE: &str = "Unknown end code.";

/// End code descriptions keyed by four upper-case hex digits.
pub const END_CODES: &[(&str, &str)] = &[
    ("0000", "Normal Completion."),
    ("0001", "Service Cancelled."),
    ("0101", "Local Error: Local node not in network."),
    ("0102", "Local Error: Token Timeout."),
    ("0103", "Local Error: Retries Failed."),
    ("0104", "Local Error: Too many send frames."),
    ("0105", "Local Error: Node address range error."),
    ("0106", "Local Error: Node Address Duplication."),
    ("0201", "Destination Node Error: Destination Node not in network."),
    ("0202", "Destination Node Error: Unit Missing."),
    ("0203", "Destination Node Error: Third Node missing."),
    ("0204", "Destination Node Error: Destination Node busy."),
    ("0205", "Destination Node Error: Response Timeout."),
    ("0301", "Controller Error: Communications Controller Error."),
    ("0302", "Controller Error: CPU Unit Error."),
    ("0303", "Controller Error: Controller Error."),
    ("0304", "Controller Error: Unit number Error."),
    ("0401", "Service Unsupported: Undefined Command."),
    ("0402", "Service Unsupported: Not supported by Model/Version."),
    ("0501", "Routing Table Error: Destination address setting error."),
    ("0502", "Routing Table Error: No routing tables."),
    ("0503", "Routing Table Error: Routing table error."),
    ("0504", "Routing Table Error: Too many delays."),
    ("1001", "Command Format Error: Command too long."),
    ("1002", "Command Format Error: Command too short."),
    ("1003", "Command Format Error: Elements/Data don't match."),
    ("1004", "Command Format Error: Command format error."),
    ("1005", "Command Format Error: Header Error."),
    ("1101", "Parameter Error: Area classification missing."),
    ("1102", "Parameter Error: Access Size Error."),
    ("1103", "Parameter Error: Address range error."),
    ("1104", "Parameter Error: Address range exceeded."),
    ("1106", "Parameter Error: Program Missing."),
    ("1109", "Parameter Error: Relational Error."),
    ("110A", "Parameter Error: Duplicate Data Access."),
    ("110B", "Parameter Error: Response too long."),
    ("110C", "Parameter Error: Parameter Error."),
    ("2002", "Read Not Possible: Protected."),
    ("2003", "Read Not Possible: Table missing."),
    ("2004", "Read Not Possible: Data missing."),
    ("2005", "Read Not Possible: Program missing."),
    ("2006", "Read Not Possible: File missing."),
    ("2007", "Read Not Possible: Data mismatch."),
    ("2101", "Write Not Possible: Read Only."),
    ("2102", "Write Not Possible: Protected - cannot write data link table."),
    ("2103", "Write Not Possible: Cannot register."),
    ("2105", "Write Not Possible: Program missing."),
    ("2106", "Write Not Possible: File missing."),
    ("2107", "Write Not Possible: File name already exists."),
    ("2108", "Write Not Possible: Cannot change."),
    ("2201", "Not executable in current mode: Not possible during execution."),
    ("2202", "Not executable in current mode: Not possible while running."),
    ("2203", "Not executable in current mode: Wrong PLC mode (Program)."),
    ("2204", "Not executable in current mode: Wrong PLC mode (Debug)."),
    ("2205", "Not executable in current mode: Wrong PLC mode (Monitor)."),
    ("2206", "Not executable in current mode: Wrong PLC mode (Run)."),
    ("2207", "Not executable in current mode: Specified node not polling node."),
    ("2208", "Not executable in current mode: Step cannot be executed."),
    ("2301", "No such device: File device missing."),
    ("2302", "No such device: Missing memory."),
    ("2303", "No such device: Clock missing."),
    ("2401", "Cannot Start/Stop: Table missing."),
    ("2502", "Unit Error: Memory Error."),
    ("2503", "Unit Error: I/O setting Error."),
    ("2504", "Unit Error: Too many I/O points."),
    ("2505", "Unit Error: CPU bus error."),
    ("2506", "Unit Error: I/O Duplication."),
    ("2507", "Unit Error: I/O bus error."),
    ("2509", "Unit Error: SYSMAC BUS/2 error."),
    ("250A", "Unit Error: CPU Bus Unit Error."),
    ("250D", "Unit Error: SYSMAC BUS No. duplication."),
    ("250F", "Unit Error: Memory Error."),
    ("2510", "Unit Error: SYSMAC BUS terminator missing."),
    ("2601", "Command Error: No protection."),
    ("2602", "Command Error: Incorrect password."),
    ("2604", "Command Error: Protected."),
    ("2605", "Command Error: Service already executing."),
    ("2606", "Command Error: Service stopped."),
    ("2607", "Command Error: No execution right."),
    ("2608", "Command Error: Settings not complete."),
    ("2609", "Command Error: Necessary items not set."),
    ("260A", "Command Error: Number already defined."),
    ("260B", "Command Error: Error will not clear."),
    ("3001", "Access Right Error: No access right."),
    ("4001", "Abort: Service aborted."),
];

/// Looks up the description for an end code.
///
/// # Example
///
/// ```
/// use omron_fins_client::constants::end_code_description;
///
/// assert_eq!(end_code_description("0000"), "Normal Completion.");
/// assert_eq!(end_code_description("FFFF"), "Unknown end code.");
/// ```
pub fn end_code_description(code: &str) -> &'static str {
    END_CODES
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(code))
        .map(|(_, desc)| *desc)
        .unwrap_or(UNKNOWN_END_CODE)
}

/// FINS/TCP envelope error codes.
pub const TCP_ERROR_CODES: &[(u32, &str)] = &[
    (0, "Normal"),
    (1, "The header is not 'FINS' (ASCII code)."),
    (2, "The data length is too long."),
    (3, "The command is not supported."),
    (20, "All connections are in use."),
    (21, "The specified node is already connected."),
    (
        22,
        "Attempt to access a protected node from an unspecified IP address.",
    ),
    (23, "The client FINS node address is out of range."),
    (
        24,
        "The same FINS node address is being used by the client and server.",
    ),
    (
        25,
        "All the node addresses available for allocation have been used",
    ),
];

/// Looks up the text for a FINS/TCP envelope error code.
pub fn tcp_error_text(code: u32) -> &'static str {
    TCP_ERROR_CODES
        .iter()
        .find(|(key, _)| *key == code)
        .map(|(_, text)| *text)
        .unwrap_or("Unknown TCP error code.")
}

/// Fatal error flags of a CPU unit status reply.
pub const FATAL_ERROR_FLAGS: &[(&str, u16)] = &[
    ("WATCHDOG_ERROR", 1 << 0),
    ("SYSTEM_ERROR", 1 << 6),
    ("CYCLE_TIME_OVER", 1 << 8),
    ("PROGRAM_ERROR", 1 << 9),
    ("IO_SETTING_ERROR", 1 << 10),
    ("IO_POINT_OVERFLOW", 1 << 11),
    ("INNER_BOARD_ERROR", 1 << 12),
    ("DUPLICATION_ERROR", 1 << 13),
    ("IO_BUS_ERROR", 1 << 14),
    ("MEMORY_ERROR", 1 << 15),
];

/// Non-fatal error flags of a CPU unit status reply.
pub const NON_FATAL_ERROR_FLAGS: &[(&str, u16)] = &[
    ("PC_LINK_ERROR", 1 << 0),
    ("HOST_LINK_ERROR", 1 << 1),
    ("BATTERY_ERROR", 1 << 4),
    ("SYSMAC_BUS_ERROR", 1 << 5),
    ("SPECIAL_IO_UNIT_ERROR", 1 << 6),
    ("CPU_BUS_UNIT_ERROR", 1 << 7),
    ("INNER_BOARD_ERROR", 1 << 8),
    ("IO_VERIFICATION_ERROR", 1 << 9),
    ("PLC_SETUP_ERROR", 1 << 10),
    ("BASIC_IO_UNIT_ERROR", 1 << 12),
    ("INTERRUPT_TASK_ERROR", 1 << 13),
    ("DUPLEX_ERROR", 1 << 14),
    ("SYSTEM_ERROR", 1 << 15),
];

/// Mask applied to the status byte before looking it up.
pub const STATUS_MASK: u8 = 0x81;

/// Returns the names of every flag set in `value`.
///
/// # Example
///
/// ```
/// use omron_fins_client::constants::{decode_flags, FATAL_ERROR_FLAGS};
///
/// let set = decode_flags(FATAL_ERROR_FLAGS, (1 << 0) | (1 << 15));
/// assert_eq!(set, vec!["WATCHDOG_ERROR", "MEMORY_ERROR"]);
/// ```
pub fn decode_flags(table: &[(&'static str, u16)], value: u16) -> Vec<&'static str> {
    table
        .iter()
        .filter(|(_, bit)| value & bit != 0)
        .map(|(name, _)| *name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_code_lookup() {
        assert_eq!(end_code_description("0000"), "Normal Completion.");
        assert_eq!(
            end_code_description("110A"),
            "Parameter Error: Duplicate Data Access."
        );
        assert_eq!(
            end_code_description("110a"),
            "Parameter Error: Duplicate Data Access."
        );
        assert_eq!(end_code_description("9999"), UNKNOWN_END_CODE);
    }

    #[test]
    fn test_end_code_keys_unique() {
        for (i, (a, _)) in END_CODES.iter().enumerate() {
            for (b, _) in &END_CODES[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_tcp_error_text() {
        assert_eq!(tcp_error_text(0), "Normal");
        assert_eq!(tcp_error_text(20), "All connections are in use.");
        assert_eq!(tcp_error_text(99), "Unknown TCP error code.");
    }

    #[test]
    fn test_decode_flags_empty() {
        assert!(decode_flags(NON_FATAL_ERROR_FLAGS, 0).is_empty());
    }

    #[test]
    fn test_decode_non_fatal_battery() {
        assert_eq!(
            decode_flags(NON_FATAL_ERROR_FLAGS, 1 << 4),
            vec!["BATTERY_ERROR"]
        );
    }
}
