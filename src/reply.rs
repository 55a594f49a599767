//! Structured replies and per-command payload decoding.
//!
//! [`decode_body`] turns the data section of a [`FinsResponse`] into a
//! [`ReplyBody`], using the originating [`Command`] to know how wide each
//! value is. The client wraps the body into a [`Reply`] together with the
//! end code, the caller's tag and timing information.

use std::time::Duration;

use serde::Serialize;

use crate::address::MemoryAddress;
use crate::command::{ClockData, Command, CommandCode, PlcMode};
use crate::constants::{decode_flags, FATAL_ERROR_FLAGS, NON_FATAL_ERROR_FLAGS, STATUS_MASK};
use crate::error::{Failure, FinsError, Result};
use crate::packing::bcd_to_dec;
use crate::response::{EndCode, FinsResponse};
use crate::sequence::StatsSnapshot;

/// Opaque caller data echoed back with the outcome of a request.
pub type Tag = serde_json::Value;

/// What a request eventually resolves to.
pub type Outcome = std::result::Result<Reply, Failure>;

/// CPU unit run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// The program is stopped.
    Stop,
    /// The program is executing.
    Run,
    /// Waiting for initialization to complete.
    CpuStandby,
    /// A status byte with no known meaning, after masking.
    Unknown(u8),
}

impl RunStatus {
    /// Decodes the status byte of a status read reply.
    ///
    /// Only bits 0 and 7 are significant; battery and flash bits are masked
    /// off first.
    pub fn from_byte(byte: u8) -> Self {
        match byte & STATUS_MASK {
            0x00 => RunStatus::Stop,
            0x01 => RunStatus::Run,
            0x80 => RunStatus::CpuStandby,
            other => RunStatus::Unknown(other),
        }
    }
}

/// Decoded CPU UNIT STATUS READ reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CpuStatus {
    /// Run status.
    pub status: RunStatus,
    /// Operating mode, `None` when the mode byte is unrecognised.
    pub mode: Option<PlcMode>,
    /// Raw mode byte.
    pub mode_code: u8,
    /// Fatal error flags, `None` when the fatal error word is zero.
    pub fatal_errors: Option<Vec<&'static str>>,
    /// Non-fatal error flags, `None` when the non-fatal error word is zero.
    pub non_fatal_errors: Option<Vec<&'static str>>,
    /// Error code of the most serious current error.
    pub plc_error_code: u16,
    /// Message text, present when the PLC reports one.
    pub message: Option<String>,
}

/// Area sizing fields of a CPU UNIT DATA READ reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AreaData {
    /// Largest usable program area, in kilowords.
    pub max_program_size_kb: u16,
    /// Size of the bit-addressable area, in kilowords.
    pub iom_size_kb: u8,
    /// Number of DM words.
    pub dm_words: u16,
    /// Size of the timer/counter area, in kilowords.
    pub timer_counter_size_kb: u8,
    /// Number of EM banks without file memory.
    pub em_banks_non_file: u8,
    /// Memory card type, 0 when no card is mounted.
    pub memory_card_type: u8,
    /// Memory card size, in kilobytes.
    pub memory_card_size_kb: u16,
}

/// One entry of the CPU bus unit configuration table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusUnit {
    /// Unit number, 0..=15.
    pub unit: u8,
    /// Two character model ID.
    pub model_id: String,
    /// Whether a unit is mounted at this number.
    pub present: bool,
}

/// Decoded CPU UNIT DATA READ reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CpuUnitData {
    /// CPU unit model.
    pub model: String,
    /// Internal system version.
    pub version: String,
    /// DIP switch states, SW1 first.
    pub dip_switches: [bool; 8],
    /// Largest EM bank number.
    pub largest_em_bank: u8,
    /// Area sizing.
    pub area: AreaData,
    /// CPU bus unit configuration, units 0 to 15.
    pub bus_units: Vec<BusUnit>,
    /// Number of connected racks.
    pub rack_count: u8,
    /// Number of SYSMAC BUS masters.
    pub sysmac_bus_masters: u8,
}

/// Decoded payload of a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyBody {
    /// The command carries no reply payload, or the end code was not normal
    /// and the payload could not be decoded.
    None,
    /// MEMORY AREA READ values.
    Memory {
        /// One value per element: bytes for bit reads, signed 32-bit for
        /// index registers, signed 16-bit otherwise.
        values: Vec<i32>,
        /// Raw data section.
        buffer: Vec<u8>,
    },
    /// MULTIPLE MEMORY AREA READ values, in request order.
    MultipleMemory {
        /// One value per requested address.
        values: Vec<i32>,
        /// Raw data section.
        buffer: Vec<u8>,
    },
    /// CPU UNIT STATUS READ.
    Status(CpuStatus),
    /// CLOCK READ.
    Clock(ClockData),
    /// CPU UNIT DATA READ.
    CpuUnitData(Box<CpuUnitData>),
}

/// A decoded reply to one request.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    /// Transaction ID.
    pub sid: u8,
    /// The command answered.
    pub command: CommandCode,
    /// Address of the peer that answered.
    pub remote_host: String,
    /// End code.
    pub end_code: EndCode,
    /// Decoded payload.
    pub body: ReplyBody,
    /// The caller's tag.
    pub tag: Option<Tag>,
    /// Time between registration and reply.
    pub time_taken: Duration,
    /// Statistics at the time of the reply.
    pub stats: StatsSnapshot,
}

impl Reply {
    /// Values of a memory or multiple memory read.
    pub fn values(&self) -> Option<&[i32]> {
        match &self.body {
            ReplyBody::Memory { values, .. } | ReplyBody::MultipleMemory { values, .. } => {
                Some(values)
            }
            _ => None,
        }
    }

    /// Converts a non-normal end code into an error.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::PlcError` unless the end code is normal.
    pub fn check_end_code(&self) -> Result<()> {
        if self.end_code.is_normal() {
            Ok(())
        } else {
            Err(FinsError::PlcError {
                code: self.end_code.code.clone(),
                description: self.end_code.description.to_string(),
            })
        }
    }
}

/// Decodes the payload of `response` as an answer to `command`.
///
/// When the end code is not normal the PLC usually sends no data; a payload
/// that does not decode is then reported as [`ReplyBody::None`].
///
/// # Errors
///
/// `UnexpectedCommandCode` when the response answers a different command,
/// `AddressMismatch` when a multiple read returns area codes out of order,
/// and `InvalidResponse` for truncated payloads.
///
/// # Example
///
/// ```
/// use omron_fins_client::{decode_body, AddressCodec, Command, FinsResponse, PlcFamily, ReadCommand, ReplyBody};
///
/// let codec = AddressCodec::new(PlcFamily::CsCj);
/// let cmd = Command::Read(ReadCommand::new(codec.parse("D0").unwrap(), 2).unwrap());
/// let response = FinsResponse::from_bytes(&[
///     0xC0, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
///     0x01, 0x01, 0x00, 0x00, 0x00, 0x0A, 0x00, 0x14,
/// ]).unwrap();
///
/// match decode_body(&cmd, &response).unwrap() {
///     ReplyBody::Memory { values, .. } => assert_eq!(values, vec![10, 20]),
///     other => panic!("unexpected body {other:?}"),
/// }
/// ```
pub fn decode_body(command: &Command, response: &FinsResponse) -> Result<ReplyBody> {
    response.check_command(command.code())?;
    let data = response.data.as_slice();
    let normal = response.end_code.is_normal();
    if !normal && data.is_empty() {
        return Ok(ReplyBody::None);
    }

    let decoded = match command {
        Command::Read(c) => decode_memory(c.address(), data),
        Command::ReadMultiple(c) => decode_multiple(c.addresses(), data),
        Command::Status => decode_status(data).map(ReplyBody::Status),
        Command::ClockRead => decode_clock(data).map(ReplyBody::Clock),
        Command::CpuUnitDataRead => {
            decode_cpu_unit_data(data).map(|d| ReplyBody::CpuUnitData(Box::new(d)))
        }
        Command::Write(_)
        | Command::Fill(_)
        | Command::Transfer(_)
        | Command::Run(_)
        | Command::Stop
        | Command::ClockWrite(_) => Ok(ReplyBody::None),
    };

    match decoded {
        Err(_) if !normal => Ok(ReplyBody::None),
        other => other,
    }
}

fn truncated(what: &str, needed: usize, got: usize) -> FinsError {
    FinsError::invalid_response(format!(
        "{what} reply truncated: expected {needed} bytes, got {got}"
    ))
}

fn read_value(address: &MemoryAddress, data: &[u8]) -> Option<i32> {
    if address.is_bit_address() {
        data.first().map(|b| i32::from(*b))
    } else if address.element_length() == 4 {
        let bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
        Some(i32::from_be_bytes(bytes))
    } else {
        let bytes: [u8; 2] = data.get(..2)?.try_into().ok()?;
        Some(i32::from(i16::from_be_bytes(bytes)))
    }
}

fn decode_memory(address: &MemoryAddress, data: &[u8]) -> Result<ReplyBody> {
    let width = address.element_length();
    if data.len() % width != 0 {
        return Err(FinsError::invalid_response(format!(
            "memory read reply of {} bytes is not a multiple of {width}",
            data.len()
        )));
    }
    let values = data
        .chunks_exact(width)
        .filter_map(|chunk| read_value(address, chunk))
        .collect();
    Ok(ReplyBody::Memory {
        values,
        buffer: data.to_vec(),
    })
}

fn decode_multiple(addresses: &[MemoryAddress], data: &[u8]) -> Result<ReplyBody> {
    let mut values = Vec::with_capacity(addresses.len());
    let mut offset = 0;
    while offset < data.len() {
        let index = values.len();
        let address = addresses.get(index).ok_or_else(|| {
            FinsError::invalid_response(format!(
                "multiple read reply holds more than {} values",
                addresses.len()
            ))
        })?;
        let received = data[offset];
        if received != address.area_code() {
            return Err(FinsError::AddressMismatch {
                index,
                expected: address.area_code(),
                received,
            });
        }
        offset += 1;
        let value = read_value(address, &data[offset..]).ok_or_else(|| {
            truncated("multiple read", offset + address.element_length(), data.len())
        })?;
        values.push(value);
        offset += address.element_length();
    }
    if values.len() != addresses.len() {
        return Err(FinsError::invalid_response(format!(
            "multiple read reply holds {} of {} values",
            values.len(),
            addresses.len()
        )));
    }
    Ok(ReplyBody::MultipleMemory {
        values,
        buffer: data.to_vec(),
    })
}

fn flags(table: &[(&'static str, u16)], word: u16) -> Option<Vec<&'static str>> {
    (word != 0).then(|| decode_flags(table, word))
}

fn decode_status(data: &[u8]) -> Result<CpuStatus> {
    if data.len() < 10 {
        return Err(truncated("status", 10, data.len()));
    }
    let word = |at: usize| u16::from_be_bytes([data[at], data[at + 1]]);
    let message = (word(6) != 0)
        .then(|| {
            let text = String::from_utf8_lossy(&data[10..]);
            text.trim_end_matches(['\0', ' ']).to_string()
        })
        .filter(|m| !m.is_empty());

    Ok(CpuStatus {
        status: RunStatus::from_byte(data[0]),
        mode: PlcMode::from_code(data[1]),
        mode_code: data[1],
        fatal_errors: flags(FATAL_ERROR_FLAGS, word(2)),
        non_fatal_errors: flags(NON_FATAL_ERROR_FLAGS, word(4)),
        plc_error_code: word(8),
        message,
    })
}

fn decode_clock(data: &[u8]) -> Result<ClockData> {
    if data.len() < 6 {
        return Err(truncated("clock", 6, data.len()));
    }
    Ok(ClockData {
        year: u16::from(bcd_to_dec(data[0])),
        month: bcd_to_dec(data[1]),
        day: bcd_to_dec(data[2]),
        hour: bcd_to_dec(data[3]),
        minute: bcd_to_dec(data[4]),
        second: Some(bcd_to_dec(data[5])),
        day_of_week: data.get(6).copied(),
    })
}

fn ascii_field(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .to_string()
}

/// Size of a CPU UNIT DATA READ payload.
const CPU_UNIT_DATA_SIZE: usize = 158;

fn decode_cpu_unit_data(data: &[u8]) -> Result<CpuUnitData> {
    if data.len() < CPU_UNIT_DATA_SIZE {
        return Err(truncated("CPU unit data", CPU_UNIT_DATA_SIZE, data.len()));
    }
    let u16_at = |at: usize| u16::from_be_bytes([data[at], data[at + 1]]);

    let dip = data[40];
    let mut dip_switches = [false; 8];
    for (bit, switch) in dip_switches.iter_mut().enumerate() {
        *switch = dip & (1 << bit) != 0;
    }

    // area data block starts at 80
    let area = AreaData {
        max_program_size_kb: u16_at(80),
        iom_size_kb: data[82],
        dm_words: u16_at(83),
        timer_counter_size_kb: data[85],
        em_banks_non_file: data[86],
        memory_card_type: data[88],
        memory_card_size_kb: u16_at(90),
    };

    let bus_units = data[92..156]
        .chunks_exact(2)
        .take(16)
        .zip(0u8..)
        .map(|(entry, unit)| BusUnit {
            unit,
            present: entry[0] & 0x80 != 0,
            model_id: ascii_field(&[entry[0] & 0x7F, entry[1]]),
        })
        .collect();

    Ok(CpuUnitData {
        model: ascii_field(&data[0..20]),
        version: ascii_field(&data[20..40]),
        dip_switches,
        largest_em_bank: data[41],
        area,
        bus_units,
        rack_count: data[156] & 0x0F,
        sysmac_bus_masters: data[157] & 0x03,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressCodec;
    use crate::command::{MultipleReadCommand, ReadCommand, WriteCommand};
    use crate::memory::PlcFamily;
    use crate::packing::DataValue;

    fn codec() -> AddressCodec {
        AddressCodec::new(PlcFamily::CsCj)
    }

    fn response(code: [u8; 2], end: [u8; 2], data: &[u8]) -> FinsResponse {
        let mut bytes = hex::decode("c00002000000000a0001").unwrap();
        bytes.extend_from_slice(&code);
        bytes.extend_from_slice(&end);
        bytes.extend_from_slice(data);
        FinsResponse::from_bytes(&bytes).unwrap()
    }

    fn read(address: &str, count: u16) -> Command {
        Command::Read(ReadCommand::new(codec().parse(address).unwrap(), count).unwrap())
    }

    #[test]
    fn test_decode_word_read() {
        let body = decode_body(&read("D0", 2), &response([1, 1], [0, 0], &[0x00, 0x0A, 0x00, 0x14])).unwrap();
        assert_eq!(
            body,
            ReplyBody::Memory {
                values: vec![10, 20],
                buffer: vec![0x00, 0x0A, 0x00, 0x14]
            }
        );
    }

    #[test]
    fn test_decode_word_read_signed() {
        let body = decode_body(&read("D0", 1), &response([1, 1], [0, 0], &[0xFF, 0xFE])).unwrap();
        assert_eq!(body, ReplyBody::Memory { values: vec![-2], buffer: vec![0xFF, 0xFE] });
    }

    #[test]
    fn test_decode_bit_and_dword_read() {
        let body = decode_body(&read("CIO1.0", 3), &response([1, 1], [0, 0], &[1, 0, 1])).unwrap();
        assert!(matches!(body, ReplyBody::Memory { ref values, .. } if values == &[1, 0, 1]));

        let body = decode_body(&read("IR0", 1), &response([1, 1], [0, 0], &[0x80, 0, 0, 1])).unwrap();
        assert!(matches!(body, ReplyBody::Memory { ref values, .. } if values == &[i32::MIN + 1]));
    }

    #[test]
    fn test_decode_odd_word_read_rejected() {
        let err = decode_body(&read("D0", 2), &response([1, 1], [0, 0], &[0, 1, 2])).unwrap_err();
        assert!(matches!(err, FinsError::InvalidResponse { .. }));
    }

    #[test]
    fn test_written_values_read_back() {
        let values: Vec<DataValue> = [1, 2, 3].into_iter().map(DataValue::from).collect();
        let address = codec().parse("D100").unwrap();
        let write = WriteCommand::new(address, &values).unwrap();
        let body = decode_body(&read("D100", 3), &response([1, 1], [0, 0], write.data())).unwrap();
        assert!(matches!(body, ReplyBody::Memory { ref values, .. } if values == &[1, 2, 3]));
    }

    #[test]
    fn test_command_mismatch() {
        let err = decode_body(&read("D0", 1), &response([1, 2], [0, 0], &[])).unwrap_err();
        assert!(matches!(err, FinsError::UnexpectedCommandCode { .. }));
    }

    fn multiple(addresses: &[&str]) -> Command {
        Command::ReadMultiple(MultipleReadCommand::new(codec().parse_all(addresses).unwrap()).unwrap())
    }

    #[test]
    fn test_decode_multiple_read() {
        let cmd = multiple(&["D10", "CIO20.0", "IR1"]);
        let data = [0x82, 0x00, 0x05, 0x30, 0x01, 0xDC, 0x00, 0x00, 0x01, 0x00];
        let body = decode_body(&cmd, &response([1, 4], [0, 0], &data)).unwrap();
        assert!(matches!(body, ReplyBody::MultipleMemory { ref values, .. } if values == &[5, 1, 256]));
    }

    #[test]
    fn test_decode_multiple_read_wrong_order() {
        let cmd = multiple(&["D10", "CIO20.0"]);
        let data = [0x30, 0x01, 0x82, 0x00, 0x05];
        match decode_body(&cmd, &response([1, 4], [0, 0], &data)) {
            Err(FinsError::AddressMismatch { index, expected, received }) => {
                assert_eq!(index, 0);
                assert_eq!(expected, 0x82);
                assert_eq!(received, 0x30);
            }
            other => panic!("expected address mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_multiple_read_extra_or_missing() {
        let cmd = multiple(&["D10"]);
        let extra = [0x82, 0x00, 0x05, 0x82, 0x00, 0x06];
        assert!(decode_body(&cmd, &response([1, 4], [0, 0], &extra)).is_err());
        let missing = [0x82, 0x00];
        assert!(decode_body(&cmd, &response([1, 4], [0, 0], &missing)).is_err());
    }

    #[test]
    fn test_decode_status() {
        let mut data = vec![0x83, 0x02, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x40, 0x02];
        data.extend_from_slice(b"HELLO\0\0\0");
        let body = decode_body(&Command::Status, &response([6, 1], [0, 0], &data)).unwrap();
        let ReplyBody::Status(status) = body else {
            panic!("expected status body");
        };
        assert_eq!(status.status, RunStatus::Unknown(0x81));
        assert_eq!(status.mode, Some(PlcMode::Monitor));
        assert_eq!(status.fatal_errors, Some(vec!["WATCHDOG_ERROR"]));
        assert_eq!(status.non_fatal_errors, None);
        assert_eq!(status.plc_error_code, 0x4002);
        assert_eq!(status.message.as_deref(), Some("HELLO"));
    }

    #[test]
    fn test_run_status_values() {
        assert_eq!(RunStatus::from_byte(0x00), RunStatus::Stop);
        assert_eq!(RunStatus::from_byte(0x01), RunStatus::Run);
        assert_eq!(RunStatus::from_byte(0x80), RunStatus::CpuStandby);
        assert_eq!(RunStatus::from_byte(0x05), RunStatus::Run);
    }

    #[test]
    fn test_decode_status_no_message() {
        let data = [0x01, 0x04, 0, 0, 0, 0, 0, 0, 0, 0];
        let ReplyBody::Status(status) = decode_body(&Command::Status, &response([6, 1], [0, 0], &data)).unwrap() else {
            panic!("expected status body");
        };
        assert_eq!(status.status, RunStatus::Run);
        assert_eq!(status.mode, Some(PlcMode::Run));
        assert_eq!(status.message, None);
    }

    #[test]
    fn test_decode_clock() {
        let data = [0x24, 0x03, 0x15, 0x13, 0x45, 0x30, 0x05];
        let body = decode_body(&Command::ClockRead, &response([7, 1], [0, 0], &data)).unwrap();
        assert_eq!(
            body,
            ReplyBody::Clock(ClockData {
                year: 24,
                month: 3,
                day: 15,
                hour: 13,
                minute: 45,
                second: Some(30),
                day_of_week: Some(5),
            })
        );
        assert!(decode_body(&Command::ClockRead, &response([7, 1], [0, 0], &data[..3])).is_err());
    }

    #[test]
    fn test_decode_cpu_unit_data() {
        let mut data = vec![0u8; CPU_UNIT_DATA_SIZE];
        data[..10].copy_from_slice(b"CJ2M-CPU31");
        data[20..24].copy_from_slice(b"02.0");
        data[40] = 0b1000_0001;
        data[41] = 0x0C;
        data[80..82].copy_from_slice(&60u16.to_be_bytes());
        data[82] = 23;
        data[83..85].copy_from_slice(&32768u16.to_be_bytes());
        data[85] = 8;
        data[86] = 4;
        data[88] = 4;
        data[90..92].copy_from_slice(&128u16.to_be_bytes());
        data[92] = 0x80 | b'A';
        data[93] = b'B';
        data[156] = 0xF3;
        data[157] = 0xFE;

        let body = decode_body(&Command::CpuUnitDataRead, &response([5, 1], [0, 0], &data)).unwrap();
        let ReplyBody::CpuUnitData(info) = body else {
            panic!("expected CPU unit data");
        };
        assert_eq!(info.model, "CJ2M-CPU31");
        assert_eq!(info.version, "02.0");
        assert_eq!(info.dip_switches, [true, false, false, false, false, false, false, true]);
        assert_eq!(info.largest_em_bank, 12);
        assert_eq!(info.area.max_program_size_kb, 60);
        assert_eq!(info.area.dm_words, 32768);
        assert_eq!(info.area.memory_card_size_kb, 128);
        assert_eq!(info.bus_units.len(), 16);
        assert!(info.bus_units[0].present);
        assert_eq!(info.bus_units[0].model_id, "AB");
        assert!(!info.bus_units[1].present);
        assert_eq!(info.bus_units[15].unit, 15);
        assert_eq!(info.rack_count, 3);
        assert_eq!(info.sysmac_bus_masters, 2);
    }

    #[test]
    fn test_no_payload_commands() {
        let body = decode_body(&Command::Stop, &response([4, 2], [0, 0], &[])).unwrap();
        assert_eq!(body, ReplyBody::None);
    }

    #[test]
    fn test_error_end_code_without_payload() {
        let body = decode_body(&read("D0", 2), &response([1, 1], [0x11, 0x03], &[])).unwrap();
        assert_eq!(body, ReplyBody::None);
        let body = decode_body(&Command::Status, &response([6, 1], [0x22, 0x01], &[0x00])).unwrap();
        assert_eq!(body, ReplyBody::None);
    }
}
