//! FINS command definitions and payload encoding.
//!
//! This module contains the command table ([`CommandCode`] and its
//! [`CommandDescriptor`]) and one structure per supported command. Command
//! structures validate their parameters on construction, before any
//! transaction ID is allocated, and are encoded into a frame once the header
//! is known.
//!
//! # Command Types
//!
//! ## Memory Operations
//! - [`ReadCommand`] - 0101, read consecutive elements
//! - [`WriteCommand`] - 0102, write consecutive elements
//! - [`FillCommand`] - 0103, fill words with one value
//! - [`MultipleReadCommand`] - 0104, read scattered addresses
//! - [`TransferCommand`] - 0105, copy words between areas
//!
//! ## PLC Control
//! - [`RunCommand`] - 0401, change to RUN/MONITOR/DEBUG
//! - 0402 stop, 0501 CPU unit data read, 0601 status read, 0701 clock read
//!   carry no parameters
//! - [`ClockWriteCommand`] - 0702, set the clock
//!
//! # Example
//!
//! ```
//! use omron_fins_client::{AddressCodec, Command, FinsHeader, NodeAddress, PlcFamily, ReadCommand};
//!
//! let codec = AddressCodec::new(PlcFamily::CsCj);
//! let cmd = Command::Read(ReadCommand::new(codec.parse("D100").unwrap(), 10).unwrap());
//! let header = FinsHeader::new_command(NodeAddress::new(0, 10, 0), NodeAddress::local(), 0x01);
//! let frame = cmd.encode(&header);
//! assert_eq!(&frame[10..], &[0x01, 0x01, 0x82, 0x00, 0x64, 0x00, 0x00, 0x0A]);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::address::{AddressCodec, MemoryAddress};
use crate::error::{FinsError, Result};
use crate::header::FinsHeader;
use crate::packing::{
    bools_to_bytes, dec_to_bcd, dwords_to_bytes, merge_data, words_to_bytes, DataValue,
};

/// Maximum number of elements per read/write/fill/transfer command.
pub const MAX_WORDS_PER_COMMAND: u16 = 999;

/// Supported FINS commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    /// 0101 MEMORY AREA READ.
    MemoryAreaRead,
    /// 0102 MEMORY AREA WRITE.
    MemoryAreaWrite,
    /// 0103 MEMORY AREA FILL.
    MemoryAreaFill,
    /// 0104 MULTIPLE MEMORY AREA READ.
    MultipleMemoryAreaRead,
    /// 0105 MEMORY AREA TRANSFER.
    MemoryAreaTransfer,
    /// 0401 RUN.
    Run,
    /// 0402 STOP.
    Stop,
    /// 0501 CPU UNIT DATA READ.
    CpuUnitDataRead,
    /// 0601 CPU UNIT STATUS READ.
    CpuUnitStatusRead,
    /// 0701 CLOCK READ.
    ClockRead,
    /// 0702 CLOCK WRITE.
    ClockWrite,
}

/// Type expected for a generic command parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// A JSON string.
    String,
    /// A JSON integer.
    Number,
    /// A JSON object.
    Object,
    /// Anything.
    Any,
}

impl ParamKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Number => value.is_i64() || value.is_u64(),
            ParamKind::Object => value.is_object(),
            ParamKind::Any => true,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Number => "number",
            ParamKind::Object => "object",
            ParamKind::Any => "any",
        }
    }
}

/// One parameter of a command's generic calling convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    /// Parameter name.
    pub name: &'static str,
    /// Expected type.
    pub kind: ParamKind,
    /// Whether the parameter must be present.
    pub required: bool,
    /// Minimum value for numbers.
    pub min: Option<i64>,
}

const fn param(name: &'static str, kind: ParamKind, required: bool, min: Option<i64>) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required,
        min,
    }
}

/// Static description of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDescriptor {
    /// The command.
    pub code: CommandCode,
    /// Command code bytes (MRC, SRC).
    pub bytes: [u8; 2],
    /// Short name used by the generic entry point.
    pub name: &'static str,
    /// Manual title.
    pub description: &'static str,
    /// One line explanation.
    pub detail: &'static str,
    /// Generic parameters, in order.
    pub params: &'static [ParamSpec],
}

const ADDRESS: ParamSpec = param("address", ParamKind::String, true, None);
const COUNT: ParamSpec = param("count", ParamKind::Number, true, Some(1));

/// The command table.
pub static COMMANDS: [CommandDescriptor; 11] = [
    CommandDescriptor {
        code: CommandCode::MemoryAreaRead,
        bytes: [0x01, 0x01],
        name: "read",
        description: "MEMORY AREA READ",
        detail: "Reads the contents of consecutive I/O memory area words",
        params: &[ADDRESS, COUNT],
    },
    CommandDescriptor {
        code: CommandCode::MemoryAreaWrite,
        bytes: [0x01, 0x02],
        name: "write",
        description: "MEMORY AREA WRITE",
        detail: "Writes the contents of consecutive I/O memory area words",
        params: &[ADDRESS, param("data", ParamKind::Any, true, None)],
    },
    CommandDescriptor {
        code: CommandCode::MemoryAreaFill,
        bytes: [0x01, 0x03],
        name: "fill",
        description: "MEMORY AREA FILL",
        detail: "Writes the same data to the specified range of I/O memory area words",
        params: &[ADDRESS, param("value", ParamKind::Number, true, None), COUNT],
    },
    CommandDescriptor {
        code: CommandCode::MultipleMemoryAreaRead,
        bytes: [0x01, 0x04],
        name: "read-multiple",
        description: "MULTIPLE MEMORY AREA READ",
        detail: "Reads the contents of the specified non-consecutive I/O memory area words",
        params: &[param("addresses", ParamKind::Any, true, None)],
    },
    CommandDescriptor {
        code: CommandCode::MemoryAreaTransfer,
        bytes: [0x01, 0x05],
        name: "transfer",
        description: "MEMORY AREA TRANSFER",
        detail: "Copies the contents of consecutive I/O memory area words to another I/O memory area",
        params: &[
            param("srcAddress", ParamKind::String, true, None),
            param("dstAddress", ParamKind::String, true, None),
            COUNT,
        ],
    },
    CommandDescriptor {
        code: CommandCode::Run,
        bytes: [0x04, 0x01],
        name: "run",
        description: "SET PLC MODE RUN",
        detail: "Changes the CPU Unit's operating mode to RUN or MONITOR",
        params: &[param("mode", ParamKind::String, false, None)],
    },
    CommandDescriptor {
        code: CommandCode::Stop,
        bytes: [0x04, 0x02],
        name: "stop",
        description: "SET PLC MODE STOP",
        detail: "Changes the CPU Unit's operating mode to PROGRAM",
        params: &[],
    },
    CommandDescriptor {
        code: CommandCode::CpuUnitDataRead,
        bytes: [0x05, 0x01],
        name: "cpu-unit-data-read",
        description: "CPU UNIT DATA READ",
        detail: "Reads CPU Unit data",
        params: &[],
    },
    CommandDescriptor {
        code: CommandCode::CpuUnitStatusRead,
        bytes: [0x06, 0x01],
        name: "status",
        description: "CPU UNIT STATUS READ",
        detail: "Reads the status of the CPU Unit",
        params: &[],
    },
    CommandDescriptor {
        code: CommandCode::ClockRead,
        bytes: [0x07, 0x01],
        name: "clock-read",
        description: "CLOCK READ",
        detail: "Reads the present year, month, date, minute, second, and day of the week",
        params: &[],
    },
    CommandDescriptor {
        code: CommandCode::ClockWrite,
        bytes: [0x07, 0x02],
        name: "clock-write",
        description: "CLOCK WRITE",
        detail: "Changes the present year, month, date, minute, second, or day of the week",
        params: &[param("clockData", ParamKind::Object, true, None)],
    },
];

impl CommandCode {
    /// The command's table entry.
    pub fn descriptor(self) -> &'static CommandDescriptor {
        let idx = match self {
            CommandCode::MemoryAreaRead => 0,
            CommandCode::MemoryAreaWrite => 1,
            CommandCode::MemoryAreaFill => 2,
            CommandCode::MultipleMemoryAreaRead => 3,
            CommandCode::MemoryAreaTransfer => 4,
            CommandCode::Run => 5,
            CommandCode::Stop => 6,
            CommandCode::CpuUnitDataRead => 7,
            CommandCode::CpuUnitStatusRead => 8,
            CommandCode::ClockRead => 9,
            CommandCode::ClockWrite => 10,
        };
        &COMMANDS[idx]
    }

    /// Command code bytes (MRC, SRC).
    pub fn bytes(self) -> [u8; 2] {
        self.descriptor().bytes
    }

    /// Short name, e.g. `"read-multiple"`.
    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    /// Four hex digit code, e.g. `"0104"`.
    pub fn code(self) -> String {
        let [mrc, src] = self.bytes();
        format!("{mrc:02X}{src:02X}")
    }

    /// Looks up a command by its code bytes.
    pub fn from_bytes(mrc: u8, src: u8) -> Option<Self> {
        COMMANDS
            .iter()
            .find(|d| d.bytes == [mrc, src])
            .map(|d| d.code)
    }

    /// Looks up a command by four digit code or short name.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_client::CommandCode;
    ///
    /// assert_eq!(CommandCode::lookup("0601"), Some(CommandCode::CpuUnitStatusRead));
    /// assert_eq!(CommandCode::lookup("status"), Some(CommandCode::CpuUnitStatusRead));
    /// assert_eq!(CommandCode::lookup("9999"), None);
    /// ```
    pub fn lookup(code_or_name: &str) -> Option<Self> {
        let key = code_or_name.trim();
        COMMANDS
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(key) || d.code.code().eq_ignore_ascii_case(key))
            .map(|d| d.code)
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

impl Serialize for CommandCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl CommandDescriptor {
    /// Checks generic parameters against this command's schema.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::InvalidParameter` naming the first parameter that
    /// is missing, has the wrong type, or is below its minimum.
    pub fn validate(&self, params: &[Value]) -> Result<()> {
        for (index, spec) in self.params.iter().enumerate() {
            let provided = params.get(index).filter(|v| !v.is_null());
            let Some(value) = provided else {
                if spec.required {
                    return Err(FinsError::invalid_parameter(
                        spec.name,
                        format!("parameter {} missing", index + 1),
                    ));
                }
                continue;
            };
            if !spec.kind.matches(value) {
                return Err(FinsError::invalid_parameter(
                    spec.name,
                    format!(
                        "parameter {} has incorrect type, expected {}",
                        index + 1,
                        spec.kind.name()
                    ),
                ));
            }
            if let (Some(min), Some(v)) = (spec.min, value.as_i64()) {
                if v < min {
                    return Err(FinsError::invalid_parameter(
                        spec.name,
                        format!("must be at least {min}"),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// PLC operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlcMode {
    /// Program mode, the program is not executed.
    Program,
    /// Debug mode.
    Debug,
    /// Monitor mode, run with online editing allowed.
    Monitor,
    /// Run mode.
    Run,
}

impl PlcMode {
    /// Returns the FINS code for this mode.
    pub fn code(self) -> u8 {
        match self {
            PlcMode::Program => 0x00,
            PlcMode::Debug => 0x01,
            PlcMode::Monitor => 0x02,
            PlcMode::Run => 0x04,
        }
    }

    /// Looks up a mode by its FINS code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(PlcMode::Program),
            0x01 => Some(PlcMode::Debug),
            0x02 => Some(PlcMode::Monitor),
            0x04 => Some(PlcMode::Run),
            _ => None,
        }
    }
}

impl FromStr for PlcMode {
    type Err = FinsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "program" => Ok(PlcMode::Program),
            "debug" => Ok(PlcMode::Debug),
            "monitor" => Ok(PlcMode::Monitor),
            "run" => Ok(PlcMode::Run),
            other => Err(FinsError::invalid_parameter(
                "mode",
                format!("unknown PLC mode '{other}'"),
            )),
        }
    }
}

fn check_count(count: u16) -> Result<()> {
    if count == 0 {
        return Err(FinsError::invalid_parameter("count", "must be greater than 0"));
    }
    if count > MAX_WORDS_PER_COMMAND {
        return Err(FinsError::invalid_parameter(
            "count",
            format!("must not exceed {MAX_WORDS_PER_COMMAND}"),
        ));
    }
    Ok(())
}

fn require_word(address: &MemoryAddress, parameter: &str) -> Result<()> {
    if address.is_bit_address() {
        return Err(FinsError::invalid_parameter(
            parameter,
            format!("'{address}' must be a word address"),
        ));
    }
    Ok(())
}

/// Command for reading consecutive elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadCommand {
    address: MemoryAddress,
    count: u16,
}

impl ReadCommand {
    /// Creates a new read command.
    ///
    /// # Errors
    ///
    /// Returns an error if count is 0 or exceeds [`MAX_WORDS_PER_COMMAND`].
    pub fn new(address: MemoryAddress, count: u16) -> Result<Self> {
        check_count(count)?;
        Ok(Self { address, count })
    }

    /// Start address.
    pub fn address(&self) -> &MemoryAddress {
        &self.address
    }

    /// Number of elements.
    pub fn count(&self) -> u16 {
        self.count
    }
}

/// Command for writing consecutive elements.
///
/// Values are packed by address kind: one byte per bit address, four bytes
/// per index register, two bytes otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCommand {
    address: MemoryAddress,
    count: u16,
    data: Vec<u8>,
}

impl WriteCommand {
    /// Creates a new write command.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `values` is empty or too long, or holds
    /// a non-integer for a word address, and `InvalidBoolean` if a value for
    /// a bit address is not boolean-like.
    pub fn new(address: MemoryAddress, values: &[DataValue]) -> Result<Self> {
        if values.is_empty() {
            return Err(FinsError::invalid_parameter("data", "must not be empty"));
        }
        let count = u16::try_from(values.len())
            .ok()
            .filter(|n| *n <= MAX_WORDS_PER_COMMAND)
            .ok_or_else(|| {
                FinsError::invalid_parameter(
                    "data",
                    format!("must not exceed {MAX_WORDS_PER_COMMAND} elements"),
                )
            })?;

        let data = if address.is_bit_address() {
            bools_to_bytes(values)?
        } else {
            let ints = values
                .iter()
                .map(DataValue::as_int)
                .collect::<Result<Vec<_>>>()?;
            if address.element_length() == 4 {
                dwords_to_bytes(&ints)
            } else {
                words_to_bytes(&ints)
            }
        };

        Ok(Self {
            address,
            count,
            data,
        })
    }

    /// Start address.
    pub fn address(&self) -> &MemoryAddress {
        &self.address
    }

    /// Packed data bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Command for filling consecutive words with one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillCommand {
    address: MemoryAddress,
    value: u16,
    count: u16,
}

impl FillCommand {
    /// Creates a new fill command. The value keeps its low 16 bits.
    ///
    /// # Errors
    ///
    /// Returns an error for bit addresses, non-integer values, or an invalid
    /// count.
    pub fn new(address: MemoryAddress, value: &DataValue, count: u16) -> Result<Self> {
        require_word(&address, "address")?;
        check_count(count)?;
        let value = (value.as_int()? & 0xFFFF) as u16;
        Ok(Self {
            address,
            value,
            count,
        })
    }
}

/// Command for reading several unrelated addresses in one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipleReadCommand {
    addresses: Vec<MemoryAddress>,
}

impl MultipleReadCommand {
    /// Creates a new multiple read command.
    ///
    /// # Errors
    ///
    /// Returns an error if no addresses are given.
    pub fn new(addresses: Vec<MemoryAddress>) -> Result<Self> {
        if addresses.is_empty() {
            return Err(FinsError::invalid_parameter(
                "addresses",
                "must not be empty",
            ));
        }
        Ok(Self { addresses })
    }

    /// Requested addresses, in request order.
    pub fn addresses(&self) -> &[MemoryAddress] {
        &self.addresses
    }
}

/// Command for copying words from one area to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCommand {
    source: MemoryAddress,
    destination: MemoryAddress,
    count: u16,
}

impl TransferCommand {
    /// Creates a new transfer command.
    ///
    /// # Errors
    ///
    /// Returns an error for bit addresses or an invalid count.
    pub fn new(source: MemoryAddress, destination: MemoryAddress, count: u16) -> Result<Self> {
        require_word(&source, "srcAddress")?;
        require_word(&destination, "dstAddress")?;
        check_count(count)?;
        Ok(Self {
            source,
            destination,
            count,
        })
    }
}

/// Command for putting the PLC into an executing mode.
///
/// Without a mode the bare command is sent and the PLC picks its default
/// (MONITOR on CS/CJ). With a mode, the current program (0xFFFF) is
/// addressed explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunCommand {
    mode: Option<PlcMode>,
}

impl RunCommand {
    /// Creates a new run command.
    ///
    /// # Errors
    ///
    /// Returns an error for [`PlcMode::Program`], which is what STOP is for.
    pub fn new(mode: Option<PlcMode>) -> Result<Self> {
        if mode == Some(PlcMode::Program) {
            return Err(FinsError::invalid_parameter(
                "mode",
                "use stop to change to PROGRAM mode",
            ));
        }
        Ok(Self { mode })
    }
}

/// Clock fields, in decimal.
///
/// Used both to set the clock and as the decoded clock read reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockData {
    /// Year, two digits (`2024` is accepted and stored as `24`).
    pub year: u16,
    /// Month, 1..=12.
    pub month: u8,
    /// Day of month, 1..=31.
    pub day: u8,
    /// Hour, 0..=23.
    pub hour: u8,
    /// Minute, 0..=59.
    pub minute: u8,
    /// Second, 0..=59.
    #[serde(default)]
    pub second: Option<u8>,
    /// Day of week, 0 (Sunday)..=6.
    #[serde(default)]
    pub day_of_week: Option<u8>,
}

/// Command for setting the PLC clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockWriteCommand {
    data: Vec<u8>,
}

impl ClockWriteCommand {
    /// Creates a new clock write command.
    ///
    /// The day of week is only sent when the second is present.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` naming the first out of range field.
    pub fn new(clock: &ClockData) -> Result<Self> {
        let year = match clock.year {
            y @ 0..=99 => y as u8,
            y @ 2000..=2099 => (y - 2000) as u8,
            y => {
                return Err(FinsError::invalid_parameter(
                    "year",
                    format!("{y} is out of range"),
                ))
            }
        };
        let field = |name: &str, v: u8, lo: u8, hi: u8| -> Result<u8> {
            if (lo..=hi).contains(&v) {
                Ok(v)
            } else {
                Err(FinsError::invalid_parameter(
                    name,
                    format!("{v} is not within {lo}..={hi}"),
                ))
            }
        };

        let mut data = vec![
            dec_to_bcd(year),
            dec_to_bcd(field("month", clock.month, 1, 12)?),
            dec_to_bcd(field("day", clock.day, 1, 31)?),
            dec_to_bcd(field("hour", clock.hour, 0, 23)?),
            dec_to_bcd(field("minute", clock.minute, 0, 59)?),
        ];
        if let Some(second) = clock.second {
            data.push(dec_to_bcd(field("second", second, 0, 59)?));
            if let Some(dow) = clock.day_of_week {
                data.push(field("day_of_week", dow, 0, 6)?);
            }
        }
        Ok(Self { data })
    }
}

/// A validated command ready to be framed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 0101.
    Read(ReadCommand),
    /// 0102.
    Write(WriteCommand),
    /// 0103.
    Fill(FillCommand),
    /// 0104.
    ReadMultiple(MultipleReadCommand),
    /// 0105.
    Transfer(TransferCommand),
    /// 0401.
    Run(RunCommand),
    /// 0402.
    Stop,
    /// 0501.
    CpuUnitDataRead,
    /// 0601.
    Status,
    /// 0701.
    ClockRead,
    /// 0702.
    ClockWrite(ClockWriteCommand),
}

impl Command {
    /// The command code this command is sent with.
    pub fn code(&self) -> CommandCode {
        match self {
            Command::Read(_) => CommandCode::MemoryAreaRead,
            Command::Write(_) => CommandCode::MemoryAreaWrite,
            Command::Fill(_) => CommandCode::MemoryAreaFill,
            Command::ReadMultiple(_) => CommandCode::MultipleMemoryAreaRead,
            Command::Transfer(_) => CommandCode::MemoryAreaTransfer,
            Command::Run(_) => CommandCode::Run,
            Command::Stop => CommandCode::Stop,
            Command::CpuUnitDataRead => CommandCode::CpuUnitDataRead,
            Command::Status => CommandCode::CpuUnitStatusRead,
            Command::ClockRead => CommandCode::ClockRead,
            Command::ClockWrite(_) => CommandCode::ClockWrite,
        }
    }

    /// Serializes header, command code and payload into one frame.
    pub fn encode(&self, header: &FinsHeader) -> Vec<u8> {
        let head = header.to_bytes();
        let code = self.code().bytes();
        match self {
            Command::Read(c) => merge_data(&[
                &head,
                &code,
                &c.address.bytes(),
                &c.count.to_be_bytes(),
            ]),
            Command::Write(c) => merge_data(&[
                &head,
                &code,
                &c.address.bytes(),
                &c.count.to_be_bytes(),
                &c.data,
            ]),
            Command::Fill(c) => merge_data(&[
                &head,
                &code,
                &c.address.bytes(),
                &c.count.to_be_bytes(),
                &c.value.to_be_bytes(),
            ]),
            Command::ReadMultiple(c) => {
                let addresses: Vec<[u8; 4]> = c.addresses.iter().map(|a| a.bytes()).collect();
                merge_data(&[&head, &code, &addresses])
            }
            Command::Transfer(c) => merge_data(&[
                &head,
                &code,
                &c.source.bytes(),
                &c.destination.bytes(),
                &c.count.to_be_bytes(),
            ]),
            Command::Run(RunCommand { mode: Some(mode) }) => {
                merge_data(&[&head, &code, &[0xFFu8, 0xFF], &mode.code()])
            }
            Command::ClockWrite(c) => merge_data(&[&head, &code, &c.data]),
            Command::Run(RunCommand { mode: None })
            | Command::Stop
            | Command::CpuUnitDataRead
            | Command::Status
            | Command::ClockRead => merge_data(&[&head, &code]),
        }
    }

    /// Builds a command from generic JSON parameters.
    ///
    /// Parameters are checked against the command's [`CommandDescriptor`]
    /// first. `read-multiple` accepts a comma separated string or a list of
    /// strings; `write` accepts a single value or a list.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_client::{AddressCodec, Command, CommandCode, PlcFamily};
    /// use serde_json::json;
    ///
    /// let codec = AddressCodec::new(PlcFamily::CsCj);
    /// let cmd = Command::from_params(CommandCode::MemoryAreaRead, &[json!("D0"), json!(2)], &codec).unwrap();
    /// assert_eq!(cmd.code(), CommandCode::MemoryAreaRead);
    ///
    /// assert!(Command::from_params(CommandCode::MemoryAreaRead, &[json!("D0")], &codec).is_err());
    /// ```
    pub fn from_params(code: CommandCode, params: &[Value], codec: &AddressCodec) -> Result<Self> {
        code.descriptor().validate(params)?;
        let str_at = |i: usize| params.get(i).and_then(Value::as_str).unwrap_or_default();
        let count_at = |i: usize, name: &str| -> Result<u16> {
            params
                .get(i)
                .and_then(Value::as_u64)
                .and_then(|n| u16::try_from(n).ok())
                .ok_or_else(|| FinsError::invalid_parameter(name, "must be a 16-bit count"))
        };
        let value_at = |i: usize| -> Result<DataValue> {
            params
                .get(i)
                .map(DataValue::try_from)
                .unwrap_or_else(|| Err(FinsError::invalid_parameter("value", "missing")))
        };

        let command = match code {
            CommandCode::MemoryAreaRead => {
                Command::Read(ReadCommand::new(codec.parse(str_at(0))?, count_at(1, "count")?)?)
            }
            CommandCode::MemoryAreaWrite => {
                let values = match params.get(1) {
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(DataValue::try_from)
                        .collect::<Result<Vec<_>>>()?,
                    _ => vec![value_at(1)?],
                };
                Command::Write(WriteCommand::new(codec.parse(str_at(0))?, &values)?)
            }
            CommandCode::MemoryAreaFill => Command::Fill(FillCommand::new(
                codec.parse(str_at(0))?,
                &value_at(1)?,
                count_at(2, "count")?,
            )?),
            CommandCode::MultipleMemoryAreaRead => {
                let addresses = match params.first() {
                    Some(Value::String(csv)) => {
                        codec.parse_all(&csv.split(',').collect::<Vec<_>>())?
                    }
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(|item| {
                            item.as_str().ok_or_else(|| {
                                FinsError::invalid_parameter(
                                    "addresses",
                                    "every address must be a string",
                                )
                            })
                        })
                        .map(|s| s.and_then(|s| codec.parse(s)))
                        .collect::<Result<Vec<_>>>()?,
                    _ => {
                        return Err(FinsError::invalid_parameter(
                            "addresses",
                            "expected a comma separated string or a list",
                        ))
                    }
                };
                Command::ReadMultiple(MultipleReadCommand::new(addresses)?)
            }
            CommandCode::MemoryAreaTransfer => Command::Transfer(TransferCommand::new(
                codec.parse(str_at(0))?,
                codec.parse(str_at(1))?,
                count_at(2, "count")?,
            )?),
            CommandCode::Run => {
                let mode = params
                    .first()
                    .and_then(Value::as_str)
                    .map(str::parse::<PlcMode>)
                    .transpose()?;
                Command::Run(RunCommand::new(mode)?)
            }
            CommandCode::Stop => Command::Stop,
            CommandCode::CpuUnitDataRead => Command::CpuUnitDataRead,
            CommandCode::CpuUnitStatusRead => Command::Status,
            CommandCode::ClockRead => Command::ClockRead,
            CommandCode::ClockWrite => {
                let clock: ClockData = params
                    .first()
                    .cloned()
                    .map(serde_json::from_value::<ClockData>)
                    .transpose()
                    .map_err(|e| FinsError::invalid_parameter("clockData", e.to_string()))?
                    .ok_or_else(|| FinsError::invalid_parameter("clockData", "missing"))?;
                Command::ClockWrite(ClockWriteCommand::new(&clock)?)
            }
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::NodeAddress;
    use crate::memory::PlcFamily;
    use serde_json::json;

    fn codec() -> AddressCodec {
        AddressCodec::new(PlcFamily::CsCj)
    }

    fn header() -> FinsHeader {
        FinsHeader::new_command(NodeAddress::new(0, 10, 0), NodeAddress::new(0, 1, 0), 0x05)
    }

    fn payload(cmd: &Command) -> Vec<u8> {
        cmd.encode(&header())[10..].to_vec()
    }

    #[test]
    fn test_command_table_consistent() {
        for d in &COMMANDS {
            assert_eq!(d.code.descriptor(), d);
            assert_eq!(CommandCode::from_bytes(d.bytes[0], d.bytes[1]), Some(d.code));
            assert_eq!(CommandCode::lookup(d.name), Some(d.code));
            assert_eq!(CommandCode::lookup(&d.code.code()), Some(d.code));
        }
        assert_eq!(CommandCode::MultipleMemoryAreaRead.code(), "0104");
        assert_eq!(CommandCode::lookup("bogus"), None);
    }

    #[test]
    fn test_read_frame() {
        let cmd = Command::Read(ReadCommand::new(codec().parse("D0").unwrap(), 2).unwrap());
        let frame = cmd.encode(&header());
        assert_eq!(
            frame,
            vec![0x80, 0x00, 0x02, 0x00, 0x0A, 0x00, 0x00, 0x01, 0x00, 0x05, 0x01, 0x01, 0x82, 0x00, 0x00, 0x00, 0x00, 0x02]
        );
    }

    #[test]
    fn test_read_count_validation() {
        let addr = codec().parse("D0").unwrap();
        assert!(ReadCommand::new(addr, 0).is_err());
        assert!(ReadCommand::new(addr, 1000).is_err());
        assert!(ReadCommand::new(addr, 999).is_ok());
    }

    #[test]
    fn test_write_words() {
        let values: Vec<DataValue> = [1, 2, 3].into_iter().map(DataValue::from).collect();
        let cmd = Command::Write(WriteCommand::new(codec().parse("D100").unwrap(), &values).unwrap());
        assert_eq!(
            payload(&cmd),
            vec![0x01, 0x02, 0x82, 0x00, 0x64, 0x00, 0x00, 0x03, 0, 1, 0, 2, 0, 3]
        );
    }

    #[test]
    fn test_write_bits() {
        let values = [DataValue::from(true), DataValue::from("off")];
        let cmd = Command::Write(WriteCommand::new(codec().parse("CIO0.4").unwrap(), &values).unwrap());
        assert_eq!(
            payload(&cmd),
            vec![0x01, 0x02, 0x30, 0x00, 0x00, 0x04, 0x00, 0x02, 1, 0]
        );
        let bad = [DataValue::from(7)];
        assert!(matches!(
            WriteCommand::new(codec().parse("CIO0.4").unwrap(), &bad),
            Err(FinsError::InvalidBoolean { .. })
        ));
    }

    #[test]
    fn test_write_index_register_dwords() {
        let values = [DataValue::from(0x0102_0304)];
        let cmd = WriteCommand::new(codec().parse("IR0").unwrap(), &values).unwrap();
        assert_eq!(cmd.data(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_write_empty_rejected() {
        assert!(WriteCommand::new(codec().parse("D0").unwrap(), &[]).is_err());
    }

    #[test]
    fn test_fill_frame() {
        let cmd = Command::Fill(
            FillCommand::new(codec().parse("W10").unwrap(), &DataValue::from(0xABCD), 4).unwrap(),
        );
        assert_eq!(
            payload(&cmd),
            vec![0x01, 0x03, 0xB1, 0x00, 0x0A, 0x00, 0x00, 0x04, 0xAB, 0xCD]
        );
        assert!(FillCommand::new(codec().parse("W10.1").unwrap(), &DataValue::from(1), 1).is_err());
    }

    #[test]
    fn test_multiple_read_frame() {
        let addrs = codec().parse_all(&["D10", "CIO20.0"]).unwrap();
        let cmd = Command::ReadMultiple(MultipleReadCommand::new(addrs).unwrap());
        assert_eq!(
            payload(&cmd),
            vec![0x01, 0x04, 0x82, 0x00, 0x0A, 0x00, 0x30, 0x00, 0x14, 0x00]
        );
        assert!(MultipleReadCommand::new(vec![]).is_err());
    }

    #[test]
    fn test_transfer_frame() {
        let cmd = Command::Transfer(
            TransferCommand::new(codec().parse("D0").unwrap(), codec().parse("H5").unwrap(), 3)
                .unwrap(),
        );
        assert_eq!(
            payload(&cmd),
            vec![0x01, 0x05, 0x82, 0x00, 0x00, 0x00, 0xB2, 0x00, 0x05, 0x00, 0x00, 0x03]
        );
    }

    #[test]
    fn test_run_frames() {
        let bare = Command::Run(RunCommand::new(None).unwrap());
        assert_eq!(payload(&bare), vec![0x04, 0x01]);
        let monitor = Command::Run(RunCommand::new(Some(PlcMode::Monitor)).unwrap());
        assert_eq!(payload(&monitor), vec![0x04, 0x01, 0xFF, 0xFF, 0x02]);
        assert!(RunCommand::new(Some(PlcMode::Program)).is_err());
    }

    #[test]
    fn test_parameterless_frames() {
        assert_eq!(payload(&Command::Stop), vec![0x04, 0x02]);
        assert_eq!(payload(&Command::CpuUnitDataRead), vec![0x05, 0x01]);
        assert_eq!(payload(&Command::Status), vec![0x06, 0x01]);
        assert_eq!(payload(&Command::ClockRead), vec![0x07, 0x01]);
    }

    #[test]
    fn test_clock_write() {
        let clock = ClockData {
            year: 2024,
            month: 3,
            day: 15,
            hour: 13,
            minute: 45,
            second: Some(30),
            day_of_week: Some(5),
        };
        let cmd = Command::ClockWrite(ClockWriteCommand::new(&clock).unwrap());
        assert_eq!(
            payload(&cmd),
            vec![0x07, 0x02, 0x24, 0x03, 0x15, 0x13, 0x45, 0x30, 0x05]
        );

        let short = ClockData {
            second: None,
            ..clock
        };
        assert_eq!(ClockWriteCommand::new(&short).unwrap().data.len(), 5);

        let bad = ClockData { month: 13, ..clock };
        assert!(ClockWriteCommand::new(&bad).is_err());
    }

    #[test]
    fn test_from_params_read_multiple_csv() {
        let cmd = Command::from_params(
            CommandCode::MultipleMemoryAreaRead,
            &[json!("D10, CIO20.0,E0_100")],
            &codec(),
        )
        .unwrap();
        match cmd {
            Command::ReadMultiple(c) => assert_eq!(c.addresses().len(), 3),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_from_params_validation() {
        let c = codec();
        let err = Command::from_params(CommandCode::MemoryAreaRead, &[json!("D0"), json!(0)], &c)
            .unwrap_err();
        assert!(matches!(err, FinsError::InvalidParameter { ref parameter, .. } if parameter == "count"));

        let err = Command::from_params(CommandCode::MemoryAreaRead, &[json!(5), json!(1)], &c)
            .unwrap_err();
        assert!(matches!(err, FinsError::InvalidParameter { ref parameter, .. } if parameter == "address"));

        assert!(Command::from_params(CommandCode::ClockWrite, &[json!({"year": 24})], &c).is_err());
    }

    #[test]
    fn test_from_params_write_and_run() {
        let c = codec();
        let cmd = Command::from_params(CommandCode::MemoryAreaWrite, &[json!("D5"), json!([7, 8])], &c)
            .unwrap();
        assert_eq!(payload(&cmd)[8..], [0, 7, 0, 8]);

        let cmd = Command::from_params(CommandCode::MemoryAreaWrite, &[json!("D5"), json!(9)], &c)
            .unwrap();
        assert_eq!(payload(&cmd)[8..], [0, 9]);

        let cmd = Command::from_params(CommandCode::Run, &[json!("run")], &c).unwrap();
        assert_eq!(payload(&cmd), vec![0x04, 0x01, 0xFF, 0xFF, 0x04]);

        let cmd = Command::from_params(CommandCode::Run, &[], &c).unwrap();
        assert_eq!(payload(&cmd), vec![0x04, 0x01]);
    }

    #[test]
    fn test_plc_mode_codes() {
        for mode in [PlcMode::Program, PlcMode::Debug, PlcMode::Monitor, PlcMode::Run] {
            assert_eq!(PlcMode::from_code(mode.code()), Some(mode));
        }
        assert_eq!(PlcMode::from_code(0x03), None);
        assert_eq!("Monitor".parse::<PlcMode>().unwrap(), PlcMode::Monitor);
    }
}
