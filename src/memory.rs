//! Memory area definitions for the FINS protocol.
//!
//! This module defines the [`MemoryArea`] enum which represents the named
//! memory areas of an Omron PLC, and the [`PlcFamily`] that selects which
//! area code map applies. Each area has distinct FINS codes for bit and word
//! access, and not every area exists in every family.
//!
//! # Memory Areas Overview
//!
//! | Area | Description | CS/CJ word | CS/CJ bit | CV word | CV bit |
//! |------|-------------|:----------:|:---------:|:-------:|:------:|
//! | CIO | Core I/O | 0xB0 | 0x30 | 0x80 | 0x00 |
//! | W | Work area | 0xB1 | 0x31 | | |
//! | H | Holding area | 0xB2 | 0x32 | | |
//! | A | Auxiliary area | 0xB3 | 0x33 | 0x80 | 0x00 |
//! | D | Data memory | 0x82 | 0x02 | 0x82 | |
//! | T / C | Timer / counter | 0x89 | 0x09 | 0x81 | 0x01 |
//! | IR | Index registers | 0xDC | | | |
//! | DR | Data registers | 0xBC | | 0x9C | |
//! | EM | Current EM bank | 0x98 | 0x0A | 0x98 | |
//! | En | EM bank n | see [`ExtendedBank`] | | | |
//!
//! # Example
//!
//! ```
//! use omron_fins_client::{MemoryArea, PlcFamily};
//!
//! assert_eq!(MemoryArea::Data.word_code(PlcFamily::CsCj), Some(0x82));
//! assert_eq!(MemoryArea::Work.word_code(PlcFamily::Cv), None);
//! assert_eq!(MemoryArea::Cio.to_string(), "CIO");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::FinsError;

/// PLC family, selecting the memory area code map.
///
/// CS, CJ, CP, NJ and NX controllers share one map; CV controllers use
/// another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum PlcFamily {
    /// CS/CJ/CP/NJ/NX series.
    #[default]
    CsCj,
    /// CV series.
    Cv,
}

impl FromStr for PlcFamily {
    type Err = FinsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CS" | "CJ" | "CP" | "NJ" | "NX" | "CSCJ" | "NJNX" => Ok(PlcFamily::CsCj),
            "CV" => Ok(PlcFamily::Cv),
            other => Err(FinsError::invalid_parameter(
                "plc_type",
                format!("unknown PLC family '{other}'"),
            )),
        }
    }
}

impl TryFrom<String> for PlcFamily {
    type Error = FinsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for PlcFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlcFamily::CsCj => write!(f, "CS"),
            PlcFamily::Cv => write!(f, "CV"),
        }
    }
}

/// Extended data memory bank.
///
/// Bank names follow the PLC's own notation, so `ED` does not exist and the
/// banks after `EF` continue as `E10`..`E18`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ExtendedBank {
    E0,
    E1,
    E2,
    E3,
    E4,
    E5,
    E6,
    E7,
    E8,
    E9,
    EA,
    EB,
    EC,
    EE,
    EF,
    E10,
    E11,
    E12,
    E13,
    E14,
    E15,
    E16,
    E17,
    E18,
}

impl ExtendedBank {
    /// Every bank, in table order.
    pub const ALL: [ExtendedBank; 24] = [
        ExtendedBank::E0,
        ExtendedBank::E1,
        ExtendedBank::E2,
        ExtendedBank::E3,
        ExtendedBank::E4,
        ExtendedBank::E5,
        ExtendedBank::E6,
        ExtendedBank::E7,
        ExtendedBank::E8,
        ExtendedBank::E9,
        ExtendedBank::EA,
        ExtendedBank::EB,
        ExtendedBank::EC,
        ExtendedBank::EE,
        ExtendedBank::EF,
        ExtendedBank::E10,
        ExtendedBank::E11,
        ExtendedBank::E12,
        ExtendedBank::E13,
        ExtendedBank::E14,
        ExtendedBank::E15,
        ExtendedBank::E16,
        ExtendedBank::E17,
        ExtendedBank::E18,
    ];

    /// Bank name as written in an address.
    pub fn name(self) -> &'static str {
        match self {
            ExtendedBank::E0 => "E0",
            ExtendedBank::E1 => "E1",
            ExtendedBank::E2 => "E2",
            ExtendedBank::E3 => "E3",
            ExtendedBank::E4 => "E4",
            ExtendedBank::E5 => "E5",
            ExtendedBank::E6 => "E6",
            ExtendedBank::E7 => "E7",
            ExtendedBank::E8 => "E8",
            ExtendedBank::E9 => "E9",
            ExtendedBank::EA => "EA",
            ExtendedBank::EB => "EB",
            ExtendedBank::EC => "EC",
            ExtendedBank::EE => "EE",
            ExtendedBank::EF => "EF",
            ExtendedBank::E10 => "E10",
            ExtendedBank::E11 => "E11",
            ExtendedBank::E12 => "E12",
            ExtendedBank::E13 => "E13",
            ExtendedBank::E14 => "E14",
            ExtendedBank::E15 => "E15",
            ExtendedBank::E16 => "E16",
            ExtendedBank::E17 => "E17",
            ExtendedBank::E18 => "E18",
        }
    }

    /// Position in [`ExtendedBank::ALL`].
    fn index(self) -> u8 {
        ExtendedBank::ALL
            .iter()
            .position(|bank| *bank == self)
            .unwrap_or(0) as u8
    }

    fn bit_code(self, family: PlcFamily) -> Option<u8> {
        if family == PlcFamily::Cv {
            return None;
        }
        let code = match self {
            ExtendedBank::E10 => 0x60,
            ExtendedBank::E11
            | ExtendedBank::E12
            | ExtendedBank::E13
            | ExtendedBank::E14
            | ExtendedBank::E15
            | ExtendedBank::E16
            | ExtendedBank::E17
            | ExtendedBank::E18 => 0xE1 + (self.index() - ExtendedBank::E11.index()),
            _ => 0x20 + self.index(),
        };
        Some(code)
    }

    fn word_code(self, family: PlcFamily) -> Option<u8> {
        match family {
            PlcFamily::CsCj => Some(match self.index() {
                i @ 0..=14 => 0xA0 + i,
                i => 0x60 + (i - ExtendedBank::E10.index()),
            }),
            PlcFamily::Cv => match self.index() {
                i @ 0..=7 => Some(0x90 + i),
                _ => None,
            },
        }
    }
}

impl fmt::Display for ExtendedBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Memory areas available in Omron PLCs.
///
/// The area alone does not determine the FINS code: the same area maps to
/// different codes for bit and word access, and per [`PlcFamily`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryArea {
    /// CIO (Core I/O) area.
    Cio,
    /// W (Work) area.
    Work,
    /// H (Holding) area.
    Holding,
    /// A (Auxiliary) area.
    Auxiliary,
    /// D (Data Memory) area.
    Data,
    /// T (Timer) area. Bit access reads the completion flag.
    Timer,
    /// C (Counter) area. Bit access reads the completion flag.
    Counter,
    /// IR (Index Register) area, two words per element.
    IndexRegister,
    /// DR (Data Register) area.
    DataRegister,
    /// EM current bank.
    Em,
    /// A numbered EM bank.
    Extended(ExtendedBank),
}

impl MemoryArea {
    /// Looks up an area by its mnemonic (`"D"`, `"CIO"`, `"E3"`, ...).
    pub fn from_mnemonic(s: &str) -> Option<Self> {
        let area = match s {
            "CIO" => MemoryArea::Cio,
            "W" => MemoryArea::Work,
            "H" => MemoryArea::Holding,
            "A" => MemoryArea::Auxiliary,
            "D" => MemoryArea::Data,
            "T" => MemoryArea::Timer,
            "C" => MemoryArea::Counter,
            "IR" => MemoryArea::IndexRegister,
            "DR" => MemoryArea::DataRegister,
            "EM" => MemoryArea::Em,
            _ => {
                return ExtendedBank::ALL
                    .iter()
                    .find(|bank| bank.name() == s)
                    .map(|bank| MemoryArea::Extended(*bank))
            }
        };
        Some(area)
    }

    /// The area's mnemonic.
    pub fn mnemonic(self) -> &'static str {
        match self {
            MemoryArea::Cio => "CIO",
            MemoryArea::Work => "W",
            MemoryArea::Holding => "H",
            MemoryArea::Auxiliary => "A",
            MemoryArea::Data => "D",
            MemoryArea::Timer => "T",
            MemoryArea::Counter => "C",
            MemoryArea::IndexRegister => "IR",
            MemoryArea::DataRegister => "DR",
            MemoryArea::Em => "EM",
            MemoryArea::Extended(bank) => bank.name(),
        }
    }

    /// Returns true for the timer and counter areas.
    pub fn is_timer_counter(self) -> bool {
        matches!(self, MemoryArea::Timer | MemoryArea::Counter)
    }

    /// Returns the FINS code for bit access, if the family maps it.
    pub fn bit_code(self, family: PlcFamily) -> Option<u8> {
        match family {
            PlcFamily::CsCj => match self {
                MemoryArea::Cio => Some(0x30),
                MemoryArea::Work => Some(0x31),
                MemoryArea::Holding => Some(0x32),
                MemoryArea::Auxiliary => Some(0x33),
                MemoryArea::Data => Some(0x02),
                MemoryArea::Timer | MemoryArea::Counter => Some(0x09),
                MemoryArea::Em => Some(0x0A),
                MemoryArea::Extended(bank) => bank.bit_code(family),
                MemoryArea::IndexRegister | MemoryArea::DataRegister => None,
            },
            PlcFamily::Cv => match self {
                MemoryArea::Cio | MemoryArea::Auxiliary => Some(0x00),
                MemoryArea::Timer | MemoryArea::Counter => Some(0x01),
                _ => None,
            },
        }
    }

    /// Returns the FINS code for word access, if the family maps it.
    pub fn word_code(self, family: PlcFamily) -> Option<u8> {
        match family {
            PlcFamily::CsCj => match self {
                MemoryArea::Cio => Some(0xB0),
                MemoryArea::Work => Some(0xB1),
                MemoryArea::Holding => Some(0xB2),
                MemoryArea::Auxiliary => Some(0xB3),
                MemoryArea::Data => Some(0x82),
                MemoryArea::Timer | MemoryArea::Counter => Some(0x89),
                MemoryArea::IndexRegister => Some(0xDC),
                MemoryArea::DataRegister => Some(0xBC),
                MemoryArea::Em => Some(0x98),
                MemoryArea::Extended(bank) => bank.word_code(family),
            },
            PlcFamily::Cv => match self {
                MemoryArea::Cio | MemoryArea::Auxiliary => Some(0x80),
                MemoryArea::Timer | MemoryArea::Counter => Some(0x81),
                MemoryArea::Data => Some(0x82),
                MemoryArea::DataRegister => Some(0x9C),
                MemoryArea::Em => Some(0x98),
                MemoryArea::Extended(bank) => bank.word_code(family),
                _ => None,
            },
        }
    }

    /// Offset added to the word address before encoding.
    ///
    /// Areas that share a code (timers and counters, CIO and auxiliary on CV)
    /// are told apart by this bias.
    pub fn address_bias(self, family: PlcFamily, bit: bool) -> u16 {
        match (family, self, bit) {
            (PlcFamily::CsCj, MemoryArea::Counter, _) => 0x8000,
            (PlcFamily::CsCj, MemoryArea::IndexRegister, false) => 0x0100,
            (PlcFamily::CsCj, MemoryArea::DataRegister, false) => 0x0200,
            (PlcFamily::Cv, MemoryArea::Counter, _) => 0x0800,
            (PlcFamily::Cv, MemoryArea::Auxiliary, _) => 0x0B00,
            (PlcFamily::Cv, MemoryArea::DataRegister, false) => 0x0003,
            _ => 0,
        }
    }
}

impl fmt::Display for MemoryArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_names() {
        for name in ["CS", "CJ", "CP", "NJ", "NX", "CSCJ", "NJNX", "cj"] {
            assert_eq!(name.parse::<PlcFamily>().unwrap(), PlcFamily::CsCj);
        }
        assert_eq!("CV".parse::<PlcFamily>().unwrap(), PlcFamily::Cv);
        assert!("FX".parse::<PlcFamily>().is_err());
    }

    #[test]
    fn test_word_codes_cs() {
        let f = PlcFamily::CsCj;
        assert_eq!(MemoryArea::Cio.word_code(f), Some(0xB0));
        assert_eq!(MemoryArea::Work.word_code(f), Some(0xB1));
        assert_eq!(MemoryArea::Holding.word_code(f), Some(0xB2));
        assert_eq!(MemoryArea::Auxiliary.word_code(f), Some(0xB3));
        assert_eq!(MemoryArea::Data.word_code(f), Some(0x82));
        assert_eq!(MemoryArea::Timer.word_code(f), Some(0x89));
        assert_eq!(MemoryArea::IndexRegister.word_code(f), Some(0xDC));
        assert_eq!(MemoryArea::DataRegister.word_code(f), Some(0xBC));
    }

    #[test]
    fn test_bit_codes_cs() {
        let f = PlcFamily::CsCj;
        assert_eq!(MemoryArea::Cio.bit_code(f), Some(0x30));
        assert_eq!(MemoryArea::Data.bit_code(f), Some(0x02));
        assert_eq!(MemoryArea::Counter.bit_code(f), Some(0x09));
        assert_eq!(MemoryArea::Em.bit_code(f), Some(0x0A));
        assert_eq!(MemoryArea::IndexRegister.bit_code(f), None);
    }

    #[test]
    fn test_extended_bank_codes() {
        let f = PlcFamily::CsCj;
        let ext = MemoryArea::Extended;
        assert_eq!(ext(ExtendedBank::E0).word_code(f), Some(0xA0));
        assert_eq!(ext(ExtendedBank::EC).word_code(f), Some(0xAC));
        assert_eq!(ext(ExtendedBank::EE).word_code(f), Some(0xAD));
        assert_eq!(ext(ExtendedBank::EF).word_code(f), Some(0xAE));
        assert_eq!(ext(ExtendedBank::E10).word_code(f), Some(0x60));
        assert_eq!(ext(ExtendedBank::E18).word_code(f), Some(0x68));
        assert_eq!(ext(ExtendedBank::E9).bit_code(f), Some(0x29));
        assert_eq!(ext(ExtendedBank::EF).bit_code(f), Some(0x2E));
        assert_eq!(ext(ExtendedBank::E10).bit_code(f), Some(0x60));
        assert_eq!(ext(ExtendedBank::E11).bit_code(f), Some(0xE1));
        assert_eq!(ext(ExtendedBank::E18).bit_code(f), Some(0xE8));
    }

    #[test]
    fn test_cv_codes() {
        let f = PlcFamily::Cv;
        assert_eq!(MemoryArea::Cio.word_code(f), Some(0x80));
        assert_eq!(MemoryArea::Timer.word_code(f), Some(0x81));
        assert_eq!(MemoryArea::DataRegister.word_code(f), Some(0x9C));
        assert_eq!(MemoryArea::Extended(ExtendedBank::E7).word_code(f), Some(0x97));
        assert_eq!(MemoryArea::Extended(ExtendedBank::E8).word_code(f), None);
        assert_eq!(MemoryArea::Auxiliary.bit_code(f), Some(0x00));
        assert_eq!(MemoryArea::Data.bit_code(f), None);
        assert_eq!(MemoryArea::Work.word_code(f), None);
    }

    #[test]
    fn test_address_bias() {
        assert_eq!(MemoryArea::Counter.address_bias(PlcFamily::CsCj, false), 0x8000);
        assert_eq!(MemoryArea::Counter.address_bias(PlcFamily::CsCj, true), 0x8000);
        assert_eq!(MemoryArea::IndexRegister.address_bias(PlcFamily::CsCj, false), 0x0100);
        assert_eq!(MemoryArea::DataRegister.address_bias(PlcFamily::CsCj, false), 0x0200);
        assert_eq!(MemoryArea::Auxiliary.address_bias(PlcFamily::Cv, true), 0x0B00);
        assert_eq!(MemoryArea::DataRegister.address_bias(PlcFamily::Cv, false), 0x0003);
        assert_eq!(MemoryArea::Data.address_bias(PlcFamily::CsCj, false), 0);
    }

    #[test]
    fn test_mnemonic_roundtrip() {
        for bank in ExtendedBank::ALL {
            let area = MemoryArea::Extended(bank);
            assert_eq!(MemoryArea::from_mnemonic(area.mnemonic()), Some(area));
        }
        assert_eq!(MemoryArea::from_mnemonic("ED"), None);
        assert_eq!(MemoryArea::from_mnemonic("DM"), None);
    }
}
