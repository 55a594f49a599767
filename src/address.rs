//! Memory address parsing and encoding.
//!
//! Addresses are written the way they appear in the PLC programming tools:
//!
//! | Form | Meaning |
//! |------|---------|
//! | `D100` | word 100 of data memory |
//! | `CIO50.3` | bit 3 of CIO word 50 |
//! | `T5.x` | completion flag of timer 5 |
//! | `E3_12` | word 12 of EM bank 3 |
//! | `E3_12.4` | bit 4 of that word |
//!
//! An [`AddressCodec`] turns these strings into [`MemoryAddress`] values for
//! one [`PlcFamily`], and renders them back.
//!
//! # Example
//!
//! ```
//! use omron_fins_client::{AddressCodec, PlcFamily};
//!
//! let codec = AddressCodec::new(PlcFamily::CsCj);
//! let addr = codec.parse("D5.1").unwrap();
//! assert_eq!(addr.bytes(), [0x02, 0x00, 0x05, 0x01]);
//! assert_eq!(addr.to_string(), "D5.1");
//! ```

use std::fmt;

use crate::error::{FinsError, Result};
use crate::memory::{MemoryArea, PlcFamily};

/// Highest bit index within a word.
pub const MAX_BIT: u8 = 15;

/// A parsed memory address.
///
/// Construction through [`AddressCodec::parse`] guarantees that the area
/// code resolved for the codec's family and that the biased word address
/// fits in 16 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryAddress {
    area: MemoryArea,
    word: u16,
    bit: Option<u8>,
    is_bit: bool,
    element_length: usize,
    area_code: u8,
    bytes: [u8; 4],
}

impl MemoryAddress {
    /// The memory area.
    pub fn area(&self) -> MemoryArea {
        self.area
    }

    /// The word address, before any area bias.
    pub fn word(&self) -> u16 {
        self.word
    }

    /// Bit index, `None` for word addresses and completion flags.
    pub fn bit(&self) -> Option<u8> {
        self.bit
    }

    /// Returns true for bit addresses, including completion flags.
    pub fn is_bit_address(&self) -> bool {
        self.is_bit
    }

    /// Returns true for a `T`/`C` completion flag (`.x`) address.
    pub fn is_completion_flag(&self) -> bool {
        self.is_bit && self.bit.is_none()
    }

    /// Bytes per element on the wire: 1 for bits, 4 for index registers,
    /// 2 otherwise.
    pub fn element_length(&self) -> usize {
        self.element_length
    }

    /// FINS area code in the family the address was parsed for.
    pub fn area_code(&self) -> u8 {
        self.area_code
    }

    /// Encoded address: area code, big-endian biased word address, bit.
    pub fn bytes(&self) -> [u8; 4] {
        self.bytes
    }
}

impl fmt::Display for MemoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render(self, 0, 0))
    }
}

/// Parses and encodes addresses for one PLC family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddressCodec {
    family: PlcFamily,
}

impl AddressCodec {
    /// Creates a codec for the given family.
    pub fn new(family: PlcFamily) -> Self {
        Self { family }
    }

    /// The family this codec encodes for.
    pub fn family(&self) -> PlcFamily {
        self.family
    }

    /// Parses an address string.
    ///
    /// Area mnemonics are matched case-insensitively. Surrounding whitespace
    /// is ignored.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::InvalidAddress` when the string does not follow
    /// the address grammar, names an unknown area, uses a bit form the area
    /// does not allow, or resolves to no area code for this family.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_client::{AddressCodec, PlcFamily};
    ///
    /// let codec = AddressCodec::new(PlcFamily::CsCj);
    /// let c12 = codec.parse("C12").unwrap();
    /// assert_eq!(c12.bytes(), [0x89, 0x80, 0x0C, 0x00]);
    ///
    /// assert!(codec.parse("D100.x").is_err());
    /// assert!(codec.parse("Q10").is_err());
    /// ```
    pub fn parse(&self, address: &str) -> Result<MemoryAddress> {
        let text = address.trim().to_ascii_uppercase();
        let invalid = |reason: &str| FinsError::invalid_address(address, reason);

        let (area_str, rest) = match text.split_once('_') {
            Some(parts) => parts,
            None => {
                let idx = text
                    .find(|c: char| c.is_ascii_digit())
                    .ok_or_else(|| invalid("missing word address"))?;
                text.split_at(idx)
            }
        };
        if area_str.is_empty() {
            return Err(invalid("missing memory area"));
        }
        let area = MemoryArea::from_mnemonic(area_str)
            .ok_or_else(|| invalid(&format!("unknown memory area '{area_str}'")))?;

        let (word_str, bit_str) = match rest.split_once('.') {
            Some((w, b)) => (w, Some(b)),
            None => (rest, None),
        };
        let word = parse_digits(word_str)
            .ok_or_else(|| invalid("word address must be a decimal number"))?;

        let (is_bit, bit) = match bit_str {
            None => (false, None),
            Some("X") if area.is_timer_counter() => (true, None),
            Some("X") => {
                return Err(invalid(
                    "'.x' is only valid for the completion flag of T and C addresses",
                ))
            }
            Some(_) if area.is_timer_counter() => {
                return Err(invalid("T and C bit access uses the '.x' completion flag"))
            }
            Some(b) => {
                let bit = parse_digits(b)
                    .filter(|bit| *bit <= u32::from(MAX_BIT))
                    .ok_or_else(|| invalid("bit index must be within 0..=15"))?;
                (true, Some(bit as u8))
            }
        };

        let area_code = if is_bit {
            area.bit_code(self.family)
        } else {
            area.word_code(self.family)
        }
        .ok_or_else(|| {
            invalid(&format!(
                "{} access to {area} is not available on {} PLCs",
                if is_bit { "bit" } else { "word" },
                self.family
            ))
        })?;

        let word = u16::try_from(word).map_err(|_| invalid("word address out of range"))?;
        let biased = encode_word(area, word, is_bit, self.family)
            .ok_or_else(|| invalid("word address out of range"))?;

        let element_length = if is_bit {
            1
        } else if area == MemoryArea::IndexRegister {
            4
        } else {
            2
        };
        let [hi, lo] = biased.to_be_bytes();

        Ok(MemoryAddress {
            area,
            word,
            bit,
            is_bit,
            element_length,
            area_code,
            bytes: [area_code, hi, lo, bit.unwrap_or(0)],
        })
    }

    /// Parses a list of addresses, stopping at the first invalid one.
    pub fn parse_all<S: AsRef<str>>(&self, addresses: &[S]) -> Result<Vec<MemoryAddress>> {
        addresses.iter().map(|a| self.parse(a.as_ref())).collect()
    }

    /// Encodes an address for this codec's family.
    ///
    /// Returns `None` when the family has no code for the address's area and
    /// access kind, or the biased address does not fit in 16 bits.
    pub fn to_bytes(&self, address: &MemoryAddress) -> Option<[u8; 4]> {
        let code = if address.is_bit {
            address.area.bit_code(self.family)
        } else {
            address.area.word_code(self.family)
        }?;
        let biased = encode_word(address.area, address.word, address.is_bit, self.family)?;
        let [hi, lo] = biased.to_be_bytes();
        Some([code, hi, lo, address.bit.unwrap_or(0)])
    }

    /// Renders an address with word and bit offsets applied.
    ///
    /// Completion flags ignore the bit offset.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_fins_client::{AddressCodec, PlcFamily};
    ///
    /// let codec = AddressCodec::new(PlcFamily::CsCj);
    /// let addr = codec.parse("CIO10.2").unwrap();
    /// assert_eq!(codec.format(&addr, 1, 3), "CIO11.5");
    /// ```
    pub fn format(&self, address: &MemoryAddress, word_offset: u32, bit_offset: u32) -> String {
        render(address, word_offset, bit_offset)
    }
}

fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn encode_word(area: MemoryArea, word: u16, is_bit: bool, family: PlcFamily) -> Option<u16> {
    word.checked_add(area.address_bias(family, is_bit))
}

fn render(address: &MemoryAddress, word_offset: u32, bit_offset: u32) -> String {
    let area = address.area;
    let sep = if matches!(area, MemoryArea::Extended(_)) {
        "_"
    } else {
        ""
    };
    let word = u32::from(address.word) + word_offset;
    match (address.is_bit, address.bit) {
        (true, None) => format!("{area}{sep}{word}.x"),
        (true, Some(bit)) => format!("{area}{sep}{word}.{}", u32::from(bit) + bit_offset),
        (false, _) => format!("{area}{sep}{word}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ExtendedBank;

    fn cs() -> AddressCodec {
        AddressCodec::new(PlcFamily::CsCj)
    }

    #[test]
    fn test_parse_word_address() {
        let addr = cs().parse("D100").unwrap();
        assert_eq!(addr.area(), MemoryArea::Data);
        assert_eq!(addr.word(), 100);
        assert_eq!(addr.bit(), None);
        assert!(!addr.is_bit_address());
        assert_eq!(addr.element_length(), 2);
        assert_eq!(addr.bytes(), [0x82, 0x00, 0x64, 0x00]);
    }

    #[test]
    fn test_parse_bit_address() {
        let addr = cs().parse("CIO50.3").unwrap();
        assert!(addr.is_bit_address());
        assert_eq!(addr.bit(), Some(3));
        assert_eq!(addr.element_length(), 1);
        assert_eq!(addr.bytes(), [0x30, 0x00, 0x32, 0x03]);
    }

    #[test]
    fn test_parse_d0_bytes() {
        assert_eq!(cs().parse("D0").unwrap().bytes(), [0x82, 0, 0, 0]);
    }

    #[test]
    fn test_completion_flag() {
        let addr = cs().parse("T5.x").unwrap();
        assert!(addr.is_completion_flag());
        assert_eq!(addr.element_length(), 1);
        assert_eq!(addr.bytes(), [0x09, 0x00, 0x05, 0x00]);
        assert_eq!(addr.to_string(), "T5.x");

        let counter = cs().parse("C5.X").unwrap();
        assert_eq!(counter.bytes(), [0x09, 0x80, 0x05, 0x00]);
    }

    #[test]
    fn test_completion_flag_only_for_timer_counter() {
        assert!(cs().parse("D5.x").is_err());
        assert!(cs().parse("T5.3").is_err());
    }

    #[test]
    fn test_index_register_length() {
        let addr = cs().parse("IR2").unwrap();
        assert_eq!(addr.element_length(), 4);
        assert_eq!(addr.bytes(), [0xDC, 0x01, 0x02, 0x00]);
    }

    #[test]
    fn test_data_register_bias() {
        assert_eq!(cs().parse("DR3").unwrap().bytes(), [0xBC, 0x02, 0x03, 0x00]);
        let cv = AddressCodec::new(PlcFamily::Cv);
        assert_eq!(cv.parse("DR3").unwrap().bytes(), [0x9C, 0x00, 0x06, 0x00]);
    }

    #[test]
    fn test_extended_bank() {
        let addr = cs().parse("E3_12").unwrap();
        assert_eq!(addr.area(), MemoryArea::Extended(ExtendedBank::E3));
        assert_eq!(addr.bytes(), [0xA3, 0x00, 0x0C, 0x00]);
        assert_eq!(addr.to_string(), "E3_12");

        let bit = cs().parse("E10_7.2").unwrap();
        assert_eq!(bit.bytes(), [0x60, 0x00, 0x07, 0x02]);
        assert_eq!(bit.to_string(), "E10_7.2");
    }

    #[test]
    fn test_lowercase_and_whitespace() {
        let addr = cs().parse("  w10.1 ").unwrap();
        assert_eq!(addr.area(), MemoryArea::Work);
        assert_eq!(addr.to_string(), "W10.1");
    }

    #[test]
    fn test_invalid_addresses() {
        for bad in [
            "", "D", "100", "D10.", "D10.16", "D1x", "D10.2.3", "Q10", "DM100", "D70000",
            "E3_", "_10", "IR1.0",
        ] {
            assert!(
                matches!(cs().parse(bad), Err(FinsError::InvalidAddress { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_bias_overflow_rejected() {
        assert!(cs().parse("C32767").is_ok());
        assert!(cs().parse("C32768").is_err());
    }

    #[test]
    fn test_cv_family_restrictions() {
        let cv = AddressCodec::new(PlcFamily::Cv);
        assert!(cv.parse("W10").is_err());
        assert!(cv.parse("D10.1").is_err());
        assert_eq!(cv.parse("A10").unwrap().bytes(), [0x80, 0x0B, 0x0A, 0x00]);
        assert_eq!(cv.parse("C1.x").unwrap().bytes(), [0x01, 0x08, 0x01, 0x00]);
    }

    #[test]
    fn test_to_bytes_other_family() {
        let addr = cs().parse("W10").unwrap();
        assert_eq!(cs().to_bytes(&addr), Some(addr.bytes()));
        assert_eq!(AddressCodec::new(PlcFamily::Cv).to_bytes(&addr), None);
    }

    #[test]
    fn test_format_offsets() {
        let codec = cs();
        let word = codec.parse("D100").unwrap();
        assert_eq!(codec.format(&word, 5, 9), "D105");
        let flag = codec.parse("T7.x").unwrap();
        assert_eq!(codec.format(&flag, 2, 1), "T9.x");
    }

    #[test]
    fn test_parse_all_stops_on_error() {
        let codec = cs();
        assert_eq!(codec.parse_all(&["D10", "CIO20.0"]).unwrap().len(), 2);
        assert!(codec.parse_all(&["D10", "nope"]).is_err());
    }
}
