//! Value packing helpers.
//!
//! Conversions between caller values and the big-endian byte layouts used in
//! FINS payloads, plus [`merge_data`] for assembling a frame from fragments.
//!
//! # Example
//!
//! ```
//! use omron_fins_client::packing::{merge_data, words_to_bytes, dec_to_bcd};
//!
//! assert_eq!(words_to_bytes(&[0x1234, 10]), vec![0x12, 0x34, 0x00, 0x0A]);
//! assert_eq!(dec_to_bcd(59), 0x59);
//!
//! let frame = merge_data(&[&[0x01u8, 0x01], &vec![0x82u8, 0x00], &0x00u8]);
//! assert_eq!(frame, vec![0x01, 0x01, 0x82, 0x00, 0x00]);
//! ```

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::error::{FinsError, Result};

/// A value supplied for a write or fill.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DataValue {
    /// An integer.
    Int(i64),
    /// A boolean.
    Bool(bool),
    /// Text, accepted as `"on"`/`"off"` for bits or a decimal integer.
    Text(String),
}

impl DataValue {
    /// Interprets the value as an integer.
    ///
    /// Booleans map to 0/1 and text must hold a decimal integer.
    pub fn as_int(&self) -> Result<i64> {
        match self {
            DataValue::Int(v) => Ok(*v),
            DataValue::Bool(b) => Ok(i64::from(*b)),
            DataValue::Text(s) => s.trim().parse().map_err(|_| {
                FinsError::invalid_parameter("data", format!("'{s}' is not an integer"))
            }),
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Int(v) => write!(f, "{v}"),
            DataValue::Bool(b) => write!(f, "{b}"),
            DataValue::Text(s) => f.write_str(s),
        }
    }
}

macro_rules! data_value_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for DataValue {
            fn from(v: $t) -> Self {
                DataValue::Int(i64::from(v))
            }
        })*
    };
}

data_value_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for DataValue {
    fn from(v: bool) -> Self {
        DataValue::Bool(v)
    }
}

impl From<&str> for DataValue {
    fn from(v: &str) -> Self {
        DataValue::Text(v.to_string())
    }
}

impl From<String> for DataValue {
    fn from(v: String) -> Self {
        DataValue::Text(v)
    }
}

impl TryFrom<&Value> for DataValue {
    type Error = FinsError;

    fn try_from(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(b) => Ok(DataValue::Bool(*b)),
            Value::String(s) => Ok(DataValue::Text(s.clone())),
            Value::Number(n) => n.as_i64().map(DataValue::Int).ok_or_else(|| {
                FinsError::invalid_parameter("data", format!("{n} is not an integer"))
            }),
            other => Err(FinsError::invalid_parameter(
                "data",
                format!("unsupported value {other}"),
            )),
        }
    }
}

/// Interprets a value as a boolean.
///
/// Accepts `1`/`0`, `true`/`false`, and the strings `"on"`/`"off"` (trimmed,
/// case-insensitive). Strings holding `1`, `0`, `true` or `false` are also
/// accepted.
///
/// # Errors
///
/// Returns `FinsError::InvalidBoolean` for anything else.
///
/// # Example
///
/// ```
/// use omron_fins_client::packing::{normalise_bool, DataValue};
///
/// assert!(normalise_bool(&DataValue::from(" ON ")).unwrap());
/// assert!(!normalise_bool(&DataValue::from(0)).unwrap());
/// assert!(normalise_bool(&DataValue::from(2)).is_err());
/// ```
pub fn normalise_bool(value: &DataValue) -> Result<bool> {
    let invalid = || FinsError::InvalidBoolean {
        value: value.to_string(),
    };
    match value {
        DataValue::Bool(b) => Ok(*b),
        DataValue::Int(1) => Ok(true),
        DataValue::Int(0) => Ok(false),
        DataValue::Int(_) => Err(invalid()),
        DataValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "on" | "true" | "1" => Ok(true),
            "off" | "false" | "0" => Ok(false),
            _ => Err(invalid()),
        },
    }
}

/// Packs values as one byte each, 1 for true and 0 for false.
pub fn bools_to_bytes(values: &[DataValue]) -> Result<Vec<u8>> {
    values
        .iter()
        .map(|v| normalise_bool(v).map(u8::from))
        .collect()
}

/// Packs values as big-endian 16-bit words, keeping the low 16 bits of each.
pub fn words_to_bytes(values: &[i64]) -> Vec<u8> {
    values
        .iter()
        .flat_map(|v| ((*v & 0xFFFF) as u16).to_be_bytes())
        .collect()
}

/// Packs values as big-endian 32-bit double words, keeping the low 32 bits
/// of each.
pub fn dwords_to_bytes(values: &[i64]) -> Vec<u8> {
    values
        .iter()
        .flat_map(|v| ((*v & 0xFFFF_FFFF) as u32).to_be_bytes())
        .collect()
}

/// Encodes a two digit decimal number as BCD.
#[inline]
pub fn dec_to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

/// Decodes a BCD byte into its decimal value.
#[inline]
pub fn bcd_to_dec(value: u8) -> u8 {
    (value >> 4) * 10 + (value & 0x0F)
}

/// Something that can be appended to a frame as raw bytes.
///
/// Implemented for bytes and, recursively, for slices, arrays and vectors of
/// anything flattenable, so nested fragments need no intermediate
/// concatenation.
pub trait Flatten {
    /// Appends this fragment's bytes to `out`.
    fn flatten_into(&self, out: &mut Vec<u8>);
}

impl Flatten for u8 {
    fn flatten_into(&self, out: &mut Vec<u8>) {
        out.push(*self);
    }
}

impl<T: Flatten> Flatten for [T] {
    fn flatten_into(&self, out: &mut Vec<u8>) {
        for item in self {
            item.flatten_into(out);
        }
    }
}

impl<T: Flatten, const N: usize> Flatten for [T; N] {
    fn flatten_into(&self, out: &mut Vec<u8>) {
        self.as_slice().flatten_into(out);
    }
}

impl<T: Flatten> Flatten for Vec<T> {
    fn flatten_into(&self, out: &mut Vec<u8>) {
        self.as_slice().flatten_into(out);
    }
}

impl<T: Flatten + ?Sized> Flatten for &T {
    fn flatten_into(&self, out: &mut Vec<u8>) {
        (**self).flatten_into(out);
    }
}

/// Merges fragments into one flat byte vector, in order.
pub fn merge_data(parts: &[&dyn Flatten]) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        part.flatten_into(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalise_bool_accepts() {
        for v in [
            DataValue::from(true),
            DataValue::from(1),
            DataValue::from("on"),
            DataValue::from("  On"),
            DataValue::from("TRUE"),
        ] {
            assert!(normalise_bool(&v).unwrap(), "{v:?}");
        }
        for v in [
            DataValue::from(false),
            DataValue::from(0),
            DataValue::from("off"),
            DataValue::from("OFF "),
        ] {
            assert!(!normalise_bool(&v).unwrap(), "{v:?}");
        }
    }

    #[test]
    fn test_normalise_bool_rejects() {
        for v in [DataValue::from(2), DataValue::from(-1), DataValue::from("yes")] {
            assert!(matches!(
                normalise_bool(&v),
                Err(FinsError::InvalidBoolean { .. })
            ));
        }
    }

    #[test]
    fn test_bools_to_bytes() {
        let values = [DataValue::from(true), DataValue::from("off"), DataValue::from(1)];
        assert_eq!(bools_to_bytes(&values).unwrap(), vec![1, 0, 1]);
        assert!(bools_to_bytes(&[DataValue::from(5)]).is_err());
    }

    #[test]
    fn test_words_to_bytes() {
        assert_eq!(words_to_bytes(&[1, 2, 3]), vec![0, 1, 0, 2, 0, 3]);
        assert_eq!(words_to_bytes(&[-1]), vec![0xFF, 0xFF]);
        assert_eq!(words_to_bytes(&[0x12345]), vec![0x23, 0x45]);
    }

    #[test]
    fn test_dwords_to_bytes() {
        assert_eq!(dwords_to_bytes(&[0x0102_0304]), vec![1, 2, 3, 4]);
        assert_eq!(dwords_to_bytes(&[-2]), vec![0xFF, 0xFF, 0xFF, 0xFE]);
    }

    #[test]
    fn test_bcd() {
        assert_eq!(dec_to_bcd(0), 0x00);
        assert_eq!(dec_to_bcd(23), 0x23);
        assert_eq!(dec_to_bcd(99), 0x99);
        assert_eq!(bcd_to_dec(0x45), 45);
        for v in 0..=99 {
            assert_eq!(bcd_to_dec(dec_to_bcd(v)), v);
        }
    }

    #[test]
    fn test_merge_nested() {
        let header = [0x80u8, 0x00, 0x02];
        let nested: Vec<Vec<u8>> = vec![vec![1, 2], vec![], vec![3]];
        let out = merge_data(&[&header, &nested, &0xFFu8]);
        assert_eq!(out, vec![0x80, 0x00, 0x02, 1, 2, 3, 0xFF]);
    }

    #[test]
    fn test_data_value_from_json() {
        assert_eq!(DataValue::try_from(&json!(12)).unwrap(), DataValue::Int(12));
        assert_eq!(DataValue::try_from(&json!(true)).unwrap(), DataValue::Bool(true));
        assert_eq!(
            DataValue::try_from(&json!("on")).unwrap(),
            DataValue::Text("on".into())
        );
        assert!(DataValue::try_from(&json!(1.5)).is_err());
        assert!(DataValue::try_from(&json!([1])).is_err());
    }

    #[test]
    fn test_as_int() {
        assert_eq!(DataValue::from(" 42 ").as_int().unwrap(), 42);
        assert_eq!(DataValue::from(true).as_int().unwrap(), 1);
        assert!(DataValue::from("four").as_int().is_err());
    }
}
