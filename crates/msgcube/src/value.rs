//! Dynamically typed values read from message keys.
//!
//! A [`Value`] is what a key lookup returns once the decoder's raw buffer has
//! been unwrapped and decoded. Values are hashable so that a tuple of them can
//! key the offsets map of an [`Index`](crate::Index); floats compare and hash by
//! bit pattern.

use crate::error::{CubeError, Result};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Sentinel text used when a key could not be read during indexing.
pub const UNDEF: &str = "undef";

/// Native storage type of a key, as reported by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NativeType {
    /// 64-bit signed integer.
    Long = 1,
    /// 64-bit floating point.
    Double = 2,
    /// Fixed-length encoded text.
    String = 3,
}

impl NativeType {
    /// Creates a NativeType from a u8 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Long),
            2 => Some(Self::Double),
            3 => Some(Self::String),
            _ => None,
        }
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeType::Long => write!(f, "long"),
            NativeType::Double => write!(f, "double"),
            NativeType::String => write!(f, "string"),
        }
    }
}

/// Text encoding used to decode string values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    /// 7-bit ASCII; any byte above 0x7f is a decode failure.
    #[default]
    Ascii,
    /// UTF-8.
    Utf8,
    /// ISO-8859-1, every byte maps to one char.
    Latin1,
}

impl TextEncoding {
    /// Decodes raw bytes into a string.
    pub fn decode(self, bytes: &[u8]) -> Result<String> {
        match self {
            TextEncoding::Ascii => {
                if let Some(pos) = bytes.iter().position(|b| !b.is_ascii()) {
                    return Err(CubeError::DecodeFailure(format!(
                        "non-ASCII byte 0x{:02x} at position {}",
                        bytes[pos], pos
                    )));
                }
                Ok(bytes.iter().map(|&b| b as char).collect())
            }
            TextEncoding::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|e| CubeError::DecodeFailure(format!("Invalid UTF-8: {}", e))),
            TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }
}

/// Raw values as returned by a decoder, before unwrapping and text decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValues {
    /// Integer values.
    Long(Vec<i64>),
    /// Floating point values.
    Double(Vec<f64>),
    /// Encoded strings, one buffer per value.
    Bytes(Vec<Vec<u8>>),
}

impl RawValues {
    /// Number of values held.
    pub fn len(&self) -> usize {
        match self {
            RawValues::Long(v) => v.len(),
            RawValues::Double(v) => v.len(),
            RawValues::Bytes(v) => v.len(),
        }
    }

    /// Returns true if no values are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Native type of the held values.
    pub fn native_type(&self) -> NativeType {
        match self {
            RawValues::Long(_) => NativeType::Long,
            RawValues::Double(_) => NativeType::Double,
            RawValues::Bytes(_) => NativeType::String,
        }
    }

    /// Unwraps single values and decodes text with `encoding`.
    pub fn into_value(self, encoding: TextEncoding) -> Result<Value> {
        let value = match self {
            RawValues::Long(mut v) if v.len() == 1 => Value::Long(v.remove(0)),
            RawValues::Long(v) => Value::LongArray(v),
            RawValues::Double(mut v) if v.len() == 1 => Value::Double(v.remove(0)),
            RawValues::Double(v) => Value::DoubleArray(v),
            RawValues::Bytes(v) if v.len() == 1 => Value::Text(encoding.decode(&v[0])?),
            RawValues::Bytes(v) => {
                let texts = v
                    .iter()
                    .map(|b| encoding.decode(b))
                    .collect::<Result<Vec<_>>>()?;
                Value::TextArray(texts)
            }
        };
        Ok(value)
    }
}

/// A value read from a message key.
#[derive(Debug, Clone)]
pub enum Value {
    /// Integer scalar.
    Long(i64),
    /// Floating point scalar.
    Double(f64),
    /// Text scalar.
    Text(String),
    /// Integer array.
    LongArray(Vec<i64>),
    /// Floating point array.
    DoubleArray(Vec<f64>),
    /// Text array.
    TextArray(Vec<String>),
    /// The key could not be read (displayed as `undef`).
    Undef,
}

impl Value {
    /// Returns the integer scalar, converting integral doubles.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            Value::Double(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    /// Returns the numeric scalar as f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Long(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text scalar.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true for the `undef` sentinel.
    pub fn is_undef(&self) -> bool {
        matches!(self, Value::Undef)
    }

    /// Returns true for integer and floating point scalars.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Long(_) | Value::Double(_))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::LongArray(a), Value::LongArray(b)) => a == b,
            (Value::DoubleArray(a), Value::DoubleArray(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (Value::TextArray(a), Value::TextArray(b)) => a == b,
            (Value::Undef, Value::Undef) => true,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Long(v) => v.hash(state),
            Value::Double(v) => v.to_bits().hash(state),
            Value::Text(v) => v.hash(state),
            Value::LongArray(v) => v.hash(state),
            Value::DoubleArray(v) => {
                v.len().hash(state);
                for x in v {
                    x.to_bits().hash(state);
                }
            }
            Value::TextArray(v) => v.hash(state),
            Value::Undef => {}
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Long(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
            Value::LongArray(v) => write!(f, "{:?}", v),
            Value::DoubleArray(v) => write!(f, "{:?}", v),
            Value::TextArray(v) => write!(f, "{:?}", v),
            Value::Undef => write!(f, "{}", UNDEF),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Long(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::LongArray(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::DoubleArray(v)
    }
}
