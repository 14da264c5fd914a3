//! Core data types for x2cscope
//!
//! This module contains the fundamental data structures shared by the
//! resolver, the typed variable layer, and the scope engine.
//!
//! # Main Types
//!
//! - [`VariableInfo`] - One addressable unit resolved from debug information
//! - [`Representation`] - How a primitive is laid out in device memory
//! - [`Value`] - A host-side number read from or written to the device
//!
//! # Representations
//!
//! Every value on the wire is little-endian:
//! - Signed integers: int8, int16, int32, int64
//! - Unsigned integers: uint8, uint16, uint32, uint64
//! - Floating point: float32, float64
//! - Boolean values (stored as one unsigned byte)
//!
//! Pointers are carried as the unsigned integer of the target's address width.

use crate::error::{Result, X2cError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One addressable unit: a scalar, a pointer, or an array of scalars.
///
/// Structures never appear here directly; each of their leaf members is a
/// separate entry named `parent.member[.sub]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableInfo {
    /// Dotted name, e.g. `motor.ctrl.gains[2].kp`
    pub name: String,
    /// Primitive type tag (`int`, `unsigned char`, `pointer`, `enum State`, ...)
    pub type_name: String,
    /// Width of one element in bytes
    pub byte_size: usize,
    /// Absolute device address
    pub address: u64,
    /// Element count, 0 for scalars
    pub array_size: usize,
    /// Enumerator table for enum-typed entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_values: Option<BTreeMap<String, i64>>,
    /// Bitfield width in bits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_size: Option<u8>,
    /// Bitfield shift from the least significant bit of the storage unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_offset: Option<u8>,
}

impl VariableInfo {
    /// Create a scalar entry
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, byte_size: usize, address: u64) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            byte_size,
            address,
            array_size: 0,
            valid_values: None,
            bit_size: None,
            bit_offset: None,
        }
    }

    /// Turn this entry into an array of `count` elements
    pub fn with_array_size(mut self, count: usize) -> Self {
        self.array_size = count;
        self
    }

    /// Attach an enumerator table
    pub fn with_enumerators(mut self, values: BTreeMap<String, i64>) -> Self {
        self.valid_values = Some(values);
        self
    }

    /// Whether this entry describes an array
    pub fn is_array(&self) -> bool {
        self.array_size > 0
    }

    /// Whether this entry is a bitfield
    pub fn is_bitfield(&self) -> bool {
        self.bit_size.is_some()
    }

    /// Number of bytes covered by the whole entry
    pub fn total_size(&self) -> usize {
        self.byte_size * self.array_size.max(1)
    }
}

/// Device memory layout of a primitive value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Representation {
    /// 8-bit signed integer
    Int8,
    /// 16-bit signed integer
    Int16,
    /// 32-bit signed integer
    Int32,
    /// 64-bit signed integer
    Int64,
    /// 8-bit unsigned integer
    UInt8,
    /// 16-bit unsigned integer
    UInt16,
    /// 32-bit unsigned integer
    UInt32,
    /// 64-bit unsigned integer
    UInt64,
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
    /// Boolean stored as an unsigned byte
    Bool,
}

impl Representation {
    /// Pick the representation for a primitive type name.
    ///
    /// Names are compared case-insensitively with underscores removed, so
    /// `Unsigned_Int` and `unsigned int` select the same entry. The `int`
    /// and `long` families follow the entry's byte width.
    pub fn select(type_name: &str, byte_size: usize, address_width: usize) -> Result<Self> {
        let normalized = normalize_type_name(type_name);

        let rep = match normalized.as_str() {
            "bool" => Some(Representation::Bool),
            "char" | "signed char" | "int8t" => Some(Representation::Int8),
            "unsigned char" | "uint8t" => Some(Representation::UInt8),
            "short" | "short int" | "signed short" | "short signed int" | "signed short int"
            | "int16t" => Some(Representation::Int16),
            "short unsigned int" | "unsigned short" | "unsigned short int" | "uint16t" => {
                Some(Representation::UInt16)
            }
            "int" | "signed int" | "signed" | "long" | "long int" | "signed long"
            | "long signed int" | "signed long int" => Self::integer(byte_size, true),
            "unsigned int" | "unsigned" | "long unsigned int" | "unsigned long"
            | "unsigned long int" => Self::integer(byte_size, false),
            "int32t" => Some(Representation::Int32),
            "uint32t" => Some(Representation::UInt32),
            "long long" | "long long int" | "signed long long" | "long long signed int"
            | "int64t" => Some(Representation::Int64),
            "long long unsigned int" | "unsigned long long" | "unsigned long long int"
            | "uint64t" => Some(Representation::UInt64),
            "float" => Some(Representation::Float32),
            "double" | "long double" => match byte_size {
                4 => Some(Representation::Float32),
                8 => Some(Representation::Float64),
                _ => None,
            },
            "pointer" => Some(if address_width == 2 {
                Representation::UInt16
            } else {
                Representation::UInt32
            }),
            n if n.starts_with("enum ") || n == "enum" => Self::integer(byte_size, true),
            _ => None,
        };

        let rep = rep.ok_or_else(|| X2cError::UnsupportedType(type_name.to_string()))?;
        if rep.width() != byte_size {
            return Err(X2cError::UnsupportedType(format!(
                "{} with {} byte(s)",
                type_name, byte_size
            )));
        }
        Ok(rep)
    }

    /// Pick the representation for a resolved entry.
    ///
    /// Same as [`select`](Self::select) except for enums: an enum whose
    /// enumerators are all non-negative is read unsigned, so values above the
    /// signed range of its width still match their names. Enums without a
    /// table, or with a negative enumerator, stay signed.
    pub fn for_info(info: &VariableInfo, address_width: usize) -> Result<Self> {
        let rep = Self::select(&info.type_name, info.byte_size, address_width)?;
        if !normalize_type_name(&info.type_name).starts_with("enum") {
            return Ok(rep);
        }
        match &info.valid_values {
            Some(values) if !values.is_empty() && values.values().all(|v| *v >= 0) => {
                Ok(Self::integer(rep.width(), false).unwrap_or(rep))
            }
            _ => Ok(rep),
        }
    }

    /// Integer representation of the given width
    pub fn integer(width: usize, signed: bool) -> Option<Self> {
        Some(match (width, signed) {
            (1, true) => Representation::Int8,
            (2, true) => Representation::Int16,
            (4, true) => Representation::Int32,
            (8, true) => Representation::Int64,
            (1, false) => Representation::UInt8,
            (2, false) => Representation::UInt16,
            (4, false) => Representation::UInt32,
            (8, false) => Representation::UInt64,
            _ => return None,
        })
    }

    /// Size in bytes
    pub fn width(&self) -> usize {
        match self {
            Representation::Int8 | Representation::UInt8 | Representation::Bool => 1,
            Representation::Int16 | Representation::UInt16 => 2,
            Representation::Int32 | Representation::UInt32 | Representation::Float32 => 4,
            Representation::Int64 | Representation::UInt64 | Representation::Float64 => 8,
        }
    }

    /// Whether values carry a sign
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            Representation::Int8
                | Representation::Int16
                | Representation::Int32
                | Representation::Int64
                | Representation::Float32
                | Representation::Float64
        )
    }

    /// Whether this is an integer (including bool) representation
    pub fn is_integer(&self) -> bool {
        !self.is_float()
    }

    /// Whether this is a floating point representation
    pub fn is_float(&self) -> bool {
        matches!(self, Representation::Float32 | Representation::Float64)
    }

    /// Inclusive bounds for integer representations
    pub fn bounds(&self) -> Option<(i128, i128)> {
        Some(match self {
            Representation::Int8 => (i8::MIN as i128, i8::MAX as i128),
            Representation::Int16 => (i16::MIN as i128, i16::MAX as i128),
            Representation::Int32 => (i32::MIN as i128, i32::MAX as i128),
            Representation::Int64 => (i64::MIN as i128, i64::MAX as i128),
            Representation::UInt8 | Representation::Bool => (0, u8::MAX as i128),
            Representation::UInt16 => (0, u16::MAX as i128),
            Representation::UInt32 => (0, u32::MAX as i128),
            Representation::UInt64 => (0, u64::MAX as i128),
            Representation::Float32 | Representation::Float64 => return None,
        })
    }

    /// Decode exactly `width()` little-endian bytes
    pub fn decode(&self, bytes: &[u8]) -> Option<Value> {
        if bytes.len() != self.width() {
            return None;
        }

        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(bytes);
        let raw = u64::from_le_bytes(buf);

        Some(match self {
            Representation::UInt8 | Representation::UInt16 | Representation::UInt32 => {
                Value::Unsigned(raw)
            }
            Representation::UInt64 => Value::Unsigned(raw),
            Representation::Bool => Value::Unsigned(raw),
            Representation::Int8 => Value::Signed(raw as u8 as i8 as i64),
            Representation::Int16 => Value::Signed(raw as u16 as i16 as i64),
            Representation::Int32 => Value::Signed(raw as u32 as i32 as i64),
            Representation::Int64 => Value::Signed(raw as i64),
            Representation::Float32 => Value::Float(f32::from_bits(raw as u32) as f64),
            Representation::Float64 => Value::Float(f64::from_bits(raw)),
        })
    }

    /// Encode a value as `width()` little-endian bytes.
    ///
    /// Integer representations reject values outside their bounds, never
    /// clamping. Floats written to an integer are truncated toward zero after
    /// the range check.
    pub fn encode(&self, value: Value) -> Result<Vec<u8>> {
        let width = self.width();

        match self {
            Representation::Float32 => {
                return Ok((value.as_f64() as f32).to_le_bytes().to_vec());
            }
            Representation::Float64 => {
                return Ok(value.as_f64().to_le_bytes().to_vec());
            }
            _ => {}
        }

        let (min, max) = self
            .bounds()
            .ok_or_else(|| X2cError::UnsupportedType(self.to_string()))?;

        let wide: i128 = match value {
            Value::Signed(v) => v as i128,
            Value::Unsigned(v) => v as i128,
            Value::Float(f) => {
                if f.is_nan() {
                    return Err(X2cError::range(f, min, max));
                }
                f.trunc() as i128
            }
        };

        if wide < min || wide > max {
            return Err(match value {
                Value::Float(f) => X2cError::range(f, min, max),
                _ => X2cError::range(wide, min, max),
            });
        }

        let bytes = if self.is_signed() {
            (wide as i64).to_le_bytes()
        } else {
            (wide as u64).to_le_bytes()
        };
        Ok(bytes[..width].to_vec())
    }
}

impl std::fmt::Display for Representation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Representation::Int8 => write!(f, "int8"),
            Representation::Int16 => write!(f, "int16"),
            Representation::Int32 => write!(f, "int32"),
            Representation::Int64 => write!(f, "int64"),
            Representation::UInt8 => write!(f, "uint8"),
            Representation::UInt16 => write!(f, "uint16"),
            Representation::UInt32 => write!(f, "uint32"),
            Representation::UInt64 => write!(f, "uint64"),
            Representation::Float32 => write!(f, "float32"),
            Representation::Float64 => write!(f, "float64"),
            Representation::Bool => write!(f, "bool"),
        }
    }
}

/// Lowercase, strip underscores, and collapse whitespace
pub fn normalize_type_name(name: &str) -> String {
    name.to_lowercase()
        .replace('_', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// A number read from or written to the device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Signed integer
    Signed(i64),
    /// Unsigned integer (also bools and pointers)
    Unsigned(u64),
    /// Floating point
    Float(f64),
}

impl Value {
    /// Convert to f64 for plotting
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Signed(v) => *v as f64,
            Value::Unsigned(v) => *v as f64,
            Value::Float(v) => *v,
        }
    }

    /// Integer view, if the value is integral and fits
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Signed(v) => Some(*v),
            Value::Unsigned(v) => i64::try_from(*v).ok(),
            Value::Float(_) => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Signed(v) => write!(f, "{}", v),
            Value::Unsigned(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
        }
    }
}

macro_rules! value_from {
    ($variant:ident, $wide:ty: $($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::$variant(v as $wide)
                }
            }
        )*
    };
}

value_from!(Signed, i64: i8, i16, i32, i64);
value_from!(Unsigned, u64: u8, u16, u32, u64);
value_from!(Float, f64: f32, f64);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Unsigned(v as u64)
    }
}
