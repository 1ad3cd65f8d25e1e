//! Raster sample data types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// Sample type of a band.
///
/// Signed 8-bit input is widened to `Int16`, as raster drivers commonly do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Uint8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Float32,
    Float64,
}

impl DataType {
    /// Size of one sample in bytes.
    pub fn size_of(&self) -> usize {
        match self {
            DataType::Uint8 => 1,
            DataType::Uint16 | DataType::Int16 => 2,
            DataType::Uint32 | DataType::Int32 | DataType::Float32 => 4,
            DataType::Float64 => 8,
        }
    }

    /// Stable one-byte tag used in encoded tiles.
    pub fn tag(&self) -> u8 {
        match self {
            DataType::Uint8 => 1,
            DataType::Uint16 => 3,
            DataType::Int16 => 4,
            DataType::Uint32 => 5,
            DataType::Int32 => 6,
            DataType::Float32 => 7,
            DataType::Float64 => 8,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => DataType::Uint8,
            3 => DataType::Uint16,
            4 => DataType::Int16,
            5 => DataType::Uint32,
            6 => DataType::Int32,
            7 => DataType::Float32,
            8 => DataType::Float64,
            _ => return None,
        })
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    /// Inclusive value range representable by this type.
    pub fn range(&self) -> (f64, f64) {
        match self {
            DataType::Uint8 => (u8::MIN as f64, u8::MAX as f64),
            DataType::Uint16 => (u16::MIN as f64, u16::MAX as f64),
            DataType::Int16 => (i16::MIN as f64, i16::MAX as f64),
            DataType::Uint32 => (u32::MIN as f64, u32::MAX as f64),
            DataType::Int32 => (i32::MIN as f64, i32::MAX as f64),
            DataType::Float32 => (f32::MIN as f64, f32::MAX as f64),
            DataType::Float64 => (f64::MIN, f64::MAX),
        }
    }

    /// Whether `value` fits this type: integers must be whole and in range,
    /// floats must not overflow (rounding to `f32` precision is allowed).
    pub fn can_represent(&self, value: f64) -> bool {
        if value.is_nan() {
            return self.is_float();
        }
        let (min, max) = self.range();
        match self {
            DataType::Float64 => true,
            DataType::Float32 => value.is_infinite() || (value >= min && value <= max),
            _ => value.fract() == 0.0 && value >= min && value <= max,
        }
    }
}

impl FromStr for DataType {
    type Err = StoreError;

    /// Parse a type name, accepting the legacy aliases used in stored descriptors.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "uint8" | "ubyte" | "bool" => DataType::Uint8,
            "int8" | "byte" | "int16" | "short" => DataType::Int16,
            "uint16" | "ushort" => DataType::Uint16,
            "uint32" | "uint" | "uint64" => DataType::Uint32,
            "int32" | "int" | "int64" => DataType::Int32,
            "float16" | "float32" => DataType::Float32,
            "float64" | "float" | "double" => DataType::Float64,
            other => {
                return Err(StoreError::Config(format!("unsupported data type '{}'", other)))
            }
        })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Uint8 => "uint8",
            DataType::Uint16 => "uint16",
            DataType::Int16 => "int16",
            DataType::Uint32 => "uint32",
            DataType::Int32 => "int32",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        };
        f.write_str(name)
    }
}
