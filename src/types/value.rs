use serde::{Deserialize, Serialize};

use crate::types::{error::CorruptField, error::RepairError, PageNo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Null,
    Integer,
    Real,
    Text,
    Blob,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Integer(_) => DataType::Integer,
            Value::Real(_) => DataType::Real,
            Value::Text(_) => DataType::Text,
            Value::Blob(_) => DataType::Blob,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Physical encoding of one column inside a record, decoded once from its
/// serial-type varint.
///
/// | Serial Type  | Variant        | Content Size |
/// |--------------|----------------|--------------|
/// | 0            | `Null`         | 0            |
/// | 1..=6        | `Integer(w)`   | 1,2,3,4,6,8  |
/// | 7            | `Real`         | 8            |
/// | 8            | `Zero`         | 0            |
/// | 9            | `One`          | 0            |
/// | N >= 12 even | `Blob(len)`    | (N-12)/2     |
/// | N >= 13 odd  | `Text(len)`    | (N-13)/2     |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerialType {
    Null,
    Integer(u8),
    Real,
    Zero,
    One,
    Text(usize),
    Blob(usize),
}

impl SerialType {
    /// Serial types 10 and 11 are reserved and never written by SQLite.
    pub fn decode(raw: u64, page: PageNo) -> Result<Self, RepairError> {
        let serial_type = match raw {
            0 => SerialType::Null,
            1 => SerialType::Integer(1),
            2 => SerialType::Integer(2),
            3 => SerialType::Integer(3),
            4 => SerialType::Integer(4),
            5 => SerialType::Integer(6),
            6 => SerialType::Integer(8),
            7 => SerialType::Real,
            8 => SerialType::Zero,
            9 => SerialType::One,
            10 | 11 => {
                return Err(RepairError::corruption(
                    page,
                    CorruptField::SerialType,
                    format!("Serial type: {} is illegal", raw),
                ));
            }
            n if n % 2 == 0 => SerialType::Blob(((n - 12) / 2) as usize),
            n => SerialType::Text(((n - 13) / 2) as usize),
        };
        Ok(serial_type)
    }

    pub fn content_size(&self) -> usize {
        match self {
            SerialType::Null | SerialType::Zero | SerialType::One => 0,
            SerialType::Integer(width) => *width as usize,
            SerialType::Real => 8,
            SerialType::Text(len) | SerialType::Blob(len) => *len,
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            SerialType::Null => DataType::Null,
            SerialType::Integer(_) | SerialType::Zero | SerialType::One => DataType::Integer,
            SerialType::Real => DataType::Real,
            SerialType::Text(_) => DataType::Text,
            SerialType::Blob(_) => DataType::Blob,
        }
    }
}
