//! Field type enumeration shared by the reader and writer

use std::fmt;

use crate::error::{WireError, WireResult};

/// Wire type code written in front of every field.
///
/// The set is closed: skip logic recurses over exactly these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldType {
    /// Terminates a structure; carries no tag and no value
    Stop = 0,
    Bool = 1,
    I8 = 2,
    I16 = 3,
    I32 = 4,
    I64 = 5,
    Double = 6,
    /// Length-prefixed bytes, also used for strings
    Binary = 7,
    List = 8,
    Map = 9,
    Struct = 10,
}

impl FieldType {
    /// Decode a type byte
    pub fn from_u8(byte: u8) -> WireResult<Self> {
        Ok(match byte {
            0 => FieldType::Stop,
            1 => FieldType::Bool,
            2 => FieldType::I8,
            3 => FieldType::I16,
            4 => FieldType::I32,
            5 => FieldType::I64,
            6 => FieldType::Double,
            7 => FieldType::Binary,
            8 => FieldType::List,
            9 => FieldType::Map,
            10 => FieldType::Struct,
            other => return Err(WireError::UnknownFieldType(other)),
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Stop => "stop",
            FieldType::Bool => "bool",
            FieldType::I8 => "i8",
            FieldType::I16 => "i16",
            FieldType::I32 => "i32",
            FieldType::I64 => "i64",
            FieldType::Double => "double",
            FieldType::Binary => "binary",
            FieldType::List => "list",
            FieldType::Map => "map",
            FieldType::Struct => "struct",
        };
        f.write_str(name)
    }
}
