//! Per-type value encodings

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::error::{WireError, WireResult};
use crate::field::FieldType;
use crate::reader::{DecodeMode, ProtocolReader};
use crate::writer::ProtocolWriter;

/// A value that can occupy a field slot
pub trait WireValue: Sized {
    /// Type code written in the field header
    const FIELD_TYPE: FieldType;

    /// Write the value bytes (the header is written by the caller)
    fn write(&self, writer: &mut ProtocolWriter);

    /// Read the value bytes (the header was already consumed)
    fn read(reader: &mut ProtocolReader) -> WireResult<Self>;
}

macro_rules! primitive_value {
    ($ty:ty, $field:ident, $write:ident, $read:ident) => {
        impl WireValue for $ty {
            const FIELD_TYPE: FieldType = FieldType::$field;

            fn write(&self, writer: &mut ProtocolWriter) {
                writer.$write(*self);
            }

            fn read(reader: &mut ProtocolReader) -> WireResult<Self> {
                reader.$read()
            }
        }
    };
}

primitive_value!(bool, Bool, write_bool, read_bool);
primitive_value!(i8, I8, write_i8, read_i8);
primitive_value!(i16, I16, write_i16, read_i16);
primitive_value!(i32, I32, write_i32, read_i32);
primitive_value!(i64, I64, write_i64, read_i64);
primitive_value!(f64, Double, write_double, read_double);

// Unsigned integers share the signed wire types bit for bit.
macro_rules! unsigned_value {
    ($ty:ty, $signed:ty, $field:ident, $write:ident, $read:ident) => {
        impl WireValue for $ty {
            const FIELD_TYPE: FieldType = FieldType::$field;

            fn write(&self, writer: &mut ProtocolWriter) {
                writer.$write(*self as $signed);
            }

            fn read(reader: &mut ProtocolReader) -> WireResult<Self> {
                Ok(reader.$read()? as $ty)
            }
        }
    };
}

unsigned_value!(u16, i16, I16, write_i16, read_i16);
unsigned_value!(u32, i32, I32, write_i32, read_i32);
unsigned_value!(u64, i64, I64, write_i64, read_i64);

impl WireValue for String {
    const FIELD_TYPE: FieldType = FieldType::Binary;

    fn write(&self, writer: &mut ProtocolWriter) {
        writer.write_binary(self.as_bytes());
    }

    fn read(reader: &mut ProtocolReader) -> WireResult<Self> {
        reader.read_string()
    }
}

impl WireValue for Bytes {
    const FIELD_TYPE: FieldType = FieldType::Binary;

    fn write(&self, writer: &mut ProtocolWriter) {
        writer.write_binary(self);
    }

    fn read(reader: &mut ProtocolReader) -> WireResult<Self> {
        reader.read_binary()
    }
}

impl<T: WireValue> WireValue for Vec<T> {
    const FIELD_TYPE: FieldType = FieldType::List;

    fn write(&self, writer: &mut ProtocolWriter) {
        writer.write_list_header(T::FIELD_TYPE, self.len());
        for item in self {
            item.write(writer);
        }
    }

    fn read(reader: &mut ProtocolReader) -> WireResult<Self> {
        let (elem_type, count) = reader.read_list_header()?;
        if elem_type != T::FIELD_TYPE {
            element_mismatch(reader, T::FIELD_TYPE, elem_type)?;
            for _ in 0..count {
                reader.skip(elem_type)?;
            }
            return Ok(Vec::new());
        }
        reader.enter()?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::read(reader)?);
        }
        reader.leave();
        Ok(items)
    }
}

impl<K: WireValue + Ord, V: WireValue> WireValue for BTreeMap<K, V> {
    const FIELD_TYPE: FieldType = FieldType::Map;

    fn write(&self, writer: &mut ProtocolWriter) {
        writer.write_map_header(K::FIELD_TYPE, V::FIELD_TYPE, self.len());
        for (key, value) in self {
            key.write(writer);
            value.write(writer);
        }
    }

    fn read(reader: &mut ProtocolReader) -> WireResult<Self> {
        let (key_type, value_type, count) = reader.read_map_header()?;
        if key_type != K::FIELD_TYPE || value_type != V::FIELD_TYPE {
            let (expected, actual) = if key_type != K::FIELD_TYPE {
                (K::FIELD_TYPE, key_type)
            } else {
                (V::FIELD_TYPE, value_type)
            };
            element_mismatch(reader, expected, actual)?;
            for _ in 0..count {
                reader.skip(key_type)?;
                reader.skip(value_type)?;
            }
            return Ok(BTreeMap::new());
        }
        reader.enter()?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let key = K::read(reader)?;
            let value = V::read(reader)?;
            // Duplicate keys: last one wins, same as duplicate tags.
            map.insert(key, value);
        }
        reader.leave();
        Ok(map)
    }
}

/// Container element types disagree with the slot. Lenient readers drop the
/// whole container; strict readers fail.
fn element_mismatch(
    reader: &ProtocolReader,
    expected: FieldType,
    actual: FieldType,
) -> WireResult<()> {
    match reader.mode() {
        DecodeMode::Strict => Err(WireError::TypeMismatch {
            tag: reader.current_tag(),
            expected,
            actual,
        }),
        DecodeMode::Lenient => Ok(()),
    }
}
