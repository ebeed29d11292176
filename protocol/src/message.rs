//! Message contract shared by every request and reply type

use bytes::Bytes;

use crate::error::WireResult;
use crate::reader::{DecodeMode, ProtocolReader};
use crate::writer::ProtocolWriter;

/// A structure with a fixed tag → slot layout.
///
/// Slots absent on the wire keep their `Default` value, so schemas can grow
/// in both directions.
pub trait WireStruct: Default {
    /// Message name for logging
    const NAME: &'static str;

    /// Emit every populated field followed by the stop marker
    fn serialize(&self, writer: &mut ProtocolWriter);

    /// Consume exactly one structure, skipping unknown tags
    fn deserialize(&mut self, reader: &mut ProtocolReader) -> WireResult<()>;

    fn encode(&self) -> Bytes {
        let mut writer = ProtocolWriter::new();
        self.serialize(&mut writer);
        writer.into_bytes()
    }

    fn decode(buf: Bytes) -> WireResult<Self> {
        Self::decode_with(buf, DecodeMode::Strict)
    }

    fn decode_with(buf: Bytes, mode: DecodeMode) -> WireResult<Self> {
        let mut reader = ProtocolReader::with_mode(buf, mode);
        Self::read_from(&mut reader)
    }

    fn read_from(reader: &mut ProtocolReader) -> WireResult<Self> {
        let mut message = Self::default();
        message.deserialize(reader)?;
        Ok(message)
    }
}

/// Lets a `WireStruct` sit in a field slot of another structure
#[macro_export]
macro_rules! struct_value {
    ($ty:ty) => {
        impl $crate::WireValue for $ty {
            const FIELD_TYPE: $crate::FieldType = $crate::FieldType::Struct;

            fn write(&self, writer: &mut $crate::ProtocolWriter) {
                $crate::WireStruct::serialize(self, writer);
            }

            fn read(reader: &mut $crate::ProtocolReader) -> $crate::WireResult<Self> {
                <$ty as $crate::WireStruct>::read_from(reader)
            }
        }
    };
}
