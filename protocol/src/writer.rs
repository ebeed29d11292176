//! Protocol writer
//!
//! Appends fields to a growable buffer. A structure is written as
//! `write_struct_begin`, one `write_field` per populated slot,
//! `write_struct_end` and finally `write_stop`.

use bytes::{BufMut, Bytes, BytesMut};

use crate::field::FieldType;
use crate::value::WireValue;

/// Serializes structures into the tagged binary format
#[derive(Debug, Default)]
pub struct ProtocolWriter {
    buf: BytesMut,
    depth: usize,
}

impl ProtocolWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            depth: 0,
        }
    }

    /// Marks the start of a structure. Produces no bytes.
    pub fn write_struct_begin(&mut self) {
        self.depth += 1;
    }

    /// Marks the end of a structure's fields. Must be followed by `write_stop`.
    pub fn write_struct_end(&mut self) {
        debug_assert!(self.depth > 0, "write_struct_end without write_struct_begin");
        self.depth = self.depth.saturating_sub(1);
    }

    /// Appends the stop marker terminating the current structure
    pub fn write_stop(&mut self) {
        self.buf.put_u8(FieldType::Stop.as_u8());
    }

    /// Appends a complete field: type byte, tag and value
    pub fn write_field<T: WireValue>(&mut self, tag: u16, value: &T) {
        self.write_field_header(T::FIELD_TYPE, tag);
        value.write(self);
    }

    /// Appends the field only when a value is present
    pub fn write_optional_field<T: WireValue>(&mut self, tag: u16, value: &Option<T>) {
        if let Some(value) = value {
            self.write_field(tag, value);
        }
    }

    pub fn write_field_header(&mut self, field_type: FieldType, tag: u16) {
        debug_assert!(field_type != FieldType::Stop, "use write_stop for the stop marker");
        debug_assert!(tag != 0, "tag 0 is reserved");
        self.buf.put_u8(field_type.as_u8());
        self.write_varint(u64::from(tag));
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn write_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.write_varint(zigzag_encode(i64::from(value)));
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_varint(zigzag_encode(i64::from(value)));
    }

    pub fn write_i64(&mut self, value: i64) {
        self.write_varint(zigzag_encode(value));
    }

    pub fn write_double(&mut self, value: f64) {
        self.buf.put_f64_le(value);
    }

    pub fn write_binary(&mut self, value: &[u8]) {
        self.write_varint(value.len() as u64);
        self.buf.put_slice(value);
    }

    pub fn write_list_header(&mut self, elem_type: FieldType, len: usize) {
        self.buf.put_u8(elem_type.as_u8());
        self.write_varint(len as u64);
    }

    pub fn write_map_header(&mut self, key_type: FieldType, value_type: FieldType, len: usize) {
        self.buf.put_u8(key_type.as_u8());
        self.buf.put_u8(value_type.as_u8());
        self.write_varint(len as u64);
    }

    /// Unsigned LEB128
    pub fn write_varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.put_u8((value as u8 & 0x7f) | 0x80);
            value >>= 7;
        }
        self.buf.put_u8(value as u8);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Access the underlying buffer, e.g. to patch a length prefix
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn into_bytes(self) -> Bytes {
        debug_assert_eq!(self.depth, 0, "unbalanced struct begin/end");
        self.buf.freeze()
    }
}

pub(crate) fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_struct_is_single_stop() {
        let mut w = ProtocolWriter::new();
        w.write_struct_begin();
        w.write_struct_end();
        w.write_stop();
        assert_eq!(&w.into_bytes()[..], &[0u8]);
    }

    #[test]
    fn test_field_header_layout() {
        let mut w = ProtocolWriter::new();
        w.write_field(300, &true);
        // type, varint(300) = 0xac 0x02, value
        assert_eq!(&w.into_bytes()[..], &[1, 0xac, 0x02, 1]);
    }

    #[test]
    fn test_zigzag() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(i64::MIN), u64::MAX);
    }

    #[test]
    fn test_none_optional_writes_nothing() {
        let mut w = ProtocolWriter::new();
        w.write_optional_field::<i32>(1, &None);
        assert!(w.is_empty());
    }
}
