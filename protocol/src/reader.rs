//! Protocol reader
//!
//! Reads structures back field by field. Each structure is a loop over
//! `read_field_header` until the stop marker; known tags go through
//! `read_field`, anything else through `skip`.
//!
//! ```text
//!   read_struct_begin
//!          │
//!          ▼
//!   read_field_header ──Stop──► read_struct_end
//!          │
//!    known tag? ──No──► skip(type) ──┐
//!          │Yes                      │
//!          ▼                         │
//!   read_field(tag, type, slot) ─────┴──► (loop)
//! ```

use bytes::{Buf, Bytes};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{WireError, WireResult};
use crate::field::FieldType;
use crate::value::WireValue;

/// Maximum nesting of structures, lists and maps
pub const MAX_NESTING_DEPTH: usize = 64;

/// How a declared wire type that disagrees with the slot's type is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeMode {
    /// Fail the whole decode with a type mismatch
    #[default]
    Strict,
    /// Skip the field and keep the slot's default
    Lenient,
}

/// Deserializes structures from the tagged binary format
#[derive(Debug)]
pub struct ProtocolReader {
    buf: Bytes,
    mode: DecodeMode,
    depth: usize,
    current_tag: u16,
}

impl ProtocolReader {
    pub fn new(buf: Bytes) -> Self {
        Self::with_mode(buf, DecodeMode::default())
    }

    pub fn with_mode(buf: Bytes, mode: DecodeMode) -> Self {
        Self {
            buf,
            mode,
            depth: 0,
            current_tag: 0,
        }
    }

    pub fn mode(&self) -> DecodeMode {
        self.mode
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Hand back whatever has not been consumed
    pub fn into_remaining(self) -> Bytes {
        self.buf
    }

    pub fn read_struct_begin(&mut self) -> WireResult<()> {
        self.enter()
    }

    pub fn read_struct_end(&mut self) -> WireResult<()> {
        self.leave();
        Ok(())
    }

    /// Reads the next field header. For the stop marker the tag is 0.
    pub fn read_field_header(&mut self) -> WireResult<(FieldType, u16)> {
        let field_type = FieldType::from_u8(self.read_u8()?)?;
        if field_type == FieldType::Stop {
            return Ok((FieldType::Stop, 0));
        }
        let tag = self.read_varint()?;
        let tag = u16::try_from(tag).map_err(|_| WireError::VarintOverflow)?;
        Ok((field_type, tag))
    }

    /// Runs the field loop of one structure.
    ///
    /// `on_field` sees every field before the stop marker and either reads
    /// it into a slot or skips it. Duplicate tags are handed over again, so
    /// the last occurrence wins.
    pub fn read_struct_fields<F>(&mut self, mut on_field: F) -> WireResult<()>
    where
        F: FnMut(&mut Self, u16, FieldType) -> WireResult<()>,
    {
        self.read_struct_begin()?;
        loop {
            let (field_type, tag) = self.read_field_header()?;
            if field_type == FieldType::Stop {
                break;
            }
            on_field(self, tag, field_type)?;
        }
        self.read_struct_end()
    }

    /// Reads a known field into its slot.
    ///
    /// The declared type must equal the slot's type. On mismatch strict mode
    /// fails and lenient mode skips the value, leaving the slot untouched.
    pub fn read_field<T: WireValue>(
        &mut self,
        tag: u16,
        field_type: FieldType,
        slot: &mut T,
    ) -> WireResult<()> {
        if field_type != T::FIELD_TYPE {
            return self.mismatch(tag, T::FIELD_TYPE, field_type);
        }
        self.current_tag = tag;
        *slot = T::read(self)?;
        Ok(())
    }

    /// Like `read_field` for slots that are absent unless sent
    pub fn read_optional_field<T: WireValue>(
        &mut self,
        tag: u16,
        field_type: FieldType,
        slot: &mut Option<T>,
    ) -> WireResult<()> {
        if field_type != T::FIELD_TYPE {
            return self.mismatch(tag, T::FIELD_TYPE, field_type);
        }
        self.current_tag = tag;
        *slot = Some(T::read(self)?);
        Ok(())
    }

    fn mismatch(&mut self, tag: u16, expected: FieldType, actual: FieldType) -> WireResult<()> {
        match self.mode {
            DecodeMode::Strict => Err(WireError::TypeMismatch { tag, expected, actual }),
            DecodeMode::Lenient => {
                trace!(tag, %expected, %actual, "Skipping field with mismatched type");
                self.skip(actual)
            }
        }
    }

    /// Consumes exactly the bytes of one value of the given type
    pub fn skip(&mut self, field_type: FieldType) -> WireResult<()> {
        match field_type {
            FieldType::Stop => Err(WireError::UnknownFieldType(FieldType::Stop.as_u8())),
            FieldType::Bool | FieldType::I8 => self.advance(1),
            FieldType::I16 | FieldType::I32 | FieldType::I64 => self.read_varint().map(|_| ()),
            FieldType::Double => self.advance(8),
            FieldType::Binary => {
                let len = self.read_len()?;
                self.advance(len)
            }
            FieldType::List => {
                let (elem_type, count) = self.read_list_header()?;
                self.enter()?;
                for _ in 0..count {
                    self.skip(elem_type)?;
                }
                self.leave();
                Ok(())
            }
            FieldType::Map => {
                let (key_type, value_type, count) = self.read_map_header()?;
                self.enter()?;
                for _ in 0..count {
                    self.skip(key_type)?;
                    self.skip(value_type)?;
                }
                self.leave();
                Ok(())
            }
            FieldType::Struct => {
                // No length to seek by: walk every nested field.
                self.read_struct_begin()?;
                loop {
                    let (nested_type, _) = self.read_field_header()?;
                    if nested_type == FieldType::Stop {
                        break;
                    }
                    self.skip(nested_type)?;
                }
                self.read_struct_end()
            }
        }
    }

    pub fn read_bool(&mut self) -> WireResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i8(&mut self) -> WireResult<i8> {
        self.ensure(1)?;
        Ok(self.buf.get_i8())
    }

    pub fn read_i16(&mut self) -> WireResult<i16> {
        i16::try_from(self.read_zigzag()?).map_err(|_| WireError::VarintOverflow)
    }

    pub fn read_i32(&mut self) -> WireResult<i32> {
        i32::try_from(self.read_zigzag()?).map_err(|_| WireError::VarintOverflow)
    }

    pub fn read_i64(&mut self) -> WireResult<i64> {
        self.read_zigzag()
    }

    pub fn read_double(&mut self) -> WireResult<f64> {
        self.ensure(8)?;
        Ok(self.buf.get_f64_le())
    }

    /// Returns a view into the input buffer without copying
    pub fn read_binary(&mut self) -> WireResult<Bytes> {
        let len = self.read_len()?;
        self.ensure(len)?;
        Ok(self.buf.split_to(len))
    }

    pub fn read_string(&mut self) -> WireResult<String> {
        let raw = self.read_binary()?;
        String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidUtf8(self.current_tag))
    }

    pub fn read_list_header(&mut self) -> WireResult<(FieldType, usize)> {
        let elem_type = self.read_container_type()?;
        let count = self.read_len()?;
        Ok((elem_type, count))
    }

    pub fn read_map_header(&mut self) -> WireResult<(FieldType, FieldType, usize)> {
        let key_type = self.read_container_type()?;
        let value_type = self.read_container_type()?;
        let count = self.read_len()?;
        Ok((key_type, value_type, count))
    }

    pub fn read_varint(&mut self) -> WireResult<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift == 63 && byte > 1 {
                return Err(WireError::VarintOverflow);
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift > 63 {
                return Err(WireError::VarintOverflow);
            }
        }
    }

    pub(crate) fn enter(&mut self) -> WireResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(WireError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub(crate) fn current_tag(&self) -> u16 {
        self.current_tag
    }

    fn read_container_type(&mut self) -> WireResult<FieldType> {
        match FieldType::from_u8(self.read_u8()?)? {
            FieldType::Stop => Err(WireError::UnknownFieldType(FieldType::Stop.as_u8())),
            other => Ok(other),
        }
    }

    /// Length or element count. Every value occupies at least one byte, so a
    /// count larger than the remaining input can only be a truncated stream.
    fn read_len(&mut self) -> WireResult<usize> {
        let len = self.read_varint()?;
        let len = usize::try_from(len).map_err(|_| WireError::VarintOverflow)?;
        if len > self.buf.remaining() {
            return Err(WireError::Truncated {
                needed: len,
                remaining: self.buf.remaining(),
            });
        }
        Ok(len)
    }

    fn read_zigzag(&mut self) -> WireResult<i64> {
        let raw = self.read_varint()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    fn read_u8(&mut self) -> WireResult<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    fn advance(&mut self, len: usize) -> WireResult<()> {
        self.ensure(len)?;
        self.buf.advance(len);
        Ok(())
    }

    fn ensure(&self, needed: usize) -> WireResult<()> {
        if self.buf.remaining() < needed {
            return Err(WireError::Truncated {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }
}
