//! Concrete request and reply types
//!
//! Tag layouts (stable across versions):
//!
//! | Type            | Tags                                                    |
//! |-----------------|---------------------------------------------------------|
//! | GetRequest      | 1 key, 2 shard_id                                       |
//! | GetReply        | 1 result, 2 value (optional), 3 flags                   |
//! | SetRequest      | 1 key, 2 value, 3 flags, 4 exptime                      |
//! | SetReply        | 1 result                                                |
//! | DeleteRequest   | 1 key                                                   |
//! | DeleteReply     | 1 result                                                |
//! | HelloRequest    | 1 key, 2 shard_id                                       |
//! | HelloReply      | 1 result                                                |
//! | GoodbyeRequest  | 1 key, 2 shard_id                                       |
//! | GoodbyeReply    | 1 result, 2 message                                     |

use std::fmt;

use bytes::Bytes;

use crate::error::WireResult;
use crate::field::FieldType;
use crate::message::WireStruct;
use crate::reader::ProtocolReader;
use crate::value::WireValue;
use crate::writer::ProtocolWriter;

/// Outcome carried by every reply. Travels as i16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResultCode {
    /// Field absent on the wire
    #[default]
    Unknown,
    Ok,
    NotFound,
    Stored,
    NotStored,
    Deleted,
    /// Backend did not answer within the configured timeout
    Timeout,
    ConnectError,
    RemoteError,
    /// Rejected before leaving the router (e.g. malformed key)
    LocalError,
    /// Client exceeded its outstanding request limit
    Busy,
    /// Code from a newer producer, kept verbatim
    Other(UnknownCode),
}

/// A result code this build has no name for.
///
/// Only [`ResultCode::from_i16`] constructs one, so it never aliases a
/// named code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnknownCode(i16);

impl UnknownCode {
    pub fn get(self) -> i16 {
        self.0
    }
}

impl ResultCode {
    pub fn from_i16(code: i16) -> Self {
        match code {
            0 => ResultCode::Unknown,
            1 => ResultCode::Ok,
            2 => ResultCode::NotFound,
            3 => ResultCode::Stored,
            4 => ResultCode::NotStored,
            5 => ResultCode::Deleted,
            6 => ResultCode::Timeout,
            7 => ResultCode::ConnectError,
            8 => ResultCode::RemoteError,
            9 => ResultCode::LocalError,
            10 => ResultCode::Busy,
            other => ResultCode::Other(UnknownCode(other)),
        }
    }

    pub fn as_i16(self) -> i16 {
        match self {
            ResultCode::Unknown => 0,
            ResultCode::Ok => 1,
            ResultCode::NotFound => 2,
            ResultCode::Stored => 3,
            ResultCode::NotStored => 4,
            ResultCode::Deleted => 5,
            ResultCode::Timeout => 6,
            ResultCode::ConnectError => 7,
            ResultCode::RemoteError => 8,
            ResultCode::LocalError => 9,
            ResultCode::Busy => 10,
            ResultCode::Other(code) => code.get(),
        }
    }

    /// Whether the request failed rather than produced an answer
    pub fn is_error(self) -> bool {
        matches!(
            self,
            ResultCode::Timeout
                | ResultCode::ConnectError
                | ResultCode::RemoteError
                | ResultCode::LocalError
                | ResultCode::Busy
        )
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCode::Other(code) => write!(f, "other({})", code.get()),
            known => write!(f, "{}", format!("{known:?}").to_lowercase()),
        }
    }
}

impl WireValue for ResultCode {
    const FIELD_TYPE: FieldType = FieldType::I16;

    fn write(&self, writer: &mut ProtocolWriter) {
        writer.write_i16(self.as_i16());
    }

    fn read(reader: &mut ProtocolReader) -> WireResult<Self> {
        Ok(ResultCode::from_i16(reader.read_i16()?))
    }
}

/// Lookup by key
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GetRequest {
    pub key: String,
    pub shard_id: i32,
}

impl GetRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            shard_id: 0,
        }
    }
}

impl WireStruct for GetRequest {
    const NAME: &'static str = "get";

    fn serialize(&self, writer: &mut ProtocolWriter) {
        writer.write_struct_begin();
        writer.write_field(1, &self.key);
        writer.write_field(2, &self.shard_id);
        writer.write_struct_end();
        writer.write_stop();
    }

    fn deserialize(&mut self, reader: &mut ProtocolReader) -> WireResult<()> {
        reader.read_struct_fields(|r, tag, ty| match tag {
            1 => r.read_field(tag, ty, &mut self.key),
            2 => r.read_field(tag, ty, &mut self.shard_id),
            _ => r.skip(ty),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GetReply {
    pub result: ResultCode,
    pub value: Option<Bytes>,
    pub flags: u64,
}

impl GetReply {
    pub fn hit(value: impl Into<Bytes>, flags: u64) -> Self {
        Self {
            result: ResultCode::Ok,
            value: Some(value.into()),
            flags,
        }
    }

    pub fn with_result(result: ResultCode) -> Self {
        Self {
            result,
            ..Self::default()
        }
    }
}

impl WireStruct for GetReply {
    const NAME: &'static str = "get_reply";

    fn serialize(&self, writer: &mut ProtocolWriter) {
        writer.write_struct_begin();
        writer.write_field(1, &self.result);
        writer.write_optional_field(2, &self.value);
        if self.flags != 0 {
            writer.write_field(3, &self.flags);
        }
        writer.write_struct_end();
        writer.write_stop();
    }

    fn deserialize(&mut self, reader: &mut ProtocolReader) -> WireResult<()> {
        reader.read_struct_fields(|r, tag, ty| match tag {
            1 => r.read_field(tag, ty, &mut self.result),
            2 => r.read_optional_field(tag, ty, &mut self.value),
            3 => r.read_field(tag, ty, &mut self.flags),
            _ => r.skip(ty),
        })
    }
}

/// Store a value under a key
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SetRequest {
    pub key: String,
    pub value: Bytes,
    pub flags: u64,
    /// Expiry in seconds, 0 = never
    pub exptime: i32,
}

impl SetRequest {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Self::default()
        }
    }
}

impl WireStruct for SetRequest {
    const NAME: &'static str = "set";

    fn serialize(&self, writer: &mut ProtocolWriter) {
        writer.write_struct_begin();
        writer.write_field(1, &self.key);
        writer.write_field(2, &self.value);
        writer.write_field(3, &self.flags);
        writer.write_field(4, &self.exptime);
        writer.write_struct_end();
        writer.write_stop();
    }

    fn deserialize(&mut self, reader: &mut ProtocolReader) -> WireResult<()> {
        reader.read_struct_fields(|r, tag, ty| match tag {
            1 => r.read_field(tag, ty, &mut self.key),
            2 => r.read_field(tag, ty, &mut self.value),
            3 => r.read_field(tag, ty, &mut self.flags),
            4 => r.read_field(tag, ty, &mut self.exptime),
            _ => r.skip(ty),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SetReply {
    pub result: ResultCode,
}

impl WireStruct for SetReply {
    const NAME: &'static str = "set_reply";

    fn serialize(&self, writer: &mut ProtocolWriter) {
        writer.write_struct_begin();
        writer.write_field(1, &self.result);
        writer.write_struct_end();
        writer.write_stop();
    }

    fn deserialize(&mut self, reader: &mut ProtocolReader) -> WireResult<()> {
        reader.read_struct_fields(|r, tag, ty| match tag {
            1 => r.read_field(tag, ty, &mut self.result),
            _ => r.skip(ty),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeleteRequest {
    pub key: String,
}

impl DeleteRequest {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl WireStruct for DeleteRequest {
    const NAME: &'static str = "delete";

    fn serialize(&self, writer: &mut ProtocolWriter) {
        writer.write_struct_begin();
        writer.write_field(1, &self.key);
        writer.write_struct_end();
        writer.write_stop();
    }

    fn deserialize(&mut self, reader: &mut ProtocolReader) -> WireResult<()> {
        reader.read_struct_fields(|r, tag, ty| match tag {
            1 => r.read_field(tag, ty, &mut self.key),
            _ => r.skip(ty),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeleteReply {
    pub result: ResultCode,
}

impl WireStruct for DeleteReply {
    const NAME: &'static str = "delete_reply";

    fn serialize(&self, writer: &mut ProtocolWriter) {
        writer.write_struct_begin();
        writer.write_field(1, &self.result);
        writer.write_struct_end();
        writer.write_stop();
    }

    fn deserialize(&mut self, reader: &mut ProtocolReader) -> WireResult<()> {
        reader.read_struct_fields(|r, tag, ty| match tag {
            1 => r.read_field(tag, ty, &mut self.result),
            _ => r.skip(ty),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HelloRequest {
    pub key: String,
    pub shard_id: i32,
}

impl WireStruct for HelloRequest {
    const NAME: &'static str = "hello";

    fn serialize(&self, writer: &mut ProtocolWriter) {
        writer.write_struct_begin();
        writer.write_field(1, &self.key);
        writer.write_field(2, &self.shard_id);
        writer.write_struct_end();
        writer.write_stop();
    }

    fn deserialize(&mut self, reader: &mut ProtocolReader) -> WireResult<()> {
        reader.read_struct_fields(|r, tag, ty| match tag {
            1 => r.read_field(tag, ty, &mut self.key),
            2 => r.read_field(tag, ty, &mut self.shard_id),
            _ => r.skip(ty),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HelloReply {
    pub result: ResultCode,
}

impl WireStruct for HelloReply {
    const NAME: &'static str = "hello_reply";

    fn serialize(&self, writer: &mut ProtocolWriter) {
        writer.write_struct_begin();
        writer.write_field(1, &self.result);
        writer.write_struct_end();
        writer.write_stop();
    }

    fn deserialize(&mut self, reader: &mut ProtocolReader) -> WireResult<()> {
        reader.read_struct_fields(|r, tag, ty| match tag {
            1 => r.read_field(tag, ty, &mut self.result),
            _ => r.skip(ty),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GoodbyeRequest {
    pub key: String,
    pub shard_id: i32,
}

impl WireStruct for GoodbyeRequest {
    const NAME: &'static str = "goodbye";

    fn serialize(&self, writer: &mut ProtocolWriter) {
        writer.write_struct_begin();
        writer.write_field(1, &self.key);
        writer.write_field(2, &self.shard_id);
        writer.write_struct_end();
        writer.write_stop();
    }

    fn deserialize(&mut self, reader: &mut ProtocolReader) -> WireResult<()> {
        reader.read_struct_fields(|r, tag, ty| match tag {
            1 => r.read_field(tag, ty, &mut self.key),
            2 => r.read_field(tag, ty, &mut self.shard_id),
            _ => r.skip(ty),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GoodbyeReply {
    pub result: ResultCode,
    pub message: String,
}

impl WireStruct for GoodbyeReply {
    const NAME: &'static str = "goodbye_reply";

    fn serialize(&self, writer: &mut ProtocolWriter) {
        writer.write_struct_begin();
        writer.write_field(1, &self.result);
        writer.write_field(2, &self.message);
        writer.write_struct_end();
        writer.write_stop();
    }

    fn deserialize(&mut self, reader: &mut ProtocolReader) -> WireResult<()> {
        reader.read_struct_fields(|r, tag, ty| match tag {
            1 => r.read_field(tag, ty, &mut self.result),
            2 => r.read_field(tag, ty, &mut self.message),
            _ => r.skip(ty),
        })
    }
}

crate::struct_value!(GetRequest);
crate::struct_value!(GetReply);
crate::struct_value!(SetRequest);
crate::struct_value!(SetReply);
crate::struct_value!(DeleteRequest);
crate::struct_value!(DeleteReply);
