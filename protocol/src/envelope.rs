//! Routed operations and their envelopes

use std::fmt;

use bytes::Bytes;

use crate::error::{WireError, WireResult};
use crate::message::WireStruct;
use crate::messages::{
    DeleteReply, DeleteRequest, GetReply, GetRequest, ResultCode, SetReply, SetRequest,
};
use crate::reader::ProtocolReader;
use crate::writer::ProtocolWriter;

/// Operation code carried in every envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum Op {
    Get = 1,
    Set = 2,
    Delete = 3,
}

impl Op {
    pub fn from_i16(code: i16) -> WireResult<Self> {
        match code {
            1 => Ok(Op::Get),
            2 => Ok(Op::Set),
            3 => Ok(Op::Delete),
            other => Err(WireError::UnknownOp(other)),
        }
    }

    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Get => write!(f, "get"),
            Op::Set => write!(f, "set"),
            Op::Delete => write!(f, "delete"),
        }
    }
}

/// Header structure preceding every message on a socket
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    pub op: i16,
    pub request_id: u64,
}

impl WireStruct for Envelope {
    const NAME: &'static str = "envelope";

    fn serialize(&self, writer: &mut ProtocolWriter) {
        writer.write_struct_begin();
        writer.write_field(1, &self.op);
        writer.write_field(2, &self.request_id);
        writer.write_struct_end();
        writer.write_stop();
    }

    fn deserialize(&mut self, reader: &mut ProtocolReader) -> WireResult<()> {
        reader.read_struct_fields(|r, tag, ty| match tag {
            1 => r.read_field(tag, ty, &mut self.op),
            2 => r.read_field(tag, ty, &mut self.request_id),
            _ => r.skip(ty),
        })
    }
}

/// Any request the router can dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Get(GetRequest),
    Set(SetRequest),
    Delete(DeleteRequest),
}

impl Request {
    pub fn get(key: impl Into<String>) -> Self {
        Request::Get(GetRequest::new(key))
    }

    pub fn set(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Request::Set(SetRequest::new(key, value))
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Request::Delete(DeleteRequest::new(key))
    }

    pub fn op(&self) -> Op {
        match self {
            Request::Get(_) => Op::Get,
            Request::Set(_) => Op::Set,
            Request::Delete(_) => Op::Delete,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Request::Get(req) => &req.key,
            Request::Set(req) => &req.key,
            Request::Delete(req) => &req.key,
        }
    }

    /// Copy of this request addressed with a different key
    pub fn with_key(&self, key: &str) -> Self {
        let mut routed = self.clone();
        match &mut routed {
            Request::Get(req) => req.key = key.to_string(),
            Request::Set(req) => req.key = key.to_string(),
            Request::Delete(req) => req.key = key.to_string(),
        }
        routed
    }

    pub fn serialize(&self, writer: &mut ProtocolWriter) {
        match self {
            Request::Get(req) => req.serialize(writer),
            Request::Set(req) => req.serialize(writer),
            Request::Delete(req) => req.serialize(writer),
        }
    }

    pub fn read_from(op: Op, reader: &mut ProtocolReader) -> WireResult<Self> {
        Ok(match op {
            Op::Get => Request::Get(GetRequest::read_from(reader)?),
            Op::Set => Request::Set(SetRequest::read_from(reader)?),
            Op::Delete => Request::Delete(DeleteRequest::read_from(reader)?),
        })
    }
}

/// Any reply the router can deliver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Get(GetReply),
    Set(SetReply),
    Delete(DeleteReply),
}

impl Reply {
    /// A payload-free reply of the right shape for `op`
    pub fn for_op(op: Op, result: ResultCode) -> Self {
        match op {
            Op::Get => Reply::Get(GetReply::with_result(result)),
            Op::Set => Reply::Set(SetReply { result }),
            Op::Delete => Reply::Delete(DeleteReply { result }),
        }
    }

    pub fn op(&self) -> Op {
        match self {
            Reply::Get(_) => Op::Get,
            Reply::Set(_) => Op::Set,
            Reply::Delete(_) => Op::Delete,
        }
    }

    pub fn result(&self) -> ResultCode {
        match self {
            Reply::Get(reply) => reply.result,
            Reply::Set(reply) => reply.result,
            Reply::Delete(reply) => reply.result,
        }
    }

    pub fn serialize(&self, writer: &mut ProtocolWriter) {
        match self {
            Reply::Get(reply) => reply.serialize(writer),
            Reply::Set(reply) => reply.serialize(writer),
            Reply::Delete(reply) => reply.serialize(writer),
        }
    }

    pub fn read_from(op: Op, reader: &mut ProtocolReader) -> WireResult<Self> {
        Ok(match op {
            Op::Get => Reply::Get(GetReply::read_from(reader)?),
            Op::Set => Reply::Set(SetReply::read_from(reader)?),
            Op::Delete => Reply::Delete(DeleteReply::read_from(reader)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_key_keeps_payload() {
        let req = Request::set("/a/b/foo", &b"bar"[..]);
        let routed = req.with_key("foo");
        assert_eq!(routed.key(), "foo");
        match routed {
            Request::Set(set) => assert_eq!(&set.value[..], b"bar"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_reply_for_op_shape() {
        assert_eq!(Reply::for_op(Op::Delete, ResultCode::Timeout).op(), Op::Delete);
        assert_eq!(
            Reply::for_op(Op::Get, ResultCode::Busy).result(),
            ResultCode::Busy
        );
    }

    #[test]
    fn test_unknown_op() {
        assert_eq!(Op::from_i16(99), Err(WireError::UnknownOp(99)));
    }
}
