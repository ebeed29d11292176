//! Length-prefixed frames
//!
//! ```text
//! ┌──────────────┬────────────────┬──────────────────┐
//! │ u32 BE len   │ Envelope struct│ message struct   │
//! └──────────────┴────────────────┴──────────────────┘
//!                 └──────────── len bytes ──────────┘
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::envelope::{Envelope, Op, Reply, Request};
use crate::error::{WireError, WireResult};
use crate::message::WireStruct;
use crate::messages::ResultCode;
use crate::reader::{DecodeMode, ProtocolReader};
use crate::writer::ProtocolWriter;

/// Default upper bound on a single frame body
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// A complete frame whose message body has not been decoded yet.
///
/// The frame boundary is known even when the envelope is unusable, so a
/// frame with an unknown op or a rejected envelope still carries its id.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Raw operation code from the envelope
    pub op: i16,
    pub request_id: u64,
    pub body: Bytes,
    envelope_error: Option<WireError>,
}

impl Frame {
    pub fn op(&self) -> WireResult<Op> {
        match &self.envelope_error {
            Some(err) => Err(err.clone()),
            None => Op::from_i16(self.op),
        }
    }

    pub fn into_request(self, mode: DecodeMode) -> WireResult<Request> {
        let op = self.op()?;
        let mut reader = ProtocolReader::with_mode(self.body, mode);
        Request::read_from(op, &mut reader)
    }

    pub fn into_reply(self, mode: DecodeMode) -> WireResult<Reply> {
        let op = self.op()?;
        let mut reader = ProtocolReader::with_mode(self.body, mode);
        Reply::read_from(op, &mut reader)
    }
}

pub fn encode_request(request_id: u64, request: &Request) -> Bytes {
    encode_with(request.op().as_i16(), request_id, |w| request.serialize(w))
}

pub fn encode_reply(request_id: u64, reply: &Reply) -> Bytes {
    encode_with(reply.op().as_i16(), request_id, |w| reply.serialize(w))
}

/// Encodes a reply that carries only a result code.
///
/// Every reply keeps its result at tag 1, so this answers frames whose
/// operation could not be decoded.
pub fn encode_result(op: i16, request_id: u64, result: ResultCode) -> Bytes {
    encode_with(op, request_id, |w| {
        w.write_struct_begin();
        w.write_field(1, &result);
        w.write_struct_end();
        w.write_stop();
    })
}

fn encode_with(op: i16, request_id: u64, body: impl FnOnce(&mut ProtocolWriter)) -> Bytes {
    let mut writer = ProtocolWriter::with_capacity(64);
    writer.buffer_mut().put_u32(0);
    Envelope { op, request_id }.serialize(&mut writer);
    body(&mut writer);

    let len = (writer.len() - LEN_PREFIX) as u32;
    writer.buffer_mut()[..LEN_PREFIX].copy_from_slice(&len.to_be_bytes());
    writer.into_bytes()
}

/// Splits frames off a read buffer
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    max_frame_size: usize,
    mode: DecodeMode,
}

impl FrameDecoder {
    pub fn new(max_frame_size: usize, mode: DecodeMode) -> Self {
        Self {
            max_frame_size,
            mode,
        }
    }

    pub fn mode(&self) -> DecodeMode {
        self.mode
    }

    /// Returns `Ok(None)` until a whole frame is buffered
    pub fn decode(&self, buf: &mut BytesMut) -> WireResult<Option<Frame>> {
        if buf.len() < LEN_PREFIX {
            return Ok(None);
        }
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len > self.max_frame_size {
            return Err(WireError::FrameTooLarge {
                size: len,
                limit: self.max_frame_size,
            });
        }
        if buf.len() < LEN_PREFIX + len {
            buf.reserve(LEN_PREFIX + len - buf.len());
            return Ok(None);
        }

        buf.advance(LEN_PREFIX);
        let body = buf.split_to(len).freeze();
        let mut reader = ProtocolReader::with_mode(body.clone(), self.mode);
        let (envelope, envelope_error) = match Envelope::read_from(&mut reader) {
            Ok(envelope) => (envelope, None),
            Err(err) if err.is_desync() => return Err(err),
            Err(err) => {
                // Re-read to recover the id; the field layout is intact.
                reader = ProtocolReader::with_mode(body, DecodeMode::Lenient);
                (Envelope::read_from(&mut reader)?, Some(err))
            }
        };
        Ok(Some(Frame {
            op: envelope.op,
            request_id: envelope.request_id,
            body: reader.into_remaining(),
            envelope_error,
        }))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE, DecodeMode::Strict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{GetReply, SetReply};

    #[test]
    fn test_partial_frame_waits() {
        let encoded = encode_request(7, &Request::get("foo"));
        let decoder = FrameDecoder::default();

        let mut buf = BytesMut::from(&encoded[..encoded.len() - 1]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&encoded[encoded.len() - 1..]);
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.request_id, 7);
        assert_eq!(frame.op().unwrap(), Op::Get);
        assert!(buf.is_empty());
        assert_eq!(frame.into_request(DecodeMode::Strict).unwrap(), Request::get("foo"));
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_request(1, &Request::delete("a")));
        let reply = Reply::Get(GetReply::hit(&b"v"[..], 3));
        buf.extend_from_slice(&encode_reply(2, &reply));

        let decoder = FrameDecoder::default();
        let first = decoder.decode(&mut buf).unwrap().unwrap();
        let second = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.request_id, 1);
        assert_eq!(second.into_reply(DecodeMode::Strict).unwrap(), reply);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let decoder = FrameDecoder::new(8, DecodeMode::Strict);
        let mut buf = BytesMut::from(&encode_request(1, &Request::get("a-long-key"))[..]);
        let err = decoder.decode(&mut buf).unwrap_err();
        assert!(err.is_desync());
    }

    #[test]
    fn test_truncated_body_is_desync() {
        let encoded = encode_reply(9, &Reply::for_op(Op::Set, ResultCode::Stored));
        // Claim one byte less than written: the message loses its stop marker.
        let mut raw = BytesMut::from(&encoded[..]);
        let len = (encoded.len() - LEN_PREFIX - 1) as u32;
        raw[..LEN_PREFIX].copy_from_slice(&len.to_be_bytes());
        raw.truncate(encoded.len() - 1);

        let frame = FrameDecoder::default().decode(&mut raw).unwrap().unwrap();
        let err = frame.into_reply(DecodeMode::Strict).unwrap_err();
        assert!(err.is_desync());
    }

    #[test]
    fn test_unknown_op_keeps_frame_boundary() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_result(42, 5, ResultCode::Ok));
        buf.extend_from_slice(&encode_request(6, &Request::get("next")));

        let decoder = FrameDecoder::default();
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.request_id, 5);
        assert_eq!(frame.op().unwrap_err(), WireError::UnknownOp(42));
        assert_eq!(frame.into_request(DecodeMode::Strict).unwrap_err(), WireError::UnknownOp(42));

        let next = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(next.into_request(DecodeMode::Strict).unwrap(), Request::get("next"));
    }

    #[test]
    fn test_envelope_type_mismatch_keeps_request_id() {
        let mut writer = ProtocolWriter::new();
        writer.buffer_mut().put_u32(0);
        writer.write_struct_begin();
        writer.write_field(1, &1i64);
        writer.write_field(2, &11u64);
        writer.write_struct_end();
        writer.write_stop();
        SetReply { result: ResultCode::Stored }.serialize(&mut writer);
        let len = (writer.len() - LEN_PREFIX) as u32;
        writer.buffer_mut()[..LEN_PREFIX].copy_from_slice(&len.to_be_bytes());
        let mut buf = BytesMut::from(&writer.into_bytes()[..]);

        let frame = FrameDecoder::default().decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());
        assert_eq!(frame.request_id, 11);
        let err = frame.into_reply(DecodeMode::Strict).unwrap_err();
        assert!(matches!(err, WireError::TypeMismatch { tag: 1, .. }));
        assert!(!err.is_desync());
    }

    #[test]
    fn test_encode_result_reads_as_any_reply() {
        let mut buf = BytesMut::from(&encode_result(Op::Set.as_i16(), 3, ResultCode::LocalError)[..]);
        let frame = FrameDecoder::default().decode(&mut buf).unwrap().unwrap();
        assert_eq!(
            frame.into_reply(DecodeMode::Strict).unwrap(),
            Reply::for_op(Op::Set, ResultCode::LocalError)
        );
    }
}
