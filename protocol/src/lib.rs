//! kvrelay protocol - tagged binary structures
//!
//! Every request and reply travels as a structure: a sequence of
//! `[type][tag][value]` fields closed by a stop byte. Readers skip tags they
//! do not know and leave missing slots at their defaults, so producers and
//! consumers can evolve their schemas independently.
//!
//! # Layers
//!
//! ```text
//! ┌─────────────────────────┐
//! │   frame                 │  length prefix + envelope (op, request id)
//! └───────────┬─────────────┘
//!             ▼
//! ┌─────────────────────────┐
//! │   messages / envelope   │  Get/Set/Delete request & reply layouts
//! └───────────┬─────────────┘
//!             ▼
//! ┌─────────────────────────┐
//! │   reader / writer       │  field headers, values, type-aware skip
//! └─────────────────────────┘
//! ```
//!
//! # Encoding
//!
//! - field header: type byte, then the tag as an unsigned LEB128 varint
//! - bool / i8: one byte
//! - i16 / i32 / i64: zigzag varint
//! - double: 8 bytes little endian
//! - binary / string: varint length + bytes
//! - list: element type byte, varint count, elements
//! - map: key type byte, value type byte, varint count, pairs
//! - struct: nested fields + stop byte
//!
//! Duplicate tags are accepted; the last occurrence wins.

mod error;
mod field;
mod reader;
mod value;
mod writer;

mod envelope;
mod message;
mod messages;

pub mod frame;

pub use error::{WireError, WireResult};
pub use field::FieldType;
pub use reader::{DecodeMode, ProtocolReader, MAX_NESTING_DEPTH};
pub use value::WireValue;
pub use writer::ProtocolWriter;

pub use envelope::{Envelope, Op, Reply, Request};
pub use message::WireStruct;
pub use messages::{
    DeleteReply, DeleteRequest, GetReply, GetRequest, GoodbyeReply, GoodbyeRequest,
    HelloReply, HelloRequest, ResultCode, SetReply, SetRequest, UnknownCode,
};

pub use bytes::Bytes;
