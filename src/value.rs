use bytes::Bytes;
use std::str;

use crate::frame::Frame;

/// A value held by the store. Anything a client can send as a command argument can be stored,
/// except error frames.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    String(Bytes),
    Integer(i64),
    Array(Vec<Value>),
    Nil,
}

impl Value {
    /// Converts a command argument into a storable value. Returns the frame back when it
    /// cannot be stored.
    pub fn from_frame(frame: Frame) -> Result<Value, Frame> {
        match frame {
            Frame::Simple(s) => Ok(Value::String(Bytes::from(s))),
            Frame::Bulk(bytes) => Ok(Value::String(bytes)),
            Frame::Integer(i) => Ok(Value::Integer(i)),
            Frame::NullBulkString | Frame::NullArray => Ok(Value::Nil),
            Frame::Array(frames) => frames
                .into_iter()
                .map(Value::from_frame)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            frame @ Frame::Error(_) => Err(frame),
        }
    }
}

/// Reply encoding for stored values.
///
/// Strings go out as simple strings, the cheaper framing, unless the simple string framing
/// cannot carry them: a newline, a carriage return, a NUL byte or invalid UTF-8 forces a
/// length-prefixed bulk string.
impl From<Value> for Frame {
    fn from(value: Value) -> Self {
        match value {
            Value::String(bytes) => match simple_string(&bytes) {
                Some(s) => Frame::Simple(s.to_string()),
                None => Frame::Bulk(bytes),
            },
            Value::Integer(i) => Frame::Integer(i),
            Value::Array(values) => Frame::Array(values.into_iter().map(Frame::from).collect()),
            Value::Nil => Frame::NullBulkString,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

fn simple_string(bytes: &[u8]) -> Option<&str> {
    if bytes.iter().any(|b| matches!(b, b'\n' | b'\r' | b'\0')) {
        return None;
    }
    str::from_utf8(bytes).ok()
}
