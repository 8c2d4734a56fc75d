// https://redis.io/docs/reference/protocol-spec

use std::fmt;

use bytes::Buf;
use bytes::Bytes;
use std::io::Cursor;
use thiserror::Error as ThisError;

static CRLF: &[u8; 2] = b"\r\n";

// Upper bound for the array capacity reserved up front. The declared count comes from the
// client, so it is not trusted for allocation.
const MAX_PREALLOCATED_ELEMENTS: usize = 1024;

/// Deepest array nesting accepted from a client.
pub const MAX_NESTING_DEPTH: usize = 512;

#[derive(Debug, ThisError, PartialEq)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("invalid frame data type: {0}")]
    InvalidDataType(u8),
    #[error("protocol error; invalid length {0:?}")]
    InvalidLength(String),
    #[error("protocol error; invalid integer {0:?}")]
    InvalidInteger(String),
    #[error("protocol error; bulk string body is not terminated by CRLF")]
    MissingTerminator,
    #[error("protocol error; invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),
    #[error("protocol error; arrays nested deeper than {0} levels")]
    NestingTooDeep(usize),
}

/// A single RESP value. Null bulk strings and null arrays are kept apart from their empty
/// counterparts at every nesting level.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    NullBulkString,
    Array(Vec<Frame>),
    NullArray,
}

// Protocol specification: https://redis.io/docs/reference/protocol-spec/
impl Frame {
    /// Decodes one frame from the start of `src`.
    ///
    /// Returns `Ok(None)` when `src` holds only a prefix of a frame; the caller keeps the bytes
    /// and retries once more input has arrived. On success the number of consumed bytes is
    /// returned alongside the frame.
    pub fn decode(src: &[u8]) -> Result<Option<(Frame, usize)>, Error> {
        let mut cursor = Cursor::new(src);
        match Frame::parse(&mut cursor) {
            Ok(frame) => Ok(Some((frame, cursor.position() as usize))),
            Err(Error::Incomplete) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Frame::parse_nested(src, 0)
    }

    fn parse_nested(src: &mut Cursor<&[u8]>, depth: usize) -> Result<Self, Error> {
        // The first byte in an RESP-serialized payload always identifies its type.
        // Subsequent bytes constitute the type's contents.
        let first_byte = get_byte(src)?;
        let data_type = DataType::try_from(first_byte)?;

        match data_type {
            DataType::SimpleString => {
                let line = get_line(src)?;
                let string = utf8(line, "simple string")?;
                Ok(Frame::Simple(string))
            }
            DataType::SimpleError => {
                let line = get_line(src)?;
                let string = utf8(line, "simple error")?;
                Ok(Frame::Error(string))
            }
            DataType::Integer => {
                let line = get_line(src)?;
                let integer = parse_integer(line)?;

                Ok(Frame::Integer(integer))
            }
            // $<length>\r\n<data>\r\n
            DataType::BulkString => {
                let length = match get_length(src)? {
                    Some(length) => length,
                    None => return Ok(Frame::NullBulkString),
                };

                // The declared length alone decides where the body ends, so the body may hold
                // any byte, CR and LF included.
                if src.remaining() < length + CRLF.len() {
                    return Err(Error::Incomplete);
                }

                let buf: &[u8] = *src.get_ref();
                let start = src.position() as usize;
                let body = &buf[start..start + length];
                let terminator = &buf[start + length..start + length + CRLF.len()];
                if terminator != CRLF {
                    return Err(Error::MissingTerminator);
                }

                let data = Bytes::copy_from_slice(body);
                src.advance(length + CRLF.len());

                Ok(Frame::Bulk(data))
            }
            // *<number-of-elements>\r\n<element-1>...<element-n>
            DataType::Array => {
                let length = match get_length(src)? {
                    Some(length) => length,
                    None => return Ok(Frame::NullArray),
                };

                if depth >= MAX_NESTING_DEPTH {
                    return Err(Error::NestingTooDeep(MAX_NESTING_DEPTH));
                }

                let mut frames = Vec::with_capacity(length.min(MAX_PREALLOCATED_ELEMENTS));
                for _ in 0..length {
                    let frame = Self::parse_nested(src, depth + 1)?;
                    frames.push(frame);
                }

                Ok(Frame::Array(frames))
            }
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.write(&mut bytes);
        bytes
    }

    fn write(&self, dst: &mut Vec<u8>) {
        match self {
            Frame::Simple(s) => {
                dst.push(u8::from(DataType::SimpleString));
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            Frame::Error(s) => {
                dst.push(u8::from(DataType::SimpleError));
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            Frame::Integer(i) => {
                dst.push(u8::from(DataType::Integer));
                dst.extend_from_slice(i.to_string().as_bytes());
                dst.extend_from_slice(CRLF);
            }
            Frame::Bulk(bytes) => {
                dst.push(u8::from(DataType::BulkString));
                dst.extend_from_slice(bytes.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                dst.extend_from_slice(bytes);
                dst.extend_from_slice(CRLF);
            }
            Frame::NullBulkString => {
                dst.push(u8::from(DataType::BulkString));
                dst.extend_from_slice(b"-1");
                dst.extend_from_slice(CRLF);
            }
            Frame::Array(arr) => {
                dst.push(u8::from(DataType::Array));
                dst.extend_from_slice(arr.len().to_string().as_bytes());
                dst.extend_from_slice(CRLF);
                for frame in arr {
                    frame.write(dst);
                }
            }
            Frame::NullArray => {
                dst.push(u8::from(DataType::Array));
                dst.extend_from_slice(b"-1");
                dst.extend_from_slice(CRLF);
            }
        }
    }
}

impl From<Frame> for Vec<u8> {
    fn from(frame: Frame) -> Self {
        frame.serialize()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Simple(s) => write!(f, "+{}", s),
            Frame::Error(s) => write!(f, "-{}", s),
            Frame::Integer(i) => write!(f, ":{}", i),
            Frame::Bulk(bytes) => write!(f, "${}", String::from_utf8_lossy(bytes)),
            Frame::NullBulkString => write!(f, "$-1"),
            Frame::Array(arr) => {
                write!(f, "*{}", arr.len())?;
                for frame in arr {
                    write!(f, " {}", frame)?;
                }
                Ok(())
            }
            Frame::NullArray => write!(f, "*-1"),
        }
    }
}

/// Reads a CRLF-terminated line and moves the cursor past the terminator.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let buf: &'a [u8] = *src.get_ref();

    let line_end = find_crlf(buf, start).ok_or(Error::Incomplete)?;

    src.set_position((line_end + CRLF.len()) as u64);

    Ok(&buf[start..line_end])
}

/// Reads the length header of a bulk string or an array. `None` is the `-1` null marker.
fn get_length(src: &mut Cursor<&[u8]>) -> Result<Option<usize>, Error> {
    parse_length(get_line(src)?)
}

fn parse_length(line: &[u8]) -> Result<Option<usize>, Error> {
    let invalid = || Error::InvalidLength(String::from_utf8_lossy(line).into_owned());

    let length = std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(invalid)?;

    match length {
        -1 => Ok(None),
        length if length >= 0 => usize::try_from(length).map(Some).map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

fn parse_integer(line: &[u8]) -> Result<i64, Error> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| Error::InvalidInteger(String::from_utf8_lossy(line).into_owned()))
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(2)
        .position(|window| window == CRLF)
        .map(|index| from + index)
}

fn get_byte(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u8())
}

fn utf8(bytes: &[u8], what: &'static str) -> Result<String, Error> {
    String::from_utf8(bytes.to_vec()).map_err(|_| Error::InvalidUtf8(what))
}

/// Checks a growing buffer for one complete frame, remembering how far it got so that each call
/// only looks at bytes that arrived since the previous one.
///
/// Nothing is allocated for the elements it walks over; once the whole frame is buffered,
/// [`Frame::parse`] builds it from exactly those bytes in a single pass.
#[derive(Debug, Default)]
pub struct FrameScanner {
    // End of the last element known to be complete and well formed.
    offset: usize,
    // Elements still expected by every array open at `offset`, outermost first.
    pending: Vec<usize>,
    // How far the line of the element at `offset` was searched for CRLF without finding one.
    searched: usize,
}

enum Element {
    Scalar { end: usize },
    Array { end: usize, len: usize },
}

impl FrameScanner {
    /// Continues checking `src`, which must start with the bytes seen by the previous calls.
    ///
    /// Returns the length of the first frame once all of it is buffered and resets, ready for
    /// the frame that follows.
    pub fn scan(&mut self, src: &[u8]) -> Result<Option<usize>, Error> {
        loop {
            let element = match self.scan_element(src)? {
                Some(element) => element,
                None => return Ok(None),
            };
            self.searched = 0;

            match element {
                Element::Array { end, len } => {
                    self.offset = end;
                    self.pending.push(len);
                }
                Element::Scalar { end } => {
                    self.offset = end;
                    if let Some(length) = self.complete_element() {
                        return Ok(Some(length));
                    }
                }
            }
        }
    }

    // Counts the element ending at `offset` against the arrays enclosing it. Returns the frame
    // length when the outermost value is done.
    fn complete_element(&mut self) -> Option<usize> {
        while let Some(remaining) = self.pending.last_mut() {
            *remaining -= 1;
            if *remaining > 0 {
                return None;
            }
            self.pending.pop();
        }

        let length = self.offset;
        self.offset = 0;
        Some(length)
    }

    fn scan_element(&mut self, src: &[u8]) -> Result<Option<Element>, Error> {
        let start = self.offset;
        let data_type = match src.get(start) {
            Some(&byte) => DataType::try_from(byte)?,
            None => return Ok(None),
        };

        let line_start = start + 1;
        let line_end = match find_crlf(src, line_start.max(self.searched)) {
            Some(line_end) => line_end,
            None => {
                // A trailing CR may still be followed by its LF.
                self.searched = src.len().saturating_sub(1).max(line_start);
                return Ok(None);
            }
        };
        let line = &src[line_start..line_end];
        let next = line_end + CRLF.len();

        let element = match data_type {
            DataType::SimpleString => {
                std::str::from_utf8(line).map_err(|_| Error::InvalidUtf8("simple string"))?;
                Element::Scalar { end: next }
            }
            DataType::SimpleError => {
                std::str::from_utf8(line).map_err(|_| Error::InvalidUtf8("simple error"))?;
                Element::Scalar { end: next }
            }
            DataType::Integer => {
                parse_integer(line)?;
                Element::Scalar { end: next }
            }
            DataType::BulkString => match parse_length(line)? {
                None => Element::Scalar { end: next },
                Some(length) => {
                    let end = next
                        .checked_add(length)
                        .and_then(|end| end.checked_add(CRLF.len()))
                        .ok_or_else(|| {
                            Error::InvalidLength(String::from_utf8_lossy(line).into_owned())
                        })?;
                    if src.len() < end {
                        return Ok(None);
                    }
                    if &src[end - CRLF.len()..end] != CRLF {
                        return Err(Error::MissingTerminator);
                    }
                    Element::Scalar { end }
                }
            },
            DataType::Array => match parse_length(line)? {
                None => Element::Scalar { end: next },
                Some(_) if self.pending.len() >= MAX_NESTING_DEPTH => {
                    return Err(Error::NestingTooDeep(MAX_NESTING_DEPTH));
                }
                Some(0) => Element::Scalar { end: next },
                Some(len) => Element::Array { end: next, len },
            },
        };

        Ok(Some(element))
    }
}

#[derive(Debug)]
enum DataType {
    SimpleString, // '+'
    SimpleError,  // '-'
    Integer,      // ':'
    BulkString,   // '$'
    Array,        // '*'
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::BulkString),
            b'*' => Ok(Self::Array),
            _ => Err(Error::InvalidDataType(byte)),
        }
    }
}

impl From<DataType> for u8 {
    fn from(value: DataType) -> Self {
        match value {
            DataType::SimpleString => b'+',
            DataType::SimpleError => b'-',
            DataType::Integer => b':',
            DataType::BulkString => b'$',
            DataType::Array => b'*',
        }
    }
}
