use bytes::{Buf, BytesMut};
use thiserror::Error as ThisError;
use tokio_util::codec::{Decoder, Encoder};

use crate::config::{Config, DEFAULT_MAX_FRAME_SIZE};
use crate::frame::{self, Frame, FrameScanner};

const LEGACY_NULL: &[u8] = b"-1\r\n";

#[derive(Debug, ThisError)]
pub enum CodecError {
    #[error("frame size exceeds limit of {limit} bytes")]
    FrameTooLarge { limit: usize },
    #[error(transparent)]
    Frame(#[from] frame::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Splits a byte stream into frames and writes replies back.
///
/// The codec remembers how much of a partially received frame it has already checked, so a
/// large frame arriving over many reads is walked once, not once per read.
pub struct FrameCodec {
    max_frame_size: usize,
    legacy_null: bool,
    scanner: FrameScanner,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> FrameCodec {
        FrameCodec {
            max_frame_size,
            legacy_null: false,
            scanner: FrameScanner::default(),
        }
    }

    pub fn with_config(config: &Config) -> FrameCodec {
        FrameCodec {
            legacy_null: config.legacy_null,
            ..FrameCodec::new(config.max_frame_size)
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let length = match self.scanner.scan(&src[..])? {
            Some(length) => length,
            None => {
                // Only a partial frame is buffered. Refuse to keep growing the buffer past the
                // limit.
                if src.len() > self.max_frame_size {
                    return Err(CodecError::FrameTooLarge {
                        limit: self.max_frame_size,
                    });
                }
                return Ok(None);
            }
        };

        let (frame, _) = Frame::decode(&src[..length])?.ok_or(frame::Error::Incomplete)?;

        // Remove the parsed frame from the buffer.
        src.advance(length);

        Ok(Some(frame))
    }
}

impl<'a> Encoder<&'a Frame> for FrameCodec {
    type Error = CodecError;

    fn encode(&mut self, frame: &'a Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match frame {
            Frame::NullBulkString if self.legacy_null => dst.extend_from_slice(LEGACY_NULL),
            frame => dst.extend_from_slice(&frame.serialize()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn decode_pipelined_frames() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"+PING\r\n:1\r\n$3\r\nfo"[..]);

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Simple("PING".to_string()))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Integer(1)));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"$3\r\nfo");

        buf.extend_from_slice(b"o\r\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Bulk(Bytes::from("foo")))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_rejects_oversized_partial_frame() {
        let mut codec = FrameCodec::new(8);
        let mut buf = BytesMut::from(&b"$100\r\n0123456789"[..]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::FrameTooLarge { limit: 8 })
        ));
    }

    #[test]
    fn decode_protocol_error() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"*x\r\n"[..]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::Frame(frame::Error::InvalidLength(_)))
        ));
    }

    #[test]
    fn encode_frame() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();

        codec
            .encode(&Frame::Array(vec![Frame::Integer(1), Frame::NullArray]), &mut buf)
            .unwrap();

        assert_eq!(&buf[..], b"*2\r\n:1\r\n*-1\r\n");
    }

    #[test]
    fn encode_legacy_null() {
        let config = Config {
            legacy_null: true,
            ..Config::default()
        };
        let mut codec = FrameCodec::with_config(&config);
        let mut buf = BytesMut::new();

        codec.encode(&Frame::NullBulkString, &mut buf).unwrap();
        codec
            .encode(&Frame::Array(vec![Frame::NullBulkString]), &mut buf)
            .unwrap();

        assert_eq!(&buf[..], b"-1\r\n*1\r\n$-1\r\n");
    }

    #[test]
    fn decode_rejects_deep_nesting() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"*1\r\n".repeat(100_000)[..]);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::Frame(frame::Error::NestingTooDeep(
                frame::MAX_NESTING_DEPTH
            )))
        ));
    }

    #[test]
    fn decode_large_array_in_chunks() {
        let count = 20_000;
        let mut data = format!("*{}\r\n", count).into_bytes();
        data.extend_from_slice(&b":1\r\n".repeat(count));
        data.extend_from_slice(b"+after\r\n");

        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        let mut frames = Vec::new();
        for chunk in data.chunks(4096) {
            buf.extend_from_slice(chunk);
            while let Some(frame) = codec.decode(&mut buf).unwrap() {
                frames.push(frame);
            }
        }

        assert_eq!(
            frames,
            vec![
                Frame::Array(vec![Frame::Integer(1); count]),
                Frame::Simple("after".to_string()),
            ]
        );
        assert!(buf.is_empty());
    }
}
