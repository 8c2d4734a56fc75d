use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};
use uuid::Uuid;

use crate::codec::{CodecError, FrameCodec};
use crate::config::Config;
use crate::frame::Frame;

/// One client stream plus the bytes received from it that do not yet form a whole frame.
///
/// Any `AsyncRead + AsyncWrite` stream works, which lets tests drive a connection through an
/// in-memory pipe instead of a socket.
pub struct Connection<S = TcpStream> {
    pub id: Uuid,
    stream: S,
    // Data is read from the socket into the read buffer. When a frame is parsed, the corresponding
    // data is removed from the buffer.
    buffer: BytesMut,
    // Replies are encoded here before being written out.
    write_buffer: BytesMut,
    codec: FrameCodec,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Connection<S> {
        Connection::with_config(stream, &Config::default())
    }

    pub fn with_config(stream: S, config: &Config) -> Connection<S> {
        Connection {
            id: Uuid::new_v4(),
            stream,
            // Allocate the buffer with 4kb of capacity.
            buffer: BytesMut::with_capacity(4096),
            write_buffer: BytesMut::new(),
            codec: FrameCodec::with_config(config),
        }
    }

    /// Returns the next complete frame, reading from the stream only when the buffer does not
    /// already hold one. Several pipelined frames delivered by a single read are handed out one
    /// call at a time.
    ///
    /// `Ok(None)` means the peer closed the stream cleanly between frames.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, CodecError> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buffer)? {
                return Ok(Some(frame));
            }

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                if self.buffer.is_empty() {
                    return Ok(None);
                }

                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed in the middle of a frame",
                )
                .into());
            }
        }
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), CodecError> {
        self.codec.encode(frame, &mut self.write_buffer)?;

        self.stream.write_all(&self.write_buffer).await?;
        self.write_buffer.clear();
        self.stream.flush().await?;

        Ok(())
    }
}
