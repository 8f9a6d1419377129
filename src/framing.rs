//! Newline-delimited message framing over any async byte stream.
//!
//! `FramedChannel` appends a `\n` to every outgoing message and splits the
//! incoming stream on `\n`. Bytes following a delimiter stay buffered for the
//! next call, so several messages arriving in one read and one message split
//! across reads are both handled. The receive buffer never grows past
//! `max_frame_size`; a peer that fills it without sending a delimiter gets
//! `FrameTooLarge`.

use bytes::BytesMut;
use std::fmt;
use std::io;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::protocol::ParseError;
use crate::session::SessionError;

/// Message delimiter
pub const DELIMITER: u8 = b'\n';

/// Default cap on buffered bytes for one incoming frame, delimiter included
pub const DEFAULT_MAX_FRAME_SIZE: usize = 256;

/// Largest single read issued against the stream
const READ_CHUNK: usize = 4 * 1024;

/// Framing errors
#[derive(Debug)]
pub enum FrameError {
    /// Peer closed the stream before a delimiter arrived
    ConnectionClosed,
    /// Buffer filled up without a delimiter
    FrameTooLarge { limit: usize },
    /// Frame bytes are not valid UTF-8
    InvalidUtf8,
    /// Outgoing message contains the delimiter byte
    EmbeddedDelimiter,
    /// Any other transport failure
    Io(io::Error),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::ConnectionClosed => write!(f, "connection closed"),
            FrameError::FrameTooLarge { limit } => {
                write!(f, "frame exceeds {} bytes without a delimiter", limit)
            }
            FrameError::InvalidUtf8 => write!(f, "frame is not valid UTF-8"),
            FrameError::EmbeddedDelimiter => write!(f, "message contains a newline"),
            FrameError::Io(e) => write!(f, "transport error: {}", e),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FrameError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::WriteZero => FrameError::ConnectionClosed,
            _ => FrameError::Io(e),
        }
    }
}

/// A byte stream carrying newline-terminated text messages.
pub struct FramedChannel<S> {
    stream: S,
    buffer: BytesMut,
    max_frame_size: usize,
}

impl<S> FramedChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a stream with the default frame limit.
    pub fn new(stream: S) -> Self {
        Self::with_max_frame_size(stream, DEFAULT_MAX_FRAME_SIZE)
    }

    /// Wrap a stream, buffering at most `max_frame_size` bytes per frame.
    pub fn with_max_frame_size(stream: S, max_frame_size: usize) -> Self {
        let max_frame_size = max_frame_size.max(1);
        Self {
            stream,
            buffer: BytesMut::with_capacity(max_frame_size.min(READ_CHUNK)),
            max_frame_size,
        }
    }

    /// Write `text` followed by the delimiter.
    pub async fn send(&mut self, text: &str) -> Result<(), FrameError> {
        if text.as_bytes().contains(&DELIMITER) {
            return Err(FrameError::EmbeddedDelimiter);
        }

        let mut frame = BytesMut::with_capacity(text.len() + 1);
        frame.extend_from_slice(text.as_bytes());
        frame.extend_from_slice(&[DELIMITER]);

        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        trace!(bytes = frame.len(), "Frame sent");
        Ok(())
    }

    /// Read the next message, without its delimiter.
    pub async fn receive_one(&mut self) -> Result<String, FrameError> {
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some(pos) = self.buffer.iter().position(|&b| b == DELIMITER) {
                let mut frame = self.buffer.split_to(pos + 1);
                frame.truncate(pos);
                trace!(bytes = pos + 1, buffered = self.buffer.len(), "Frame received");
                return String::from_utf8(frame.to_vec()).map_err(|_| FrameError::InvalidUtf8);
            }

            if self.buffer.len() >= self.max_frame_size {
                return Err(FrameError::FrameTooLarge {
                    limit: self.max_frame_size,
                });
            }

            let room = (self.max_frame_size - self.buffer.len()).min(READ_CHUNK);
            let n = self.stream.read(&mut chunk[..room]).await?;
            if n == 0 {
                trace!(buffered = self.buffer.len(), "Stream ended without delimiter");
                return Err(FrameError::ConnectionClosed);
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Send any message that formats as wire text.
    pub async fn send_message<T: fmt::Display>(&mut self, message: &T) -> Result<(), FrameError> {
        self.send(&message.to_string()).await
    }

    /// Receive one frame and parse it as a `T`.
    pub async fn receive_message<T>(&mut self) -> Result<T, SessionError>
    where
        T: FromStr<Err = ParseError>,
    {
        let line = self.receive_one().await?;
        Ok(line.parse::<T>()?)
    }

    /// Bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Frame size limit in bytes.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}
