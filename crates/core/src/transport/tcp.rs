use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{ControlStream, INTERLEAVED_MAGIC, SharedWriter};
use crate::error::{ParseErrorKind, Result, StreamError};
use crate::protocol::{RtspRequest, RtspResponse};

/// Read timeout used when polling for unsolicited server messages.
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Largest response body accepted from the server.
pub const MAX_BODY_LEN: usize = 64 * 1024;

/// Client side of one RTSP signalling connection.
///
/// Owns the buffered read half; the write half is a [`SharedWriter`] so
/// the draining worker can interleave media on the same stream.
pub struct RtspConnection {
    reader: BufReader<Box<dyn ControlStream>>,
    writer: SharedWriter,
    peer_addr: SocketAddr,
    io_timeout: Duration,
}

impl RtspConnection {
    pub fn new(stream: Box<dyn ControlStream>, io_timeout: Duration) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        stream.set_read_timeout(Some(io_timeout))?;
        stream.set_write_timeout(Some(io_timeout))?;
        let reader = stream.try_clone_stream()?;

        tracing::debug!(%peer_addr, "control connection open");

        Ok(Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(stream)),
            peer_addr,
            io_timeout,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn writer(&self) -> SharedWriter {
        self.writer.clone()
    }

    /// A handle that can shut the connection down from another thread.
    pub fn closer(&self) -> Result<Box<dyn ControlStream>> {
        Ok(self.reader.get_ref().try_clone_stream()?)
    }

    pub fn send(&self, request: &RtspRequest) -> Result<()> {
        let text = request.serialize();
        tracing::debug!(
            peer = %self.peer_addr,
            method = request.method.as_str(),
            uri = %request.uri,
            "request"
        );
        tracing::trace!("{}", text);

        let mut writer = self.writer.lock();
        writer.write_all(text.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Send a request and wait for its response.
    pub fn request(&mut self, request: &RtspRequest) -> Result<RtspResponse> {
        self.send(request)?;
        let response = self.read_response()?;
        tracing::debug!(
            peer = %self.peer_addr,
            method = request.method.as_str(),
            status = response.status_code,
            "response"
        );
        Ok(response)
    }

    /// Read one complete response: status line, headers and any
    /// `Content-Length` body. Interleaved binary frames sent by the server
    /// (receiver reports) are skipped.
    pub fn read_response(&mut self) -> Result<RtspResponse> {
        loop {
            let first = {
                let buf = self.reader.fill_buf()?;
                match buf.first() {
                    Some(&b) => b,
                    None => return Err(StreamError::ConnectionClosed),
                }
            };
            if first == INTERLEAVED_MAGIC {
                self.skip_interleaved()?;
                continue;
            }

            let mut head = String::new();
            loop {
                let mut line = String::new();
                match self.reader.read_line(&mut line)? {
                    0 => return Err(StreamError::ConnectionClosed),
                    _ => {
                        if line == "\r\n" || line == "\n" {
                            if head.trim().is_empty() {
                                head.clear();
                                continue;
                            }
                            break;
                        }
                        head.push_str(&line);
                    }
                }
            }

            let mut response = RtspResponse::parse(&head)?;
            let length = response.content_length();
            if length > MAX_BODY_LEN {
                tracing::warn!(length, "response body over limit");
                return Err(StreamError::Parse {
                    kind: ParseErrorKind::BodyTooLarge,
                });
            }
            if length > 0 {
                let mut body = vec![0u8; length];
                self.reader.read_exact(&mut body)?;
                response.set_body(body)?;
            }
            return Ok(response);
        }
    }

    /// Drain everything the server has sent, without blocking for long.
    ///
    /// Interleaved frames (receiver reports) are skipped and messages that
    /// do not parse as responses (server-initiated requests) are logged and
    /// dropped. Returns the responses read, or
    /// [`StreamError::ConnectionClosed`] if the peer closed the stream.
    pub fn poll(&mut self) -> Result<Vec<RtspResponse>> {
        let mut messages = Vec::new();
        while self.has_pending()? {
            if self.reader.buffer().first() == Some(&INTERLEAVED_MAGIC) {
                self.skip_interleaved()?;
                continue;
            }
            match self.read_response() {
                Ok(message) => messages.push(message),
                Err(StreamError::Parse { kind }) if !matches!(kind, ParseErrorKind::BodyTooLarge) => {
                    tracing::warn!(%kind, "unparseable server message ignored");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(messages)
    }

    /// Whether unread bytes are buffered or arrive within [`POLL_TIMEOUT`].
    fn has_pending(&mut self) -> Result<bool> {
        if !self.reader.buffer().is_empty() {
            return Ok(true);
        }
        self.reader.get_ref().set_read_timeout(Some(POLL_TIMEOUT))?;
        let pending = match self.reader.fill_buf() {
            Ok(buf) if buf.is_empty() => Err(StreamError::ConnectionClosed),
            Ok(_) => Ok(true),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(false)
            }
            Err(e) => Err(e.into()),
        };
        self.reader.get_ref().set_read_timeout(Some(self.io_timeout))?;
        pending
    }

    fn skip_interleaved(&mut self) -> Result<()> {
        let mut header = [0u8; 4];
        self.reader.read_exact(&mut header)?;
        let len = u16::from_be_bytes([header[2], header[3]]) as usize;
        let mut data = vec![0u8; len];
        self.reader.read_exact(&mut data)?;
        tracing::trace!(channel = header[1], len, "interleaved frame from server skipped");
        Ok(())
    }
}
