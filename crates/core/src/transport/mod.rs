//! Network transport for RTSP signalling and RTP/RTCP media delivery.
//!
//! Publishing uses a split transport model:
//!
//! - **Control stream** ([`tcp`]): RTSP request/response signalling over a
//!   TCP (or TLS-wrapped TCP) byte stream. In TCP mode RTP and RTCP are
//!   interleaved onto the same stream with `$` framing (RFC 2326 §10.12).
//!
//! - **UDP** ([`udp`]): in UDP mode each track gets an RTP/RTCP socket pair
//!   bound to the configured client ports and sends to the server ports
//!   returned by SETUP.
//!
//! Every write to the control stream (requests, interleaved RTP and RTCP)
//! goes through one [`SharedWriter`] lock.

pub mod tcp;
pub mod udp;

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::Result;
use crate::frame::NetworkFrame;

pub use tcp::RtspConnection;
pub use udp::UdpTransport;

/// Interleaved frame marker byte.
pub const INTERLEAVED_MAGIC: u8 = b'$';

/// Media transport negotiated in SETUP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Protocol {
    /// RTP interleaved on the RTSP connection.
    #[default]
    Tcp,
    /// RTP over per-track UDP socket pairs.
    Udp,
}

/// A bidirectional byte stream carrying RTSP signalling.
///
/// Implemented for [`TcpStream`]; TLS integrations return their own
/// implementation from a [`TlsConnector`].
pub trait ControlStream: Read + Write + Send {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Another handle to the same underlying connection.
    fn try_clone_stream(&self) -> io::Result<Box<dyn ControlStream>>;

    /// Shut both directions down, unblocking any pending read.
    fn shutdown(&self) -> io::Result<()>;

    fn peer_addr(&self) -> io::Result<SocketAddr>;
}

impl ControlStream for TcpStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, timeout)
    }

    fn try_clone_stream(&self) -> io::Result<Box<dyn ControlStream>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn shutdown(&self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }
}

/// Supplies ready encrypted streams for `rtsps://` endpoints.
pub trait TlsConnector: Send + Sync {
    fn connect(&self, host: &str, port: u16, timeout: Duration)
    -> io::Result<Box<dyn ControlStream>>;
}

/// Write half of the control stream, shared by the handshake and the
/// draining worker.
pub type SharedWriter = Arc<Mutex<Box<dyn ControlStream>>>;

/// Open a plain TCP connection, trying every resolved address in turn.
pub fn connect_tcp(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => {
                tracing::debug!(%addr, error = %e, "connect attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no address for {host}"))
    }))
}

/// Reachability check: can a fresh TCP connection to the server be opened?
pub fn is_reachable(addr: SocketAddr, timeout: Duration) -> bool {
    match TcpStream::connect_timeout(&addr, timeout) {
        Ok(stream) => {
            let _ = stream.shutdown(Shutdown::Both);
            true
        }
        Err(e) => {
            tracing::debug!(%addr, error = %e, "reachability check failed");
            false
        }
    }
}

/// Encode `$ | channel | u16 length | packet` (RFC 2326 §10.12).
pub fn interleave(frame: &NetworkFrame) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + frame.len());
    buf.push(INTERLEAVED_MAGIC);
    buf.push(frame.channel());
    buf.extend_from_slice(&(frame.len() as u16).to_be_bytes());
    buf.extend_from_slice(frame.payload());
    buf
}

/// Media path selected once per connection attempt.
pub enum RtpTransport {
    Tcp { writer: SharedWriter },
    Udp(UdpTransport),
}

impl RtpTransport {
    /// Write one frame, returning the number of bytes put on the wire.
    pub fn send(&self, frame: &NetworkFrame) -> Result<usize> {
        match self {
            Self::Tcp { writer } => {
                let buf = interleave(frame);
                let mut stream = writer.lock();
                stream.write_all(&buf)?;
                stream.flush()?;
                Ok(buf.len())
            }
            Self::Udp(udp) => udp.send(frame),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Self::Tcp { .. } => Protocol::Tcp,
            Self::Udp(_) => Protocol::Udp,
        }
    }
}
