//! Publishing endpoint URLs: `rtsp[s]://host[:port]/app[/stream]`.

use std::fmt;

use crate::error::{Result, StreamError};

/// Default RTSP port.
pub const DEFAULT_PORT: u16 = 554;
/// Default port for RTSP over TLS.
pub const DEFAULT_TLS_PORT: u16 = 443;

/// A parsed publishing endpoint.
///
/// The host contains no `/` or `:`, the application name is a single
/// non-empty path segment and the stream name is whatever follows it
/// (possibly empty, possibly with further `/`, never with `*`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub app: String,
    pub stream: String,
    pub tls: bool,
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self> {
        let malformed = || StreamError::EndpointMalformed(url.to_string());

        let (tls, rest) = if let Some(rest) = url.strip_prefix("rtsps://") {
            (true, rest)
        } else if let Some(rest) = url.strip_prefix("rtsp://") {
            (false, rest)
        } else {
            return Err(malformed());
        };

        let slash = rest.find('/').ok_or_else(malformed)?;
        let (authority, path) = (&rest[..slash], &rest[slash + 1..]);

        let (host, port) = match authority.split_once(':') {
            Some((host, port)) => {
                if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(malformed());
                }
                (host, Some(port.parse::<u16>().map_err(|_| malformed())?))
            }
            None => (authority, None),
        };
        if host.is_empty() {
            return Err(malformed());
        }

        let (app, stream) = match path.split_once('/') {
            Some((app, stream)) => (app, stream),
            None => (path, ""),
        };
        if app.is_empty() || stream.contains('*') {
            return Err(malformed());
        }

        let port = port.unwrap_or(if tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT });
        Ok(Self {
            host: host.to_string(),
            port,
            app: app.to_string(),
            stream: stream.to_string(),
            tls,
        })
    }

    /// Request path: `/app` or `/app/stream`.
    pub fn path(&self) -> String {
        if self.stream.is_empty() {
            format!("/{}", self.app)
        } else {
            format!("/{}/{}", self.app, self.stream)
        }
    }

    /// Request-URI used in every RTSP request line.
    pub fn request_uri(&self) -> String {
        format!("rtsp://{}:{}{}", self.host, self.port, self.path())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "rtsps" } else { "rtsp" };
        write!(f, "{}://{}:{}{}", scheme, self.host, self.port, self.path())
    }
}
