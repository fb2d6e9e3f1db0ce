use crate::error::{ParseErrorKind, Result, StreamError};

/// A parsed RTSP response (RFC 2326 §7).
///
/// ```text
/// RTSP-Version SP Status-Code SP Reason-Phrase CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2. The body, if any,
/// is read separately by the connection using `Content-Length`.
#[derive(Debug, Clone)]
pub struct RtspResponse {
    pub version: String,
    pub status_code: u16,
    pub status_text: String,
    /// Headers as ordered (name, value) pairs, names as received.
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl RtspResponse {
    /// Parse the status line and headers of a response.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut lines = raw.lines();

        let status_line = lines.next().ok_or(StreamError::Parse {
            kind: ParseErrorKind::EmptyResponse,
        })?;

        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        let code = parts.next().and_then(|c| c.trim().parse::<u16>().ok());
        let (Some(status_code), true) = (code, version.starts_with("RTSP/")) else {
            return Err(StreamError::Parse {
                kind: ParseErrorKind::InvalidStatusLine,
            });
        };
        let status_text = parts.next().unwrap_or_default().trim().to_string();

        if version != "RTSP/1.0" {
            tracing::warn!(version, "server answered with non-RTSP/1.0 version");
        }

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }

            let colon_pos = line.find(':').ok_or(StreamError::Parse {
                kind: ParseErrorKind::InvalidHeader,
            })?;

            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();
            headers.push((name, value));
        }

        Ok(Self {
            version: version.to_string(),
            status_code,
            status_text,
            headers,
            body: None,
        })
    }

    pub fn set_body(&mut self, body: Vec<u8>) -> Result<()> {
        let body = String::from_utf8(body).map_err(|_| StreamError::Parse {
            kind: ParseErrorKind::InvalidBody,
        })?;
        self.body = Some(body);
        Ok(())
    }

    /// Look up a header value by name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers_named(name).next()
    }

    /// Every value of a repeatable header, in order.
    pub fn headers_named<'a, 'n>(
        &'a self,
        name: &'n str,
    ) -> impl Iterator<Item = &'a str> + use<'a, 'n> {
        self.headers
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    pub fn content_length(&self) -> usize {
        self.get_header("Content-Length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Session id without parameters (RFC 2326 §12.37).
    ///
    /// `Session: 12345678;timeout=60` yields `12345678`.
    pub fn session_id(&self) -> Option<&str> {
        self.get_header("Session")
            .map(|s| s.split(';').next().unwrap_or(s).trim())
            .filter(|s| !s.is_empty())
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }
}
