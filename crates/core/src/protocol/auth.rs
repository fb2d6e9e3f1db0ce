//! RTSP authentication (RFC 2326 §D, RFC 2617).
//!
//! The server advertises a scheme in `WWW-Authenticate` on a 401 reply.
//! Digest is preferred when both schemes are offered.

use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::Method;

/// User credentials configured on the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: &str, password: &str) -> Self {
        Self {
            user: user.to_string(),
            password: password.to_string(),
        }
    }
}

/// Authentication challenge from a `WWW-Authenticate` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Basic {
        realm: Option<String>,
    },
    Digest {
        realm: String,
        nonce: String,
        opaque: Option<String>,
    },
}

impl Challenge {
    /// Parse one header value. Unknown schemes yield `None`.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));

        if scheme.eq_ignore_ascii_case("basic") {
            return Some(Self::Basic {
                realm: param(params, "realm"),
            });
        }
        if scheme.eq_ignore_ascii_case("digest") {
            return Some(Self::Digest {
                realm: param(params, "realm").unwrap_or_default(),
                nonce: param(params, "nonce")?,
                opaque: param(params, "opaque"),
            });
        }
        None
    }

    /// Pick the strongest challenge among several header values.
    pub fn select<'a>(headers: impl Iterator<Item = &'a str>) -> Option<Self> {
        let mut basic = None;
        for value in headers {
            match Self::parse(value) {
                Some(digest @ Self::Digest { .. }) => return Some(digest),
                Some(b @ Self::Basic { .. }) => basic = basic.or(Some(b)),
                None => {}
            }
        }
        basic
    }

    /// `Authorization` header value answering this challenge.
    pub fn authorization(&self, credentials: &Credentials, method: Method, uri: &str) -> String {
        match self {
            Self::Basic { .. } => {
                let token = format!("{}:{}", credentials.user, credentials.password);
                format!("Basic {}", BASE64_STANDARD.encode(token))
            }
            Self::Digest {
                realm,
                nonce,
                opaque,
            } => {
                let ha1 = md5_hex(&format!(
                    "{}:{}:{}",
                    credentials.user, realm, credentials.password
                ));
                let ha2 = md5_hex(&format!("{}:{}", method, uri));
                let response = md5_hex(&format!("{}:{}:{}", ha1, nonce, ha2));

                let mut value = format!(
                    "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
                    credentials.user, realm, nonce, uri, response
                );
                if let Some(opaque) = opaque {
                    value.push_str(&format!(", opaque=\"{}\"", opaque));
                }
                value
            }
        }
    }
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Value of `name` in a comma-separated `key="value"` parameter list.
fn param(params: &str, name: &str) -> Option<String> {
    params.split(',').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().trim_matches('"').to_string())
    })
}
