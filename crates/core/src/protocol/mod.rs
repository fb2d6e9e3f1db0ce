//! RTSP protocol implementation for publishing (RFC 2326).
//!
//! This module handles the client side of the text-based RTSP signalling
//! protocol: building requests, parsing responses, answering
//! authentication challenges and generating the ANNOUNCE SDP.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! RTSP messages follow HTTP/1.1 syntax with a different method set:
//!
//! ```text
//! ANNOUNCE rtsp://server/live/cam RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Content-Type: application/sdp\r\n
//! Content-Length: 312\r\n
//! \r\n
//! v=0\r\n...
//! ```
//!
//! ## Publishing handshake
//!
//! | Method | RFC section | Purpose |
//! |--------|-------------|---------|
//! | OPTIONS | §10.1 | Capability discovery |
//! | ANNOUNCE | §10.3 | Post the SDP session description |
//! | SETUP | §10.4 | Negotiate transport per track |
//! | RECORD | §10.11 | Start media delivery to the server |
//! | TEARDOWN | §10.7 | Destroy session |

pub mod auth;
pub mod commands;
pub mod request;
pub mod response;
pub mod sdp;

pub use auth::Credentials;
pub use commands::SessionCommands;
pub use request::{Method, RtspRequest};
pub use response::RtspResponse;
