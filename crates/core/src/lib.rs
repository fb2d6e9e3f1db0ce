pub mod cache;
pub mod client;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod media;
pub mod protocol;
pub mod report;
pub mod session;
pub mod transport;

pub use client::{ClientConfig, ConnectionListener, NoopListener, RtspClient};
pub use error::{FailureKind, Result, StreamError};
pub use frame::{MediaTrack, NetworkFrame};
pub use media::{FrameInfo, Packetizer, VideoCodec};
pub use session::SessionState;
pub use transport::{ControlStream, Protocol, TlsConnector};
