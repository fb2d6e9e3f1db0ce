use std::net::{IpAddr, SocketAddr, UdpSocket};

use crate::error::{Result, StreamError};
use crate::frame::{MediaTrack, NetworkFrame};

/// RTP/RTCP socket pair for one track.
#[derive(Debug)]
struct TrackSockets {
    rtp: UdpSocket,
    rtcp: UdpSocket,
    server_rtp: SocketAddr,
    server_rtcp: SocketAddr,
}

/// UDP transport for outbound RTP and RTCP (RFC 2326 §12.39).
///
/// Each track binds its own pair of local sockets on the client ports
/// announced in SETUP and sends to the server ports from the SETUP reply.
/// Frames are routed by track; RTCP frames (odd channel) leave through the
/// RTCP socket.
///
/// ```text
/// Client → Server:
///   Transport: RTP/AVP;unicast;client_port=5000-5001;mode=record
///
/// Server → Client:
///   Transport: RTP/AVP;unicast;client_port=5000-5001;server_port=6970-6971
/// ```
#[derive(Debug, Default)]
pub struct UdpTransport {
    video: Option<TrackSockets>,
    audio: Option<TrackSockets>,
}

impl UdpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `client_ports` locally and target `server_ports` on `server_ip`.
    ///
    /// Port 0 binds an ephemeral port.
    pub fn bind_track(
        &mut self,
        track: MediaTrack,
        client_ports: (u16, u16),
        server_ip: IpAddr,
        server_ports: (u16, u16),
    ) -> Result<()> {
        let rtp = UdpSocket::bind(("0.0.0.0", client_ports.0))?;
        let rtcp = UdpSocket::bind(("0.0.0.0", client_ports.1))?;
        let sockets = TrackSockets {
            rtp,
            rtcp,
            server_rtp: SocketAddr::new(server_ip, server_ports.0),
            server_rtcp: SocketAddr::new(server_ip, server_ports.1),
        };

        tracing::debug!(
            track = track.as_str(),
            client_rtp = client_ports.0,
            client_rtcp = client_ports.1,
            server_rtp = %sockets.server_rtp,
            server_rtcp = %sockets.server_rtcp,
            "UDP track bound"
        );

        match track {
            MediaTrack::Video => self.video = Some(sockets),
            MediaTrack::Audio => self.audio = Some(sockets),
        }
        Ok(())
    }

    /// Send one frame to the server port of its track and channel kind.
    pub fn send(&self, frame: &NetworkFrame) -> Result<usize> {
        let sockets = match frame.track() {
            MediaTrack::Video => self.video.as_ref(),
            MediaTrack::Audio => self.audio.as_ref(),
        }
        .ok_or_else(|| {
            StreamError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                format!("no UDP sockets for {} track", frame.track().as_str()),
            ))
        })?;

        let sent = if frame.is_rtcp() {
            sockets.rtcp.send_to(frame.payload(), sockets.server_rtcp)?
        } else {
            sockets.rtp.send_to(frame.payload(), sockets.server_rtp)?
        };
        Ok(sent)
    }
}
