use crate::endpoint::Endpoint;
use crate::frame::{MediaTrack, TrackLayout};
use crate::transport::Protocol;

use super::auth::{Challenge, Credentials};
use super::{Method, RtspRequest, RtspResponse};

/// Builds the client's requests for one connection and keeps the state
/// that threads through them: CSeq, session id and authorization.
#[derive(Debug)]
pub struct SessionCommands {
    endpoint: Endpoint,
    user_agent: String,
    protocol: Protocol,
    layout: TrackLayout,
    video_client_ports: (u16, u16),
    audio_client_ports: (u16, u16),
    cseq: u32,
    session_id: Option<String>,
    authorization: Option<String>,
    video_server_ports: Option<(u16, u16)>,
    audio_server_ports: Option<(u16, u16)>,
}

impl SessionCommands {
    pub fn new(endpoint: Endpoint, user_agent: &str, protocol: Protocol, layout: TrackLayout) -> Self {
        Self {
            endpoint,
            user_agent: user_agent.to_string(),
            protocol,
            layout,
            video_client_ports: (5000, 5001),
            audio_client_ports: (5002, 5003),
            cseq: 0,
            session_id: None,
            authorization: None,
            video_server_ports: None,
            audio_server_ports: None,
        }
    }

    pub fn with_client_ports(mut self, video: (u16, u16), audio: (u16, u16)) -> Self {
        self.video_client_ports = video;
        self.audio_client_ports = audio;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn client_ports(&self, track: MediaTrack) -> (u16, u16) {
        match track {
            MediaTrack::Video => self.video_client_ports,
            MediaTrack::Audio => self.audio_client_ports,
        }
    }

    /// Server RTP/RTCP ports from the SETUP reply, falling back to the
    /// client ports when the server did not name any.
    pub fn server_ports(&self, track: MediaTrack) -> (u16, u16) {
        let ports = match track {
            MediaTrack::Video => self.video_server_ports,
            MediaTrack::Audio => self.audio_server_ports,
        };
        ports.unwrap_or_else(|| self.client_ports(track))
    }

    fn base(&mut self, method: Method, uri: &str) -> RtspRequest {
        self.cseq += 1;
        RtspRequest::new(method, uri)
            .header("CSeq", &self.cseq.to_string())
            .header("User-Agent", &self.user_agent)
            .optional_header("Session", self.session_id.as_deref())
            .optional_header("Authorization", self.authorization.as_deref())
    }

    pub fn options(&mut self) -> RtspRequest {
        let uri = self.endpoint.request_uri();
        self.base(Method::Options, &uri)
    }

    pub fn announce(&mut self, sdp: String) -> RtspRequest {
        let uri = self.endpoint.request_uri();
        self.base(Method::Announce, &uri)
            .with_body("application/sdp", sdp)
    }

    /// Answer a 401 challenge. Returns `false` if the reply offered no
    /// usable challenge.
    pub fn authorize(&mut self, response: &RtspResponse, credentials: &Credentials) -> bool {
        let Some(challenge) = Challenge::select(response.headers_named("WWW-Authenticate")) else {
            return false;
        };
        let value = challenge.authorization(
            credentials,
            Method::Announce,
            &self.endpoint.request_uri(),
        );
        let scheme = match challenge {
            Challenge::Basic { .. } => "basic",
            Challenge::Digest { .. } => "digest",
        };
        tracing::debug!(scheme, "authorization prepared");
        self.authorization = Some(value);
        true
    }

    pub fn setup(&mut self, track: MediaTrack) -> RtspRequest {
        let index = self.layout.index(track);
        let uri = format!("{}/streamid={}", self.endpoint.request_uri(), index);
        let transport = match self.protocol {
            Protocol::Tcp => format!(
                "RTP/AVP/TCP;unicast;interleaved={}-{};mode=record",
                self.layout.rtp_channel(track),
                self.layout.rtcp_channel(track)
            ),
            Protocol::Udp => {
                let (rtp, rtcp) = self.client_ports(track);
                format!("RTP/AVP;unicast;client_port={}-{};mode=record", rtp, rtcp)
            }
        };
        self.base(Method::Setup, &uri).header("Transport", &transport)
    }

    pub fn record(&mut self) -> RtspRequest {
        let uri = self.endpoint.request_uri();
        self.base(Method::Record, &uri).header("Range", "npt=0.000-")
    }

    pub fn teardown(&mut self) -> RtspRequest {
        let uri = self.endpoint.request_uri();
        self.base(Method::Teardown, &uri)
    }

    /// Capture session id and, for SETUP replies, the server ports.
    pub fn on_response(&mut self, method: Method, track: Option<MediaTrack>, response: &RtspResponse) {
        if let Some(id) = response.session_id()
            && self.session_id.as_deref() != Some(id)
        {
            tracing::debug!(session_id = id, "session established");
            self.session_id = Some(id.to_string());
        }

        if method == Method::Setup
            && let Some(track) = track
            && let Some(ports) = response
                .get_header("Transport")
                .and_then(TransportHeader::parse)
                .and_then(|th| th.server_ports)
        {
            tracing::debug!(track = track.as_str(), rtp = ports.0, rtcp = ports.1, "server ports");
            match track {
                MediaTrack::Video => self.video_server_ports = Some(ports),
                MediaTrack::Audio => self.audio_server_ports = Some(ports),
            }
        }
    }
}

/// Parsed `Transport` header of a SETUP reply (RFC 2326 §12.39).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportHeader {
    pub server_ports: Option<(u16, u16)>,
    pub client_ports: Option<(u16, u16)>,
    pub interleaved: Option<(u8, u8)>,
}

impl TransportHeader {
    /// Parse the semicolon-separated parameters. Returns `None` if no
    /// port or channel pair is present.
    ///
    /// ```
    /// use rtsp_push::protocol::commands::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=5000-5001;server_port=6970-6971").unwrap();
    /// assert_eq!(th.server_ports, Some((6970, 6971)));
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        let mut th = Self::default();
        for part in header.split(';') {
            let part = part.trim();
            if let Some(ports) = part.strip_prefix("server_port=") {
                th.server_ports = pair(ports);
            } else if let Some(ports) = part.strip_prefix("client_port=") {
                th.client_ports = pair(ports);
            } else if let Some(channels) = part.strip_prefix("interleaved=") {
                th.interleaved = pair(channels);
            }
        }
        (th != Self::default()).then_some(th)
    }
}

/// `a-b`, or a single `a` meaning `a-(a+1)`.
fn pair<T: std::str::FromStr + Copy + TryFrom<u32>>(value: &str) -> Option<(T, T)>
where
    u32: From<T>,
{
    match value.split_once('-') {
        Some((a, b)) => Some((a.trim().parse().ok()?, b.trim().parse().ok()?)),
        None => {
            let a: T = value.trim().parse().ok()?;
            let b = T::try_from(u32::from(a) + 1).ok()?;
            Some((a, b))
        }
    }
}
