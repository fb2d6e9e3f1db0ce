//! Network frames: fully framed packets ready for the transport.

/// Elementary stream a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaTrack {
    Audio,
    Video,
}

impl MediaTrack {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

/// Track index assignment for one session.
///
/// The index selects the SDP `a=control:streamid=N` URL, the interleaved
/// channel pair (`2N` for RTP, `2N + 1` for RTCP) and the UDP port pair.
/// Video is track 0 unless the session is audio-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackLayout {
    pub video: u8,
    pub audio: u8,
}

impl TrackLayout {
    pub fn index(&self, track: MediaTrack) -> u8 {
        match track {
            MediaTrack::Video => self.video,
            MediaTrack::Audio => self.audio,
        }
    }

    /// Interleaved RTP channel for a track.
    pub fn rtp_channel(&self, track: MediaTrack) -> u8 {
        self.index(track) * 2
    }

    /// Interleaved RTCP channel for a track.
    pub fn rtcp_channel(&self, track: MediaTrack) -> u8 {
        self.index(track) * 2 + 1
    }
}

impl Default for TrackLayout {
    fn default() -> Self {
        Self { video: 0, audio: 1 }
    }
}

/// One ready-to-send packet (RTP or RTCP).
///
/// Immutable once built. `channel` is the transport routing tag: the
/// interleaved channel over TCP, mapped to the track's RTP or RTCP socket
/// over UDP. Even channels carry RTP, odd channels carry RTCP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkFrame {
    payload: Vec<u8>,
    timestamp: u32,
    channel: u8,
    track: MediaTrack,
}

impl NetworkFrame {
    pub fn new(payload: Vec<u8>, timestamp: u32, channel: u8, track: MediaTrack) -> Self {
        Self {
            payload,
            timestamp,
            channel,
            track,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Media clock timestamp shared by every frame of one access unit.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn track(&self) -> MediaTrack {
        self.track
    }

    pub fn is_rtcp(&self) -> bool {
        self.channel % 2 == 1
    }

    /// RTP sequence number from the fixed header, if this is an RTP frame.
    pub fn sequence(&self) -> Option<u16> {
        if self.is_rtcp() || self.payload.len() < 12 {
            return None;
        }
        Some(u16::from_be_bytes([self.payload[2], self.payload[3]]))
    }

    /// RTP marker bit, if this is an RTP frame.
    pub fn marker(&self) -> Option<bool> {
        if self.is_rtcp() || self.payload.len() < 12 {
            return None;
        }
        Some(self.payload[1] & 0x80 != 0)
    }
}
