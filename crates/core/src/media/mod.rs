//! Media codecs and RTP packetization.
//!
//! This module provides the [`Packetizer`] trait and codec-specific
//! implementations that convert encoded access units into
//! [`NetworkFrame`]s ready for the transport.
//!
//! ## RTP overview (RFC 3550)
//!
//! Each encoded frame is split into one or more RTP packets. Every packet
//! carries a 12-byte fixed header ([`rtp::RtpHeader`]) with a wrapping
//! 16-bit sequence number, a 32-bit media timestamp, the SSRC and a marker
//! bit set on the last packet of an access unit.
//!
//! ## Size ceiling
//!
//! A packet must fit in `mtu - 28` bytes (IP + UDP headers). Video NAL units
//! that do not fit are fragmented (FU-A / FU); parameter sets are sent once
//! per session in a single aggregation packet ahead of the first keyframe.
//!
//! | Codec | Module | RFC |
//! |-------|--------|-----|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) |
//! | H.265 | [`h265`] | [RFC 7798](https://tools.ietf.org/html/rfc7798) |
//! | AAC   | [`aac`]  | [RFC 3640](https://tools.ietf.org/html/rfc3640) |

pub mod aac;
pub mod h264;
pub mod h265;
pub mod nal;
pub mod rtp;

use crate::frame::{MediaTrack, NetworkFrame};

/// RTP payload type used for the video track.
pub const VIDEO_PAYLOAD_TYPE: u8 = 96;
/// RTP payload type used for the audio track.
pub const AUDIO_PAYLOAD_TYPE: u8 = 97;

/// Metadata delivered by the encoder with each access unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameInfo {
    /// Presentation time in microseconds.
    pub presentation_time_us: u64,
    /// The unit starts a new GOP (IDR / IRAP).
    pub keyframe: bool,
    /// The unit carries codec configuration (parameter sets) only.
    pub config: bool,
}

impl FrameInfo {
    pub fn new(presentation_time_us: u64) -> Self {
        Self {
            presentation_time_us,
            ..Self::default()
        }
    }

    pub fn keyframe(presentation_time_us: u64) -> Self {
        Self {
            presentation_time_us,
            keyframe: true,
            config: false,
        }
    }

    pub fn config(presentation_time_us: u64) -> Self {
        Self {
            presentation_time_us,
            keyframe: false,
            config: true,
        }
    }
}

/// Video codec negotiated in the SDP.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
}

/// Video parameter sets, stored without Annex B start codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoConfig {
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
    pub vps: Option<Vec<u8>>,
}

impl VideoConfig {
    /// Build from encoder output buffers, dropping any leading start code.
    pub fn new(sps: &[u8], pps: &[u8], vps: Option<&[u8]>) -> Self {
        Self {
            sps: nal::strip_start_code(sps).to_vec(),
            pps: nal::strip_start_code(pps).to_vec(),
            vps: vps.map(|v| nal::strip_start_code(v).to_vec()),
        }
    }

    /// Extract parameter sets from an Annex B configuration unit.
    ///
    /// Returns `None` unless SPS and PPS (and VPS for H.265) are present.
    pub fn from_annex_b(codec: VideoCodec, data: &[u8]) -> Option<Self> {
        let (mut sps, mut pps, mut vps) = (None, None, None);
        for unit in nal::split_annex_b(data) {
            match codec {
                VideoCodec::H264 => match unit[0] & 0x1f {
                    h264::NAL_SPS => sps = Some(unit.to_vec()),
                    h264::NAL_PPS => pps = Some(unit.to_vec()),
                    _ => {}
                },
                VideoCodec::H265 => match (unit[0] >> 1) & 0x3f {
                    h265::NAL_VPS => vps = Some(unit.to_vec()),
                    h265::NAL_SPS => sps = Some(unit.to_vec()),
                    h265::NAL_PPS => pps = Some(unit.to_vec()),
                    _ => {}
                },
            }
        }
        if codec == VideoCodec::H265 && vps.is_none() {
            return None;
        }
        Some(Self {
            sps: sps?,
            pps: pps?,
            vps,
        })
    }
}

/// Audio parameters announced in the SDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub stereo: bool,
}

impl AudioConfig {
    pub fn channels(&self) -> u8 {
        if self.stereo { 2 } else { 1 }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 32000,
            stereo: true,
        }
    }
}

/// Codec-specific RTP packetizer for one elementary stream.
///
/// Each returned [`NetworkFrame`] is a complete RTP packet: 12-byte header
/// followed by the codec payload, tagged with the track's RTP channel.
/// A non-empty access unit always yields at least one frame; configuration
/// units are absorbed as parameter sets and yield none.
pub trait Packetizer: Send {
    /// Packetize one encoded access unit.
    fn packetize(&mut self, data: &[u8], info: &FrameInfo) -> Vec<NetworkFrame>;

    /// Codec name for the SDP `a=rtpmap` attribute.
    fn codec_name(&self) -> &'static str;

    /// RTP clock rate in Hz.
    fn clock_rate(&self) -> u32;

    /// RTP payload type number.
    fn payload_type(&self) -> u8;

    /// Track this packetizer produces frames for.
    fn track(&self) -> MediaTrack;

    /// Synchronization source written into every packet.
    fn ssrc(&self) -> u32;

    /// Sequence number of the last packet produced.
    fn sequence(&self) -> u16;
}

/// Shared size budget and routing for RTP packetizers.
#[derive(Debug, Clone, Copy)]
pub struct PacketBudget {
    /// Network MTU; packets never exceed `mtu - 28` bytes.
    pub mtu: usize,
    /// Interleaved RTP channel the frames are routed on.
    pub channel: u8,
}

impl PacketBudget {
    pub fn new(mtu: usize, channel: u8) -> Self {
        Self { mtu, channel }
    }

    /// Maximum size of a whole RTP packet (header included).
    pub fn max_packet(&self) -> usize {
        self.mtu.saturating_sub(rtp::TRANSPORT_OVERHEAD)
    }

    /// Payload bytes available per packet after the RTP header and
    /// `indicator_len` codec-specific bytes.
    pub fn max_payload(&self, indicator_len: usize) -> usize {
        self.max_packet()
            .saturating_sub(rtp::RTP_HEADER_LEN + indicator_len)
            .max(1)
    }
}

impl Default for PacketBudget {
    fn default() -> Self {
        Self::new(rtp::DEFAULT_MTU, 0)
    }
}
