//! AAC RTP packetizer (RFC 3640, `mode=AAC-hbr`).
//!
//! Each packet carries one AU-headers section:
//!
//! ```text
//! AU-headers-length (16 bits) = 16
//! AU-size (13 bits) | AU-Index (3 bits) = 0
//! ```
//!
//! followed by the raw AAC frame. ADTS headers emitted by some encoders are
//! stripped first. Oversize frames are split across packets (§3.2.3); every
//! fragment repeats the AU header with the full AU size and only the last
//! one sets the marker bit.

use super::rtp::{self, RtpHeader};
use super::{AudioConfig, FrameInfo, PacketBudget, Packetizer};
use crate::frame::{MediaTrack, NetworkFrame};

const AU_HEADER_LEN: usize = 4;

/// Sampling frequency index table (ISO/IEC 14496-3 §1.6.3.4).
const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Drop an ADTS header (7 bytes, 9 with CRC) if the frame starts with one.
fn strip_adts(data: &[u8]) -> &[u8] {
    if data.len() >= 7 && data[0] == 0xFF && data[1] & 0xF0 == 0xF0 {
        let header_len = if data[1] & 0x01 == 0 { 9 } else { 7 };
        return data.get(header_len..).unwrap_or_default();
    }
    data
}

#[derive(Debug)]
pub struct AacPacketizer {
    header: RtpHeader,
    budget: PacketBudget,
    sample_rate: u32,
}

impl AacPacketizer {
    pub fn new(pt: u8, ssrc: u32, sample_rate: u32, budget: PacketBudget) -> Self {
        Self {
            header: RtpHeader::new(pt, ssrc),
            budget,
            sample_rate,
        }
    }

    pub fn with_random_ssrc(pt: u8, sample_rate: u32, budget: PacketBudget) -> Self {
        Self {
            header: RtpHeader::with_random_ssrc(pt),
            budget,
            sample_rate,
        }
    }

    fn au_header(au_size: usize) -> [u8; AU_HEADER_LEN] {
        let size = (au_size & 0x1fff) as u16;
        [0x00, 0x10, (size >> 5) as u8, ((size << 3) & 0xf8) as u8]
    }
}

impl Packetizer for AacPacketizer {
    fn packetize(&mut self, data: &[u8], info: &FrameInfo) -> Vec<NetworkFrame> {
        let au = strip_adts(data);
        if info.config || au.is_empty() {
            return Vec::new();
        }

        let timestamp = rtp::media_timestamp(info.presentation_time_us, self.sample_rate);
        let au_header = Self::au_header(au.len());
        let max_chunk = self.budget.max_payload(AU_HEADER_LEN);

        let mut frames = Vec::with_capacity(au.len().div_ceil(max_chunk));
        let mut chunks = au.chunks(max_chunk).peekable();
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            let hdr = self.header.write(last, timestamp);
            let mut packet = Vec::with_capacity(rtp::RTP_HEADER_LEN + AU_HEADER_LEN + chunk.len());
            packet.extend_from_slice(&hdr);
            packet.extend_from_slice(&au_header);
            packet.extend_from_slice(chunk);
            frames.push(NetworkFrame::new(
                packet,
                timestamp,
                self.budget.channel,
                MediaTrack::Audio,
            ));
        }

        tracing::trace!(
            au_size = au.len(),
            rtp_packets = frames.len(),
            seq = self.header.sequence(),
            ts = timestamp,
            "AAC frame packetized"
        );
        frames
    }

    fn codec_name(&self) -> &'static str {
        "MPEG4-GENERIC"
    }

    fn clock_rate(&self) -> u32 {
        self.sample_rate
    }

    fn payload_type(&self) -> u8 {
        self.header.pt
    }

    fn track(&self) -> MediaTrack {
        MediaTrack::Audio
    }

    fn ssrc(&self) -> u32 {
        self.header.ssrc
    }

    fn sequence(&self) -> u16 {
        self.header.sequence()
    }
}

/// AudioSpecificConfig for AAC-LC as a hex string (RFC 3640 `config=`).
pub fn audio_specific_config(config: &AudioConfig) -> String {
    let freq_index = SAMPLE_RATES
        .iter()
        .position(|&rate| rate == config.sample_rate)
        .unwrap_or(4) as u16;
    let object_type: u16 = 2;
    let asc = (object_type << 11) | (freq_index << 7) | ((config.channels() as u16) << 3);
    format!("{:04X}", asc)
}

/// SDP `a=rtpmap` and `a=fmtp` lines for an AAC track.
pub fn sdp_lines(pt: u8, config: &AudioConfig) -> [String; 2] {
    [
        format!(
            "a=rtpmap:{} MPEG4-GENERIC/{}/{}",
            pt,
            config.sample_rate,
            config.channels()
        ),
        format!(
            "a=fmtp:{} streamtype=5;profile-level-id=15;mode=AAC-hbr;config={};SizeLength=13;IndexLength=3;IndexDeltaLength=3",
            pt,
            audio_specific_config(config)
        ),
    ]
}
