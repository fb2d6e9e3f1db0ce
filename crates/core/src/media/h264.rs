use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::rtp::{self, RtpHeader};
use super::{FrameInfo, PacketBudget, Packetizer, VideoConfig, nal};
use crate::frame::{MediaTrack, NetworkFrame};

pub const NAL_IDR: u8 = 5;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;
const NAL_STAP_A: u8 = 24;
const NAL_FU_A: u8 = 28;

/// FU indicator + FU header.
const FU_A_LEN: usize = 2;

const CLOCK_RATE: u32 = 90000;

/// H.264 RTP packetizer (RFC 6184).
///
/// Three packet shapes are produced:
///
/// - **STAP-A** (§5.7.1): SPS and PPS aggregated in one packet, sent once
///   per session right before the first keyframe. RTP timestamp 0, no
///   marker.
///
///   ```text
///   [F|NRI|Type=24] [SPS len (u16 BE)] [SPS] [PPS len (u16 BE)] [PPS]
///   ```
///
/// - **Single NAL Unit** (§5.6): NALs whose packet fits `mtu - 28` bytes
///   are sent as-is after the RTP header.
///
/// - **FU-A** (§5.8): larger NALs are split; the NAL header byte is
///   replaced by a 2-byte FU indicator/header:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]
///   FU header:     [S|E|R|NAL_Type]
///   ```
///
/// The marker bit is set on the last packet of the access unit.
#[derive(Debug)]
pub struct H264Packetizer {
    header: RtpHeader,
    budget: PacketBudget,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    config_sent: bool,
}

impl H264Packetizer {
    pub fn new(pt: u8, ssrc: u32, budget: PacketBudget) -> Self {
        Self {
            header: RtpHeader::new(pt, ssrc),
            budget,
            sps: None,
            pps: None,
            config_sent: false,
        }
    }

    pub fn with_random_ssrc(pt: u8, budget: PacketBudget) -> Self {
        Self {
            header: RtpHeader::with_random_ssrc(pt),
            budget,
            sps: None,
            pps: None,
            config_sent: false,
        }
    }

    /// Parameter sets to aggregate ahead of the first keyframe.
    pub fn with_config(mut self, config: &VideoConfig) -> Self {
        self.sps = Some(config.sps.clone());
        self.pps = Some(config.pps.clone());
        self
    }

    fn capture_parameter_sets(&mut self, units: &[&[u8]]) {
        for nal in units {
            match nal[0] & 0x1f {
                NAL_SPS => {
                    tracing::debug!(bytes = nal.len(), "H.264 SPS captured from bitstream");
                    self.sps = Some(nal.to_vec());
                }
                NAL_PPS => {
                    tracing::debug!(bytes = nal.len(), "H.264 PPS captured from bitstream");
                    self.pps = Some(nal.to_vec());
                }
                _ => {}
            }
        }
    }

    fn frame(&self, packet: Vec<u8>, timestamp: u32) -> NetworkFrame {
        NetworkFrame::new(packet, timestamp, self.budget.channel, MediaTrack::Video)
    }

    /// STAP-A packet carrying SPS and PPS, if both are known.
    fn stap_a(&mut self) -> Option<NetworkFrame> {
        let (sps, pps) = (self.sps.as_deref()?, self.pps.as_deref()?);
        if sps.is_empty() || pps.is_empty() {
            return None;
        }
        let nri = (sps[0] & 0x60).max(pps[0] & 0x60);
        let mut payload = Vec::with_capacity(1 + 4 + sps.len() + pps.len());
        payload.push(nri | NAL_STAP_A);
        for unit in [sps, pps] {
            payload.extend_from_slice(&(unit.len() as u16).to_be_bytes());
            payload.extend_from_slice(unit);
        }

        let hdr = self.header.write(false, 0);
        let mut packet = Vec::with_capacity(rtp::RTP_HEADER_LEN + payload.len());
        packet.extend_from_slice(&hdr);
        packet.extend_from_slice(&payload);
        Some(self.frame(packet, 0))
    }

    /// Packetize one NAL unit as a single packet or FU-A fragments.
    fn packetize_nal(&mut self, nal_unit: &[u8], is_last_nal: bool, timestamp: u32) -> Vec<NetworkFrame> {
        let mut frames = Vec::new();
        if nal_unit.is_empty() {
            return frames;
        }

        if rtp::RTP_HEADER_LEN + nal_unit.len() <= self.budget.max_packet() {
            let hdr = self.header.write(is_last_nal, timestamp);
            let mut packet = Vec::with_capacity(rtp::RTP_HEADER_LEN + nal_unit.len());
            packet.extend_from_slice(&hdr);
            packet.extend_from_slice(nal_unit);
            frames.push(self.frame(packet, timestamp));
            return frames;
        }

        let nal_header = nal_unit[0];
        let nal_type = nal_header & 0x1f;
        let fu_indicator = (nal_header & 0xe0) | NAL_FU_A;
        let payload = &nal_unit[1..];
        let max_fragment = self.budget.max_payload(FU_A_LEN);

        let mut chunks = payload.chunks(max_fragment).peekable();
        let mut first = true;
        while let Some(chunk) = chunks.next() {
            let last_fragment = chunks.peek().is_none();
            let start_bit = if first { 0x80 } else { 0x00 };
            let end_bit = if last_fragment { 0x40 } else { 0x00 };

            let hdr = self.header.write(is_last_nal && last_fragment, timestamp);
            let mut packet = Vec::with_capacity(rtp::RTP_HEADER_LEN + FU_A_LEN + chunk.len());
            packet.extend_from_slice(&hdr);
            packet.push(fu_indicator);
            packet.push(start_bit | end_bit | nal_type);
            packet.extend_from_slice(chunk);
            frames.push(self.frame(packet, timestamp));
            first = false;
        }

        tracing::trace!(
            nal_type,
            nal_size = nal_unit.len(),
            fragments = frames.len(),
            "FU-A fragmented NAL unit"
        );
        frames
    }
}

impl Packetizer for H264Packetizer {
    fn packetize(&mut self, data: &[u8], info: &FrameInfo) -> Vec<NetworkFrame> {
        let nal_units = nal::split_annex_b(data);
        if info.config {
            self.capture_parameter_sets(&nal_units);
            return Vec::new();
        }
        if nal_units.is_empty() {
            return Vec::new();
        }

        if self.sps.is_none() || self.pps.is_none() {
            self.capture_parameter_sets(&nal_units);
        }

        let timestamp = rtp::media_timestamp(info.presentation_time_us, CLOCK_RATE);
        let keyframe = info.keyframe || nal_units.iter().any(|n| n[0] & 0x1f == NAL_IDR);
        let mut frames = Vec::new();

        if keyframe
            && !self.config_sent
            && let Some(stap) = self.stap_a()
        {
            frames.push(stap);
            self.config_sent = true;
        }

        let count = nal_units.len();
        for (i, nal) in nal_units.into_iter().enumerate() {
            frames.append(&mut self.packetize_nal(nal, i == count - 1, timestamp));
        }

        tracing::trace!(
            nal_count = count,
            rtp_packets = frames.len(),
            frame_bytes = data.len(),
            seq = self.header.sequence(),
            ts = timestamp,
            "H.264 access unit packetized"
        );
        frames
    }

    fn codec_name(&self) -> &'static str {
        "H264"
    }

    fn clock_rate(&self) -> u32 {
        CLOCK_RATE
    }

    fn payload_type(&self) -> u8 {
        self.header.pt
    }

    fn track(&self) -> MediaTrack {
        MediaTrack::Video
    }

    fn ssrc(&self) -> u32 {
        self.header.ssrc
    }

    fn sequence(&self) -> u16 {
        self.header.sequence()
    }
}

/// profile-level-id from the SPS (RFC 6184 §8.1): profile_idc,
/// constraint flags and level_idc as six hex digits.
pub fn profile_level_id(sps: &[u8]) -> Option<String> {
    if sps.len() < 4 {
        return None;
    }
    Some(format!("{:02x}{:02x}{:02x}", sps[1], sps[2], sps[3]))
}

/// SDP `a=fmtp` line for an H.264 track (RFC 6184 §8.2.1).
pub fn sdp_fmtp(pt: u8, config: &VideoConfig) -> String {
    let mut fmtp = format!("a=fmtp:{} packetization-mode=1", pt);
    if let Some(pl) = profile_level_id(&config.sps) {
        fmtp.push_str(&format!(";profile-level-id={}", pl));
    }
    fmtp.push_str(&format!(
        ";sprop-parameter-sets={},{}",
        BASE64_STANDARD.encode(&config.sps),
        BASE64_STANDARD.encode(&config.pps)
    ));
    fmtp
}
