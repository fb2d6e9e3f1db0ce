//! H.265 (HEVC) RTP packetizer (RFC 7798).
//!
//! Differences from H.264 (RFC 6184):
//!
//! - **2-byte NAL unit header**; the NAL type is in bits 1..6 of the first
//!   byte.
//! - **Aggregation packet** (§4.4.2): payload header type 48, followed by
//!   length-prefixed NAL units.
//! - **Fragmentation unit** (§4.4.3): payload header type 49 (2 bytes) plus
//!   a 1-byte FU header `[S|E|FuType]`, so each fragment spends 3 bytes on
//!   indicators.
//! - **SDP** (§7.1): `sprop-vps`, `sprop-sps` and `sprop-pps`.

use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::rtp::{self, RtpHeader};
use super::{FrameInfo, PacketBudget, Packetizer, VideoConfig, nal};
use crate::frame::{MediaTrack, NetworkFrame};

pub const NAL_VPS: u8 = 32;
pub const NAL_SPS: u8 = 33;
pub const NAL_PPS: u8 = 34;
const NAL_AP: u8 = 48;
const NAL_FU: u8 = 49;

/// Payload header (2 bytes) + FU header (1 byte).
const FU_LEN: usize = 3;

const CLOCK_RATE: u32 = 90000;

fn nal_type(nal_unit: &[u8]) -> u8 {
    (nal_unit[0] >> 1) & 0x3f
}

/// IDR_W_RADL, IDR_N_LP and CRA pictures start a decodable GOP.
fn is_irap(nal_type: u8) -> bool {
    (19..=21).contains(&nal_type)
}

/// H.265 RTP packetizer (RFC 7798).
///
/// The aggregation packet carries the SPS and PPS once per session ahead
/// of the first keyframe; the VPS is announced through `sprop-vps`.
#[derive(Debug)]
pub struct H265Packetizer {
    header: RtpHeader,
    budget: PacketBudget,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    vps: Option<Vec<u8>>,
    config_sent: bool,
}

impl H265Packetizer {
    pub fn new(pt: u8, ssrc: u32, budget: PacketBudget) -> Self {
        Self {
            header: RtpHeader::new(pt, ssrc),
            budget,
            sps: None,
            pps: None,
            vps: None,
            config_sent: false,
        }
    }

    pub fn with_random_ssrc(pt: u8, budget: PacketBudget) -> Self {
        let mut p = Self::new(pt, 0, budget);
        p.header = RtpHeader::with_random_ssrc(pt);
        p
    }

    /// Parameter sets to aggregate ahead of the first keyframe.
    pub fn with_config(mut self, config: &VideoConfig) -> Self {
        self.sps = Some(config.sps.clone());
        self.pps = Some(config.pps.clone());
        self.vps = config.vps.clone();
        self
    }

    fn capture_parameter_sets(&mut self, units: &[&[u8]]) {
        for unit in units.iter().filter(|u| u.len() >= 2) {
            let slot = match nal_type(unit) {
                NAL_VPS => &mut self.vps,
                NAL_SPS => &mut self.sps,
                NAL_PPS => &mut self.pps,
                _ => continue,
            };
            *slot = Some(unit.to_vec());
            tracing::debug!(nal_type = nal_type(unit), bytes = unit.len(), "H.265 parameter set captured");
        }
    }

    fn frame(&self, packet: Vec<u8>, timestamp: u32) -> NetworkFrame {
        NetworkFrame::new(packet, timestamp, self.budget.channel, MediaTrack::Video)
    }

    /// Aggregation packet carrying SPS and PPS, if both are known.
    fn aggregation(&mut self) -> Option<NetworkFrame> {
        let (sps, pps) = (self.sps.as_deref()?, self.pps.as_deref()?);
        let mut payload = Vec::with_capacity(2 + 4 + sps.len() + pps.len());
        payload.push(NAL_AP << 1);
        payload.push(1);
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

    fn packetize_nal(&mut self, nal_unit: &[u8], is_last_nal: bool, timestamp: u32) -> Vec<NetworkFrame> {
        let mut frames = Vec::new();
        if nal_unit.len() < 2 {
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

        let fu_type = nal_type(nal_unit);
        let payload = &nal_unit[2..];
        let max_fragment = self.budget.max_payload(FU_LEN);

        let mut chunks = payload.chunks(max_fragment).peekable();
        let mut first = true;
        while let Some(chunk) = chunks.next() {
            let last_fragment = chunks.peek().is_none();
            let start_bit = if first { 0x80 } else { 0x00 };
            let end_bit = if last_fragment { 0x40 } else { 0x00 };

            let hdr = self.header.write(is_last_nal && last_fragment, timestamp);
            let mut packet = Vec::with_capacity(rtp::RTP_HEADER_LEN + FU_LEN + chunk.len());
            packet.extend_from_slice(&hdr);
            packet.push(NAL_FU << 1);
            packet.push(1);
            packet.push(start_bit | end_bit | fu_type);
            packet.extend_from_slice(chunk);
            frames.push(self.frame(packet, timestamp));
            first = false;
        }

        tracing::trace!(
            nal_type = fu_type,
            nal_size = nal_unit.len(),
            fragments = frames.len(),
            "FU fragmented NAL unit"
        );
        frames
    }
}

impl Packetizer for H265Packetizer {
    fn packetize(&mut self, data: &[u8], info: &FrameInfo) -> Vec<NetworkFrame> {
        let nal_units: Vec<&[u8]> = nal::split_annex_b(data)
            .into_iter()
            .filter(|u| u.len() >= 2)
            .collect();
        if info.config {
            self.capture_parameter_sets(&nal_units);
            return Vec::new();
        }
        if nal_units.is_empty() {
            return Vec::new();
        }

        let timestamp = rtp::media_timestamp(info.presentation_time_us, CLOCK_RATE);
        let keyframe = info.keyframe || nal_units.iter().any(|n| is_irap(nal_type(n)));
        let mut frames = Vec::new();

        if keyframe
            && !self.config_sent
            && let Some(ap) = self.aggregation()
        {
            frames.push(ap);
            self.config_sent = true;
        }

        let count = nal_units.len();
        for (i, nal) in nal_units.into_iter().enumerate() {
            frames.append(&mut self.packetize_nal(nal, i == count - 1, timestamp));
        }

        tracing::trace!(
            nal_count = count,
            rtp_packets = frames.len(),
            seq = self.header.sequence(),
            ts = timestamp,
            "H.265 access unit packetized"
        );
        frames
    }

    fn codec_name(&self) -> &'static str {
        "H265"
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

/// SDP `a=fmtp` line for an H.265 track (RFC 7798 §7.1).
pub fn sdp_fmtp(pt: u8, config: &VideoConfig) -> String {
    let vps = config.vps.as_deref().unwrap_or_default();
    format!(
        "a=fmtp:{} sprop-vps={};sprop-sps={};sprop-pps={}",
        pt,
        BASE64_STANDARD.encode(vps),
        BASE64_STANDARD.encode(&config.sps),
        BASE64_STANDARD.encode(&config.pps)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: [u8; 6] = [0x00, 0x00, 0x00, 0x01, 0x05, 0x00];
    const SPS: [u8; 7] = [0x00, 0x00, 0x00, 0x01, 0x02, 0x03, 0x04];
    const PPS: [u8; 7] = [0x00, 0x00, 0x00, 0x01, 0x0A, 0x0B, 0x0C];
    const VPS: [u8; 7] = [0x00, 0x00, 0x00, 0x01, 0x0D, 0x0E, 0x0F];
    const PTS_US: u64 = 123_456_789;
    const RTP_TS: [u8; 4] = [0x00, 0xA9, 0x8A, 0xC7];
    const SSRC: [u8; 4] = [0x07, 0x5B, 0xCD, 0x15];

    fn make_packetizer() -> H265Packetizer {
        // Parameter sets are fed verbatim (start codes included).
        let mut p = H265Packetizer::new(96, 123_456_789, PacketBudget::new(1500, 2));
        p.sps = Some(SPS.to_vec());
        p.pps = Some(PPS.to_vec());
        p.vps = Some(VPS.to_vec());
        p
    }

    fn expected_aggregation() -> Vec<u8> {
        let mut ap = vec![0x80, 0x60, 0x00, 0x01, 0, 0, 0, 0];
        ap.extend_from_slice(&SSRC);
        ap.extend_from_slice(&[0x60, 0x01, 0x00, 0x07]);
        ap.extend_from_slice(&SPS);
        ap.extend_from_slice(&[0x00, 0x07]);
        ap.extend_from_slice(&PPS);
        ap
    }

    #[test]
    fn small_unit_yields_aggregation_and_single_packet() {
        let unit = [&HEADER[..], &[0u8; 300]].concat();
        let mut p = make_packetizer();
        let frames = p.packetize(&unit, &FrameInfo::keyframe(PTS_US));

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), PPS.len() * 2 + 6 + 12);
        assert_eq!(frames[0].payload(), expected_aggregation().as_slice());
        assert_eq!(frames[0].timestamp(), 0);
        assert_eq!(frames[0].channel(), 2);

        let mut rtp = vec![0x80, 0xE0, 0x00, 0x02];
        rtp.extend_from_slice(&RTP_TS);
        rtp.extend_from_slice(&SSRC);
        rtp.extend_from_slice(&[0x05, 0x00]);
        rtp.extend_from_slice(&[0u8; 300]);
        assert_eq!(frames[1].len(), 12 + 2 + (unit.len() - HEADER.len()));
        assert_eq!(frames[1].payload(), rtp.as_slice());
        assert_eq!(frames[1].timestamp(), 11_111_111);
    }

    #[test]
    fn big_unit_yields_aggregation_and_two_fragments() {
        let unit = [&HEADER[..], &[0u8; 2500]].concat();
        let mut p = make_packetizer();
        let frames = p.packetize(&unit, &FrameInfo::keyframe(PTS_US));
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].payload(), expected_aggregation().as_slice());

        let chunk1 = 1500 - 28 - 12 - 3;
        let mut first = vec![0x80, 0x60, 0x00, 0x02];
        first.extend_from_slice(&RTP_TS);
        first.extend_from_slice(&SSRC);
        first.extend_from_slice(&[98, 1, 0x82]);
        first.extend_from_slice(&unit[HEADER.len()..HEADER.len() + chunk1]);
        assert_eq!(frames[1].payload(), first.as_slice());

        let mut second = vec![0x80, 0xE0, 0x00, 0x03];
        second.extend_from_slice(&RTP_TS);
        second.extend_from_slice(&SSRC);
        second.extend_from_slice(&[98, 1, 0x42]);
        second.extend_from_slice(&unit[HEADER.len() + chunk1..]);
        assert_eq!(frames[2].payload(), second.as_slice());

        let carried: usize = frames[1..].iter().map(|f| f.len() - 12 - 3).sum();
        assert_eq!(carried, unit.len() - HEADER.len());
    }

    #[test]
    fn fragment_count_matches_budget() {
        let mut p = make_packetizer();
        for payload_len in [1458usize, 1459, 2914, 2915, 10_000] {
            let unit = [&[0u8, 0, 0, 1, 0x02, 0x01][..], &vec![0xAB; payload_len]].concat();
            let frames = p.packetize(&unit, &FrameInfo::new(0));
            if payload_len + 2 + 12 <= 1472 {
                assert_eq!(frames.len(), 1);
            } else {
                assert_eq!(frames.len(), payload_len.div_ceil(1457));
            }
        }
    }

    #[test]
    fn aggregation_sent_once_per_session() {
        let unit = [&HEADER[..], &[0u8; 10]].concat();
        let mut p = make_packetizer();
        let mut aggregations = 0;
        for i in 0..5 {
            let frames = p.packetize(&unit, &FrameInfo::keyframe(i * 33_000));
            aggregations += frames.iter().filter(|f| f.payload()[12] == 0x60).count();
        }
        assert_eq!(aggregations, 1);
    }

    #[test]
    fn non_key_unit_before_config_sent_has_no_aggregation() {
        let mut p = make_packetizer();
        let frames = p.packetize(&[0, 0, 0, 1, 0x02, 0x01, 0xFF], &FrameInfo::new(0));
        assert_eq!(frames.len(), 1);
        let key = p.packetize(&[0, 0, 0, 1, 0x26, 0x01, 0xFF], &FrameInfo::new(0));
        assert_eq!(key.len(), 2, "IDR_W_RADL NAL type triggers the aggregation");
    }

    #[test]
    fn fmtp_includes_all_parameter_sets() {
        let cfg = VideoConfig::new(&SPS, &PPS, Some(&VPS));
        let fmtp = sdp_fmtp(96, &cfg);
        assert_eq!(
            fmtp,
            "a=fmtp:96 sprop-vps=DQ4P;sprop-sps=AgME;sprop-pps=CgsM"
        );
    }
}
