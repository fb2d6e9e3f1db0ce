use rand::RngExt;

/// Size of the RTP fixed header in bytes (RFC 3550 §5.1).
pub const RTP_HEADER_LEN: usize = 12;

/// IP + UDP header bytes reserved out of the MTU.
pub const TRANSPORT_OVERHEAD: usize = 28;

/// Default network MTU.
pub const DEFAULT_MTU: usize = 1500;

/// Per-track RTP header state (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The sequence counter starts at 0 and is incremented *before* each
/// header is written, so the first packet of a fresh track carries 1.
/// Timestamps are supplied per access unit by the packetizer.
#[derive(Debug)]
pub struct RtpHeader {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    sequence: u16,
}

impl RtpHeader {
    pub fn new(pt: u8, ssrc: u32) -> Self {
        tracing::debug!(
            pt,
            ssrc = format_args!("{:#010X}", ssrc),
            "RTP header state created"
        );
        Self {
            pt,
            ssrc,
            sequence: 0,
        }
    }

    /// Create with a random SSRC (RFC 3550 §8.1).
    pub fn with_random_ssrc(pt: u8) -> Self {
        let ssrc = rand::rng().random::<u32>();
        Self::new(pt, ssrc)
    }

    /// Sequence number carried by the most recently written header.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Advance the sequence number and serialize a 12-byte fixed header.
    pub fn write(&mut self, marker: bool, timestamp: u32) -> [u8; RTP_HEADER_LEN] {
        self.sequence = self.sequence.wrapping_add(1);

        let mut header = [0u8; RTP_HEADER_LEN];
        header[0] = 2 << 6;
        header[1] = ((marker as u8) << 7) | (self.pt & 0x7f);
        header[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        header[4..8].copy_from_slice(&timestamp.to_be_bytes());
        header[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        header
    }
}

/// Convert a presentation time in microseconds to media clock ticks.
pub fn media_timestamp(presentation_time_us: u64, clock_rate: u32) -> u32 {
    (presentation_time_us as u128 * clock_rate as u128 / 1_000_000) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header() -> RtpHeader {
        RtpHeader::new(96, 0xAABBCCDD)
    }

    #[test]
    fn version_is_2() {
        let mut h = make_header();
        assert_eq!(h.write(false, 0)[0] >> 6, 2);
    }

    #[test]
    fn marker_and_payload_type() {
        let mut h = make_header();
        let plain = h.write(false, 0);
        assert_eq!(plain[1], 96);
        let marked = h.write(true, 0);
        assert_eq!(marked[1], 0x80 | 96);
    }

    #[test]
    fn first_packet_carries_one() {
        let mut h = make_header();
        let buf = h.write(false, 0);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 1);
        assert_eq!(h.sequence(), 1);
    }

    #[test]
    fn sequence_wraps_after_65536_packets() {
        let mut h = make_header();
        let mut last = 0;
        for _ in 0..65537 {
            let buf = h.write(false, 0);
            last = u16::from_be_bytes([buf[2], buf[3]]);
        }
        assert_eq!(last, 1);
    }

    #[test]
    fn timestamp_and_ssrc_written() {
        let mut h = make_header();
        let buf = h.write(false, 0x00A9_8AC7);
        assert_eq!(&buf[4..8], &[0x00, 0xA9, 0x8A, 0xC7]);
        assert_eq!(&buf[8..12], &[0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn media_timestamp_uses_clock_rate() {
        assert_eq!(media_timestamp(123_456_789, 90_000), 11_111_111);
        assert_eq!(media_timestamp(1_000_000, 44_100), 44_100);
    }

    #[test]
    fn random_ssrc_differs() {
        let h1 = RtpHeader::with_random_ssrc(96);
        let h2 = RtpHeader::with_random_ssrc(96);
        assert_ne!(h1.ssrc, h2.ssrc);
    }
}
