//! RTCP Sender Report generation (RFC 3550 §6.4.1).
//!
//! The generator observes every outgoing RTP frame. It keeps cumulative
//! packet and payload octet counts per track and, on the first frame of a
//! track and then whenever the report interval has elapsed for that track,
//! emits one Sender Report on the track's RTCP channel:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|  RC=0   |    PT=200     |          length = 6           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         SSRC of sender                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |              NTP timestamp, most significant word             |
//! |             NTP timestamp, least significant word             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         RTP timestamp                         |
//! |                     sender's packet count                     |
//! |                      sender's octet count                     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::frame::{MediaTrack, NetworkFrame};
use crate::media::rtp::RTP_HEADER_LEN;

/// Size of a Sender Report without report blocks.
pub const SENDER_REPORT_LEN: usize = 28;

/// Default interval between reports of one track.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(3000);

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Wall clock used for both the report cadence and the NTP timestamp.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Convert Unix milliseconds to a 64-bit NTP timestamp `(seconds, fraction)`.
pub fn ntp_timestamp(unix_millis: u64) -> (u32, u32) {
    let seconds = unix_millis / 1000 + NTP_UNIX_OFFSET;
    let fraction = (unix_millis % 1000) * (1u64 << 32) / 1000;
    (seconds as u32, fraction as u32)
}

#[derive(Debug, Default, Clone, Copy)]
struct TrackReport {
    last_report: Option<u64>,
    packets: u32,
    octets: u32,
}

/// Cadence-driven Sender Report builder for one session.
pub struct ReportGenerator {
    interval_ms: u64,
    clock: Arc<dyn Clock>,
    audio: TrackReport,
    video: TrackReport,
}

impl ReportGenerator {
    pub fn new(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            clock,
            audio: TrackReport::default(),
            video: TrackReport::default(),
        }
    }

    pub fn with_system_clock(interval: Duration) -> Self {
        Self::new(interval, Arc::new(SystemClock))
    }

    fn track_mut(&mut self, track: MediaTrack) -> &mut TrackReport {
        match track {
            MediaTrack::Audio => &mut self.audio,
            MediaTrack::Video => &mut self.video,
        }
    }

    /// Account for one outgoing frame and return a Sender Report if one is due.
    ///
    /// The SSRC is taken from the frame's RTP header and the report is
    /// routed on the channel right after the frame's RTP channel. RTCP
    /// frames and anything shorter than an RTP header are ignored.
    pub fn on_frame(&mut self, frame: &NetworkFrame) -> Option<NetworkFrame> {
        if frame.is_rtcp() || frame.len() < RTP_HEADER_LEN {
            return None;
        }

        let now = self.clock.now_millis();
        let interval = self.interval_ms;
        let state = self.track_mut(frame.track());
        state.packets = state.packets.wrapping_add(1);
        state.octets = state
            .octets
            .wrapping_add((frame.len() - RTP_HEADER_LEN) as u32);

        let due = match state.last_report {
            None => true,
            Some(last) => now.saturating_sub(last) >= interval,
        };
        if !due {
            return None;
        }
        state.last_report = Some(now);
        let (packets, octets) = (state.packets, state.octets);

        let payload = frame.payload();
        let ssrc = u32::from_be_bytes([payload[8], payload[9], payload[10], payload[11]]);
        let report = sender_report(ssrc, now, frame.timestamp(), packets, octets);

        tracing::trace!(
            track = frame.track().as_str(),
            ssrc = format_args!("{:#010X}", ssrc),
            packets,
            octets,
            "sender report"
        );

        Some(NetworkFrame::new(
            report.to_vec(),
            frame.timestamp(),
            frame.channel() + 1,
            frame.track(),
        ))
    }

    /// Cumulative `(packets, octets)` for a track.
    pub fn counts(&self, track: MediaTrack) -> (u32, u32) {
        let state = match track {
            MediaTrack::Audio => &self.audio,
            MediaTrack::Video => &self.video,
        };
        (state.packets, state.octets)
    }

    /// Forget timers and counters, as on a fresh connection.
    pub fn reset(&mut self) {
        self.audio = TrackReport::default();
        self.video = TrackReport::default();
    }
}

/// Serialize a Sender Report with no report blocks.
pub fn sender_report(
    ssrc: u32,
    unix_millis: u64,
    rtp_timestamp: u32,
    packets: u32,
    octets: u32,
) -> [u8; SENDER_REPORT_LEN] {
    let (ntp_sec, ntp_frac) = ntp_timestamp(unix_millis);
    let mut buf = [0u8; SENDER_REPORT_LEN];
    buf[0] = 0x80;
    buf[1] = 200;
    buf[2..4].copy_from_slice(&6u16.to_be_bytes());
    buf[4..8].copy_from_slice(&ssrc.to_be_bytes());
    buf[8..12].copy_from_slice(&ntp_sec.to_be_bytes());
    buf[12..16].copy_from_slice(&ntp_frac.to_be_bytes());
    buf[16..20].copy_from_slice(&rtp_timestamp.to_be_bytes());
    buf[20..24].copy_from_slice(&packets.to_be_bytes());
    buf[24..28].copy_from_slice(&octets.to_be_bytes());
    buf
}
