//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! Produces the body of the ANNOUNCE request. The format:
//!
//! ```text
//! v=0                                   ← protocol version
//! o=- 0 0 IN IP4 127.0.0.1              ← origin
//! s=Unnamed                             ← session name
//! i=N/A                                 ← session information
//! c=IN IP4 <server host>                ← connection address
//! t=0 0                                 ← timing (live stream)
//! a=recvonly                            ← direction, from the server's view
//! m=video 0 RTP/AVP 96                  ← media description
//! a=rtpmap:96 H264/90000                ← codec/clock rate
//! a=fmtp:96 packetization-mode=1;...    ← codec parameters
//! a=control:streamid=0                  ← track control URL
//! ```
//!
//! Media sections are ordered by track index.

use crate::frame::{MediaTrack, TrackLayout};
use crate::media::{AUDIO_PAYLOAD_TYPE, AudioConfig, VIDEO_PAYLOAD_TYPE, VideoCodec, VideoConfig};
use crate::media::{aac, h264, h265};

/// Media parameters announced for one session.
#[derive(Debug, Clone, Copy)]
pub struct SdpMedia<'a> {
    pub video: Option<(VideoCodec, &'a VideoConfig)>,
    pub audio: Option<&'a AudioConfig>,
    pub layout: TrackLayout,
}

fn video_section(codec: VideoCodec, config: &VideoConfig, index: u8) -> Vec<String> {
    let pt = VIDEO_PAYLOAD_TYPE;
    let (name, fmtp) = match codec {
        VideoCodec::H264 => ("H264", h264::sdp_fmtp(pt, config)),
        VideoCodec::H265 => ("H265", h265::sdp_fmtp(pt, config)),
    };
    vec![
        format!("m=video 0 RTP/AVP {}", pt),
        format!("a=rtpmap:{} {}/90000", pt, name),
        fmtp,
        format!("a=control:streamid={}", index),
    ]
}

fn audio_section(config: &AudioConfig, index: u8) -> Vec<String> {
    let pt = AUDIO_PAYLOAD_TYPE;
    let [rtpmap, fmtp] = aac::sdp_lines(pt, config);
    vec![
        format!("m=audio 0 RTP/AVP {}", pt),
        rtpmap,
        fmtp,
        format!("a=control:streamid={}", index),
    ]
}

/// Generate the ANNOUNCE session description for `host`.
pub fn generate_sdp(host: &str, media: &SdpMedia<'_>) -> String {
    let mut sdp: Vec<String> = vec![
        "v=0".to_string(),
        "o=- 0 0 IN IP4 127.0.0.1".to_string(),
        "s=Unnamed".to_string(),
        "i=N/A".to_string(),
        format!("c=IN IP4 {}", host),
        "t=0 0".to_string(),
        "a=recvonly".to_string(),
    ];

    let mut sections: Vec<(u8, Vec<String>)> = Vec::with_capacity(2);
    if let Some((codec, config)) = media.video {
        let index = media.layout.index(MediaTrack::Video);
        sections.push((index, video_section(codec, config, index)));
    }
    if let Some(config) = media.audio {
        let index = media.layout.index(MediaTrack::Audio);
        sections.push((index, audio_section(config, index)));
    }
    sections.sort_by_key(|(index, _)| *index);
    for (_, lines) in sections {
        sdp.extend(lines);
    }

    tracing::debug!("SDP: {}", sdp.join("\r\n"));

    format!("{}\r\n", sdp.join("\r\n"))
}
