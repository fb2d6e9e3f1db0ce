//! Integration tests: publish to a scripted in-process RTSP server.
//!
//! The server answers OPTIONS, ANNOUNCE, SETUP, RECORD and TEARDOWN, and
//! records every request and interleaved frame it receives until the client
//! closes the connection. It can hang up after RECORD to simulate a server
//! going away, in which case it waits for the client to come back.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rtsp_push::{
    ClientConfig, ConnectionListener, FrameInfo, MediaTrack, Protocol, RtspClient, SessionState,
};

const WAIT: Duration = Duration::from_secs(5);

const SPS: &[u8] = &[0x67, 0x42, 0x00, 0x1e, 0xab, 0x40, 0x50];
const PPS: &[u8] = &[0x68, 0xce, 0x38, 0x80];

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Started(String),
    Success,
    Failed(String),
    AuthError,
    AuthSuccess,
    Disconnected,
}

struct Recorder(Mutex<mpsc::Sender<Event>>);

impl Recorder {
    fn emit(&self, event: Event) {
        let _ = self.0.lock().unwrap().send(event);
    }
}

impl ConnectionListener for Recorder {
    fn on_connection_started(&self, url: &str) {
        self.emit(Event::Started(url.to_string()));
    }
    fn on_connection_success(&self) {
        self.emit(Event::Success);
    }
    fn on_connection_failed(&self, reason: &str) {
        self.emit(Event::Failed(reason.to_string()));
    }
    fn on_auth_error(&self) {
        self.emit(Event::AuthError);
    }
    fn on_auth_success(&self) {
        self.emit(Event::AuthSuccess);
    }
    fn on_disconnect(&self) {
        self.emit(Event::Disconnected);
    }
}

fn client_with(config: ClientConfig) -> (RtspClient, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel();
    let client = RtspClient::with_config(config, Arc::new(Recorder(Mutex::new(tx))));
    (client, rx)
}

fn next_event(rx: &mpsc::Receiver<Event>) -> Event {
    rx.recv_timeout(WAIT).expect("listener event")
}

#[derive(Default, Clone)]
struct Script {
    /// `WWW-Authenticate` value sent with a 401 to the first ANNOUNCE.
    challenge: Option<&'static str>,
    /// Answer the named method with this status instead of 200.
    fail: Option<(&'static str, u16)>,
    /// Close this many connections right after answering RECORD.
    hang_ups: usize,
    /// Advertised in every SETUP reply.
    server_ports: Option<(u16, u16)>,
}

#[derive(Debug, Default)]
struct Capture {
    requests: Vec<String>,
    frames: Vec<(u8, Vec<u8>)>,
}

impl Capture {
    fn methods(&self) -> Vec<&str> {
        self.requests
            .iter()
            .map(|r| r.split(' ').next().unwrap_or(""))
            .collect()
    }
}

fn fake_server(script: Script) -> (u16, JoinHandle<Capture>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let mut capture = Capture::default();
        for connection in 0..=script.hang_ups {
            let Ok((stream, _)) = listener.accept() else {
                break;
            };
            serve(stream, &script, connection < script.hang_ups, &mut capture);
        }
        capture
    });
    (port, handle)
}

fn serve(stream: TcpStream, script: &Script, hang_up: bool, capture: &mut Capture) {
    stream.set_read_timeout(Some(WAIT)).unwrap();
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);
    let mut announces = 0;

    loop {
        let first = match reader.fill_buf() {
            Ok(buf) if !buf.is_empty() => buf[0],
            _ => return,
        };
        if first == b'$' {
            let mut head = [0u8; 4];
            if reader.read_exact(&mut head).is_err() {
                return;
            }
            let mut packet = vec![0u8; u16::from_be_bytes([head[2], head[3]]) as usize];
            if reader.read_exact(&mut packet).is_err() {
                return;
            }
            capture.frames.push((head[1], packet));
            continue;
        }

        let mut request = String::new();
        let mut length = 0usize;
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            if let Some(v) = line.strip_prefix("Content-Length:") {
                length = v.trim().parse().unwrap();
            }
            request.push_str(&line);
            if line == "\r\n" {
                break;
            }
        }
        let mut body = vec![0u8; length];
        if reader.read_exact(&mut body).is_err() {
            return;
        }
        request.push_str(&String::from_utf8_lossy(&body));

        let method = request.split(' ').next().unwrap_or("").to_string();
        let cseq = request
            .lines()
            .find_map(|l| l.strip_prefix("CSeq:"))
            .map(|v| v.trim().to_string())
            .unwrap_or_default();
        capture.requests.push(request.clone());

        let mut status = 200;
        let mut extra = String::new();
        if method == "ANNOUNCE" {
            announces += 1;
            if let Some(challenge) = script.challenge
                && announces == 1
            {
                status = 401;
                extra = format!("WWW-Authenticate: {}\r\n", challenge);
            }
        }
        if let Some((failing, code)) = script.fail
            && failing == method
        {
            status = code;
        }
        if method == "SETUP"
            && let Some(transport) = request.lines().find_map(|l| l.strip_prefix("Transport:"))
        {
            let mut transport = format!("{};ssrc=0", transport.trim());
            if let Some((rtp, rtcp)) = script.server_ports {
                transport.push_str(&format!(";server_port={}-{}", rtp, rtcp));
            }
            extra.push_str(&format!("Transport: {}\r\n", transport));
        }
        let reply = format!(
            "RTSP/1.0 {} X\r\nCSeq: {}\r\nSession: 12345678;timeout=60\r\n{}\r\n",
            status, cseq, extra
        );
        if writer.write_all(reply.as_bytes()).is_err() {
            return;
        }
        if hang_up && method == "RECORD" {
            return;
        }
    }
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn publishes_audio_and_video_over_tcp() {
    let (port, server) = fake_server(Script::default());
    let (client, rx) = client_with(ClientConfig::default());
    client.set_video_info(SPS, PPS, None);

    let url = format!("rtsp://127.0.0.1:{}/live/cam", port);
    client.connect(&url);
    assert_eq!(next_event(&rx), Event::Started(url.clone()));
    assert_eq!(next_event(&rx), Event::Success);
    assert_eq!(client.state(), SessionState::Streaming);

    client.send_video_frame(&[0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00], &FrameInfo::keyframe(0));
    client.send_audio_frame(&[0x21, 0x10, 0x05, 0x00], &FrameInfo::new(0));
    assert!(wait_for(|| {
        client.sent_video_frames() >= 2 && client.sent_audio_frames() >= 1
    }));

    client.disconnect();
    assert_eq!(next_event(&rx), Event::Disconnected);
    assert_eq!(client.state(), SessionState::Idle);

    let capture = server.join().unwrap();
    assert_eq!(
        capture.methods(),
        ["OPTIONS", "ANNOUNCE", "SETUP", "SETUP", "RECORD", "TEARDOWN"]
    );
    let announce = &capture.requests[1];
    assert!(announce.contains("m=video 0 RTP/AVP 96"));
    assert!(announce.contains("a=rtpmap:96 H264/90000"));
    assert!(announce.contains("m=audio 0 RTP/AVP 97"));
    assert!(capture.requests[2].contains("interleaved=0-1"));
    assert!(capture.requests[3].contains("interleaved=2-3"));
    assert!(capture.requests[4].contains("Session: 12345678\r\n"));

    let channels: Vec<u8> = capture.frames.iter().map(|(ch, _)| *ch).collect();
    assert!(channels.contains(&0), "video RTP missing: {:?}", channels);
    assert!(channels.contains(&1), "video sender report missing: {:?}", channels);
    assert!(channels.contains(&2), "audio RTP missing: {:?}", channels);
    for (channel, packet) in &capture.frames {
        if channel % 2 == 0 {
            assert_eq!(packet[0], 0x80);
            assert!(packet.len() <= 1500 - 28);
        } else {
            assert_eq!(packet[1], 200, "RTCP sender report");
        }
    }
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn digest_challenge_is_answered() {
    let script = Script {
        challenge: Some("Digest realm=\"live\", nonce=\"abc123\""),
        ..Script::default()
    };
    let (port, server) = fake_server(script);
    let config = ClientConfig {
        only_video: true,
        ..ClientConfig::default()
    };
    let (client, rx) = client_with(config);
    client.set_video_info(SPS, PPS, None);
    client.set_authorization(Some("admin"), Some("secret"));

    client.connect(&format!("rtsp://127.0.0.1:{}/live", port));
    assert!(matches!(next_event(&rx), Event::Started(_)));
    assert_eq!(next_event(&rx), Event::AuthSuccess);
    assert_eq!(next_event(&rx), Event::Success);

    client.disconnect();
    let capture = server.join().unwrap();
    assert_eq!(
        capture.methods(),
        ["OPTIONS", "ANNOUNCE", "ANNOUNCE", "SETUP", "RECORD", "TEARDOWN"]
    );
    assert!(!capture.requests[1].contains("Authorization:"));
    assert!(
        capture.requests[2]
            .contains("Authorization: Digest username=\"admin\", realm=\"live\", nonce=\"abc123\"")
    );
    assert!(capture.requests[3].contains("Authorization: Digest"));
}

#[test]
fn missing_credentials_report_auth_error() {
    let script = Script {
        challenge: Some("Basic realm=\"live\""),
        ..Script::default()
    };
    let (port, server) = fake_server(script);
    let config = ClientConfig {
        only_video: true,
        retry_count: 3,
        retry_delay: Duration::from_millis(10),
        ..ClientConfig::default()
    };
    let (client, rx) = client_with(config);
    client.set_video_info(SPS, PPS, None);

    client.connect(&format!("rtsp://127.0.0.1:{}/live/cam", port));
    assert!(matches!(next_event(&rx), Event::Started(_)));
    assert_eq!(next_event(&rx), Event::AuthError);
    // Authentication failures are never retried.
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    assert_eq!(client.state(), SessionState::Idle);

    let capture = server.join().unwrap();
    assert_eq!(capture.methods(), ["OPTIONS", "ANNOUNCE"]);
}

#[test]
fn rejected_setup_names_the_step() {
    let script = Script {
        fail: Some(("SETUP", 461)),
        ..Script::default()
    };
    let (port, server) = fake_server(script);
    let (client, rx) = client_with(ClientConfig::default());
    client.set_video_info(SPS, PPS, None);

    client.connect(&format!("rtsp://127.0.0.1:{}/live/cam", port));
    assert!(matches!(next_event(&rx), Event::Started(_)));
    assert_eq!(
        next_event(&rx),
        Event::Failed("SETUP failed with status 461".into())
    );
    server.join().unwrap();
}

#[test]
fn config_unit_in_bitstream_unblocks_connect() {
    let (port, server) = fake_server(Script::default());
    let config = ClientConfig {
        only_video: true,
        ..ClientConfig::default()
    };
    let (client, rx) = client_with(config);

    client.connect(&format!("rtsp://127.0.0.1:{}/live/cam", port));
    assert!(matches!(next_event(&rx), Event::Started(_)));
    assert!(wait_for(|| client.state() == SessionState::AwaitingMediaConfig));

    let mut unit = vec![0, 0, 0, 1];
    unit.extend_from_slice(SPS);
    unit.extend_from_slice(&[0, 0, 0, 1]);
    unit.extend_from_slice(PPS);
    client.send_video_frame(&unit, &FrameInfo::config(0));
    assert_eq!(next_event(&rx), Event::Success);

    client.disconnect();
    let capture = server.join().unwrap();
    assert!(capture.requests[1].contains("sprop-parameter-sets="));
}

#[test]
fn retry_budget_is_consumed() {
    // Reserve a port and close it so connects are refused.
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let config = ClientConfig {
        only_audio: true,
        retry_count: 1,
        retry_delay: Duration::from_millis(20),
        ..ClientConfig::default()
    };
    let (client, rx) = client_with(config);

    client.connect(&format!("rtsp://127.0.0.1:{}/live/mic", port));
    assert!(matches!(next_event(&rx), Event::Started(_)));
    assert!(matches!(next_event(&rx), Event::Failed(_)));
    assert!(matches!(next_event(&rx), Event::Started(_)));
    assert!(matches!(next_event(&rx), Event::Failed(_)));
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    assert_eq!(client.state(), SessionState::Idle);
}

#[test]
fn frame_drops_reach_the_listener() {
    struct DropCounter(Mutex<u32>);
    impl ConnectionListener for DropCounter {
        fn on_frame_dropped(&self, track: MediaTrack) {
            assert_eq!(track, MediaTrack::Audio);
            *self.0.lock().unwrap() += 1;
        }
    }

    let (port, server) = fake_server(Script::default());
    let listener = Arc::new(DropCounter(Mutex::new(0)));
    let config = ClientConfig {
        only_audio: true,
        cache_size: 1,
        ..ClientConfig::default()
    };
    let client = RtspClient::with_config(config, listener.clone());
    client.connect(&format!("rtsp://127.0.0.1:{}/live/mic", port));
    assert!(wait_for(|| client.state() == SessionState::Streaming));

    assert_eq!(client.cache_size(), 1);
    for pts in 0..200 {
        client.send_audio_frame(&[0x21; 64], &FrameInfo::new(pts * 23_000));
    }
    let dropped = client.dropped_audio_frames();
    assert_eq!(u64::from(*listener.0.lock().unwrap()), dropped);

    client.disconnect();
    server.join().unwrap();
}

#[test]
fn counters_reset_after_disconnect() {
    let (port, server) = fake_server(Script::default());
    let config = ClientConfig {
        only_audio: true,
        ..ClientConfig::default()
    };
    let (client, rx) = client_with(config);
    client.connect(&format!("rtsp://127.0.0.1:{}/live/mic", port));
    assert!(matches!(next_event(&rx), Event::Started(_)));
    assert_eq!(next_event(&rx), Event::Success);

    for pts in 0..5 {
        client.send_audio_frame(&[0x21; 32], &FrameInfo::new(pts * 23_000));
    }
    assert!(wait_for(|| client.sent_audio_frames() == 5));

    client.disconnect();
    assert_eq!(next_event(&rx), Event::Disconnected);
    assert_eq!(client.sent_audio_frames(), 0);
    assert_eq!(client.dropped_audio_frames(), 0);
    assert_eq!(client.items_in_cache(), 0);
    assert!(!client.has_congestion(0.0).unwrap());
    client.resize_cache(10).unwrap();
    assert_eq!(client.cache_size(), 10);
    server.join().unwrap();
}

#[test]
fn lost_server_triggers_reconnect() {
    let script = Script {
        hang_ups: 1,
        ..Script::default()
    };
    let (port, server) = fake_server(script);
    let config = ClientConfig {
        only_audio: true,
        retry_count: 1,
        retry_delay: Duration::from_millis(20),
        heartbeat_interval: Duration::from_millis(50),
        ..ClientConfig::default()
    };
    let (client, rx) = client_with(config);
    let url = format!("rtsp://127.0.0.1:{}/live/mic", port);

    client.connect(&url);
    assert_eq!(next_event(&rx), Event::Started(url.clone()));
    assert_eq!(next_event(&rx), Event::Success);
    assert_eq!(
        next_event(&rx),
        Event::Failed("connection closed by server".into())
    );
    assert_eq!(next_event(&rx), Event::Started(url.clone()));
    assert_eq!(next_event(&rx), Event::Success);
    assert_eq!(client.state(), SessionState::Streaming);

    client.disconnect();
    assert_eq!(next_event(&rx), Event::Disconnected);
    let capture = server.join().unwrap();
    assert_eq!(
        capture.methods(),
        [
            "OPTIONS", "ANNOUNCE", "SETUP", "RECORD", "OPTIONS", "ANNOUNCE", "SETUP", "RECORD",
            "TEARDOWN"
        ]
    );
}

#[test]
fn reconnect_reaches_backup_url() {
    let primary = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let (port, server) = fake_server(Script::default());
    let config = ClientConfig {
        only_audio: true,
        retry_count: 1,
        auto_retry: false,
        ..ClientConfig::default()
    };
    let (client, rx) = client_with(config);
    let primary_url = format!("rtsp://127.0.0.1:{}/live/mic", primary);
    let backup_url = format!("rtsp://127.0.0.1:{}/backup/mic", port);

    client.connect(&primary_url);
    assert_eq!(next_event(&rx), Event::Started(primary_url));
    assert!(matches!(next_event(&rx), Event::Failed(_)));
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    client.reconnect(Duration::from_millis(10), Some(&backup_url));
    assert_eq!(next_event(&rx), Event::Started(backup_url.clone()));
    assert_eq!(next_event(&rx), Event::Success);
    assert_eq!(client.url().as_deref(), Some(backup_url.as_str()));

    client.disconnect();
    let capture = server.join().unwrap();
    assert!(capture.requests[0].starts_with(&format!("OPTIONS {} RTSP/1.0", backup_url)));
}

#[test]
fn publishes_audio_over_udp() {
    let rtp = UdpSocket::bind("127.0.0.1:0").unwrap();
    let rtcp = UdpSocket::bind("127.0.0.1:0").unwrap();
    rtp.set_read_timeout(Some(WAIT)).unwrap();
    rtcp.set_read_timeout(Some(WAIT)).unwrap();
    let script = Script {
        server_ports: Some((
            rtp.local_addr().unwrap().port(),
            rtcp.local_addr().unwrap().port(),
        )),
        ..Script::default()
    };
    let (port, server) = fake_server(script);
    let config = ClientConfig {
        protocol: Protocol::Udp,
        only_audio: true,
        audio_client_ports: (0, 0),
        ..ClientConfig::default()
    };
    let (client, rx) = client_with(config);

    client.connect(&format!("rtsp://127.0.0.1:{}/live/mic", port));
    assert!(matches!(next_event(&rx), Event::Started(_)));
    assert_eq!(next_event(&rx), Event::Success);
    client.send_audio_frame(&[0x21, 0x10, 0x05, 0x00], &FrameInfo::new(0));

    let mut packet = [0u8; 2048];
    let len = rtp.recv(&mut packet).unwrap();
    assert!(len > 12);
    assert_eq!(packet[0], 0x80);
    assert_eq!(packet[1] & 0x7f, 97);
    let len = rtcp.recv(&mut packet).unwrap();
    assert!(len >= 28);
    assert_eq!(packet[1], 200, "RTCP sender report");

    client.disconnect();
    let capture = server.join().unwrap();
    assert_eq!(capture.methods(), ["OPTIONS", "ANNOUNCE", "SETUP", "RECORD", "TEARDOWN"]);
    assert!(capture.requests[2].contains("client_port="));
    assert!(!capture.requests[2].contains("interleaved="));
    assert!(capture.frames.is_empty());
}
