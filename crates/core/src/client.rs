use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::cache::DEFAULT_CACHE_SIZE;
use crate::endpoint::Endpoint;
use crate::error::{FailureKind, Result, StreamError};
use crate::frame::{MediaTrack, TrackLayout};
use crate::media::aac::AacPacketizer;
use crate::media::h264::H264Packetizer;
use crate::media::h265::H265Packetizer;
use crate::media::rtp::DEFAULT_MTU;
use crate::media::{
    AUDIO_PAYLOAD_TYPE, AudioConfig, FrameInfo, PacketBudget, Packetizer, VIDEO_PAYLOAD_TYPE,
    VideoCodec, VideoConfig,
};
use crate::protocol::sdp::{self, SdpMedia};
use crate::protocol::{Credentials, SessionCommands};
use crate::report::{DEFAULT_REPORT_INTERVAL, ReportGenerator};
use crate::session::handshake::{self, AuthOutcome};
use crate::session::{CancelToken, MediaConfigSlot, MediaSender, RetryPolicy, SessionState};
use crate::transport::{
    self, ControlStream, Protocol, RtpTransport, RtspConnection, SharedWriter, TlsConnector,
    UdpTransport,
};

/// Connection lifecycle notifications.
///
/// Callbacks run on the client's worker threads (frame drops on the
/// producer's thread). Every method defaults to a no-op.
pub trait ConnectionListener: Send + Sync {
    fn on_connection_started(&self, _url: &str) {}
    fn on_connection_success(&self) {}
    fn on_connection_failed(&self, _reason: &str) {}
    fn on_auth_error(&self) {}
    fn on_auth_success(&self) {}
    fn on_disconnect(&self) {}
    fn on_frame_dropped(&self, _track: MediaTrack) {}
}

/// Listener that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl ConnectionListener for NoopListener {}

/// Publishing client configuration.
///
/// Changes take effect on the next connection attempt, except
/// `check_server_alive` (read on every heartbeat) and `cache_size`
/// (applied to the live cache by [`RtspClient::resize_cache`]).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub protocol: Protocol,
    /// Network MTU; RTP packets never exceed `mtu - 28` bytes.
    pub mtu: usize,
    /// Connect, read and write timeout of the signalling connection.
    pub io_timeout: Duration,
    /// How long to wait for SPS/PPS before giving up.
    pub media_config_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Minimum spacing of RTCP sender reports per track.
    pub report_interval: Duration,
    pub cache_size: usize,
    /// Number of reconnects allowed after a failure.
    pub retry_count: u32,
    pub retry_delay: Duration,
    /// Reconnect by itself after an eligible failure.
    pub auto_retry: bool,
    pub video_client_ports: (u16, u16),
    pub audio_client_ports: (u16, u16),
    /// Also check the server with a fresh TCP connection on every heartbeat.
    pub check_server_alive: bool,
    pub user_agent: String,
    pub video_codec: VideoCodec,
    pub audio: AudioConfig,
    pub only_audio: bool,
    pub only_video: bool,
}

impl ClientConfig {
    /// Track indexes: video is track 0 unless the session is audio-only.
    pub fn layout(&self) -> TrackLayout {
        if self.only_audio {
            TrackLayout { video: 1, audio: 0 }
        } else {
            TrackLayout::default()
        }
    }

    pub fn video_enabled(&self) -> bool {
        !self.only_audio
    }

    pub fn audio_enabled(&self) -> bool {
        !self.only_video
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Tcp,
            mtu: DEFAULT_MTU,
            io_timeout: Duration::from_secs(5),
            media_config_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(2),
            report_interval: DEFAULT_REPORT_INTERVAL,
            cache_size: DEFAULT_CACHE_SIZE,
            retry_count: 0,
            retry_delay: Duration::from_secs(5),
            auto_retry: true,
            video_client_ports: (5000, 5001),
            audio_client_ports: (5002, 5003),
            check_server_alive: false,
            user_agent: concat!("rtsp-push/", env!("CARGO_PKG_VERSION")).to_string(),
            video_codec: VideoCodec::H264,
            audio: AudioConfig::default(),
            only_audio: false,
            only_video: false,
        }
    }
}

/// One connection attempt and the workers scoped to it.
#[derive(Default)]
struct Attempt {
    token: CancelToken,
    failed: AtomicBool,
    control: Mutex<Option<JoinHandle<()>>>,
    closer: Mutex<Option<Box<dyn ControlStream>>>,
    signalling: Mutex<Option<(SessionCommands, SharedWriter)>>,
    sender: Mutex<Option<Arc<MediaSender>>>,
}

struct RetryWorker {
    token: CancelToken,
    handle: JoinHandle<()>,
}

struct ClientInner {
    listener: Arc<dyn ConnectionListener>,
    tls: RwLock<Option<Arc<dyn TlsConnector>>>,
    config: RwLock<ClientConfig>,
    credentials: RwLock<Option<Credentials>>,
    state: RwLock<SessionState>,
    retry: Mutex<RetryPolicy>,
    video_config: MediaConfigSlot,
    url: Mutex<Option<String>>,
    attempt: Mutex<Option<Arc<Attempt>>>,
    sender: RwLock<Option<Arc<MediaSender>>>,
    retry_worker: Mutex<Option<RetryWorker>>,
    retry_epoch: AtomicU64,
}

/// RTSP publishing client.
///
/// Pushes H.264/H.265 video and AAC audio to a server with
/// ANNOUNCE/RECORD, over interleaved TCP or UDP. All methods are
/// non-blocking except [`disconnect`](Self::disconnect), which joins the
/// session's workers.
pub struct RtspClient {
    inner: Arc<ClientInner>,
}

impl RtspClient {
    pub fn new(listener: Arc<dyn ConnectionListener>) -> Self {
        Self::with_config(ClientConfig::default(), listener)
    }

    pub fn with_config(config: ClientConfig, listener: Arc<dyn ConnectionListener>) -> Self {
        let retry = RetryPolicy::new(config.retry_count);
        Self {
            inner: Arc::new(ClientInner {
                listener,
                tls: RwLock::new(None),
                config: RwLock::new(config),
                credentials: RwLock::new(None),
                state: RwLock::new(SessionState::Idle),
                retry: Mutex::new(retry),
                video_config: MediaConfigSlot::default(),
                url: Mutex::new(None),
                attempt: Mutex::new(None),
                sender: RwLock::new(None),
                retry_worker: Mutex::new(None),
                retry_epoch: AtomicU64::new(0),
            }),
        }
    }

    pub fn connect(&self, url: &str) {
        self.inner.connect(url, false);
    }

    /// Start a connection attempt. `is_retry` attempts are allowed while a
    /// session is active and do not re-arm the retry policy.
    pub fn connect_retry(&self, url: &str, is_retry: bool) {
        self.inner.connect(url, is_retry);
    }

    pub fn disconnect(&self) {
        self.inner.disconnect(true);
    }

    /// Schedule a reconnect after `delay`, to `backup_url` if given.
    pub fn reconnect(&self, delay: Duration, backup_url: Option<&str>) {
        self.inner.reconnect(delay, backup_url);
    }

    pub fn should_retry(&self, error: &StreamError) -> bool {
        self.inner.retry.lock().should_retry(error)
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.read()
    }

    pub fn is_streaming(&self) -> bool {
        self.state() != SessionState::Idle
    }

    pub fn url(&self) -> Option<String> {
        self.inner.url.lock().clone()
    }

    pub fn config(&self) -> ClientConfig {
        self.inner.config.read().clone()
    }

    pub fn set_authorization(&self, user: Option<&str>, password: Option<&str>) {
        *self.inner.credentials.write() = match (user, password) {
            (Some(user), Some(password)) => Some(Credentials::new(user, password)),
            _ => None,
        };
    }

    /// Publish audio only. Must be called before connect.
    pub fn set_only_audio(&self, only_audio: bool) {
        let mut config = self.inner.config.write();
        config.only_audio = only_audio;
        if only_audio {
            config.only_video = false;
        }
    }

    /// Publish video only. Must be called before connect.
    pub fn set_only_video(&self, only_video: bool) {
        let mut config = self.inner.config.write();
        config.only_video = only_video;
        if only_video {
            config.only_audio = false;
        }
    }

    pub fn set_retry_count(&self, count: u32) {
        self.inner.config.write().retry_count = count;
        self.inner.retry.lock().set_budget(count);
    }

    pub fn set_protocol(&self, protocol: Protocol) {
        self.inner.config.write().protocol = protocol;
    }

    pub fn set_check_server_alive(&self, enabled: bool) {
        self.inner.config.write().check_server_alive = enabled;
    }

    pub fn set_video_codec(&self, codec: VideoCodec) {
        self.inner.config.write().video_codec = codec;
    }

    pub fn set_audio_info(&self, sample_rate: u32, stereo: bool) {
        self.inner.config.write().audio = AudioConfig {
            sample_rate,
            stereo,
        };
    }

    /// Provide the parameter sets; wakes a connect waiting for them.
    pub fn set_video_info(&self, sps: &[u8], pps: &[u8], vps: Option<&[u8]>) {
        tracing::info!("video parameter sets received");
        self.inner.video_config.set(VideoConfig::new(sps, pps, vps));
    }

    pub fn set_tls_connector(&self, connector: Arc<dyn TlsConnector>) {
        *self.inner.tls.write() = Some(connector);
    }

    /// Feed one encoded video access unit. Units flagged `config` also
    /// provide the parameter sets.
    pub fn send_video_frame(&self, data: &[u8], info: &FrameInfo) {
        let (enabled, codec) = {
            let config = self.inner.config.read();
            (config.video_enabled(), config.video_codec)
        };
        if !enabled {
            return;
        }
        if info.config
            && let Some(config) = VideoConfig::from_annex_b(codec, data)
        {
            tracing::info!("video parameter sets received in bitstream");
            self.inner.video_config.set(config);
        }
        if let Some(sender) = self.current_sender() {
            sender.send_video(data, info);
        }
    }

    pub fn send_audio_frame(&self, data: &[u8], info: &FrameInfo) {
        if !self.inner.config.read().audio_enabled() {
            return;
        }
        if let Some(sender) = self.current_sender() {
            sender.send_audio(data, info);
        }
    }

    pub fn resize_cache(&self, size: usize) -> Result<()> {
        if size == 0 {
            return Err(StreamError::InvalidCapacity(size));
        }
        self.inner.config.write().cache_size = size;
        if let Some(sender) = self.current_sender() {
            sender.cache().resize(size)?;
        }
        Ok(())
    }

    pub fn has_congestion(&self, percent: f32) -> Result<bool> {
        match self.current_sender() {
            Some(sender) => sender.cache().has_congestion(percent),
            None if (0.0..=100.0).contains(&percent) => Ok(false),
            None => Err(StreamError::InvalidThreshold(percent)),
        }
    }

    pub fn clear_cache(&self) {
        if let Some(sender) = self.current_sender() {
            sender.cache().clear();
        }
    }

    pub fn items_in_cache(&self) -> usize {
        self.with_cache(|cache| cache.len()).unwrap_or(0)
    }

    pub fn cache_size(&self) -> usize {
        self.with_cache(|cache| cache.capacity())
            .unwrap_or_else(|| self.inner.config.read().cache_size)
    }

    pub fn sent_video_frames(&self) -> u64 {
        self.with_cache(|c| c.sent(MediaTrack::Video)).unwrap_or(0)
    }

    pub fn sent_audio_frames(&self) -> u64 {
        self.with_cache(|c| c.sent(MediaTrack::Audio)).unwrap_or(0)
    }

    pub fn dropped_video_frames(&self) -> u64 {
        self.with_cache(|c| c.dropped(MediaTrack::Video)).unwrap_or(0)
    }

    pub fn dropped_audio_frames(&self) -> u64 {
        self.with_cache(|c| c.dropped(MediaTrack::Audio)).unwrap_or(0)
    }

    pub fn reset_sent_video_frames(&self) {
        self.with_cache(|c| c.reset_sent(MediaTrack::Video));
    }

    pub fn reset_sent_audio_frames(&self) {
        self.with_cache(|c| c.reset_sent(MediaTrack::Audio));
    }

    pub fn reset_dropped_video_frames(&self) {
        self.with_cache(|c| c.reset_dropped(MediaTrack::Video));
    }

    pub fn reset_dropped_audio_frames(&self) {
        self.with_cache(|c| c.reset_dropped(MediaTrack::Audio));
    }

    /// Media path of the streaming session, if any. Cloned out of the lock
    /// so listener callbacks may disconnect.
    fn current_sender(&self) -> Option<Arc<MediaSender>> {
        self.inner.sender.read().clone()
    }

    fn with_cache<T>(&self, f: impl FnOnce(&crate::cache::FrameCache) -> T) -> Option<T> {
        self.current_sender().map(|s| f(s.cache()))
    }
}

impl Drop for RtspClient {
    fn drop(&mut self) {
        self.inner.cancel_retry_worker();
        let attempt = self.inner.attempt.lock().take();
        if let Some(attempt) = attempt {
            self.inner.release(&attempt, true);
        }
    }
}

impl ClientInner {
    fn set_state(&self, new_state: SessionState) {
        let old_state = std::mem::replace(&mut *self.state.write(), new_state);
        if old_state != new_state {
            tracing::debug!(
                old_state = old_state.as_str(),
                new_state = new_state.as_str(),
                "state transition"
            );
        }
    }

    fn connect(self: &Arc<Self>, url: &str, is_retry: bool) {
        if !is_retry {
            self.retry.lock().arm();
        }
        {
            let mut state = self.state.write();
            if *state != SessionState::Idle && !is_retry {
                tracing::debug!(state = state.as_str(), "connect ignored, session active");
                return;
            }
            *state = SessionState::Connecting;
        }
        tracing::debug!(new_state = SessionState::Connecting.as_str(), "state transition");
        *self.url.lock() = Some(url.to_string());

        let attempt = Arc::new(Attempt::default());
        let previous = self.attempt.lock().replace(attempt.clone());
        if let Some(previous) = previous {
            self.release(&previous, false);
        }

        let inner = self.clone();
        let worker_attempt = attempt.clone();
        let url = url.to_string();
        let spawned = thread::Builder::new()
            .name("rtsp-control".into())
            .spawn(move || inner.run_attempt(worker_attempt, url));
        match spawned {
            Ok(handle) => *attempt.control.lock() = Some(handle),
            Err(e) => self.fail(&attempt, e.into()),
        }
    }

    fn run_attempt(self: Arc<Self>, attempt: Arc<Attempt>, url: String) {
        self.listener.on_connection_started(&url);
        if let Err(e) = self.run_session(&attempt, &url)
            && !attempt.token.is_cancelled()
        {
            self.fail(&attempt, e);
        }
    }

    /// Connect, handshake and heartbeat until cancelled (`Ok`) or failed.
    fn run_session(self: &Arc<Self>, attempt: &Arc<Attempt>, url: &str) -> Result<()> {
        let endpoint = Endpoint::parse(url)?;
        let config = self.config.read().clone();
        let layout = config.layout();

        let video_config = if config.video_enabled() {
            let ready = match self.video_config.get() {
                Some(ready) => ready,
                None => {
                    self.set_state(SessionState::AwaitingMediaConfig);
                    tracing::info!("waiting for video parameter sets");
                    self.video_config
                        .wait(config.media_config_timeout, &attempt.token)
                        .ok_or(StreamError::MissingVideoConfig)?
                }
            };
            Some(ready)
        } else {
            None
        };
        if attempt.token.is_cancelled() {
            return Ok(());
        }

        self.set_state(SessionState::Handshaking);
        let stream = self.open_stream(&endpoint, config.io_timeout)?;
        let mut conn = RtspConnection::new(stream, config.io_timeout)?;
        *attempt.closer.lock() = Some(conn.closer()?);
        if attempt.token.is_cancelled() {
            return Ok(());
        }
        tracing::info!(endpoint = %endpoint, peer = %conn.peer_addr(), "connected");

        let mut tracks = Vec::with_capacity(2);
        if config.video_enabled() {
            tracks.push(MediaTrack::Video);
        }
        if config.audio_enabled() {
            tracks.push(MediaTrack::Audio);
        }

        let sdp = sdp::generate_sdp(
            &endpoint.host,
            &SdpMedia {
                video: video_config.as_ref().map(|vc| (config.video_codec, vc)),
                audio: config.audio_enabled().then_some(&config.audio),
                layout,
            },
        );
        let mut commands =
            SessionCommands::new(endpoint.clone(), &config.user_agent, config.protocol, layout)
                .with_client_ports(config.video_client_ports, config.audio_client_ports);
        let credentials = self.credentials.read().clone();

        let outcome =
            handshake::perform(&mut conn, &mut commands, sdp, &tracks, credentials.as_ref())?;
        if outcome == AuthOutcome::Accepted {
            self.listener.on_auth_success();
        }

        let rtp = match config.protocol {
            Protocol::Tcp => RtpTransport::Tcp {
                writer: conn.writer(),
            },
            Protocol::Udp => {
                let mut udp = UdpTransport::new();
                let server_ip = conn.peer_addr().ip();
                for &track in &tracks {
                    udp.bind_track(
                        track,
                        commands.client_ports(track),
                        server_ip,
                        commands.server_ports(track),
                    )?;
                }
                RtpTransport::Udp(udp)
            }
        };
        *attempt.signalling.lock() = Some((commands, conn.writer()));

        let sender = Arc::new(self.build_sender(&config, video_config.as_ref())?);
        let weak: Weak<Self> = Arc::downgrade(self);
        let failed_attempt = attempt.clone();
        sender.start(
            rtp,
            ReportGenerator::with_system_clock(config.report_interval),
            Box::new(move |e| {
                if let Some(inner) = weak.upgrade() {
                    inner.fail(&failed_attempt, e);
                }
            }),
        )?;
        *attempt.sender.lock() = Some(sender.clone());
        *self.sender.write() = Some(sender.clone());
        if attempt.token.is_cancelled() {
            sender.stop();
            let mut current = self.sender.write();
            if current.as_ref().is_some_and(|s| Arc::ptr_eq(s, &sender)) {
                current.take();
            }
            return Ok(());
        }

        self.retry.lock().restore();
        self.set_state(SessionState::Streaming);
        tracing::info!(endpoint = %endpoint, protocol = ?config.protocol, "streaming");
        self.listener.on_connection_success();

        self.heartbeat(attempt, &mut conn, config.heartbeat_interval, config.io_timeout)
    }

    fn open_stream(&self, endpoint: &Endpoint, timeout: Duration) -> Result<Box<dyn ControlStream>> {
        if !endpoint.tls {
            let stream = transport::connect_tcp(&endpoint.host, endpoint.port, timeout)?;
            return Ok(Box::new(stream));
        }
        let connector = self.tls.read().clone().ok_or_else(|| {
            StreamError::Io(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "rtsps endpoint but no TLS connector configured",
            ))
        })?;
        Ok(connector.connect(&endpoint.host, endpoint.port, timeout)?)
    }

    fn build_sender(
        &self,
        config: &ClientConfig,
        video_config: Option<&VideoConfig>,
    ) -> Result<MediaSender> {
        let layout = config.layout();
        let video = video_config.map(|vc| {
            let budget = PacketBudget::new(config.mtu, layout.rtp_channel(MediaTrack::Video));
            let packetizer: Box<dyn Packetizer> = match config.video_codec {
                VideoCodec::H264 => Box::new(
                    H264Packetizer::with_random_ssrc(VIDEO_PAYLOAD_TYPE, budget).with_config(vc),
                ),
                VideoCodec::H265 => Box::new(
                    H265Packetizer::with_random_ssrc(VIDEO_PAYLOAD_TYPE, budget).with_config(vc),
                ),
            };
            packetizer
        });
        let audio = config.audio_enabled().then(|| {
            let budget = PacketBudget::new(config.mtu, layout.rtp_channel(MediaTrack::Audio));
            Box::new(AacPacketizer::with_random_ssrc(
                AUDIO_PAYLOAD_TYPE,
                config.audio.sample_rate,
                budget,
            )) as Box<dyn Packetizer>
        });

        let listener = self.listener.clone();
        MediaSender::new(
            video,
            audio,
            config.cache_size,
            Arc::new(move |track| listener.on_frame_dropped(track)),
        )
    }

    /// Liveness loop of a streaming session.
    fn heartbeat(
        &self,
        attempt: &Attempt,
        conn: &mut RtspConnection,
        interval: Duration,
        io_timeout: Duration,
    ) -> Result<()> {
        while attempt.token.sleep(interval) {
            if self.config.read().check_server_alive
                && !transport::is_reachable(conn.peer_addr(), io_timeout)
            {
                return Err(StreamError::ServerUnreachable);
            }
            for message in conn.poll()? {
                tracing::debug!(
                    status = message.status_code,
                    cseq = message.cseq().unwrap_or("-"),
                    "server message"
                );
            }
        }
        Ok(())
    }

    /// Report a failed attempt exactly once and decide on a retry.
    fn fail(self: &Arc<Self>, attempt: &Arc<Attempt>, error: StreamError) {
        if attempt.failed.swap(true, Ordering::SeqCst) || attempt.token.is_cancelled() {
            return;
        }
        let current = self
            .attempt
            .lock()
            .as_ref()
            .is_some_and(|a| Arc::ptr_eq(a, attempt));
        if !current {
            return;
        }

        tracing::error!(error = %error, kind = ?error.kind(), "connection failed");
        self.release(attempt, false);

        let retry = self.retry.lock().should_retry(&error);
        self.set_state(SessionState::Idle);
        let epoch = self.retry_epoch.load(Ordering::SeqCst);

        match error.kind() {
            FailureKind::Authentication => self.listener.on_auth_error(),
            _ => self.listener.on_connection_failed(&error.to_string()),
        }

        let (auto_retry, delay) = {
            let config = self.config.read();
            (config.auto_retry, config.retry_delay)
        };
        // Skip if the listener already scheduled a reconnect or disconnected.
        if retry
            && auto_retry
            && self.retry_epoch.load(Ordering::SeqCst) == epoch
            && *self.state.read() == SessionState::Idle
        {
            tracing::info!(delay_ms = delay.as_millis() as u64, "scheduling reconnect");
            self.reconnect(delay, None);
        }
    }

    fn reconnect(self: &Arc<Self>, delay: Duration, backup_url: Option<&str>) {
        let url = backup_url
            .map(str::to_string)
            .or_else(|| self.url.lock().clone());
        let Some(url) = url else {
            tracing::warn!("reconnect requested before any connect");
            return;
        };

        if !self.retry.lock().take() {
            tracing::warn!("retries exhausted");
            self.disconnect(false);
            self.set_state(SessionState::Idle);
            self.listener.on_connection_failed("retries exhausted");
            return;
        }

        self.retry_epoch.fetch_add(1, Ordering::SeqCst);
        self.cancel_retry_worker();
        self.set_state(SessionState::Retrying);

        let token = CancelToken::new();
        let worker_token = token.clone();
        let inner = self.clone();
        let spawned = thread::Builder::new()
            .name("rtsp-retry".into())
            .spawn(move || {
                inner.disconnect(false);
                if !worker_token.sleep(delay) {
                    return;
                }
                tracing::info!(url = %url, "reconnecting");
                inner.connect(&url, true);
            });
        match spawned {
            Ok(handle) => *self.retry_worker.lock() = Some(RetryWorker { token, handle }),
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn retry worker");
                self.set_state(SessionState::Idle);
            }
        }
    }

    fn cancel_retry_worker(&self) {
        let worker = self.retry_worker.lock().take();
        if let Some(worker) = worker {
            worker.token.cancel();
            if worker.handle.thread().id() != thread::current().id()
                && worker.handle.join().is_err()
            {
                tracing::warn!("retry worker panicked");
            }
        }
    }

    /// Stop the current attempt. An explicit (`clear`) disconnect also
    /// cancels pending retries, resets the retry budget and notifies the
    /// listener.
    fn disconnect(self: &Arc<Self>, clear: bool) {
        if clear {
            self.cancel_retry_worker();
            self.set_state(SessionState::Disconnecting);
        }
        let attempt = self.attempt.lock().take();
        if let Some(attempt) = attempt {
            self.release(&attempt, true);
        }
        if clear {
            self.retry.lock().reset();
            self.video_config.clear();
            self.set_state(SessionState::Idle);
            tracing::info!("disconnected");
            self.listener.on_disconnect();
        }
    }

    /// Cancel an attempt and release everything it owns.
    fn release(&self, attempt: &Attempt, teardown: bool) {
        attempt.token.cancel();
        self.video_config.notify();

        let sender = attempt.sender.lock().take();
        if let Some(sender) = sender {
            sender.stop();
            let mut current = self.sender.write();
            if current.as_ref().is_some_and(|s| Arc::ptr_eq(s, &sender)) {
                current.take();
            }
        }

        let signalling = attempt.signalling.lock().take();
        if teardown && let Some((mut commands, writer)) = signalling {
            let request = commands.teardown();
            let mut stream = writer.lock();
            match stream
                .write_all(request.serialize().as_bytes())
                .and_then(|_| stream.flush())
            {
                Ok(()) => tracing::info!("teardown sent"),
                Err(e) => tracing::warn!(error = %e, "teardown failed"),
            }
        }

        let closer = attempt.closer.lock().take();
        if let Some(closer) = closer
            && let Err(e) = closer.shutdown()
        {
            tracing::debug!(error = %e, "control stream shutdown");
        }

        let control = attempt.control.lock().take();
        if let Some(handle) = control
            && handle.thread().id() != thread::current().id()
            && handle.join().is_err()
        {
            tracing::warn!("control worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[derive(Debug, PartialEq)]
    enum Event {
        Started(String),
        Failed(String),
        Disconnected,
    }

    struct Recorder(Mutex<mpsc::Sender<Event>>);

    impl ConnectionListener for Recorder {
        fn on_connection_started(&self, url: &str) {
            let _ = self.0.lock().send(Event::Started(url.to_string()));
        }
        fn on_connection_failed(&self, reason: &str) {
            let _ = self.0.lock().send(Event::Failed(reason.to_string()));
        }
        fn on_disconnect(&self) {
            let _ = self.0.lock().send(Event::Disconnected);
        }
    }

    fn client() -> (RtspClient, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        (RtspClient::new(Arc::new(Recorder(Mutex::new(tx)))), rx)
    }

    #[test]
    fn default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.protocol, Protocol::Tcp);
        assert_eq!(config.mtu, 1500);
        assert_eq!(config.cache_size, 200);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(2));
        assert_eq!(config.layout(), TrackLayout::default());
    }

    #[test]
    fn audio_only_swaps_track_indexes() {
        let (client, _rx) = client();
        client.set_only_audio(true);
        let config = client.config();
        assert!(!config.video_enabled());
        assert_eq!(config.layout().audio, 0);
        client.set_only_video(true);
        assert!(!client.config().audio_enabled());
        assert_eq!(client.config().layout().video, 0);
    }

    #[test]
    fn disabling_one_track_keeps_the_other_choice() {
        let (client, _rx) = client();
        client.set_only_audio(true);
        client.set_only_video(false);
        assert!(client.config().only_audio);
        assert!(!client.config().video_enabled());

        client.set_only_video(true);
        client.set_only_audio(false);
        let config = client.config();
        assert!(config.only_video);
        assert!(!config.only_audio);
    }

    #[test]
    fn malformed_endpoint_fails_without_retry() {
        let (client, rx) = client();
        client.set_retry_count(3);
        client.connect("rtsp://host-without-path");

        let timeout = Duration::from_secs(2);
        assert!(matches!(rx.recv_timeout(timeout).unwrap(), Event::Started(_)));
        match rx.recv_timeout(timeout).unwrap() {
            Event::Failed(reason) => assert!(reason.contains("endpoint malformed")),
            other => panic!("unexpected event {other:?}"),
        }
        thread::sleep(Duration::from_millis(50));
        assert_eq!(client.state(), SessionState::Idle);
        assert!(!client.should_retry(&StreamError::EndpointMalformed(String::new())));
    }

    #[test]
    fn missing_video_config_times_out() {
        let (tx, rx) = mpsc::channel();
        let config = ClientConfig {
            media_config_timeout: Duration::from_millis(100),
            ..ClientConfig::default()
        };
        let client = RtspClient::with_config(config, Arc::new(Recorder(Mutex::new(tx))));
        client.connect("rtsp://127.0.0.1:1/live/cam");

        let timeout = Duration::from_secs(2);
        assert!(matches!(rx.recv_timeout(timeout).unwrap(), Event::Started(_)));
        match rx.recv_timeout(timeout).unwrap() {
            Event::Failed(reason) => assert!(reason.contains("missing video codec config")),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn disconnect_cancels_config_wait() {
        let (client, rx) = client();
        client.connect("rtsp://127.0.0.1:1/live/cam");
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            Event::Started(_)
        ));
        client.disconnect();
        assert_eq!(client.state(), SessionState::Idle);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            Event::Disconnected
        );
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn explicit_disconnect_forgets_parameter_sets() {
        let (tx, rx) = mpsc::channel();
        let config = ClientConfig {
            media_config_timeout: Duration::from_millis(300),
            ..ClientConfig::default()
        };
        let client = RtspClient::with_config(config, Arc::new(Recorder(Mutex::new(tx))));
        client.set_video_info(&[0x67, 0x42, 0x00, 0x1f], &[0x68, 0xce, 0x3c, 0x80], None);
        client.disconnect();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            Event::Disconnected
        );

        client.set_video_codec(VideoCodec::H265);
        client.connect("rtsp://127.0.0.1:1/live/cam");
        let timeout = Duration::from_secs(2);
        assert!(matches!(rx.recv_timeout(timeout).unwrap(), Event::Started(_)));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(client.state(), SessionState::AwaitingMediaConfig);
        match rx.recv_timeout(timeout).unwrap() {
            Event::Failed(reason) => assert!(reason.contains("missing video codec config")),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn cache_queries_without_session() {
        let (client, _rx) = client();
        assert_eq!(client.items_in_cache(), 0);
        assert_eq!(client.cache_size(), 200);
        assert!(client.resize_cache(0).is_err());
        client.resize_cache(50).unwrap();
        assert_eq!(client.cache_size(), 50);
        assert!(!client.has_congestion(20.0).unwrap());
        assert!(client.has_congestion(120.0).is_err());
    }

    #[test]
    fn reconnect_without_retries_fails() {
        let (client, rx) = client();
        client.connect("rtsp://bad");
        let _ = rx.recv_timeout(Duration::from_secs(2));
        let _ = rx.recv_timeout(Duration::from_secs(2));
        client.reconnect(Duration::from_millis(10), None);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            Event::Failed("retries exhausted".into())
        );
    }
}
