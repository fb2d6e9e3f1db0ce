use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::cache::FrameCache;
use crate::error::{Result, StreamError};
use crate::frame::{MediaTrack, NetworkFrame};
use crate::media::{FrameInfo, Packetizer};
use crate::report::ReportGenerator;
use crate::transport::RtpTransport;

/// Callback invoked for every frame evicted from the cache.
pub type DropHandler = Arc<dyn Fn(MediaTrack) + Send + Sync>;

/// Callback invoked once if the draining worker hits a write error.
pub type FailureHandler = Box<dyn FnOnce(StreamError) + Send>;

/// Media path of one connection attempt.
///
/// Packetizes access units on the caller's thread, queues the frames in a
/// [`FrameCache`] and drains them to the transport on a dedicated worker
/// that also emits RTCP sender reports.
pub struct MediaSender {
    video: Mutex<Option<Box<dyn Packetizer>>>,
    audio: Mutex<Option<Box<dyn Packetizer>>>,
    cache: Arc<FrameCache>,
    on_drop: DropHandler,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MediaSender {
    pub fn new(
        video: Option<Box<dyn Packetizer>>,
        audio: Option<Box<dyn Packetizer>>,
        cache_size: usize,
        on_drop: DropHandler,
    ) -> Result<Self> {
        Ok(Self {
            video: Mutex::new(video),
            audio: Mutex::new(audio),
            cache: Arc::new(FrameCache::new(cache_size)?),
            on_drop,
            worker: Mutex::new(None),
        })
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    /// Spawn the draining worker.
    pub fn start(
        &self,
        transport: RtpTransport,
        mut report: ReportGenerator,
        on_failure: FailureHandler,
    ) -> Result<()> {
        let cache = self.cache.clone();
        let handle = thread::Builder::new()
            .name("rtsp-drain".into())
            .spawn(move || {
                tracing::debug!(protocol = ?transport.protocol(), "drain worker started");
                let mut on_failure = Some(on_failure);
                while let Some(frame) = cache.pop() {
                    let result = transport.send(&frame).and_then(|_| {
                        cache.mark_sent(frame.track());
                        match report.on_frame(&frame) {
                            Some(sr) => transport.send(&sr).map(|_| ()),
                            None => Ok(()),
                        }
                    });
                    if let Err(e) = result {
                        if cache.is_closed() {
                            break;
                        }
                        tracing::error!(error = %e, track = frame.track().as_str(), "media write failed");
                        if let Some(on_failure) = on_failure.take() {
                            on_failure(e);
                        }
                        break;
                    }
                }
                tracing::debug!("drain worker exited");
            })?;
        *self.worker.lock() = Some(handle);
        Ok(())
    }

    fn enqueue(&self, frames: Vec<NetworkFrame>) {
        for frame in frames {
            if let Some(victim) = self.cache.push(frame) {
                if self.cache.is_closed() {
                    return;
                }
                (self.on_drop)(victim.track());
            }
        }
    }

    pub fn send_video(&self, data: &[u8], info: &FrameInfo) {
        let frames = match self.video.lock().as_mut() {
            Some(packetizer) => packetizer.packetize(data, info),
            None => return,
        };
        self.enqueue(frames);
    }

    pub fn send_audio(&self, data: &[u8], info: &FrameInfo) {
        let frames = match self.audio.lock().as_mut() {
            Some(packetizer) => packetizer.packetize(data, info),
            None => return,
        };
        self.enqueue(frames);
    }

    /// Close the cache and join the worker, unless called from it.
    pub fn stop(&self) {
        self.cache.close();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::warn!("drain worker panicked");
            }
        }
    }
}

impl Drop for MediaSender {
    fn drop(&mut self) {
        self.stop();
    }
}
