//! Bounded outbound frame queue with per-track accounting.
//!
//! The packetizer side pushes without ever blocking; the draining worker
//! blocks in [`FrameCache::pop`] until a frame arrives or the cache is
//! closed. When the queue is full the oldest frame of the incoming frame's
//! track is evicted, so a video burst never starves audio (and vice versa)
//! unless the queue holds nothing else.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, StreamError};
use crate::frame::{MediaTrack, NetworkFrame};

/// Default queue capacity in frames.
pub const DEFAULT_CACHE_SIZE: usize = 200;

/// Default congestion threshold, percent of capacity.
pub const DEFAULT_CONGESTION_PERCENT: f32 = 20.0;

#[derive(Debug, Default, Clone, Copy)]
struct TrackCounters {
    sent: u64,
    dropped: u64,
}

#[derive(Debug)]
struct State {
    queue: VecDeque<NetworkFrame>,
    capacity: usize,
    closed: bool,
    audio: TrackCounters,
    video: TrackCounters,
}

impl State {
    fn counters(&mut self, track: MediaTrack) -> &mut TrackCounters {
        match track {
            MediaTrack::Audio => &mut self.audio,
            MediaTrack::Video => &mut self.video,
        }
    }
}

/// Thread-safe bounded FIFO of [`NetworkFrame`]s.
#[derive(Debug)]
pub struct FrameCache {
    state: Mutex<State>,
    available: Condvar,
}

impl FrameCache {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(StreamError::InvalidCapacity(capacity));
        }
        Ok(Self {
            state: Mutex::new(State {
                queue: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
                audio: TrackCounters::default(),
                video: TrackCounters::default(),
            }),
            available: Condvar::new(),
        })
    }

    /// Enqueue a frame, evicting one if the cache is full.
    ///
    /// The victim is the oldest frame of the same track, or the global
    /// oldest if the queue holds none of that track. The victim's track
    /// drop counter is incremented and the victim is returned. Frames
    /// pushed after [`close`](Self::close) are discarded and returned.
    pub fn push(&self, frame: NetworkFrame) -> Option<NetworkFrame> {
        let mut state = self.state.lock();
        if state.closed {
            return Some(frame);
        }

        let mut evicted = None;
        if state.queue.len() >= state.capacity {
            let index = state
                .queue
                .iter()
                .position(|f| f.track() == frame.track())
                .unwrap_or(0);
            if let Some(victim) = state.queue.remove(index) {
                state.counters(victim.track()).dropped += 1;
                tracing::trace!(
                    track = victim.track().as_str(),
                    queued = state.queue.len(),
                    "cache full, frame evicted"
                );
                evicted = Some(victim);
            }
        }

        state.queue.push_back(frame);
        drop(state);
        self.available.notify_one();
        evicted
    }

    /// Dequeue the oldest frame, blocking until one is available.
    ///
    /// Returns `None` once the cache has been closed.
    pub fn pop(&self) -> Option<NetworkFrame> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(frame) = state.queue.pop_front() {
                return Some(frame);
            }
            self.available.wait(&mut state);
        }
    }

    /// Non-blocking variant of [`pop`](Self::pop).
    pub fn try_pop(&self) -> Option<NetworkFrame> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.queue.pop_front()
    }

    /// Change the capacity. Frames beyond the new capacity are dropped from
    /// the front of the queue and counted against their track.
    pub fn resize(&self, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Err(StreamError::InvalidCapacity(capacity));
        }
        let mut state = self.state.lock();
        while state.queue.len() > capacity {
            if let Some(victim) = state.queue.pop_front() {
                state.counters(victim.track()).dropped += 1;
            }
        }
        state.capacity = capacity;
        tracing::debug!(capacity, queued = state.queue.len(), "cache resized");
        Ok(())
    }

    /// Whether the fill level has reached `percent` of capacity.
    pub fn has_congestion(&self, percent: f32) -> Result<bool> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(StreamError::InvalidThreshold(percent));
        }
        let state = self.state.lock();
        Ok(state.queue.len() as f64 * 100.0 >= percent as f64 * state.capacity as f64)
    }

    pub fn fill_ratio(&self) -> f32 {
        let state = self.state.lock();
        state.queue.len() as f32 / state.capacity as f32
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Discard every queued frame without counting drops.
    pub fn clear(&self) {
        self.state.lock().queue.clear();
    }

    /// Record a frame handed to the transport.
    pub fn mark_sent(&self, track: MediaTrack) {
        self.state.lock().counters(track).sent += 1;
    }

    pub fn sent(&self, track: MediaTrack) -> u64 {
        self.state.lock().counters(track).sent
    }

    pub fn dropped(&self, track: MediaTrack) -> u64 {
        self.state.lock().counters(track).dropped
    }

    pub fn reset_sent(&self, track: MediaTrack) {
        self.state.lock().counters(track).sent = 0;
    }

    pub fn reset_dropped(&self, track: MediaTrack) {
        self.state.lock().counters(track).dropped = 0;
    }

    /// Wake every blocked consumer and reject further frames.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
