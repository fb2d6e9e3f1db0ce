//! Publishing session lifecycle.
//!
//! A session walks through the following states:
//!
//! ```text
//! connect        -> Connecting
//! no SPS/PPS yet -> AwaitingMediaConfig   (bounded wait)
//! socket open    -> Handshaking           (OPTIONS, ANNOUNCE, SETUP.., RECORD)
//! RECORD 200     -> Streaming             (heartbeat every 2 s)
//! failure        -> Retrying              (if eligible) or Idle
//! disconnect     -> Disconnecting -> Idle
//! ```
//!
//! Each connection attempt owns a [`CancelToken`]; cancelling it unblocks
//! every bounded wait of that attempt.

pub mod handshake;
pub mod sender;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::StreamError;
use crate::media::VideoConfig;

pub use sender::MediaSender;

/// Session state machine states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    AwaitingMediaConfig,
    Handshaking,
    Streaming,
    Retrying,
    Disconnecting,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::AwaitingMediaConfig => "awaiting_media_config",
            Self::Handshaking => "handshaking",
            Self::Streaming => "streaming",
            Self::Retrying => "retrying",
            Self::Disconnecting => "disconnecting",
        }
    }
}

/// Retry budget and eligibility.
///
/// `armed` is set by every user-initiated connect and cleared by an
/// explicit disconnect; a retry is only allowed while it is set.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    budget: u32,
    remaining: u32,
    armed: bool,
}

impl RetryPolicy {
    pub fn new(budget: u32) -> Self {
        Self {
            budget,
            remaining: budget,
            armed: false,
        }
    }

    pub fn set_budget(&mut self, budget: u32) {
        self.budget = budget;
        self.remaining = budget;
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn arm(&mut self) {
        self.armed = true;
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn should_retry(&self, error: &StreamError) -> bool {
        self.armed && error.kind().is_retryable() && self.remaining > 0
    }

    /// Consume one retry. Returns `false` if none were left.
    pub fn take(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    /// Successful connect: restore the full budget.
    pub fn restore(&mut self) {
        self.remaining = self.budget;
    }

    /// Explicit disconnect: restore the budget and disarm.
    pub fn reset(&mut self) {
        self.remaining = self.budget;
        self.armed = false;
    }
}

/// Cancellation flag shared by the workers of one attempt.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, cond) = &*self.inner;
        *flag.lock() = true;
        cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep for `duration`. Returns `false` if cancelled first.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let (flag, cond) = &*self.inner;
        let mut cancelled = flag.lock();
        while !*cancelled {
            if cond.wait_until(&mut cancelled, deadline).timed_out() {
                return !*cancelled;
            }
        }
        false
    }
}

/// Video parameter sets delivered asynchronously by the encoder.
#[derive(Debug, Default)]
pub struct MediaConfigSlot {
    config: Mutex<Option<VideoConfig>>,
    ready: Condvar,
}

impl MediaConfigSlot {
    pub fn set(&self, config: VideoConfig) {
        *self.config.lock() = Some(config);
        self.ready.notify_all();
    }

    pub fn get(&self) -> Option<VideoConfig> {
        self.config.lock().clone()
    }

    pub fn clear(&self) {
        self.config.lock().take();
    }

    /// Wake waiters without providing a config (used on cancellation).
    pub fn notify(&self) {
        let _config = self.config.lock();
        self.ready.notify_all();
    }

    /// Wait up to `timeout` for a config. Gives up early once `token` is
    /// cancelled, provided the canceller calls [`notify`](Self::notify).
    pub fn wait(&self, timeout: Duration, token: &CancelToken) -> Option<VideoConfig> {
        let deadline = Instant::now() + timeout;
        let mut config = self.config.lock();
        loop {
            if let Some(config) = config.as_ref() {
                return Some(config.clone());
            }
            if token.is_cancelled() {
                return None;
            }
            if self.ready.wait_until(&mut config, deadline).timed_out() {
                return config.clone();
            }
        }
    }
}
