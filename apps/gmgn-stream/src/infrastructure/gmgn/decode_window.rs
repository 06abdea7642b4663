//! Decode Error Window
//!
//! Sliding-window rate limit on undecodable frames. A few bad frames are
//! dropped and counted; a burst above the threshold means the stream is
//! corrupt and the connection gets reset.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Threshold configuration for the decode error window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeWindowConfig {
    /// Errors inside the window that force a reset (0 disables the check).
    pub threshold: usize,
    /// Window length.
    pub window: Duration,
}

impl Default for DecodeWindowConfig {
    fn default() -> Self {
        Self {
            threshold: 50,
            window: Duration::from_secs(10),
        }
    }
}

impl DecodeWindowConfig {
    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &crate::WebSocketSettings) -> Self {
        Self {
            threshold: settings.decode_error_threshold,
            window: settings.decode_error_window,
        }
    }
}

/// Tracks decode failures inside a sliding time window.
#[derive(Debug)]
pub struct DecodeErrorWindow {
    config: DecodeWindowConfig,
    errors: VecDeque<Instant>,
}

impl DecodeErrorWindow {
    /// Create an empty window.
    #[must_use]
    pub fn new(config: DecodeWindowConfig) -> Self {
        Self {
            config,
            errors: VecDeque::with_capacity(config.threshold.min(1024)),
        }
    }

    /// Record a failure now. Returns `true` when the threshold is reached.
    pub fn record_error(&mut self) -> bool {
        self.record_error_at(Instant::now())
    }

    /// Record a failure at `now`. Returns `true` when the threshold is reached.
    pub fn record_error_at(&mut self, now: Instant) -> bool {
        if self.config.threshold == 0 {
            return false;
        }
        self.trim(now);
        self.errors.push_back(now);
        self.errors.len() >= self.config.threshold
    }

    /// Errors currently inside the window.
    #[must_use]
    pub fn count_at(&mut self, now: Instant) -> usize {
        self.trim(now);
        self.errors.len()
    }

    /// Window configuration.
    #[must_use]
    pub const fn config(&self) -> &DecodeWindowConfig {
        &self.config
    }

    /// Forget all recorded failures.
    pub fn reset(&mut self) {
        self.errors.clear();
    }

    fn trim(&mut self, now: Instant) {
        while let Some(&oldest) = self.errors.front() {
            if now.saturating_duration_since(oldest) > self.config.window {
                self.errors.pop_front();
            } else {
                break;
            }
        }
    }
}
