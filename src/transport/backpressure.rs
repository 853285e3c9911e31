//! Byte-length based backpressure for path writers.
//!
//! Writers are stalled once buffered-but-unsent bytes reach the high
//! watermark and resume once they fall to the low watermark. The resume
//! check runs on a fixed polling interval: a shorter interval lowers latency
//! at higher CPU cost, a longer one saves CPU but lets more memory pile up.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::core::{
    DEFAULT_HIGH_WATERMARK, DEFAULT_LOW_WATERMARK, DEFAULT_POLL_INTERVAL, PathError,
    RendezvousError,
};

/// Backpressure tuning of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackpressureConfig {
    /// Buffered byte count at which writers are stalled.
    pub high_watermark: usize,
    /// Buffered byte count at which stalled writers resume.
    pub low_watermark: usize,
    /// Interval at which a stalled writer re-checks the buffer.
    pub poll_interval: Duration,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            high_watermark: DEFAULT_HIGH_WATERMARK,
            low_watermark: DEFAULT_LOW_WATERMARK,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl BackpressureConfig {
    /// Check the watermarks and interval for consistency.
    pub fn validate(&self) -> Result<(), RendezvousError> {
        if self.low_watermark >= self.high_watermark {
            return Err(RendezvousError::Config(format!(
                "low watermark ({}) must be below high watermark ({})",
                self.low_watermark, self.high_watermark
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(RendezvousError::Config(
                "poll interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Shared count of bytes handed to a transport but not yet sent.
///
/// Cloning yields another handle to the same counter: the writer side
/// records enqueued bytes, the transport side records drained bytes.
#[derive(Debug, Clone)]
pub struct WriteBuffer {
    buffered: Arc<AtomicUsize>,
    config: BackpressureConfig,
}

impl WriteBuffer {
    /// Create an empty buffer counter.
    pub fn new(config: BackpressureConfig) -> Self {
        Self {
            buffered: Arc::new(AtomicUsize::new(0)),
            config,
        }
    }

    /// Backpressure configuration.
    pub fn config(&self) -> &BackpressureConfig {
        &self.config
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    /// Record bytes handed to the transport.
    pub fn enqueued(&self, len: usize) {
        self.buffered.fetch_add(len, Ordering::AcqRel);
    }

    /// Record bytes the transport has sent.
    pub fn drained(&self, len: usize) {
        let _ = self
            .buffered
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |buffered| {
                Some(buffered.saturating_sub(len))
            });
    }

    /// Whether a writer would currently be stalled.
    pub fn is_stalled(&self) -> bool {
        self.buffered() >= self.config.high_watermark
    }

    /// Wait until writing may continue.
    ///
    /// Returns immediately below the high watermark. Otherwise polls every
    /// `poll_interval` until the buffer has drained to the low watermark.
    /// Fails with [`PathError::Closed`] once `closed` is cancelled.
    pub async fn settle(&self, closed: &CancellationToken) -> Result<(), PathError> {
        if !self.is_stalled() {
            return Ok(());
        }
        trace!(buffered = self.buffered(), "Applying backpressure");

        let period = self.config.poll_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = closed.cancelled() => return Err(PathError::Closed),
                _ = ticker.tick() => {
                    if self.buffered() <= self.config.low_watermark {
                        trace!(buffered = self.buffered(), "Backpressure released");
                        return Ok(());
                    }
                }
            }
        }
    }
}
