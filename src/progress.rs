//! Progress tracking for the rewrite pass.
//!
//! The pass is single-threaded, so the tracker is plain state owned by the
//! splitter. Updates are throttled; the final 100% update is always emitted.

use std::time::{Duration, Instant};

/// Default minimum spacing between two callback invocations.
pub const DEFAULT_EMIT_INTERVAL: Duration = Duration::from_millis(100);

/// Snapshot handed to the progress callback.
#[derive(Debug, Clone)]
pub struct ProgressState {
    pub total_entries: u64,
    pub processed_entries: u64,
    pub total_bytes: u64,
    pub processed_bytes: u64,
    pub elapsed_time: Duration,
    pub speed_mbps: f32,
    pub progress_percent: f32,
}

impl ProgressState {
    /// Extrapolates the time left from the elapsed time and the share of
    /// payload bytes copied so far. `None` until the first byte is copied.
    pub fn estimated_time_remaining(&self) -> Option<Duration> {
        if self.processed_bytes == 0 || self.total_bytes == 0 {
            return None;
        }
        let done = self.processed_bytes.min(self.total_bytes) as f64 / self.total_bytes as f64;
        Some(self.elapsed_time.mul_f64((1.0 - done) / done))
    }
}

/// Progress callback function type
pub type ProgressCallback = dyn Fn(ProgressState) + Send + Sync;

pub struct ProgressTracker<'a> {
    callback: Option<&'a ProgressCallback>,
    total_entries: u64,
    total_bytes: u64,
    processed_entries: u64,
    processed_bytes: u64,
    start_time: Instant,
    last_emit: Option<Instant>,
    emit_interval: Duration,
    completed: bool,
}

impl<'a> ProgressTracker<'a> {
    /// A tracker without a callback costs a few additions per entry.
    pub fn new(
        callback: Option<&'a ProgressCallback>,
        total_entries: u64,
        total_bytes: u64,
    ) -> Self {
        Self::with_interval(callback, total_entries, total_bytes, DEFAULT_EMIT_INTERVAL)
    }

    pub fn with_interval(
        callback: Option<&'a ProgressCallback>,
        total_entries: u64,
        total_bytes: u64,
        emit_interval: Duration,
    ) -> Self {
        Self {
            callback,
            total_entries,
            total_bytes,
            processed_entries: 0,
            processed_bytes: 0,
            start_time: Instant::now(),
            last_emit: None,
            emit_interval,
            completed: false,
        }
    }

    pub fn record_bytes(&mut self, bytes: u64) {
        self.processed_bytes = self.processed_bytes.saturating_add(bytes);
        self.maybe_emit();
    }

    pub fn record_entry(&mut self) {
        self.processed_entries += 1;
        self.maybe_emit();
    }

    /// Emits the final update once.
    pub fn finish(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        self.processed_entries = self.processed_entries.max(self.total_entries);
        self.processed_bytes = self.processed_bytes.max(self.total_bytes);
        if let Some(cb) = self.callback {
            cb(self.snapshot());
        }
    }

    pub fn snapshot(&self) -> ProgressState {
        let elapsed = self.start_time.elapsed();
        let secs = elapsed.as_secs_f32();
        let speed_mbps = if secs > 0.0 {
            self.processed_bytes as f32 / (1024.0 * 1024.0) / secs
        } else {
            0.0
        };
        let progress_percent = if self.completed {
            100.0
        } else if self.total_bytes > 0 {
            (self.processed_bytes as f32 / self.total_bytes as f32 * 100.0).min(99.9)
        } else if self.total_entries > 0 {
            (self.processed_entries as f32 / self.total_entries as f32 * 100.0).min(99.9)
        } else {
            0.0
        };
        ProgressState {
            total_entries: self.total_entries,
            processed_entries: self.processed_entries,
            total_bytes: self.total_bytes,
            processed_bytes: self.processed_bytes,
            elapsed_time: elapsed,
            speed_mbps,
            progress_percent,
        }
    }

    fn maybe_emit(&mut self) {
        let Some(cb) = self.callback else { return };
        let now = Instant::now();
        let due = match self.last_emit {
            Some(last) => now.duration_since(last) >= self.emit_interval,
            None => true,
        };
        if due {
            self.last_emit = Some(now);
            cb(self.snapshot());
        }
    }
}
