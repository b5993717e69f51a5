//! Byte and item accounting with a smoothed transfer rate.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use shuttle_core::ProgressSnapshot;

/// Weight of the newest sample in the moving average.
const SMOOTHING: f64 = 0.3;

/// Rate samples are taken at most this often.
const SAMPLE_WINDOW: Duration = Duration::from_millis(100);

/// Tracks job progress and throttles snapshot emission.
#[derive(Debug)]
pub struct ProgressTracker {
    bytes_done: u64,
    bytes_total: u64,
    items_done: usize,
    items_total: usize,
    current_path: Option<PathBuf>,
    rate: Option<f64>,
    sample_started: Instant,
    sample_bytes: u64,
    last_emit: Option<Instant>,
    interval: Duration,
}

impl ProgressTracker {
    pub fn new(items_total: usize, bytes_total: u64, interval: Duration) -> Self {
        Self::new_at(items_total, bytes_total, interval, Instant::now())
    }

    pub fn new_at(items_total: usize, bytes_total: u64, interval: Duration, now: Instant) -> Self {
        Self {
            bytes_done: 0,
            bytes_total,
            items_done: 0,
            items_total,
            current_path: None,
            rate: None,
            sample_started: now,
            sample_bytes: 0,
            last_emit: None,
            interval,
        }
    }

    pub fn bytes_done(&self) -> u64 {
        self.bytes_done
    }

    pub fn items_done(&self) -> usize {
        self.items_done
    }

    /// Grow the totals when a directory's children are listed.
    pub fn grow(&mut self, items: usize, bytes: u64) {
        self.items_total += items;
        self.bytes_total += bytes;
    }

    /// Shrink the totals when listed children are dropped again.
    pub fn shrink(&mut self, items: usize, bytes: u64) {
        self.items_total = self.items_total.saturating_sub(items).max(self.items_done);
        self.bytes_total = self.bytes_total.saturating_sub(bytes).max(self.bytes_done);
    }

    pub fn set_current(&mut self, path: Option<PathBuf>) {
        self.current_path = path;
    }

    /// Record bytes written by a transfer.
    pub fn advance(&mut self, bytes: u64) {
        self.advance_at(bytes, Instant::now());
    }

    pub fn advance_at(&mut self, bytes: u64, now: Instant) {
        self.add_done(bytes);
        self.sample_bytes += bytes;

        let elapsed = now.saturating_duration_since(self.sample_started);
        if elapsed >= SAMPLE_WINDOW {
            let instant = self.sample_bytes as f64 / elapsed.as_secs_f64();
            self.rate = Some(match self.rate {
                Some(rate) => SMOOTHING * instant + (1.0 - SMOOTHING) * rate,
                None => instant,
            });
            self.sample_started = now;
            self.sample_bytes = 0;
        }
    }

    /// Count bytes as done without feeding the rate (renames, deletes, skips).
    pub fn credit(&mut self, bytes: u64) {
        self.add_done(bytes);
    }

    /// Drop bytes counted since `mark`, after a failed or cancelled attempt.
    pub fn rewind_to(&mut self, mark: u64) {
        let undone = self.bytes_done.saturating_sub(mark);
        self.bytes_done = self.bytes_done.min(mark);
        self.sample_bytes = self.sample_bytes.saturating_sub(undone);
    }

    pub fn finish_item(&mut self) {
        self.items_done = (self.items_done + 1).min(self.items_total);
    }

    fn add_done(&mut self, bytes: u64) {
        self.bytes_done += bytes;
        // A file that grew while being read extends the total.
        if self.bytes_done > self.bytes_total {
            self.bytes_total = self.bytes_done;
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let remaining = self.bytes_total - self.bytes_done;
        let bytes_per_second = self.rate.unwrap_or(0.0);
        let eta_seconds = match self.rate {
            Some(rate) if rate > 0.0 => Some((remaining as f64 / rate).ceil() as u64),
            _ => None,
        };

        ProgressSnapshot {
            bytes_done: self.bytes_done,
            bytes_total: self.bytes_total,
            items_done: self.items_done,
            items_total: self.items_total,
            current_path: self.current_path.clone(),
            bytes_per_second,
            eta_seconds,
        }
    }

    /// A snapshot if the emit interval has passed since the last one.
    pub fn poll(&mut self) -> Option<ProgressSnapshot> {
        self.poll_at(Instant::now())
    }

    pub fn poll_at(&mut self, now: Instant) -> Option<ProgressSnapshot> {
        let due = match self.last_emit {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        };
        if !due {
            return None;
        }
        self.last_emit = Some(now);
        Some(self.snapshot())
    }

    /// A snapshot regardless of the interval.
    pub fn force(&mut self) -> ProgressSnapshot {
        self.last_emit = Some(Instant::now());
        self.snapshot()
    }
}
