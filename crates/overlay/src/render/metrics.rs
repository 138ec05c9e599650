use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameMetricsSnapshot {
    /// Every intercepted present, including passthroughs.
    pub present_calls: u64,
    /// Presents on which the overlay actually drew.
    pub rendered_frames: u64,
    pub fps: f32,
    pub draw_time_ms: f32,
    /// Slowest overlay draw in the last published window.
    pub peak_draw_time_ms: f32,
}

/// Counters written by the render thread and read from anywhere.
#[derive(Clone, Debug, Default)]
pub struct MetricsHandle {
    present_calls: Arc<AtomicU64>,
    rendered_frames: Arc<AtomicU64>,
    window: Arc<RwLock<FrameWindow>>,
}

#[derive(Debug, Clone, Copy, Default)]
struct FrameWindow {
    fps: f32,
    mean_ms: f32,
    peak_ms: f32,
}

impl MetricsHandle {
    pub fn snapshot(&self) -> FrameMetricsSnapshot {
        let window = *self.window.read();
        FrameMetricsSnapshot {
            present_calls: self.present_calls(),
            rendered_frames: self.rendered_frames.load(Ordering::Relaxed),
            fps: window.fps,
            draw_time_ms: window.mean_ms,
            peak_draw_time_ms: window.peak_ms,
        }
    }

    pub fn present_calls(&self) -> u64 {
        self.present_calls.load(Ordering::Relaxed)
    }

    pub(crate) fn record_present_call(&self) -> u64 {
        self.present_calls.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_rendered_frame(&self) {
        self.rendered_frames.fetch_add(1, Ordering::Relaxed);
    }
}

/// Collects draw durations on the render thread and publishes one
/// [`FrameWindow`] per `interval`.
#[derive(Debug)]
pub(crate) struct MetricsAccumulator {
    window_start: Instant,
    interval: Duration,
    draws: u32,
    total: Duration,
    peak: Duration,
}

impl MetricsAccumulator {
    pub(crate) fn new(interval: Duration) -> Self {
        Self::starting_at(Instant::now(), interval)
    }

    fn starting_at(window_start: Instant, interval: Duration) -> Self {
        Self {
            window_start,
            interval,
            draws: 0,
            total: Duration::ZERO,
            peak: Duration::ZERO,
        }
    }

    pub(crate) fn record_frame(&mut self, draw_time: Duration) {
        self.draws = self.draws.saturating_add(1);
        self.total = self.total.saturating_add(draw_time);
        self.peak = self.peak.max(draw_time);
    }

    /// Publishes and restarts the window once `interval` has passed.
    pub(crate) fn maybe_publish(&mut self, now: Instant, handle: &MetricsHandle) -> bool {
        let span = now.saturating_duration_since(self.window_start);
        if span < self.interval {
            return false;
        }

        let mean_ms = match self.draws {
            0 => 0.0,
            draws => self.total.as_secs_f32() * 1000.0 / draws as f32,
        };
        *handle.window.write() = FrameWindow {
            fps: self.draws as f32 / span.as_secs_f32().max(f32::EPSILON),
            mean_ms,
            peak_ms: self.peak.as_secs_f32() * 1000.0,
        };

        *self = Self::starting_at(now, self.interval);
        true
    }
}
