// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/watchbarn

//! Core engine module - orchestration, event bus, and pipeline metrics

mod engine;
mod event_bus;

pub use engine::Engine;
pub use event_bus::{Event, EventBus, EventPayload, EventType};

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use serde::Serialize;

/// Atomic counters for every pipeline stage. Cheap to bump from any
/// task; read for periodic stats logging and shutdown summaries.
#[derive(Debug)]
pub struct PipelineMetrics {
    pub frames_processed: AtomicU64,
    /// Frames overwritten in full queues (freshness over completeness)
    pub frames_dropped: AtomicU64,
    pub detections: AtomicU64,
    pub detector_failures: AtomicU64,
    pub tracks_confirmed: AtomicU64,
    pub tracks_removed: AtomicU64,
    pub alerts_triggered: AtomicU64,
    pub alerts_delivered: AtomicU64,
    pub alerts_failed: AtomicU64,
    /// Alerts still queued when the shutdown grace period expired
    pub alerts_discarded: AtomicU64,
    started_at: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            frames_processed: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            detections: AtomicU64::new(0),
            detector_failures: AtomicU64::new(0),
            tracks_confirmed: AtomicU64::new(0),
            tracks_removed: AtomicU64::new(0),
            alerts_triggered: AtomicU64::new(0),
            alerts_delivered: AtomicU64::new(0),
            alerts_failed: AtomicU64::new(0),
            alerts_discarded: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.frames_processed.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            detector_failures: self.detector_failures.load(Ordering::Relaxed),
            tracks_confirmed: self.tracks_confirmed.load(Ordering::Relaxed),
            tracks_removed: self.tracks_removed.load(Ordering::Relaxed),
            alerts_triggered: self.alerts_triggered.load(Ordering::Relaxed),
            alerts_delivered: self.alerts_delivered.load(Ordering::Relaxed),
            alerts_failed: self.alerts_failed.load(Ordering::Relaxed),
            alerts_discarded: self.alerts_discarded.load(Ordering::Relaxed),
            fps: self.fps(),
            uptime_seconds: self.uptime_seconds(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time snapshot of the pipeline counters
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub detections: u64,
    pub detector_failures: u64,
    pub tracks_confirmed: u64,
    pub tracks_removed: u64,
    pub alerts_triggered: u64,
    pub alerts_delivered: u64,
    pub alerts_failed: u64,
    pub alerts_discarded: u64,
    pub fps: f64,
    pub uptime_seconds: u64,
}
