// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/watchbarn

//! Multi-object tracking - identity-stable tracks per camera

mod assignment;
mod tracker;

pub use assignment::{associate, Assignment};
pub use tracker::CameraTracker;

use std::collections::VecDeque;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detect::BBox;

/// Tracker tuning parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Ticks without an association before a track is deleted
    pub max_age: u32,

    /// Consecutive associations required to confirm a track
    pub min_hits: u32,

    /// Minimum IoU for a detection-track pairing to be valid
    pub iou_threshold: f32,

    /// Maximum trajectory points kept per track
    pub trajectory_cap: usize,

    /// Number of recent detections voting on the track's class
    pub class_vote_window: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_age: 30,
            min_hits: 3,
            iou_threshold: 0.3,
            trajectory_cap: 100,
            class_vote_window: 10,
        }
    }
}

/// Track lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackState {
    Tentative,
    Confirmed,
    Deleted,
}

/// A persistent identity for one physically continuous object. The id is
/// unique for the track's lifetime, assigned monotonically per camera and
/// never reused or shared across cameras.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: u64,
    pub camera_id: String,
    /// Majority vote over recent associated detections, ties to most recent
    pub class: String,
    pub bbox: BBox,
    /// Confidence of the latest associated detection
    pub confidence: f32,
    pub trajectory: VecDeque<(f32, f32)>,
    pub recent_classes: VecDeque<String>,
    /// Ticks since creation
    pub age: u32,
    /// Total successful associations
    pub hits: u32,
    /// Consecutive successful associations; resets on a missed tick
    pub hit_streak: u32,
    pub time_since_update: u32,
    pub state: TrackState,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Set on the tick of Tentative -> Confirmed promotion, cleared after
    pub newly_confirmed: bool,
}

/// Immutable per-tick view of a track, handed downstream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSnapshot {
    pub id: u64,
    pub camera_id: String,
    pub class: String,
    pub confidence: f32,
    pub bbox: BBox,
    pub center: (f32, f32),
    pub state: TrackState,
    pub age: u32,
    pub time_since_update: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub trajectory: Vec<(f32, f32)>,
    /// True on the tick the track was promoted to Confirmed
    pub newly_confirmed: bool,
}

/// Result of one tracker tick: the live set after lifecycle transitions,
/// plus the ids of tracks deleted this tick (emitted exactly once so the
/// rule engine can discard their sequence state).
#[derive(Debug, Clone)]
pub struct TickUpdate {
    pub live: Vec<TrackSnapshot>,
    pub removed: Vec<u64>,
}
