// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/watchbarn

//! Per-camera track lifecycle: association, promotion, aging, deletion

use std::collections::{HashMap, VecDeque};
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{associate, Track, TrackSnapshot, TrackState, TrackerConfig, TickUpdate};
use crate::detect::Detection;

/// Turns a per-tick detection list into a stable, identity-preserving
/// track set for one camera. Owned exclusively by the task processing
/// that camera; track ids are monotonic and never reused.
pub struct CameraTracker {
    camera_id: String,
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u64,
}

impl CameraTracker {
    pub fn new(camera_id: &str, config: TrackerConfig) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn confirmed_count(&self) -> usize {
        self.tracks
            .iter()
            .filter(|t| t.state == TrackState::Confirmed)
            .count()
    }

    /// Advance one tick. An empty detection list is valid and simply ages
    /// every track. Returns the live set plus the tracks deleted this
    /// tick, which are emitted exactly once and never resurrected.
    pub fn update(&mut self, now: DateTime<Utc>, detections: &[Detection]) -> TickUpdate {
        for track in &mut self.tracks {
            track.newly_confirmed = false;
        }

        // Tracks are stored in creation order, so index order is id order
        // and the assignment tie-break lands on the lower id.
        let track_boxes: Vec<_> = self.tracks.iter().map(|t| t.bbox).collect();
        let det_boxes: Vec<_> = detections.iter().map(|d| d.bbox).collect();
        let assignment = associate(&track_boxes, &det_boxes, self.config.iou_threshold);

        for &(t, d) in &assignment.matches {
            self.tracks[t].apply_match(&detections[d], now, &self.config);
        }

        for &t in &assignment.unmatched_tracks {
            self.tracks[t].miss(self.config.max_age);
        }

        let mut created = 0;
        for &d in &assignment.unmatched_detections {
            self.tracks.push(Track::from_detection(
                self.next_id,
                &self.camera_id,
                &detections[d],
                now,
                &self.config,
            ));
            self.next_id += 1;
            created += 1;
        }

        let removed: Vec<u64> = self
            .tracks
            .iter()
            .filter(|t| t.state == TrackState::Deleted)
            .map(|t| t.id)
            .collect();
        self.tracks.retain(|t| t.state != TrackState::Deleted);

        let live: Vec<TrackSnapshot> = self.tracks.iter().map(Track::snapshot).collect();

        debug!(
            "Tracker tick for {}: {} detections -> {} live, {} new, {} removed",
            self.camera_id,
            detections.len(),
            live.len(),
            created,
            removed.len()
        );

        TickUpdate { live, removed }
    }
}

impl Track {
    fn from_detection(
        id: u64,
        camera_id: &str,
        detection: &Detection,
        now: DateTime<Utc>,
        config: &TrackerConfig,
    ) -> Self {
        let mut trajectory = VecDeque::with_capacity(config.trajectory_cap);
        trajectory.push_back(detection.bbox.center());
        let mut recent_classes = VecDeque::with_capacity(config.class_vote_window);
        recent_classes.push_back(detection.class.clone());

        let mut track = Self {
            id,
            camera_id: camera_id.to_string(),
            class: detection.class.clone(),
            bbox: detection.bbox,
            confidence: detection.confidence,
            trajectory,
            recent_classes,
            age: 1,
            hits: 1,
            hit_streak: 1,
            time_since_update: 0,
            state: TrackState::Tentative,
            first_seen: now,
            last_seen: now,
            newly_confirmed: false,
        };
        if track.hit_streak >= config.min_hits {
            track.state = TrackState::Confirmed;
            track.newly_confirmed = true;
        }
        track
    }

    fn apply_match(&mut self, detection: &Detection, now: DateTime<Utc>, config: &TrackerConfig) {
        self.age += 1;
        self.hits += 1;
        self.hit_streak += 1;
        self.time_since_update = 0;
        self.bbox = detection.bbox;
        self.confidence = detection.confidence;
        self.last_seen = now;

        self.trajectory.push_back(detection.bbox.center());
        while self.trajectory.len() > config.trajectory_cap {
            self.trajectory.pop_front();
        }

        self.recent_classes.push_back(detection.class.clone());
        while self.recent_classes.len() > config.class_vote_window {
            self.recent_classes.pop_front();
        }
        self.class = vote_class(&self.recent_classes);

        if self.state == TrackState::Tentative && self.hit_streak >= config.min_hits {
            self.state = TrackState::Confirmed;
            self.newly_confirmed = true;
        }
    }

    fn miss(&mut self, max_age: u32) {
        self.age += 1;
        self.time_since_update += 1;
        self.hit_streak = 0;
        // Boundary: exactly max_age survives, one past it is deleted
        if self.time_since_update > max_age {
            self.state = TrackState::Deleted;
        }
    }

    fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            id: self.id,
            camera_id: self.camera_id.clone(),
            class: self.class.clone(),
            confidence: self.confidence,
            bbox: self.bbox,
            center: self.bbox.center(),
            state: self.state,
            age: self.age,
            time_since_update: self.time_since_update,
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            trajectory: self.trajectory.iter().copied().collect(),
            newly_confirmed: self.newly_confirmed,
        }
    }
}

/// Mode over recent classes; ties go to the class seen most recently
fn vote_class(recent: &VecDeque<String>) -> String {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for class in recent {
        *counts.entry(class.as_str()).or_default() += 1;
    }
    let best = counts.values().copied().max().unwrap_or(0);
    recent
        .iter()
        .rev()
        .find(|c| counts[c.as_str()] == best)
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BBox;
    use chrono::TimeZone;

    fn config() -> TrackerConfig {
        TrackerConfig {
            max_age: 3,
            min_hits: 2,
            iou_threshold: 0.3,
            trajectory_cap: 5,
            class_vote_window: 4,
        }
    }

    fn det(bbox: BBox, class: &str) -> Detection {
        Detection {
            camera_id: "cam-1".to_string(),
            seq: 0,
            bbox,
            class: class.to_string(),
            confidence: 0.9,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn shifted(b: &BBox, dx: f32) -> BBox {
        BBox::new(b.x1 + dx, b.y1, b.x2 + dx, b.y2)
    }

    #[test]
    fn test_identity_stable_across_ticks() {
        let mut tracker = CameraTracker::new("cam-1", config());
        let mut bbox = BBox::new(100.0, 100.0, 200.0, 300.0);

        let first = tracker.update(now(), &[det(bbox, "person")]);
        let id = first.live[0].id;

        // Small per-tick drift keeps IoU well above the gate
        for _ in 0..20 {
            bbox = shifted(&bbox, 5.0);
            let tick = tracker.update(now(), &[det(bbox, "person")]);
            assert_eq!(tick.live.len(), 1);
            assert_eq!(tick.live[0].id, id);
        }
    }

    #[test]
    fn test_promotion_after_min_hits_consecutive() {
        let mut tracker = CameraTracker::new("cam-1", config());
        let bbox = BBox::new(0.0, 0.0, 100.0, 100.0);

        let t1 = tracker.update(now(), &[det(bbox, "person")]);
        assert_eq!(t1.live[0].state, TrackState::Tentative);

        let t2 = tracker.update(now(), &[det(bbox, "person")]);
        assert_eq!(t2.live[0].state, TrackState::Confirmed);
        assert!(t2.live[0].newly_confirmed);

        let t3 = tracker.update(now(), &[det(bbox, "person")]);
        assert!(!t3.live[0].newly_confirmed);
    }

    #[test]
    fn test_missed_tick_resets_streak_not_hits() {
        let mut tracker = CameraTracker::new("cam-1", config());
        let bbox = BBox::new(0.0, 0.0, 100.0, 100.0);

        tracker.update(now(), &[det(bbox, "person")]);
        tracker.update(now(), &[]);
        let tick = tracker.update(now(), &[det(bbox, "person")]);
        // Streak restarted at 1, still Tentative despite two total hits
        assert_eq!(tick.live[0].state, TrackState::Tentative);
    }

    #[test]
    fn test_deletion_boundary_exactly_max_age_survives() {
        let mut tracker = CameraTracker::new("cam-1", config());
        let bbox = BBox::new(0.0, 0.0, 100.0, 100.0);
        tracker.update(now(), &[det(bbox, "person")]);

        // max_age = 3: three empty ticks leave tsu == 3, still live
        for expected_tsu in 1..=3u32 {
            let tick = tracker.update(now(), &[]);
            assert_eq!(tick.live.len(), 1);
            assert_eq!(tick.live[0].time_since_update, expected_tsu);
            assert!(tick.removed.is_empty());
        }

        // Fourth miss crosses the boundary; deletion is emitted once
        let tick = tracker.update(now(), &[]);
        assert!(tick.live.is_empty());
        assert_eq!(tick.removed.len(), 1);

        let tick = tracker.update(now(), &[]);
        assert!(tick.removed.is_empty());
    }

    #[test]
    fn test_low_iou_spawns_new_track_never_merges() {
        let mut tracker = CameraTracker::new("cam-1", config());
        let a = BBox::new(0.0, 0.0, 100.0, 100.0);
        tracker.update(now(), &[det(a, "person")]);

        let far = BBox::new(500.0, 500.0, 600.0, 600.0);
        let tick = tracker.update(now(), &[det(far, "person")]);
        assert_eq!(tick.live.len(), 2);
        let ids: Vec<u64> = tick.live.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_reappearance_gets_fresh_id() {
        let mut tracker = CameraTracker::new("cam-1", config());
        let bbox = BBox::new(0.0, 0.0, 100.0, 100.0);
        tracker.update(now(), &[det(bbox, "person")]);

        // Age the track past max_age
        for _ in 0..10 {
            tracker.update(now(), &[]);
        }
        assert_eq!(tracker.track_count(), 0);

        let tick = tracker.update(now(), &[det(bbox, "person")]);
        assert_eq!(tick.live[0].id, 2);
    }

    #[test]
    fn test_class_vote_tie_favors_most_recent() {
        let mut tracker = CameraTracker::new("cam-1", config());
        let bbox = BBox::new(0.0, 0.0, 100.0, 100.0);

        tracker.update(now(), &[det(bbox, "cat")]);
        tracker.update(now(), &[det(bbox, "cat")]);
        tracker.update(now(), &[det(bbox, "dog")]);
        let tick = tracker.update(now(), &[det(bbox, "dog")]);
        // Window holds [cat, cat, dog, dog]: tie, most recent wins
        assert_eq!(tick.live[0].class, "dog");
    }

    #[test]
    fn test_trajectory_capped() {
        let mut tracker = CameraTracker::new("cam-1", config());
        let mut bbox = BBox::new(0.0, 0.0, 100.0, 100.0);
        tracker.update(now(), &[det(bbox, "person")]);

        for _ in 0..20 {
            bbox = shifted(&bbox, 2.0);
            tracker.update(now(), &[det(bbox, "person")]);
        }
        let tick = tracker.update(now(), &[det(bbox, "person")]);
        assert_eq!(tick.live[0].trajectory.len(), 5);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let script: Vec<Vec<Detection>> = (0..40)
            .map(|i| {
                let x = (i * 7 % 60) as f32;
                let mut dets = vec![det(BBox::new(x, 0.0, x + 100.0, 100.0), "person")];
                if i % 3 == 0 {
                    dets.push(det(BBox::new(400.0 + x, 0.0, 500.0 + x, 100.0), "car"));
                }
                dets
            })
            .collect();

        let run = |script: &[Vec<Detection>]| {
            let mut tracker = CameraTracker::new("cam-1", config());
            let mut out = Vec::new();
            for dets in script {
                let tick = tracker.update(now(), dets);
                out.push(
                    tick.live
                        .iter()
                        .map(|t| (t.id, t.trajectory.clone()))
                        .collect::<Vec<_>>(),
                );
            }
            out
        };

        assert_eq!(run(&script), run(&script));
    }
}
