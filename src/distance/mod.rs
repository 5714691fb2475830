// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/watchbarn

//! Distance annotation - ground-plane back-projection and zones

use std::collections::HashMap;
use serde::{Deserialize, Serialize};

use crate::tracking::TrackSnapshot;

/// Rays depressed less than this below the horizontal do not intersect
/// the ground plane at a usable range.
const MIN_GROUND_ANGLE: f64 = 1e-3;

/// A surveyed point in the camera's view: pixel position plus its known
/// metric distance from the camera
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub name: String,
    pub pixel: (f32, f32),
    pub distance_m: f64,
}

/// Resolved calibration for one camera. These parameters are supplied by
/// the calibration provider; nothing here solves for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraCalibration {
    pub camera_id: String,
    /// Mount height above the ground plane, meters
    pub height_m: f64,
    /// Downward tilt of the optical axis from horizontal, degrees
    pub tilt_deg: f64,
    /// Focal length in pixels
    pub focal_px: f64,
    pub image_width: u32,
    pub image_height: u32,
    #[serde(default)]
    pub reference_points: Vec<ReferencePoint>,
}

/// A named polygonal region in image space
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    pub polygon: Vec<(f32, f32)>,
}

impl Zone {
    /// Ray-casting point-in-polygon test
    pub fn contains(&self, point: (f32, f32)) -> bool {
        let n = self.polygon.len();
        if n < 3 {
            return false;
        }

        let (x, y) = point;
        let mut inside = false;
        let (mut p1x, mut p1y) = self.polygon[0];

        for i in 1..=n {
            let (p2x, p2y) = self.polygon[i % n];
            if y > p1y.min(p2y) && y <= p1y.max(p2y) && x <= p1x.max(p2x) {
                let crosses = if (p1y - p2y).abs() > f32::EPSILON {
                    let xinters = (y - p1y) * (p2x - p1x) / (p2y - p1y) + p1x;
                    p1x == p2x || x <= xinters
                } else {
                    true
                };
                if crosses {
                    inside = !inside;
                }
            }
            p1x = p2x;
            p1y = p2y;
        }

        inside
    }
}

/// Distance estimate for one confirmed track. Recomputed every tick; a
/// sibling value to the track, never stored on it. Absent fields mean
/// the estimate was not possible, which is expected, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistanceMeasurement {
    pub track_id: u64,
    pub distance_to_camera: Option<f64>,
    /// Reference-point name to meters; references that do not
    /// back-project are omitted
    pub references: HashMap<String, f64>,
    pub confidence: f64,
}

/// Map a track's bbox into distances using the camera's calibration.
/// Pure function of its inputs; never blocks. Objects whose bbox bottom
/// edge sits at or above the horizon line yield null distances.
pub fn annotate(track: &TrackSnapshot, cal: &CameraCalibration) -> DistanceMeasurement {
    let foot = (track.center.0, track.bbox.y2);
    let object = ground_point(foot.0 as f64, foot.1 as f64, cal);

    let distance_to_camera = object.map(|(x, z)| (x * x + z * z).sqrt());

    let mut references = HashMap::new();
    if let Some((ox, oz)) = object {
        for rp in &cal.reference_points {
            let projected = ground_point(rp.pixel.0 as f64, rp.pixel.1 as f64, cal);
            if let Some((rx, rz)) = projected {
                let range = (rx * rx + rz * rz).sqrt();
                // Anchor to the surveyed distance: the survey is truth,
                // the projection carries the shape.
                let scale = if range > 0.1 { rp.distance_m / range } else { 1.0 };
                let d = ((ox - rx).powi(2) + (oz - rz).powi(2)).sqrt() * scale;
                references.insert(rp.name.clone(), d);
            }
        }
    }

    let confidence = if distance_to_camera.is_some() {
        estimate_confidence(track, cal)
    } else {
        0.0
    };

    DistanceMeasurement {
        track_id: track.id,
        distance_to_camera,
        references,
        confidence,
    }
}

/// Back-project an image pixel onto the ground plane. Returns (lateral,
/// forward) meters relative to the camera base, or None when the ray
/// does not descend to the ground.
fn ground_point(u: f64, v: f64, cal: &CameraCalibration) -> Option<(f64, f64)> {
    let cx = cal.image_width as f64 / 2.0;
    let cy = cal.image_height as f64 / 2.0;

    let below_axis = ((v - cy) / cal.focal_px).atan();
    let depression = cal.tilt_deg.to_radians() + below_axis;
    if depression <= MIN_GROUND_ANGLE {
        return None;
    }

    let forward = cal.height_m / depression.tan();
    let lateral = forward * (u - cx) / cal.focal_px;
    Some((lateral, forward))
}

/// Estimate reliability: extreme bbox sizes and frame-edge positions
/// degrade the measurement, scaled by the detection confidence.
fn estimate_confidence(track: &TrackSnapshot, cal: &CameraCalibration) -> f64 {
    let mut confidence: f64 = 1.0;

    let area = track.bbox.area() as f64;
    if area < 1000.0 {
        confidence *= 0.5;
    } else if area > 50_000.0 {
        confidence *= 0.7;
    }

    let (x, y) = track.center;
    let w = cal.image_width as f32;
    let h = cal.image_height as f32;
    let margin = 0.1;
    if x < w * margin || x > w * (1.0 - margin) || y < h * margin || y > h * (1.0 - margin) {
        confidence *= 0.8;
    }

    confidence *= track.confidence as f64;
    confidence.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BBox;
    use crate::tracking::TrackState;
    use chrono::{TimeZone, Utc};

    fn calibration() -> CameraCalibration {
        CameraCalibration {
            camera_id: "cam-1".to_string(),
            height_m: 5.0,
            tilt_deg: 45.0,
            focal_px: 1000.0,
            image_width: 1920,
            image_height: 1080,
            reference_points: vec![],
        }
    }

    fn snapshot(bbox: BBox) -> TrackSnapshot {
        let t = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        TrackSnapshot {
            id: 1,
            camera_id: "cam-1".to_string(),
            class: "person".to_string(),
            confidence: 1.0,
            bbox,
            center: bbox.center(),
            state: TrackState::Confirmed,
            age: 10,
            time_since_update: 0,
            first_seen: t,
            last_seen: t,
            trajectory: vec![bbox.center()],
            newly_confirmed: false,
        }
    }

    #[test]
    fn test_distance_on_optical_axis() {
        // Bottom edge on the principal row at 45 degrees down from 5m up:
        // the ray lands exactly 5m out.
        let cal = calibration();
        let track = snapshot(BBox::new(940.0, 340.0, 980.0, 540.0));
        let m = annotate(&track, &cal);
        let d = m.distance_to_camera.unwrap();
        assert!((d - 5.0).abs() < 0.01, "got {}", d);
    }

    #[test]
    fn test_above_horizon_is_null_not_error() {
        let mut cal = calibration();
        cal.tilt_deg = 5.0;
        // Bottom edge far above the principal row: ray never descends
        let track = snapshot(BBox::new(940.0, 0.0, 980.0, 100.0));
        let m = annotate(&track, &cal);
        assert!(m.distance_to_camera.is_none());
        assert!(m.references.is_empty());
        assert_eq!(m.confidence, 0.0);
    }

    #[test]
    fn test_reference_distance_near_zero_at_same_pixel() {
        let mut cal = calibration();
        cal.reference_points.push(ReferencePoint {
            name: "front_door".to_string(),
            pixel: (960.0, 540.0),
            distance_m: 5.0,
        });
        let track = snapshot(BBox::new(940.0, 340.0, 980.0, 540.0));
        let m = annotate(&track, &cal);
        let d = m.references["front_door"];
        assert!(d < 0.2, "got {}", d);
    }

    #[test]
    fn test_reference_skipped_when_not_projectable() {
        let mut cal = calibration();
        cal.tilt_deg = 20.0;
        cal.reference_points.push(ReferencePoint {
            name: "skyline".to_string(),
            pixel: (960.0, 0.0),
            distance_m: 50.0,
        });
        let track = snapshot(BBox::new(940.0, 340.0, 980.0, 540.0));
        let m = annotate(&track, &cal);
        assert!(!m.references.contains_key("skyline"));
    }

    #[test]
    fn test_confidence_degrades_for_tiny_edge_boxes() {
        let cal = calibration();
        let centered = snapshot(BBox::new(900.0, 340.0, 1020.0, 540.0));
        let tiny_edge = snapshot(BBox::new(0.0, 520.0, 20.0, 540.0));
        let a = annotate(&centered, &cal);
        let b = annotate(&tiny_edge, &cal);
        assert!(b.confidence < a.confidence);
    }

    #[test]
    fn test_zone_containment() {
        let zone = Zone {
            name: "porch".to_string(),
            polygon: vec![(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)],
        };
        assert!(zone.contains((50.0, 50.0)));
        assert!(!zone.contains((150.0, 50.0)));
    }

    #[test]
    fn test_degenerate_zone_contains_nothing() {
        let zone = Zone {
            name: "line".to_string(),
            polygon: vec![(0.0, 0.0), (100.0, 0.0)],
        };
        assert!(!zone.contains((50.0, 0.0)));
    }
}
