// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/watchbarn

//! Detector simulator for demo/testing

use async_trait::async_trait;
use anyhow::Result;

use super::{BBox, Detection, Detector};
use crate::capture::Frame;

/// Deterministic stand-in for a real detector backend. Output is a pure
/// function of (camera_id, seq), so replaying a frame sequence reproduces
/// the exact detection stream - which is what the tracker determinism
/// tests rely on.
pub struct SimulatedDetector {
    /// Frames per walk cycle: the person crosses, then the scene is empty
    period: u64,
    confidence: f32,
}

impl SimulatedDetector {
    pub fn new() -> Self {
        Self {
            period: 240,
            confidence: 0.9,
        }
    }
}

impl Default for SimulatedDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Detector for SimulatedDetector {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let w = frame.width as f32;
        let h = frame.height as f32;
        let phase = frame.seq % self.period;
        let visible = self.period * 3 / 4;

        // Empty quarter of every cycle: tracks age out and re-entry gets
        // a fresh identity.
        if phase >= visible {
            return Ok(Vec::new());
        }

        let t = phase as f32 / visible as f32;
        let cx = w * (0.1 + 0.7 * t);
        let bottom = h * 0.85;
        let box_w = w * 0.05;
        let box_h = h * 0.18;

        Ok(vec![Detection {
            camera_id: frame.camera_id.clone(),
            seq: frame.seq,
            bbox: BBox::new(
                cx - box_w / 2.0,
                bottom - box_h,
                cx + box_w / 2.0,
                bottom,
            ),
            class: "person".to_string(),
            confidence: self.confidence,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;

    fn frame(seq: u64) -> Frame {
        Frame {
            camera_id: "cam-1".to_string(),
            seq,
            timestamp: Utc::now(),
            image: Arc::new(Vec::new()),
            width: 1920,
            height: 1080,
        }
    }

    #[tokio::test]
    async fn test_output_is_deterministic() {
        let det = SimulatedDetector::new();
        let a = det.detect(&frame(17)).await.unwrap();
        let b = det.detect(&frame(17)).await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].bbox, b[0].bbox);
    }

    #[tokio::test]
    async fn test_cycle_has_empty_window() {
        let det = SimulatedDetector::new();
        let empty = det.detect(&frame(200)).await.unwrap();
        assert!(empty.is_empty());
    }
}
