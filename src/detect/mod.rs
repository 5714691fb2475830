// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/watchbarn

//! Detection boundary - bounding boxes and the detector collaborator trait

mod simulator;

pub use simulator::SimulatedDetector;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use anyhow::Result;

use crate::capture::Frame;

const EPSILON: f32 = 1e-5;

/// Axis-aligned bounding box in source-image pixel space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Center point (cx, cy)
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Intersection over Union with another box, 0.0 when disjoint
    pub fn iou(&self, other: &BBox) -> f32 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = ix * iy;

        let union = self.area() + other.area() - intersection;
        if union <= EPSILON {
            return 0.0;
        }

        intersection / union
    }
}

/// A single detector output for one frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub camera_id: String,
    pub seq: u64,
    pub bbox: BBox,
    pub class: String,
    pub confidence: f32,
}

/// Object detector collaborator. The model itself lives outside this
/// system; implementations hand back whatever their backend produced for
/// the frame. An empty list is a valid result.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_identical() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 0.0, 15.0, 10.0);
        // intersection 50, union 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_box_has_zero_area() {
        let a = BBox::new(10.0, 10.0, 10.0, 10.0);
        assert_eq!(a.area(), 0.0);
        let b = BBox::new(0.0, 0.0, 20.0, 20.0);
        assert_eq!(a.iou(&b), 0.0);
    }
}
