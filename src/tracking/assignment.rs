// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/watchbarn

//! Detection-to-track association via optimal bipartite matching

use lapjv::{lapjv, Matrix};
use tracing::warn;

use crate::detect::BBox;

/// Sentinel cost for pairings below the IoU gate. The gate applies
/// regardless of assignment quality: the solver may route through a
/// sentinel cell on the padded matrix, so assignments are re-checked
/// against it afterwards.
const INVALID_MATCH: f32 = 1_000_000.0;

/// Anti-crossing bias: among equal-cost assignments, prefer pairing
/// earlier detections with earlier (lower-id) tracks. Small enough to
/// never outweigh a real IoU difference.
const TIE_BIAS: f32 = 1e-6;

/// Outcome of one association round, all indices into the input slices
#[derive(Debug, Clone, Default)]
pub struct Assignment {
    /// (track index, detection index) pairs
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// Match detections against track boxes, maximizing total IoU subject to
/// the gate. Tracks must be ordered by ascending track id so the tie
/// bias lands on the lower id.
pub fn associate(tracks: &[BBox], detections: &[BBox], iou_threshold: f32) -> Assignment {
    if tracks.is_empty() || detections.is_empty() {
        return Assignment {
            matches: Vec::new(),
            unmatched_tracks: (0..tracks.len()).collect(),
            unmatched_detections: (0..detections.len()).collect(),
        };
    }

    // lapjv wants a square matrix; pad the short side with zero-cost
    // dummy cells.
    let dims = tracks.len().max(detections.len());
    let costs = Matrix::from_shape_fn((dims, dims), |(d, t)| {
        if d < detections.len() && t < tracks.len() {
            let iou = detections[d].iou(&tracks[t]);
            if iou < iou_threshold {
                INVALID_MATCH
            } else {
                1.0 - iou + TIE_BIAS * (d as f32 - t as f32).abs()
            }
        } else {
            0.0
        }
    });

    let row_to_col = match lapjv(&costs) {
        Ok((rows, _cols)) => rows,
        Err(e) => {
            // Degenerate solver failure: treat the tick as unmatched
            // rather than guessing at identities.
            warn!("Assignment solver failed: {:?}", e);
            return Assignment {
                matches: Vec::new(),
                unmatched_tracks: (0..tracks.len()).collect(),
                unmatched_detections: (0..detections.len()).collect(),
            };
        }
    };

    let mut matched_det = vec![false; detections.len()];
    let mut matched_track = vec![false; tracks.len()];
    let mut matches = Vec::new();

    for (d, &t) in row_to_col.iter().enumerate() {
        if d >= detections.len() || t >= tracks.len() {
            continue;
        }
        if costs[(d, t)] >= INVALID_MATCH {
            continue;
        }
        matched_det[d] = true;
        matched_track[t] = true;
        matches.push((t, d));
    }

    matches.sort_unstable();

    Assignment {
        matches,
        unmatched_tracks: (0..tracks.len()).filter(|&t| !matched_track[t]).collect(),
        unmatched_detections: (0..detections.len())
            .filter(|&d| !matched_det[d])
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bx(x1: f32, x2: f32) -> BBox {
        BBox::new(x1, 0.0, x2, 10.0)
    }

    #[test]
    fn test_empty_inputs() {
        let a = associate(&[], &[bx(0.0, 10.0)], 0.3);
        assert!(a.matches.is_empty());
        assert_eq!(a.unmatched_detections, vec![0]);

        let a = associate(&[bx(0.0, 10.0)], &[], 0.3);
        assert_eq!(a.unmatched_tracks, vec![0]);
    }

    #[test]
    fn test_gate_excludes_low_iou() {
        let tracks = vec![bx(0.0, 100.0)];
        let dets = vec![bx(500.0, 600.0)];
        let a = associate(&tracks, &dets, 0.3);
        assert!(a.matches.is_empty());
        assert_eq!(a.unmatched_tracks, vec![0]);
        assert_eq!(a.unmatched_detections, vec![0]);
    }

    #[test]
    fn test_tie_prefers_lower_track() {
        // Two identical track boxes, one detection dead center on both:
        // the equal-IoU tie must resolve to track 0.
        let tracks = vec![bx(0.0, 100.0), bx(0.0, 100.0)];
        let dets = vec![bx(10.0, 110.0)];
        let a = associate(&tracks, &dets, 0.3);
        assert_eq!(a.matches, vec![(0, 0)]);
        assert_eq!(a.unmatched_tracks, vec![1]);
    }

    #[test]
    fn test_optimal_assignment_beats_greedy() {
        // iou(d0,t0)=0.60  iou(d0,t1)=0.55  iou(d1,t0)=0.50  iou(d1,t1) gated.
        // Greedy takes d0->t0 and strands d1; the optimal solution pairs
        // d0->t1 and d1->t0, matching both.
        let tracks = vec![bx(0.0, 100.0), bx(54.0, 154.0)];
        let dets = vec![bx(25.0, 125.0), bx(-33.4, 66.6)];
        let a = associate(&tracks, &dets, 0.3);
        assert_eq!(a.matches, vec![(0, 1), (1, 0)]);
        assert!(a.unmatched_tracks.is_empty());
        assert!(a.unmatched_detections.is_empty());
    }

    #[test]
    fn test_rectangular_padding() {
        // Three detections, one track: the two extras stay unmatched.
        let tracks = vec![bx(0.0, 100.0)];
        let dets = vec![bx(2.0, 102.0), bx(300.0, 400.0), bx(500.0, 600.0)];
        let a = associate(&tracks, &dets, 0.3);
        assert_eq!(a.matches, vec![(0, 0)]);
        assert_eq!(a.unmatched_detections, vec![1, 2]);
    }
}
