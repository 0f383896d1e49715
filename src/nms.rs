//! Locality-aware non-maximum suppression.
//!
//! Cells belonging to the same text instance are contiguous in scan order, so a single pass that
//! folds each candidate into the previous one (when they overlap enough) collapses most of the
//! per-cell hypotheses. Classic NMS then runs over the much smaller merged set.

use std::{cmp::Reverse, collections::VecDeque};

use float_ord::FloatOrd;
use tracing::instrument;

use crate::{
    quad::{iou, Quad},
    restore::CandidateBox,
};

/// Smallest weight used when averaging vertices, so zero-score boxes do not divide by zero.
const MIN_WEIGHT: f32 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergedBox {
    pub quad: Quad,
    /// Highest score among the merged candidates, later replaced by the rescored mean.
    pub score: f32,
    /// Sum of the merged candidates' scores. Vertices are averaged with it and NMS ranks by it.
    pub weight: f32,
}

impl MergedBox {
    pub fn from_candidate(candidate: &CandidateBox) -> Self {
        Self {
            quad: candidate.quad,
            score: candidate.score,
            weight: candidate.score,
        }
    }

    /// Folds `candidate` in as a score-weighted average of vertices.
    pub fn absorb(&mut self, candidate: &CandidateBox) {
        let aligned = align_vertices(&self.quad, &candidate.quad);
        let own = self.weight.max(MIN_WEIGHT);
        let other = candidate.score.max(MIN_WEIGHT);
        // Stepping towards the new vertex leaves coinciding vertices bit-exact.
        let step = other / (own + other);
        for (acc, p) in self.quad.iter_mut().zip(aligned) {
            acc.x += (p.x - acc.x) * step;
            acc.y += (p.y - acc.y) * step;
        }
        self.weight += candidate.score;
        self.score = self.score.max(candidate.score);
    }
}

fn squared_distance(reference: &Quad, quad: &Quad, order: &[usize; 4]) -> f32 {
    reference
        .iter()
        .zip(order)
        .map(|(r, &i)| {
            let (dx, dy) = (r.x - quad[i].x, r.y - quad[i].y);
            dx * dx + dy * dy
        })
        .sum()
}

/// Reorders `quad` so its vertices line up with `reference`, trying every starting vertex in both
/// winding directions. The identity order wins ties.
fn align_vertices(reference: &Quad, quad: &Quad) -> Quad {
    let mut best = [0, 1, 2, 3];
    let mut best_distance = squared_distance(reference, quad, &best);
    for start in 0..4 {
        let forward = [start, (start + 1) % 4, (start + 2) % 4, (start + 3) % 4];
        let backward = [start, (start + 3) % 4, (start + 2) % 4, (start + 1) % 4];
        for order in [forward, backward] {
            let distance = squared_distance(reference, quad, &order);
            if distance < best_distance {
                best = order;
                best_distance = distance;
            }
        }
    }
    best.map(|i| quad[i])
}

/// Single pass over scan-ordered candidates, merging each into the running box while their IoU
/// exceeds `nms_thresh`.
pub fn locality_merge(candidates: &[CandidateBox], nms_thresh: f32) -> Vec<MergedBox> {
    let mut merged: Vec<MergedBox> = Vec::new();
    for candidate in candidates {
        match merged.last_mut() {
            Some(current) if iou(&current.quad, &candidate.quad) > nms_thresh as f64 => {
                current.absorb(candidate)
            }
            _ => merged.push(MergedBox::from_candidate(candidate)),
        }
    }
    merged
}

/// Keeps the heaviest box and drops everything overlapping it above `nms_thresh`, repeatedly.
pub fn standard_nms(mut boxes: Vec<MergedBox>, nms_thresh: f32) -> Vec<MergedBox> {
    boxes.sort_by_key(|b| Reverse(FloatOrd(b.weight)));
    let mut remaining = VecDeque::from(boxes);
    let mut keep = Vec::new();
    while let Some(best) = remaining.pop_front() {
        remaining.retain(|other| iou(&best.quad, &other.quad) <= nms_thresh as f64);
        keep.push(best);
    }
    keep
}

#[instrument(level = "debug", skip(candidates), fields(candidates = candidates.len()))]
pub fn merge_quadrangles(candidates: &[CandidateBox], nms_thresh: f32) -> Vec<MergedBox> {
    let merged = locality_merge(candidates, nms_thresh);
    log::trace!("locality merge left {} boxes", merged.len());
    let kept = standard_nms(merged, nms_thresh);
    log::debug!("{} text boxes after nms", kept.len());
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quad::rect;

    fn candidate(quad: Quad, score: f32) -> CandidateBox {
        CandidateBox { quad, score }
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(merge_quadrangles(&[], 0.2).is_empty());
    }

    #[test]
    fn heavily_overlapping_pair_collapses_to_one() {
        let a = candidate(rect(0.0, 0.0, 100.0, 20.0), 0.9);
        let b = candidate(rect(0.0, 0.0, 100.0, 18.0), 0.6);
        assert!((iou(&a.quad, &b.quad) - 0.9).abs() < 1e-6);

        let kept = merge_quadrangles(&[a, b], 0.2);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].score, 0.9);
        assert!((kept[0].weight - 1.5).abs() < 1e-6);
        // Bottom edge is the score-weighted average of 20 and 18.
        assert!((kept[0].quad[2].y - 19.2).abs() < 1e-4);
        assert_eq!(kept[0].quad[0].y, 0.0);
    }

    #[test]
    fn merge_matches_vertices_regardless_of_start() {
        let a = candidate(rect(0.0, 0.0, 100.0, 20.0), 0.5);
        let mut rotated = rect(0.0, 0.0, 100.0, 20.0);
        rotated.rotate_left(2);
        let b = candidate(rotated, 0.5);

        let kept = locality_merge(&[a, b], 0.2);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].quad, a.quad);
    }

    #[test]
    fn disjoint_boxes_survive() {
        let a = candidate(rect(0.0, 0.0, 10.0, 10.0), 0.9);
        let b = candidate(rect(50.0, 0.0, 60.0, 10.0), 0.85);
        assert_eq!(merge_quadrangles(&[a, b], 0.2).len(), 2);
    }

    #[test]
    fn non_adjacent_duplicates_are_caught_by_second_phase() {
        let a = candidate(rect(0.0, 0.0, 10.0, 10.0), 0.9);
        let b = candidate(rect(50.0, 0.0, 60.0, 10.0), 0.85);
        let c = candidate(rect(1.0, 0.0, 11.0, 10.0), 0.95);

        let phase_one = locality_merge(&[a, b, c], 0.2);
        assert_eq!(phase_one.len(), 3);

        let kept = standard_nms(phase_one, 0.2);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.95);
        assert_eq!(kept[1].score, 0.85);
    }

    #[test]
    fn nms_output_is_a_fixed_point() {
        let candidates = (0..12)
            .map(|i| {
                let x = (i % 4) as f32 * 7.0;
                let y = (i / 4) as f32 * 6.0;
                candidate(rect(x, y, x + 20.0, y + 10.0), 0.5 + i as f32 * 0.03)
            })
            .collect::<Vec<_>>();

        let kept = merge_quadrangles(&candidates, 0.2);
        for (i, a) in kept.iter().enumerate() {
            for b in &kept[i + 1..] {
                assert!(iou(&a.quad, &b.quad) <= 0.2);
            }
        }
        assert_eq!(standard_nms(kept.clone(), 0.2), kept);
    }
}
