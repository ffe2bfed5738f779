//! Frame-to-frame assignment of tracked rods to new detection pairs.
//!
//! Builds a `P x M x N` weight tensor over (previous identity, camera-1
//! detection, camera-2 detection) triples. Each cell scores the best of the
//! four endpoint-ordering combinations: endpoint displacement against the
//! identity's previous endpoints, scaled by the pair's reprojection
//! quality. The tensor is inverted and solved exactly as a maximization
//! ILP; identities the solver leaves out are completed from leftover
//! detection indices in ascending order.

use nalgebra::Point3;
use ndarray::{Array3, ArrayView3};
use tracing::debug;

use crate::assign::ilp::{npartite_matching, Direction};
use crate::correspond::{PairGrid, COST_SENTINEL};
use crate::error::{Axis, Error, Result};

/// One previous identity matched to a detection pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalMatch {
    pub identity: usize,
    pub cam1: usize,
    pub cam2: usize,
    /// Winning combo index (0..=3); combo `c` continues the identity's
    /// first endpoint, combo `3 - c` its second.
    pub choice: u8,
    /// False when the triple came from leftover completion rather than
    /// the solver.
    pub solved: bool,
}

/// Previous endpoints of one identity, in world coordinates.
pub type EndpointPair = (Point3<f64>, Point3<f64>);

fn clamp(v: f64) -> f64 {
    if v.is_finite() {
        v.min(COST_SENTINEL)
    } else {
        COST_SENTINEL
    }
}

/// Build the weight and combo-choice tensors.
///
/// For identity `k` with previous endpoints `(q1, q2)` and pair `(i, j)`
/// with combo points `c0..c3`, the four candidate scores are the summed
/// endpoint displacements of each consistent ordering, multiplied by the
/// summed reprojection error of the interpretation that ordering uses.
/// The cell keeps the minimum and records its combo.
pub fn create_weights(prev: &[EndpointPair], grid: &PairGrid) -> (Array3<f64>, Array3<u8>) {
    let (p, m, n) = (prev.len(), grid.cam1_len(), grid.cam2_len());
    let mut weights = Array3::from_elem((p, m, n), COST_SENTINEL);
    let mut choices = Array3::zeros((p, m, n));

    for (k, &(q1, q2)) in prev.iter().enumerate() {
        for i in 0..m {
            for j in 0..n {
                let pair = &grid.pairs[i][j];
                let c = &pair.points;
                let straight_re = pair.straight_error();
                let crossed_re = pair.crossed_error();

                let scores = [
                    ((c[0] - q1).norm() + (c[3] - q2).norm()) * straight_re,
                    ((c[1] - q1).norm() + (c[2] - q2).norm()) * crossed_re,
                    ((c[2] - q1).norm() + (c[1] - q2).norm()) * crossed_re,
                    ((c[3] - q1).norm() + (c[0] - q2).norm()) * straight_re,
                ];
                let (best, &score) = scores
                    .iter()
                    .enumerate()
                    .min_by(|a, b| clamp(*a.1).total_cmp(&clamp(*b.1)))
                    .unwrap_or((0, &COST_SENTINEL));

                weights[[k, i, j]] = clamp(score);
                choices[[k, i, j]] = best as u8;
            }
        }
    }
    (weights, choices)
}

/// Invert a cost tensor for maximization: `max(w) - w`.
///
/// The reference maximum ignores clamped sentinel cells, so degenerate
/// pairs invert to strongly negative weights and are never selected; the
/// completion step picks them up if the identity count demands it.
pub fn invert_weights(weights: ArrayView3<'_, f64>) -> Array3<f64> {
    let max = weights
        .iter()
        .copied()
        .filter(|w| *w < COST_SENTINEL)
        .fold(0.0_f64, f64::max);
    weights.map(|&w| max - w)
}

/// Match every previous identity to a detection pair.
///
/// Solver triples come first; unmatched identities are then paired with
/// leftover detections by ascending index. If a camera axis runs out of
/// leftover indices, the dataset cannot cover the identities and the
/// whole frame fails with [`Error::UnbalancedDataset`].
pub fn solve(
    prev: &[EndpointPair],
    grid: &PairGrid,
    frame: u32,
    color: &str,
) -> Result<Vec<TemporalMatch>> {
    let (p, m, n) = (prev.len(), grid.cam1_len(), grid.cam2_len());
    let (weights, choices) = create_weights(prev, grid);

    let triples = if p == 0 || m == 0 || n == 0 {
        Vec::new()
    } else {
        let inverted = invert_weights(weights.view());
        npartite_matching(inverted.view(), Direction::Maximize)?
    };
    debug!(
        frame,
        color,
        solved = triples.len(),
        identities = p,
        "temporal assignment"
    );

    let mut id_used = vec![false; p];
    let mut cam1_used = vec![false; m];
    let mut cam2_used = vec![false; n];
    let mut matches = Vec::with_capacity(p);
    for t in &triples {
        let (k, i, j) = (t[0], t[1], t[2]);
        id_used[k] = true;
        cam1_used[i] = true;
        cam2_used[j] = true;
        matches.push(TemporalMatch {
            identity: k,
            cam1: i,
            cam2: j,
            choice: choices[[k, i, j]],
            solved: true,
        });
    }

    // Pair leftovers off in index order. No geometric backing is claimed
    // for these triples; they only keep the identity count fixed.
    let leftover_ids: Vec<usize> = (0..p).filter(|&k| !id_used[k]).collect();
    let mut leftover_cam1 = (0..m).filter(|&i| !cam1_used[i]);
    let mut leftover_cam2 = (0..n).filter(|&j| !cam2_used[j]);
    for (pos, &k) in leftover_ids.iter().enumerate() {
        let i = leftover_cam1.next().ok_or_else(|| Error::UnbalancedDataset {
            frame,
            color: color.to_string(),
            axis: Axis::Cam1,
            needed: leftover_ids.len() - pos,
            available: pos,
        })?;
        let j = leftover_cam2.next().ok_or_else(|| Error::UnbalancedDataset {
            frame,
            color: color.to_string(),
            axis: Axis::Cam2,
            needed: leftover_ids.len() - pos,
            available: pos,
        })?;
        matches.push(TemporalMatch {
            identity: k,
            cam1: i,
            cam2: j,
            choice: choices[[k, i, j]],
            solved: false,
        });
    }

    matches.sort_by_key(|m| m.identity);
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calib::WorldTransform;
    use crate::correspond::tests::{observe_rod, test_rig};
    use crate::correspond::{build_pair_grid, Detection2D};
    use nalgebra::Point3;

    fn rods() -> Vec<EndpointPair> {
        vec![
            (Point3::new(-0.3, 0.0, 5.0), Point3::new(0.3, 0.1, 5.0)),
            (Point3::new(0.1, -0.4, 4.0), Point3::new(0.2, 0.4, 4.5)),
            (Point3::new(-0.5, 0.5, 6.0), Point3::new(0.5, -0.5, 6.0)),
        ]
    }

    /// Add sub-pixel measurement noise so reprojection factors are
    /// realistic rather than numerically zero.
    fn jitter(d: Detection2D) -> Detection2D {
        Detection2D::new(
            nalgebra::Point2::new(d.a.x + 0.25, d.a.y - 0.2),
            nalgebra::Point2::new(d.b.x - 0.15, d.b.y + 0.3),
        )
    }

    /// Observe the rods slightly moved, with the detection lists permuted.
    fn observe_moved(
        permutation: &[usize],
        swap_cam2: bool,
    ) -> (Vec<Detection2D>, Vec<Detection2D>) {
        let rig = test_rig();
        let mut cam1 = Vec::new();
        let mut cam2 = Vec::new();
        for &r in permutation {
            let (e1, e2) = rods()[r];
            let shift = nalgebra::Vector3::new(0.01, -0.01, 0.02);
            let (d1, d2) = observe_rod(&rig, e1 + shift, e2 + shift, swap_cam2);
            cam1.push(jitter(d1));
            cam2.push(jitter(d2));
        }
        (cam1, cam2)
    }

    #[test]
    fn identities_survive_detection_permutation() {
        let rig = test_rig();
        let world = WorldTransform::default();
        let (cam1, cam2) = observe_moved(&[2, 0, 1], false);
        let grid = build_pair_grid(&rig, &world, &cam1, &cam2);

        let out = solve(&rods(), &grid, 1, "black").unwrap();
        assert_eq!(out.len(), 3);
        // identity k must find its rod at permuted position
        assert_eq!((out[0].identity, out[0].cam1, out[0].cam2), (0, 1, 1));
        assert_eq!((out[1].identity, out[1].cam1, out[1].cam2), (1, 2, 2));
        assert_eq!((out[2].identity, out[2].cam1, out[2].cam2), (2, 0, 0));
        assert!(out.iter().all(|m| m.solved));
    }

    #[test]
    fn swapped_endpoints_continue_through_the_crossed_combo() {
        let rig = test_rig();
        let world = WorldTransform::default();
        let (cam1, cam2) = observe_moved(&[0, 1, 2], true);
        let grid = build_pair_grid(&rig, &world, &cam1, &cam2);

        let out = solve(&rods(), &grid, 1, "black").unwrap();
        assert_eq!(out.len(), 3);
        for m in &out {
            assert_eq!(m.identity, m.cam1);
            // camera 2 saw the endpoints in reverse, so the winning combo
            // must be a crossed one
            assert!(m.choice == 1 || m.choice == 2, "choice {}", m.choice);
        }
    }

    #[test]
    fn missing_detections_are_unbalanced() {
        let rig = test_rig();
        let world = WorldTransform::default();
        let (cam1, _) = observe_moved(&[0], false);
        let grid = build_pair_grid(&rig, &world, &cam1, &[]);

        let err = solve(&rods(), &grid, 7, "green").unwrap_err();
        match err {
            Error::UnbalancedDataset {
                frame, color, axis, ..
            } => {
                assert_eq!(frame, 7);
                assert_eq!(color, "green");
                assert_eq!(axis, Axis::Cam2);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn surplus_detections_are_dropped() {
        let rig = test_rig();
        let world = WorldTransform::default();
        let (mut cam1, mut cam2) = observe_moved(&[0, 1, 2], false);
        // spurious extra detection far from every tracked rod
        let (s1, s2) = observe_rod(
            &rig,
            Point3::new(2.0, 2.0, 9.0),
            Point3::new(2.5, 2.0, 9.0),
            false,
        );
        cam1.push(s1);
        cam2.push(s2);
        let grid = build_pair_grid(&rig, &world, &cam1, &cam2);

        let prev = rods();
        let out = solve(&prev, &grid, 3, "black").unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|m| m.cam1 < 3 && m.cam2 < 3));
        let again = solve(&prev, &grid, 3, "black").unwrap();
        assert_eq!(out, again);
    }

    #[test]
    fn weight_tensor_shapes() {
        let rig = test_rig();
        let world = WorldTransform::default();
        let (cam1, cam2) = observe_moved(&[0, 1], false);
        let grid = build_pair_grid(&rig, &world, &cam1, &cam2);
        let (w, c) = create_weights(&rods(), &grid);
        assert_eq!(w.dim(), (3, 2, 2));
        assert_eq!(c.dim(), (3, 2, 2));
        assert!(w.iter().all(|v| v.is_finite()));
    }
}
