//! Exact rectangular assignment via the Hungarian algorithm.
//!
//! Wraps `pathfinding`'s Kuhn-Munkres on an integer-scaled, square-padded
//! cost matrix. Padded matches are filtered back out, so rectangular inputs
//! yield exactly `min(rows, cols)` pairs.

use ndarray::ArrayView2;
use pathfinding::matrix::Matrix;
use pathfinding::prelude::kuhn_munkres_min;

/// Fixed-point scale applied before the integer solve.
const SCALE: f64 = 1.0e6;
/// Finite costs are clamped to this magnitude before scaling.
const CLAMP: f64 = 1.0e9;
/// Scaled cost assigned to padding cells; larger than any real cell.
const PAD: i64 = 2_000_000_000_000_000;

/// Result of a rectangular assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentResult {
    /// Matched `(row, col)` pairs, ordered by row.
    pub assignments: Vec<(usize, usize)>,
    /// Rows left unmatched (only when rows > cols).
    pub unassigned_rows: Vec<usize>,
    /// Cols left unmatched (only when cols > rows).
    pub unassigned_cols: Vec<usize>,
    /// Total cost of the matched pairs, in the input scale.
    pub total_cost: f64,
}

fn scaled(v: f64) -> i64 {
    let c = if v.is_finite() {
        v.clamp(-CLAMP, CLAMP)
    } else {
        CLAMP
    };
    (c * SCALE) as i64
}

/// Minimum-cost assignment over a dense cost matrix.
pub fn solve_min(costs: ArrayView2<'_, f64>) -> AssignmentResult {
    solve_scaled(costs, 1.0)
}

/// Maximum-weight assignment over a dense weight matrix.
pub fn solve_max(weights: ArrayView2<'_, f64>) -> AssignmentResult {
    solve_scaled(weights, -1.0)
}

fn solve_scaled(costs: ArrayView2<'_, f64>, sign: f64) -> AssignmentResult {
    let (rows, cols) = costs.dim();
    if rows == 0 || cols == 0 {
        return AssignmentResult {
            assignments: Vec::new(),
            unassigned_rows: (0..rows).collect(),
            unassigned_cols: (0..cols).collect(),
            total_cost: 0.0,
        };
    }

    let side = rows.max(cols);
    let padded = Matrix::from_fn(side, side, |(r, c)| {
        if r < rows && c < cols {
            scaled(sign * costs[[r, c]])
        } else {
            PAD
        }
    });

    let (_, row_to_col) = kuhn_munkres_min(&padded);

    let mut assignments = Vec::with_capacity(rows.min(cols));
    let mut col_used = vec![false; cols];
    let mut total_cost = 0.0;
    for (r, &c) in row_to_col.iter().enumerate().take(rows) {
        if c < cols {
            assignments.push((r, c));
            col_used[c] = true;
            total_cost += costs[[r, c]];
        }
    }
    let unassigned_rows = (0..rows)
        .filter(|&r| row_to_col[r] >= cols)
        .collect();
    let unassigned_cols = (0..cols).filter(|&c| !col_used[c]).collect();

    AssignmentResult {
        assignments,
        unassigned_rows,
        unassigned_cols,
        total_cost,
    }
}
