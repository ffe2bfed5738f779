//! Exact axial 3-partite matching as a 0/1 integer linear program.
//!
//! One binary variable per tensor cell, an at-most-one constraint per index
//! on every axis, objective summed over selected cells. Solved with the
//! pure-Rust MIP backend behind `good_lp`.

use good_lp::{default_solver, variable, variables, Expression, Solution, SolverModel};
use ndarray::ArrayView3;
use tracing::warn;

use crate::error::{Error, Result};

/// Objective direction for [`npartite_matching`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Maximize,
    Minimize,
}

/// Solve the axial assignment problem over a dense `P x M x N` tensor.
///
/// Returns the selected `[k, i, j]` index triples, sorted by the first
/// axis. Each index appears in at most one triple per axis. Only
/// maximization is fully verified; minimization is accepted but warned
/// about, since an all-positive tensor then admits the empty selection.
pub fn npartite_matching(
    weights: ArrayView3<'_, f64>,
    direction: Direction,
) -> Result<Vec<[usize; 3]>> {
    let (p, m, n) = weights.dim();
    if p == 0 || m == 0 || n == 0 {
        return Ok(Vec::new());
    }
    if direction == Direction::Minimize {
        warn!("minimization is not fully supported; results might be incorrect");
    }
    let sign = match direction {
        Direction::Maximize => 1.0,
        Direction::Minimize => -1.0,
    };

    let flat = |k: usize, i: usize, j: usize| (k * m + i) * n + j;

    let mut vars = variables!();
    let mut x = Vec::with_capacity(p * m * n);
    for _ in 0..p * m * n {
        x.push(vars.add(variable().binary()));
    }

    let mut objective = Expression::default();
    for ((k, i, j), &w) in weights.indexed_iter() {
        objective.add_mul(sign * w, x[flat(k, i, j)]);
    }

    let mut model = vars.maximise(objective).using(default_solver);
    for k in 0..p {
        let mut sum = Expression::default();
        for i in 0..m {
            for j in 0..n {
                sum.add_mul(1.0, x[flat(k, i, j)]);
            }
        }
        model = model.with(sum.leq(1.0));
    }
    for i in 0..m {
        let mut sum = Expression::default();
        for k in 0..p {
            for j in 0..n {
                sum.add_mul(1.0, x[flat(k, i, j)]);
            }
        }
        model = model.with(sum.leq(1.0));
    }
    for j in 0..n {
        let mut sum = Expression::default();
        for k in 0..p {
            for i in 0..m {
                sum.add_mul(1.0, x[flat(k, i, j)]);
            }
        }
        model = model.with(sum.leq(1.0));
    }

    let solution = model.solve().map_err(|e| Error::Solver {
        reason: e.to_string(),
    })?;

    let mut triples = Vec::new();
    for k in 0..p {
        for i in 0..m {
            for j in 0..n {
                if solution.value(x[flat(k, i, j)]) > 0.5 {
                    triples.push([k, i, j]);
                }
            }
        }
    }
    triples.sort_unstable();
    Ok(triples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    /// Brute-force optimum over all one-per-axis selections of full
    /// cardinality, for cross-checking small instances.
    fn brute_force_max(w: &Array3<f64>) -> f64 {
        fn permutations(n: usize) -> Vec<Vec<usize>> {
            if n == 0 {
                return vec![Vec::new()];
            }
            let mut out = Vec::new();
            for rest in permutations(n - 1) {
                for pos in 0..=rest.len() {
                    let mut p = rest.clone();
                    p.insert(pos, n - 1);
                    out.push(p);
                }
            }
            out
        }
        let (p, m, n) = w.dim();
        assert!(p == m && m == n, "brute force expects a cubic tensor");
        let mut best = f64::NEG_INFINITY;
        for pi in permutations(p) {
            for pj in permutations(p) {
                let total: f64 = (0..p).map(|k| w[[k, pi[k], pj[k]]]).sum();
                best = best.max(total);
            }
        }
        best
    }

    fn selection_value(w: &Array3<f64>, triples: &[[usize; 3]]) -> f64 {
        triples.iter().map(|t| w[[t[0], t[1], t[2]]]).sum()
    }

    #[test]
    fn respects_axis_capacities() {
        let w = Array3::from_shape_fn((2, 3, 4), |(k, i, j)| ((k + 2 * i + 5 * j) % 7) as f64);
        let triples = npartite_matching(w.view(), Direction::Maximize).unwrap();
        assert!(triples.len() <= 2);
        for axis in 0..3 {
            let mut seen: Vec<usize> = triples.iter().map(|t| t[axis]).collect();
            seen.sort_unstable();
            let before = seen.len();
            seen.dedup();
            assert_eq!(seen.len(), before);
        }
        for t in &triples {
            assert!(t[0] < 2 && t[1] < 3 && t[2] < 4);
        }
    }

    #[test]
    fn matches_brute_force_on_cubic_tensors() {
        let w = Array3::from_shape_fn((3, 3, 3), |(k, i, j)| {
            1.0 + ((7 * k + 3 * i + 11 * j) % 13) as f64
        });
        let triples = npartite_matching(w.view(), Direction::Maximize).unwrap();
        let value = selection_value(&w, &triples);
        let best = brute_force_max(&w);
        assert!((value - best).abs() < 1e-9, "got {value}, optimum {best}");
    }

    #[test]
    fn picks_the_obvious_diagonal() {
        let mut w = Array3::from_elem((2, 2, 2), 0.1);
        w[[0, 0, 0]] = 10.0;
        w[[1, 1, 1]] = 10.0;
        let triples = npartite_matching(w.view(), Direction::Maximize).unwrap();
        assert_eq!(triples, vec![[0, 0, 0], [1, 1, 1]]);
    }

    #[test]
    fn empty_axis_yields_empty_selection() {
        let w = Array3::<f64>::zeros((2, 0, 3));
        let triples = npartite_matching(w.view(), Direction::Maximize).unwrap();
        assert!(triples.is_empty());
    }
}
