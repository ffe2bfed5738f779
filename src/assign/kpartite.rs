//! Generalized k-partite matching by pairwise contraction.
//!
//! A [`PartitionGraph`] holds `k` groups of `n` members with a dense weight
//! matrix per group pair. Solving contracts one pair at a time: an exact
//! bipartite solve fixes a permutation between two groups, the groups merge
//! into one, and edge weights to the remaining groups are re-accumulated.
//! After `k - 2` contractions a final bipartite solve remains.
//!
//! Contraction order is a heuristic degree of freedom; the strategies here
//! are the greedy best-pair choice, exhaustive search over all orders, and
//! iterative improvement with optional shuffling, tie acceptance and random
//! restarts. Merged members carry explicit bindings to their original
//! (group, member) pairs, so solutions read off directly without
//! permutation reconstruction.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::assign::bipartite;

/// Objective direction. Minimization runs on negated weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    Maximize,
    Minimize,
}

/// Settings for [`PartitionGraph::solve_iterative`].
#[derive(Debug, Clone, Copy)]
pub struct IterativeConfig {
    /// Visit candidate moves in shuffled order.
    pub shuffle: bool,
    /// Accept equal-total moves (coin flip) to escape plateaus.
    pub accept_ties: bool,
    /// Random restarts after the greedy-seeded descent.
    pub restarts: usize,
    /// Bound on improvement rounds per restart.
    pub max_rounds: usize,
    pub seed: u64,
}

impl Default for IterativeConfig {
    fn default() -> Self {
        Self {
            shuffle: true,
            accept_ties: true,
            restarts: 2,
            max_rounds: 100,
            seed: 7,
        }
    }
}

/// A solved k-partite matching.
#[derive(Debug, Clone, PartialEq)]
pub struct KpartiteSolution {
    /// Sum of all pairwise weights selected by the tuples.
    pub total: f64,
    /// One member per original group, one tuple per slot; sorted by the
    /// first group's member.
    pub tuples: Vec<Vec<usize>>,
}

/// `k` groups of `n` members with dense pairwise weights.
#[derive(Debug, Clone)]
pub struct PartitionGraph {
    size: usize,
    original_groups: usize,
    /// Per group, per slot: the original (group, member) pairs bound to it.
    members: Vec<Vec<Vec<(usize, usize)>>>,
    /// `weights[i][j]` rows index group `i`, columns group `j`; kept in
    /// both orientations, diagonal unused.
    weights: Vec<Vec<Array2<f64>>>,
}

impl PartitionGraph {
    pub fn new(groups: usize, size: usize) -> Self {
        Self {
            size,
            original_groups: groups,
            members: (0..groups)
                .map(|g| (0..size).map(|m| vec![(g, m)]).collect())
                .collect(),
            weights: vec![vec![Array2::zeros((size, size)); groups]; groups],
        }
    }

    /// Build a graph by sampling a weight function per group pair.
    pub fn from_fn(
        groups: usize,
        size: usize,
        mut f: impl FnMut(usize, usize) -> Array2<f64>,
    ) -> Self {
        let mut g = Self::new(groups, size);
        for i in 0..groups {
            for j in (i + 1)..groups {
                g.set_pair_weights(i, j, f(i, j));
            }
        }
        g
    }

    /// Set the weights between groups `i < j`; the reverse orientation is
    /// kept in sync.
    pub fn set_pair_weights(&mut self, i: usize, j: usize, w: Array2<f64>) {
        assert!(i < j && j < self.group_count());
        assert_eq!(w.dim(), (self.size, self.size));
        self.weights[j][i] = w.t().to_owned();
        self.weights[i][j] = w;
    }

    pub fn group_count(&self) -> usize {
        self.members.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Weight collected between groups `i` and `j` by a permutation of
    /// `i`'s members onto `j`'s.
    pub fn pair_cost(&self, i: usize, j: usize, perm: &[usize]) -> f64 {
        (0..self.size)
            .map(|r| self.weights[i][j][[r, perm[r]]])
            .sum()
    }

    /// Exact maximum-weight bipartite solve between two groups.
    pub fn solve_pair(&self, i: usize, j: usize) -> (Vec<usize>, f64) {
        let out = bipartite::solve_max(self.weights[i][j].view());
        let mut perm = vec![0; self.size];
        for (r, c) in out.assignments {
            perm[r] = c;
        }
        (perm, out.total_cost)
    }

    /// Merge group `j` into group `i < j` under a permutation of `i`'s
    /// members onto `j`'s. Groups past `j` shift down one index.
    pub fn contract(&self, i: usize, j: usize, perm: &[usize]) -> Self {
        assert!(i < j && j < self.group_count());
        let k = self.group_count();
        let ren = |g: usize| if g > j { g - 1 } else { g };

        let mut out = Self::new(k - 1, self.size);
        out.original_groups = self.original_groups;

        for g in 0..k {
            if g == j {
                continue;
            }
            if g == i {
                out.members[i] = (0..self.size)
                    .map(|r| {
                        let mut b = self.members[i][r].clone();
                        b.extend(self.members[j][perm[r]].iter().copied());
                        b
                    })
                    .collect();
            } else {
                out.members[ren(g)] = self.members[g].clone();
            }
        }

        for g in 0..k {
            if g == i || g == j {
                continue;
            }
            for h in 0..k {
                if h == i || h == j || h == g {
                    continue;
                }
                out.weights[ren(g)][ren(h)] = self.weights[g][h].clone();
            }
            // edges into the merged group accumulate both halves
            let mut w = self.weights[g][i].clone();
            for m in 0..self.size {
                for r in 0..self.size {
                    w[[m, r]] += self.weights[g][j][[m, perm[r]]];
                }
            }
            out.weights[i][ren(g)] = w.t().to_owned();
            out.weights[ren(g)][i] = w;
        }
        out
    }

    fn tuple_of(&self, bindings: impl Iterator<Item = (usize, usize)>) -> Vec<usize> {
        let mut t = vec![usize::MAX; self.original_groups];
        for (g, m) in bindings {
            t[g] = m;
        }
        t
    }

    /// Final solve once only two groups remain.
    fn solve_two(&self) -> KpartiteSolution {
        if self.group_count() < 2 {
            let tuples = (0..self.size)
                .map(|r| self.tuple_of(self.members[0][r].iter().copied()))
                .collect();
            return KpartiteSolution { total: 0.0, tuples };
        }
        let (perm, total) = self.solve_pair(0, 1);
        let mut tuples: Vec<Vec<usize>> = (0..self.size)
            .map(|r| {
                self.tuple_of(
                    self.members[0][r]
                        .iter()
                        .chain(self.members[1][perm[r]].iter())
                        .copied(),
                )
            })
            .collect();
        tuples.sort_by_key(|t| t[0]);
        KpartiteSolution { total, tuples }
    }

    fn negated(&self) -> Self {
        let mut out = self.clone();
        for row in &mut out.weights {
            for w in row.iter_mut() {
                w.mapv_inplace(|v| -v);
            }
        }
        out
    }

    /// Contract the best-scoring pair until two groups remain.
    pub fn solve_greedy(&self, objective: Objective) -> KpartiteSolution {
        self.run(objective, |g| g.solve_greedy_traced().0)
    }

    /// Search all contraction orders, keeping the best total.
    /// Exponential in the group count; intended for small `k`.
    pub fn solve_exhaustive(&self, objective: Objective) -> KpartiteSolution {
        self.run(objective, |g| g.solve_exhaustive_inner())
    }

    /// Greedy seed plus first-improvement descent over single contraction
    /// replacements, with optional shuffling, tie acceptance and restarts.
    pub fn solve_iterative(&self, objective: Objective, cfg: IterativeConfig) -> KpartiteSolution {
        self.run(objective, |g| g.solve_iterative_inner(cfg))
    }

    fn run(
        &self,
        objective: Objective,
        inner: impl Fn(&PartitionGraph) -> KpartiteSolution,
    ) -> KpartiteSolution {
        match objective {
            Objective::Maximize => inner(self),
            Objective::Minimize => {
                let mut sol = inner(&self.negated());
                sol.total = -sol.total;
                sol
            }
        }
    }

    fn solve_greedy_traced(&self) -> (KpartiteSolution, Vec<(usize, usize)>) {
        let mut g = self.clone();
        // reps[current index] = smallest original group id in the cluster
        let mut reps: Vec<usize> = (0..self.group_count()).collect();
        let mut seq = Vec::new();
        let mut total = 0.0;

        while g.group_count() > 2 {
            let mut best: Option<(usize, usize, Vec<usize>, f64)> = None;
            for i in 0..g.group_count() {
                for j in (i + 1)..g.group_count() {
                    let (perm, cost) = g.solve_pair(i, j);
                    if best.as_ref().map_or(true, |b| cost > b.3) {
                        best = Some((i, j, perm, cost));
                    }
                }
            }
            let (i, j, perm, cost) = best.expect("at least three groups");
            seq.push((reps[i], reps[j]));
            total += cost;
            g = g.contract(i, j, &perm);
            reps[i] = reps[i].min(reps[j]);
            reps.remove(j);
        }

        let mut sol = g.solve_two();
        sol.total += total;
        (sol, seq)
    }

    fn solve_exhaustive_inner(&self) -> KpartiteSolution {
        if self.group_count() <= 2 {
            return self.solve_two();
        }
        let mut best: Option<KpartiteSolution> = None;
        for i in 0..self.group_count() {
            for j in (i + 1)..self.group_count() {
                let (perm, cost) = self.solve_pair(i, j);
                let mut sub = self.contract(i, j, &perm).solve_exhaustive_inner();
                sub.total += cost;
                if best.as_ref().map_or(true, |b| sub.total > b.total) {
                    best = Some(sub);
                }
            }
        }
        best.expect("at least three groups")
    }

    /// Apply a merge sequence given as original-group representative pairs.
    /// Returns the solution and the live representatives before each step;
    /// `None` if a step names two groups already in the same cluster.
    fn trace_sequence(
        &self,
        seq: &[(usize, usize)],
    ) -> Option<(KpartiteSolution, Vec<Vec<usize>>)> {
        let mut g = self.clone();
        let mut cluster_of: Vec<usize> = (0..self.group_count()).collect();
        let mut reps: Vec<usize> = (0..self.group_count()).collect();
        let mut live = Vec::with_capacity(seq.len());
        let mut total = 0.0;

        for &(a, b) in seq {
            live.push(reps.clone());
            let (ia, ib) = (cluster_of[a], cluster_of[b]);
            if ia == ib {
                return None;
            }
            let (i, j) = (ia.min(ib), ia.max(ib));
            let (perm, cost) = g.solve_pair(i, j);
            total += cost;
            g = g.contract(i, j, &perm);
            reps[i] = reps[i].min(reps[j]);
            reps.remove(j);
            for c in cluster_of.iter_mut() {
                if *c == j {
                    *c = i;
                } else if *c > j {
                    *c -= 1;
                }
            }
        }

        if g.group_count() > 2 {
            return None;
        }
        let mut sol = g.solve_two();
        sol.total += total;
        Some((sol, live))
    }

    fn random_sequence(&self, rng: &mut StdRng) -> Vec<(usize, usize)> {
        let mut reps: Vec<usize> = (0..self.group_count()).collect();
        let mut seq = Vec::new();
        while reps.len() > 2 {
            let a = rng.gen_range(0..reps.len());
            let mut b = rng.gen_range(0..reps.len() - 1);
            if b >= a {
                b += 1;
            }
            seq.push((reps[a], reps[b]));
            let merged = reps[a].min(reps[b]);
            let (lo, hi) = (a.min(b), a.max(b));
            reps[lo] = merged;
            reps.remove(hi);
        }
        seq
    }

    fn solve_iterative_inner(&self, cfg: IterativeConfig) -> KpartiteSolution {
        if self.group_count() <= 2 {
            return self.solve_two();
        }
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let (greedy_sol, greedy_seq) = self.solve_greedy_traced();
        let mut best = greedy_sol;

        for restart in 0..=cfg.restarts {
            let mut seq = if restart == 0 {
                greedy_seq.clone()
            } else {
                self.random_sequence(&mut rng)
            };
            let Some((mut cur, _)) = self.trace_sequence(&seq) else {
                continue;
            };

            for _ in 0..cfg.max_rounds {
                let Some((_, live)) = self.trace_sequence(&seq) else {
                    break;
                };
                let mut moves: Vec<(usize, (usize, usize))> = Vec::new();
                for (s, reps) in live.iter().enumerate() {
                    for x in 0..reps.len() {
                        for y in (x + 1)..reps.len() {
                            let pair = (reps[x], reps[y]);
                            if pair != seq[s] && (pair.1, pair.0) != seq[s] {
                                moves.push((s, pair));
                            }
                        }
                    }
                }
                if cfg.shuffle {
                    moves.shuffle(&mut rng);
                }

                let mut moved = false;
                for (s, pair) in moves {
                    let mut cand = seq.clone();
                    cand[s] = pair;
                    if let Some((sol, _)) = self.trace_sequence(&cand) {
                        let better = sol.total > cur.total + 1e-9;
                        let tie = cfg.accept_ties
                            && (sol.total - cur.total).abs() <= 1e-9
                            && rng.gen_bool(0.5);
                        if better || tie {
                            seq = cand;
                            cur = sol;
                            moved = true;
                            break;
                        }
                    }
                }
                if !moved {
                    break;
                }
            }

            if cur.total > best.total {
                best = cur;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assign::ilp::{npartite_matching, Direction};
    use approx::assert_relative_eq;
    use ndarray::{array, Array3};

    fn weight(i: usize, j: usize, size: usize) -> Array2<f64> {
        // deterministic pseudo-random positive weights
        Array2::from_shape_fn((size, size), |(r, c)| {
            (((13 * i + 29 * j + 7 * r + 3 * c) % 17) + 1) as f64
        })
    }

    fn tuple_value(g: &PartitionGraph, sol: &KpartiteSolution, pairs: &[(usize, usize)]) -> f64 {
        // recompute the total from the tuples and the original weights
        sol.tuples
            .iter()
            .map(|t| {
                pairs
                    .iter()
                    .map(|&(i, j)| g.weights[i][j][[t[i], t[j]]])
                    .sum::<f64>()
            })
            .sum()
    }

    #[test]
    fn two_groups_reduce_to_bipartite() {
        let w = array![[4.0, 1.0], [2.0, 3.0]];
        let mut g = PartitionGraph::new(2, 2);
        g.set_pair_weights(0, 1, w.clone());

        let sol = g.solve_greedy(Objective::Maximize);
        let flat = bipartite::solve_max(w.view());
        assert_relative_eq!(sol.total, flat.total_cost);
        assert_eq!(sol.tuples, vec![vec![0, 0], vec![1, 1]]);
        assert_eq!(
            g.solve_exhaustive(Objective::Maximize).total,
            sol.total
        );
    }

    #[test]
    fn totals_match_the_selected_tuples() {
        let g = PartitionGraph::from_fn(4, 3, |i, j| weight(i, j, 3));
        let pairs = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];
        for sol in [
            g.solve_greedy(Objective::Maximize),
            g.solve_exhaustive(Objective::Maximize),
            g.solve_iterative(Objective::Maximize, IterativeConfig::default()),
        ] {
            assert_eq!(sol.tuples.len(), 3);
            for t in &sol.tuples {
                assert_eq!(t.len(), 4);
            }
            assert_relative_eq!(sol.total, tuple_value(&g, &sol, &pairs), epsilon = 1e-9);
        }
    }

    #[test]
    fn dominant_diagonal_is_found_by_every_strategy() {
        let size = 3;
        let mut g = PartitionGraph::new(3, size);
        for (i, j) in [(0, 1), (0, 2), (1, 2)] {
            let w = Array2::from_shape_fn((size, size), |(r, c)| {
                if r == c {
                    100.0
                } else {
                    1.0
                }
            });
            g.set_pair_weights(i, j, w);
        }
        let expect: Vec<Vec<usize>> = (0..size).map(|m| vec![m, m, m]).collect();
        for sol in [
            g.solve_greedy(Objective::Maximize),
            g.solve_exhaustive(Objective::Maximize),
            g.solve_iterative(Objective::Maximize, IterativeConfig::default()),
        ] {
            assert_eq!(sol.tuples, expect);
            assert_relative_eq!(sol.total, 900.0);
        }
    }

    #[test]
    fn never_beats_the_exact_ilp_on_three_groups() {
        let g = PartitionGraph::from_fn(3, 3, |i, j| weight(i, j, 3));
        // fold the pairwise weights into the equivalent 3-axis tensor
        let tensor = Array3::from_shape_fn((3, 3, 3), |(k, i, j)| {
            g.weights[0][1][[k, i]] + g.weights[0][2][[k, j]] + g.weights[1][2][[i, j]]
        });
        let triples = npartite_matching(tensor.view(), Direction::Maximize).unwrap();
        let optimum: f64 = triples.iter().map(|t| tensor[[t[0], t[1], t[2]]]).sum();

        let greedy = g.solve_greedy(Objective::Maximize);
        let exhaustive = g.solve_exhaustive(Objective::Maximize);
        let iterative = g.solve_iterative(Objective::Maximize, IterativeConfig::default());
        for sol in [&greedy, &exhaustive, &iterative] {
            assert!(sol.total <= optimum + 1e-9);
        }
        // searching every contraction order cannot lose to a single one
        assert!(exhaustive.total >= greedy.total - 1e-9);
    }

    #[test]
    fn iterative_is_no_worse_than_greedy() {
        let g = PartitionGraph::from_fn(5, 4, |i, j| weight(i, j, 4));
        let greedy = g.solve_greedy(Objective::Maximize);
        let iter = g.solve_iterative(Objective::Maximize, IterativeConfig::default());
        assert!(iter.total >= greedy.total - 1e-9);
    }

    #[test]
    fn minimize_negates_the_objective() {
        let g = PartitionGraph::from_fn(3, 2, |i, j| weight(i, j, 2));
        let max = g.solve_exhaustive(Objective::Maximize);
        let min = g.solve_exhaustive(Objective::Minimize);
        assert!(min.total <= max.total);
        let pairs = [(0, 1), (0, 2), (1, 2)];
        assert_relative_eq!(min.total, tuple_value(&g, &min, &pairs), epsilon = 1e-9);
    }
}
