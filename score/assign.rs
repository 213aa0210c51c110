//! # Optimal One-to-One Matching
//!
//! Solves the linear assignment problem over a compatibility matrix: pick
//! `min(n, m)` cohort-A/cohort-B pairs, each index at most once, maximizing the
//! summed score. The solver is the shortest-augmenting-path form of the
//! Hungarian method with row and column potentials, run on negated scores so it
//! minimizes cost. It adds one row at a time and walks columns in index order,
//! so ties always resolve the same way and repeated runs are bit-identical.
//!
//! Cost is `O(r^2 * c)` for `r = min(n, m)`, `c = max(n, m)`.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssignError {
    #[error("The compatibility matrix holds a non-finite score at ({row}, {col}).")]
    NonFiniteScore { row: usize, col: usize },
}

/// One matched pair: row index in cohort A, row index in cohort B, and the pair's score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub cohort_a: usize,
    pub cohort_b: usize,
    pub score: f64,
}

/// Maximum-total-score assignment, sorted by score descending.
///
/// Equal scores keep ascending cohort-A order. An empty side yields no matches.
pub fn optimal_matching(scores: ArrayView2<f64>) -> Result<Vec<Match>, AssignError> {
    if let Some(((row, col), _)) = scores.indexed_iter().find(|(_, value)| !value.is_finite()) {
        return Err(AssignError::NonFiniteScore { row, col });
    }

    let (n, m) = scores.dim();
    if n == 0 || m == 0 {
        return Ok(Vec::new());
    }

    let mut matches: Vec<Match> = if n <= m {
        let cost = scores.mapv(|score| -score);
        assign_rows(cost.view())
            .into_iter()
            .enumerate()
            .map(|(a, b)| Match {
                cohort_a: a,
                cohort_b: b,
                score: scores[[a, b]],
            })
            .collect()
    } else {
        let cost = scores.t().mapv(|score| -score);
        let mut pairs: Vec<Match> = assign_rows(cost.view())
            .into_iter()
            .enumerate()
            .map(|(b, a)| Match {
                cohort_a: a,
                cohort_b: b,
                score: scores[[a, b]],
            })
            .collect();
        pairs.sort_by_key(|pair| pair.cohort_a);
        pairs
    };

    matches.sort_by(|left, right| right.score.total_cmp(&left.score));
    log::debug!(
        "Matched {} pairs from a {}x{} compatibility matrix (total score {:.6})",
        matches.len(),
        n,
        m,
        total_score(&matches)
    );
    Ok(matches)
}

/// Sum of the matched scores.
pub fn total_score(matches: &[Match]) -> f64 {
    matches.iter().map(|pair| pair.score).sum()
}

/// Minimum-cost assignment of every row to a distinct column; requires
/// `rows <= cols`. Returns the column chosen for each row.
fn assign_rows(cost: ArrayView2<f64>) -> Vec<usize> {
    let (rows, cols) = cost.dim();
    debug_assert!(rows <= cols);

    // Index 0 is a virtual column/row; real entries are shifted by one.
    let mut row_potential = vec![0.0f64; rows + 1];
    let mut col_potential = vec![0.0f64; cols + 1];
    let mut col_owner = vec![0usize; cols + 1];
    let mut predecessor = vec![0usize; cols + 1];

    for row in 1..=rows {
        col_owner[0] = row;
        let mut current = 0usize;
        let mut min_slack = vec![f64::INFINITY; cols + 1];
        let mut visited = vec![false; cols + 1];

        loop {
            visited[current] = true;
            let owner = col_owner[current];
            let mut delta = f64::INFINITY;
            let mut next = 0usize;

            for col in 1..=cols {
                if visited[col] {
                    continue;
                }
                let reduced =
                    cost[[owner - 1, col - 1]] - row_potential[owner] - col_potential[col];
                if reduced < min_slack[col] {
                    min_slack[col] = reduced;
                    predecessor[col] = current;
                }
                if min_slack[col] < delta {
                    delta = min_slack[col];
                    next = col;
                }
            }

            for col in 0..=cols {
                if visited[col] {
                    row_potential[col_owner[col]] += delta;
                    col_potential[col] -= delta;
                } else {
                    min_slack[col] -= delta;
                }
            }

            current = next;
            if col_owner[current] == 0 {
                break;
            }
        }

        // Flip the augmenting path back to the virtual column.
        loop {
            let previous = predecessor[current];
            col_owner[current] = col_owner[previous];
            current = previous;
            if current == 0 {
                break;
            }
        }
    }

    let mut assignment = vec![0usize; rows];
    for col in 1..=cols {
        let owner = col_owner[col];
        if owner != 0 {
            assignment[owner - 1] = col - 1;
        }
    }
    assignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use itertools::Itertools;
    use ndarray::{Array2, array};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashSet;

    fn brute_force_best(scores: ArrayView2<f64>) -> f64 {
        let (n, m) = scores.dim();
        if n <= m {
            (0..m)
                .permutations(n)
                .map(|cols| (0..n).map(|row| scores[[row, cols[row]]]).sum::<f64>())
                .fold(f64::NEG_INFINITY, f64::max)
        } else {
            (0..n)
                .permutations(m)
                .map(|rows| (0..m).map(|col| scores[[rows[col], col]]).sum::<f64>())
                .fold(f64::NEG_INFINITY, f64::max)
        }
    }

    fn random_scores(n: usize, m: usize, rng: &mut ChaCha8Rng) -> Array2<f64> {
        Array2::from_shape_fn((n, m), |_| rng.gen_range(0.01..1.0))
    }

    fn assert_valid(matches: &[Match], n: usize, m: usize) {
        assert_eq!(matches.len(), n.min(m));
        let a: HashSet<usize> = matches.iter().map(|pair| pair.cohort_a).collect();
        let b: HashSet<usize> = matches.iter().map(|pair| pair.cohort_b).collect();
        assert_eq!(a.len(), matches.len());
        assert_eq!(b.len(), matches.len());
        assert!(matches.iter().all(|pair| pair.cohort_a < n && pair.cohort_b < m));
        for pair in matches.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn matches_brute_force_on_small_matrices() {
        let mut rng = ChaCha8Rng::seed_from_u64(2024);
        for n in 1..=6 {
            for m in 1..=6 {
                for _ in 0..3 {
                    let scores = random_scores(n, m, &mut rng);
                    let matches = optimal_matching(scores.view()).unwrap();
                    assert_valid(&matches, n, m);
                    assert_abs_diff_eq!(
                        total_score(&matches),
                        brute_force_best(scores.view()),
                        epsilon = 1e-9
                    );
                }
            }
        }
    }

    #[test]
    fn repeated_runs_are_bit_identical() {
        let mut rng = ChaCha8Rng::seed_from_u64(99);
        let scores = random_scores(7, 9, &mut rng);
        let first = optimal_matching(scores.view()).unwrap();
        let second = optimal_matching(scores.view()).unwrap();
        assert_eq!(first.len(), second.len());
        for (left, right) in first.iter().zip(&second) {
            assert_eq!(left.cohort_a, right.cohort_a);
            assert_eq!(left.cohort_b, right.cohort_b);
            assert_eq!(left.score.to_bits(), right.score.to_bits());
        }
    }

    #[test]
    fn ties_keep_cohort_a_order() {
        let scores = array![[0.5, 0.5], [0.5, 0.5]];
        let matches = optimal_matching(scores.view()).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].cohort_a, 0);
        assert_eq!(matches[1].cohort_a, 1);
    }

    #[test]
    fn greedy_choice_is_not_optimal_here() {
        // Greedy would take (0, 0) = 0.9 and be left with (1, 1) = 0.1.
        let scores = array![[0.9, 0.8], [0.7, 0.1]];
        let matches = optimal_matching(scores.view()).unwrap();
        assert_abs_diff_eq!(total_score(&matches), 1.5, epsilon = 1e-12);
        assert_eq!(matches[0], Match { cohort_a: 0, cohort_b: 1, score: 0.8 });
        assert_eq!(matches[1], Match { cohort_a: 1, cohort_b: 0, score: 0.7 });
    }

    #[test]
    fn tall_matrix_uses_every_column_once() {
        let scores = array![[0.1, 0.2], [0.9, 0.3], [0.4, 0.8], [0.5, 0.5]];
        let matches = optimal_matching(scores.view()).unwrap();
        assert_valid(&matches, 4, 2);
        assert_abs_diff_eq!(total_score(&matches), 1.7, epsilon = 1e-12);
    }

    #[test]
    fn empty_side_yields_no_matches() {
        let scores = Array2::<f64>::zeros((0, 4));
        assert!(optimal_matching(scores.view()).unwrap().is_empty());
        let scores = Array2::<f64>::zeros((3, 0));
        assert!(optimal_matching(scores.view()).unwrap().is_empty());
    }

    #[test]
    fn non_finite_scores_are_rejected() {
        let scores = array![[0.5, f64::NAN], [0.1, 0.2]];
        assert!(matches!(
            optimal_matching(scores.view()),
            Err(AssignError::NonFiniteScore { row: 0, col: 1 })
        ));
    }
}
