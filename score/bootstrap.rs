//! Bootstrap resampling of per-feature means.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Cannot bootstrap a matrix with zero rows.")]
    EmptyCohort,
}

/// Draws `iterations` resamples of the rows (with replacement, same size as the
/// input) and returns the column means of each, shape `[iterations, n_features]`.
///
/// Missing values are skipped per column; a column with no observed value in a
/// resample yields `NaN` for that draw. Iteration `i` uses stream `i` of a
/// generator seeded with `seed`, so draws do not depend on thread scheduling.
pub fn bootstrap_means(
    features: ArrayView2<f64>,
    iterations: usize,
    seed: u64,
) -> Result<Array2<f64>, BootstrapError> {
    let (n_rows, n_features) = features.dim();
    if n_rows == 0 {
        return Err(BootstrapError::EmptyCohort);
    }

    let mut draws = Array2::<f64>::zeros((iterations, n_features));
    draws
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(iteration, mut draw)| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            rng.set_stream(iteration as u64);

            let mut sums = vec![0.0f64; n_features];
            let mut counts = vec![0usize; n_features];
            for _ in 0..n_rows {
                let row = features.row(rng.gen_range(0..n_rows));
                for (col, &value) in row.iter().enumerate() {
                    if value.is_finite() {
                        sums[col] += value;
                        counts[col] += 1;
                    }
                }
            }
            for (col, mean) in draw.iter_mut().enumerate() {
                *mean = if counts[col] == 0 {
                    f64::NAN
                } else {
                    sums[col] / counts[col] as f64
                };
            }
        });

    log::debug!(
        "Drew {} bootstrap resamples of {} rows x {} features",
        iterations,
        n_rows,
        n_features
    );
    Ok(draws)
}

/// Per-feature summary of a bootstrap draw matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapSummary {
    pub iterations: usize,
    pub mean: Array1<f64>,
    pub lower: Array1<f64>,
    pub upper: Array1<f64>,
}

impl BootstrapSummary {
    /// Mean and the 2.5% / 97.5% percentiles of each column, over finite draws only.
    pub fn from_draws(draws: ArrayView2<f64>) -> Self {
        let columns: Vec<(f64, f64, f64)> = draws.columns().into_iter().map(summarize).collect();
        Self {
            iterations: draws.nrows(),
            mean: columns.iter().map(|c| c.0).collect(),
            lower: columns.iter().map(|c| c.1).collect(),
            upper: columns.iter().map(|c| c.2).collect(),
        }
    }
}

fn summarize(column: ArrayView1<f64>) -> (f64, f64, f64) {
    let mut finite: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return (f64::NAN, f64::NAN, f64::NAN);
    }
    finite.sort_by(f64::total_cmp);
    let mean = finite.iter().sum::<f64>() / finite.len() as f64;
    (mean, percentile(&finite, 0.025), percentile(&finite, 0.975))
}

/// Linear interpolation between closest ranks; `sorted` must be non-empty.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let below = position.floor() as usize;
    let above = position.ceil() as usize;
    let weight = position - below as f64;
    sorted[below] + (sorted[above] - sorted[below]) * weight
}
