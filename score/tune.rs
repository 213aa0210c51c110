//! # Factor-Count Search
//!
//! A bounded, derivative-free search over a single integer. Callers hand over
//! an objective and inclusive bounds and get back the best integer and its
//! value; the strategy behind [`IntegerSearch`] can be swapped without touching
//! them.
//!
//! [`tune_factor_count`] applies this to factor analysis: each candidate `k`
//! refits the factor model on the records as given, in their own units, and is
//! scored by the sum of its squared loadings.
//! This result is reported on its own and never replaces the Kaiser count that
//! drives matching.

use crate::factor::{FactorError, FactorModel, FactorOptions, check_conditioning};
use ndarray::ArrayView2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TuneError {
    #[error(
        "Invalid search bounds [{lower}, {upper}]: bounds must satisfy 1 <= lower <= upper <= {limit}."
    )]
    InvalidBounds {
        lower: usize,
        upper: usize,
        limit: usize,
    },

    #[error("Factor model failed during tuning: {0}")]
    FactorError(#[from] FactorError),
}

/// Best integer found, its objective value, and how many distinct candidates were scored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub best: usize,
    pub value: f64,
    pub evaluations: usize,
}

/// A maximizer over the inclusive integer range `[lower, upper]`.
pub trait IntegerSearch {
    fn maximize<F>(&self, objective: F, lower: usize, upper: usize) -> Result<SearchOutcome, TuneError>
    where
        F: Fn(usize) -> f64 + Sync;
}

fn check_bounds(lower: usize, upper: usize, limit: usize) -> Result<(), TuneError> {
    if lower < 1 || lower > upper || upper > limit {
        return Err(TuneError::InvalidBounds {
            lower,
            upper,
            limit,
        });
    }
    Ok(())
}

/// `true` when `candidate` beats `incumbent`. NaN never wins.
fn improves(candidate: f64, incumbent: f64) -> bool {
    candidate > incumbent
}

/// Memo of objective values keyed by candidate, so repeated positions cost nothing.
struct Evaluations<'a, F> {
    objective: &'a F,
    values: BTreeMap<usize, f64>,
}

impl<'a, F> Evaluations<'a, F>
where
    F: Fn(usize) -> f64 + Sync,
{
    fn new(objective: &'a F) -> Self {
        Self {
            objective,
            values: BTreeMap::new(),
        }
    }

    /// Scores every unseen candidate in parallel; results are stored by key so
    /// evaluation order has no effect.
    fn score_all(&mut self, candidates: &[usize]) {
        let mut pending: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|candidate| !self.values.contains_key(candidate))
            .collect();
        pending.sort_unstable();
        pending.dedup();

        let objective = self.objective;
        let scored: Vec<(usize, f64)> = pending
            .par_iter()
            .map(|&candidate| (candidate, objective(candidate)))
            .collect();
        self.values.extend(scored);
    }

    fn value(&mut self, candidate: usize) -> f64 {
        if let Some(&value) = self.values.get(&candidate) {
            return value;
        }
        let value = (self.objective)(candidate);
        self.values.insert(candidate, value);
        value
    }

    fn count(&self) -> usize {
        self.values.len()
    }
}

/// Scores every integer in the range. Ties go to the smaller integer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSearch;

impl IntegerSearch for GridSearch {
    fn maximize<F>(&self, objective: F, lower: usize, upper: usize) -> Result<SearchOutcome, TuneError>
    where
        F: Fn(usize) -> f64 + Sync,
    {
        check_bounds(lower, upper, upper)?;
        let mut evaluations = Evaluations::new(&objective);
        let candidates: Vec<usize> = (lower..=upper).collect();
        evaluations.score_all(&candidates);

        let mut best = lower;
        let mut value = evaluations.value(lower);
        for candidate in lower + 1..=upper {
            let candidate_value = evaluations.value(candidate);
            if improves(candidate_value, value) || value.is_nan() {
                best = candidate;
                value = candidate_value;
            }
        }

        Ok(SearchOutcome {
            best,
            value,
            evaluations: evaluations.count(),
        })
    }
}

/// Steepest-ascent walk from the midpoint, stopping when neither neighbor improves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HillClimb;

impl IntegerSearch for HillClimb {
    fn maximize<F>(&self, objective: F, lower: usize, upper: usize) -> Result<SearchOutcome, TuneError>
    where
        F: Fn(usize) -> f64 + Sync,
    {
        check_bounds(lower, upper, upper)?;
        let mut evaluations = Evaluations::new(&objective);
        let mut current = lower + (upper - lower) / 2;
        let mut value = evaluations.value(current);

        loop {
            let neighbors: Vec<usize> = [current.checked_sub(1), Some(current + 1)]
                .into_iter()
                .flatten()
                .filter(|candidate| (lower..=upper).contains(candidate))
                .collect();
            evaluations.score_all(&neighbors);

            let mut step = None;
            let mut step_value = value;
            for candidate in neighbors {
                let candidate_value = evaluations.value(candidate);
                if improves(candidate_value, step_value) || (step_value.is_nan() && !candidate_value.is_nan()) {
                    step = Some(candidate);
                    step_value = candidate_value;
                }
            }

            match step {
                Some(candidate) => {
                    current = candidate;
                    value = step_value;
                }
                None => break,
            }
        }

        Ok(SearchOutcome {
            best: current,
            value,
            evaluations: evaluations.count(),
        })
    }
}

/// Global-best particle swarm over a continuous relaxation of the range.
///
/// Positions live on `[lower, upper + 1]` and are floored to integers before
/// scoring. Each iteration scores its unseen candidates in parallel, then
/// updates personal and global bests in particle order, so the outcome depends
/// only on the seed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleSwarm {
    pub particles: usize,
    pub iterations: usize,
    /// Weight on the previous velocity.
    pub inertia: f64,
    /// Pull toward each particle's own best position.
    pub cognitive: f64,
    /// Pull toward the swarm's best position.
    pub social: f64,
    pub seed: u64,
}

impl Default for ParticleSwarm {
    fn default() -> Self {
        Self {
            particles: 50,
            iterations: 100,
            inertia: 0.9,
            cognitive: 0.5,
            social: 0.3,
            seed: 42,
        }
    }
}

impl ParticleSwarm {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

impl IntegerSearch for ParticleSwarm {
    fn maximize<F>(&self, objective: F, lower: usize, upper: usize) -> Result<SearchOutcome, TuneError>
    where
        F: Fn(usize) -> f64 + Sync,
    {
        check_bounds(lower, upper, upper)?;
        let mut evaluations = Evaluations::new(&objective);
        // Each integer owns the unit interval [k, k + 1).
        let low = lower as f64;
        let high = upper as f64 + 1.0;
        let span = high - low;
        let to_candidate = |position: f64| (position.floor() as usize).clamp(lower, upper);

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let particles = self.particles.max(1);
        let mut positions: Vec<f64> = (0..particles)
            .map(|_| low + rng.gen_range(0.0..=1.0) * span)
            .collect();
        let mut velocities: Vec<f64> = (0..particles)
            .map(|_| rng.gen_range(-0.1..=0.1) * span)
            .collect();

        let mut personal_best = positions.clone();
        let mut personal_value = vec![f64::NEG_INFINITY; particles];
        let mut global_best = positions[0];
        let mut global_value = f64::NEG_INFINITY;

        for iteration in 0..self.iterations.max(1) {
            let candidates: Vec<usize> = positions.iter().map(|&p| to_candidate(p)).collect();
            evaluations.score_all(&candidates);

            for (particle, &candidate) in candidates.iter().enumerate() {
                let value = evaluations.value(candidate);
                if improves(value, personal_value[particle]) {
                    personal_value[particle] = value;
                    personal_best[particle] = positions[particle];
                }
                let incumbent = to_candidate(global_best);
                if improves(value, global_value)
                    || (value == global_value && candidate < incumbent)
                {
                    global_value = value;
                    global_best = positions[particle];
                }
            }

            for particle in 0..particles {
                let r1: f64 = rng.gen_range(0.0..1.0);
                let r2: f64 = rng.gen_range(0.0..1.0);
                velocities[particle] = self.inertia * velocities[particle]
                    + self.cognitive * r1 * (personal_best[particle] - positions[particle])
                    + self.social * r2 * (global_best - positions[particle]);
                positions[particle] = (positions[particle] + velocities[particle]).clamp(low, high);
            }

            log::trace!(
                "Swarm iteration {}: best candidate {} with value {:.6}",
                iteration,
                to_candidate(global_best),
                global_value
            );
        }

        Ok(SearchOutcome {
            best: to_candidate(global_best),
            value: global_value,
            evaluations: evaluations.count(),
        })
    }
}

/// Search strategies selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SearchStrategy {
    Grid,
    HillClimb,
    Swarm(ParticleSwarm),
}

impl Default for SearchStrategy {
    fn default() -> Self {
        Self::Swarm(ParticleSwarm::default())
    }
}

impl IntegerSearch for SearchStrategy {
    fn maximize<F>(&self, objective: F, lower: usize, upper: usize) -> Result<SearchOutcome, TuneError>
    where
        F: Fn(usize) -> f64 + Sync,
    {
        match self {
            Self::Grid => GridSearch.maximize(objective, lower, upper),
            Self::HillClimb => HillClimb.maximize(objective, lower, upper),
            Self::Swarm(swarm) => swarm.maximize(objective, lower, upper),
        }
    }
}

/// Searches `k` in `[1, n_features]` for the factor count with the largest
/// sum of squared loadings.
pub fn tune_factor_count<S: IntegerSearch>(
    data: ArrayView2<f64>,
    search: &S,
    options: &FactorOptions,
) -> Result<SearchOutcome, TuneError> {
    let n_features = data.ncols();
    tune_factor_count_within(data, search, options, 1, n_features)
}

/// As [`tune_factor_count`], restricted to `[lower, upper]`.
pub fn tune_factor_count_within<S: IntegerSearch>(
    data: ArrayView2<f64>,
    search: &S,
    options: &FactorOptions,
    lower: usize,
    upper: usize,
) -> Result<SearchOutcome, TuneError> {
    check_bounds(lower, upper, data.ncols())?;
    // Degenerate data fails every candidate the same way; report it once.
    check_conditioning(data)?;

    let objective = |k: usize| match FactorModel::fit_with_options(data, k, options) {
        Ok(model) => model.loading_energy(),
        Err(err) => {
            log::warn!("Factor fit with k = {} failed during tuning: {}", k, err);
            f64::NEG_INFINITY
        }
    };

    let outcome = search.maximize(objective, lower, upper)?;
    log::info!(
        "Factor-count search picked k = {} (sum of squared loadings {:.6}) after {} fits",
        outcome.best,
        outcome.value,
        outcome.evaluations
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn increasing(k: usize) -> f64 {
        k as f64 * 1.5
    }

    fn peaked(k: usize) -> f64 {
        -((k as f64 - 7.0).powi(2))
    }

    #[test]
    fn every_strategy_reaches_the_inclusive_upper_bound() {
        let strategies = [
            SearchStrategy::Grid,
            SearchStrategy::HillClimb,
            SearchStrategy::Swarm(ParticleSwarm::default()),
        ];
        for strategy in strategies {
            let outcome = strategy.maximize(increasing, 1, 5).unwrap();
            assert_eq!(outcome.best, 5, "{strategy:?}");
            assert_eq!(outcome.value, 7.5);
        }
    }

    #[test]
    fn every_strategy_finds_an_interior_peak() {
        let strategies = [
            SearchStrategy::Grid,
            SearchStrategy::HillClimb,
            SearchStrategy::Swarm(ParticleSwarm::default()),
        ];
        for strategy in strategies {
            let outcome = strategy.maximize(peaked, 1, 12).unwrap();
            assert_eq!(outcome.best, 7, "{strategy:?}");
            assert_eq!(outcome.value, 0.0);
        }
    }

    #[test]
    fn lower_bound_is_reachable() {
        let decreasing = |k: usize| -(k as f64);
        let outcome = GridSearch.maximize(decreasing, 1, 9).unwrap();
        assert_eq!(outcome.best, 1);
        let outcome = ParticleSwarm::default().maximize(decreasing, 1, 9).unwrap();
        assert_eq!(outcome.best, 1);
    }

    #[test]
    fn grid_ties_prefer_the_smaller_integer() {
        let flat = |_: usize| 3.0;
        let outcome = GridSearch.maximize(flat, 2, 6).unwrap();
        assert_eq!(outcome.best, 2);
        assert_eq!(outcome.evaluations, 5);
    }

    #[test]
    fn single_point_range_returns_that_point() {
        let outcome = ParticleSwarm::default().maximize(increasing, 4, 4).unwrap();
        assert_eq!(outcome.best, 4);
        assert_eq!(outcome.evaluations, 1);
    }

    #[test]
    fn swarm_is_reproducible_for_a_seed() {
        let swarm = ParticleSwarm::default().with_seed(7);
        let first = swarm.maximize(peaked, 1, 20).unwrap();
        let second = swarm.maximize(peaked, 1, 20).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn swarm_never_evaluates_a_candidate_twice() {
        let outcome = ParticleSwarm::default().maximize(increasing, 1, 5).unwrap();
        assert!(outcome.evaluations <= 5);
    }

    #[test]
    fn invalid_bounds_are_rejected() {
        assert!(matches!(
            GridSearch.maximize(increasing, 0, 5),
            Err(TuneError::InvalidBounds { lower: 0, .. })
        ));
        assert!(matches!(
            HillClimb.maximize(increasing, 6, 5),
            Err(TuneError::InvalidBounds { lower: 6, upper: 5, .. })
        ));
        let data = Array2::<f64>::zeros((10, 3));
        assert!(matches!(
            tune_factor_count_within(data.view(), &GridSearch, &FactorOptions::default(), 1, 4),
            Err(TuneError::InvalidBounds {
                lower: 1,
                upper: 4,
                limit: 3
            })
        ));
    }

    fn shared_factor_records(seed: u64) -> Array2<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut data = Array2::zeros((80, 4));
        for mut row in data.rows_mut() {
            let shared: f64 = rng.gen_range(-1.5..1.5);
            for (col, value) in row.iter_mut().enumerate() {
                *value = 2.0 + (0.5 + 0.2 * col as f64) * shared + rng.gen_range(-0.4..0.4);
            }
        }
        data
    }

    #[test]
    fn objective_is_measured_in_the_units_of_the_records() {
        let data = shared_factor_records(11);
        let mut rescaled = data.clone();
        rescaled.column_mut(0).mapv_inplace(|value| value * 10.0);

        let options = FactorOptions::default();
        let original = tune_factor_count_within(data.view(), &GridSearch, &options, 1, 2).unwrap();
        let stretched =
            tune_factor_count_within(rescaled.view(), &GridSearch, &options, 1, 2).unwrap();

        assert!(original.value.is_finite());
        assert!(stretched.value.is_finite());
        assert!(stretched.value > original.value);
    }

    #[test]
    fn degenerate_data_is_surfaced_once() {
        let data = Array2::<f64>::zeros((10, 3));
        assert!(matches!(
            tune_factor_count(data.view(), &GridSearch, &FactorOptions::default()),
            Err(TuneError::FactorError(FactorError::DegenerateInput(_)))
        ));
    }
}
