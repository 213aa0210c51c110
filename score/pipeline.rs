//! # Matching Pipeline
//!
//! Composes the crate's stages into one run over a loaded survey:
//!
//! 1. extract the schema columns and split the records into the two cohorts,
//!    dropping rows with a missing feature;
//! 2. choose the factor count (configured, or the Kaiser rule on all complete
//!    records);
//! 3. fit the standardization on the reference rows and apply it to both
//!    cohorts;
//! 4. fit the factor model on the pooled standardized cohorts and project each
//!    cohort into the latent space;
//! 5. score every cross-cohort pair and solve the assignment.
//!
//! The factor-count search and the bootstrap run only when configured and
//! never feed back into the matching.

use crate::assign::{AssignError, Match, optimal_matching, total_score};
use crate::bootstrap::{BootstrapError, BootstrapSummary, bootstrap_means};
use crate::compat::{CompatError, compatibility_matrix};
use crate::config::MatchConfig;
use crate::data::{DataError, ExtractedFeatures, FeatureSchema, extract_features};
use crate::factor::{
    FactorError, FactorModel, KAISER_THRESHOLD, correlation_eigenvalues, kaiser_count,
};
use crate::model::{FittedModel, ModelError};
use crate::standardize::{ScalerReference, StandardizationParams};
use crate::tune::{SearchOutcome, TuneError, tune_factor_count};
use ndarray::{Array1, Array2, Axis, concatenate};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    DataError(#[from] DataError),
    #[error(transparent)]
    FactorError(#[from] FactorError),
    #[error(transparent)]
    CompatError(#[from] CompatError),
    #[error(transparent)]
    AssignError(#[from] AssignError),
    #[error(transparent)]
    TuneError(#[from] TuneError),
    #[error(transparent)]
    BootstrapError(#[from] BootstrapError),
    #[error(transparent)]
    ModelError(#[from] ModelError),
    #[error("Failed to stack cohort matrices: {0}")]
    ShapeError(#[from] ndarray::ShapeError),
}

/// How the factor count used for matching was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FactorCountSource {
    /// Count of correlation eigenvalues above 1.0, raised to at least one.
    Kaiser,
    Configured,
}

/// Result of a matching run.
#[derive(Debug, Clone)]
pub struct MatchReport {
    pub model: FittedModel,
    pub factor_count: usize,
    pub factor_source: FactorCountSource,
    /// Correlation eigenvalues of the complete records, largest first.
    pub eigenvalues: Array1<f64>,
    /// Shape: [cohort A members, cohort B members].
    pub compatibility: Array2<f64>,
    /// Sorted by score, highest first. Indices refer to cohort members.
    pub matches: Vec<Match>,
    /// Source record index of each cohort-A member.
    pub cohort_a_records: Vec<usize>,
    pub cohort_b_records: Vec<usize>,
    pub dropped_incomplete: usize,
    pub unlabelled: usize,
    pub tuning: Option<SearchOutcome>,
    pub bootstrap: Option<BootstrapSummary>,
}

impl MatchReport {
    pub fn total_score(&self) -> f64 {
        total_score(&self.matches)
    }

    /// Source record indices `(cohort A, cohort B)` of a match.
    pub fn record_pair(&self, pair: &Match) -> (usize, usize) {
        (
            self.cohort_a_records[pair.cohort_a],
            self.cohort_b_records[pair.cohort_b],
        )
    }

    pub fn loadings(&self) -> &Array2<f64> {
        self.model.factors.loadings()
    }
}

/// Runs the pipeline over a survey frame with the standard survey columns.
pub fn run_pipeline(df: &DataFrame, config: &MatchConfig) -> Result<MatchReport, PipelineError> {
    run_pipeline_with_schema(df, &FeatureSchema::survey(), config)
}

pub fn run_pipeline_with_schema(
    df: &DataFrame,
    schema: &FeatureSchema,
    config: &MatchConfig,
) -> Result<MatchReport, PipelineError> {
    let extracted = extract_features(df, schema)?;
    run_on_features(&extracted, config)
}

/// Runs every stage after extraction.
pub fn run_on_features(
    extracted: &ExtractedFeatures,
    config: &MatchConfig,
) -> Result<MatchReport, PipelineError> {
    let split = extracted.split_cohorts(config.cohort_labels);
    log::info!(
        "Cohort A: {} members, cohort B: {} members",
        split.cohort_a.len(),
        split.cohort_b.len()
    );

    let complete = extracted.complete_rows();
    let eigenvalues = correlation_eigenvalues(complete.view())?;
    let (factor_count, factor_source) = match config.factors {
        Some(k) => (k, FactorCountSource::Configured),
        None => (kaiser_count_from(&eigenvalues), FactorCountSource::Kaiser),
    };
    log::info!("Using {} latent factors ({:?})", factor_count, factor_source);

    let pooled_raw = concatenate(
        Axis(0),
        &[split.cohort_a.features.view(), split.cohort_b.features.view()],
    )?;
    let standardization = match config.scaler_reference {
        ScalerReference::CohortA => StandardizationParams::fit(split.cohort_a.features.view())?,
        ScalerReference::Pooled => StandardizationParams::fit(pooled_raw.view())?,
    };
    let scaled_a = standardization.transform(split.cohort_a.features.view())?;
    let scaled_b = standardization.transform(split.cohort_b.features.view())?;
    let pooled = concatenate(Axis(0), &[scaled_a.view(), scaled_b.view()])?;

    let factors = FactorModel::fit_with_options(pooled.view(), factor_count, &config.factor_options)?;
    log::info!(
        "Factor model converged after {} iterations (log-likelihood {:.4})",
        factors.iterations(),
        factors.log_likelihood()
    );
    let latent_a = factors.transform(scaled_a.view())?;
    let latent_b = factors.transform(scaled_b.view())?;

    let compatibility = compatibility_matrix(latent_a.view(), latent_b.view())?;
    let matches = optimal_matching(compatibility.view())?;
    log::info!(
        "Matched {} pairs, total compatibility {:.6}",
        matches.len(),
        total_score(&matches)
    );

    let tuning = match &config.tuning {
        Some(strategy) => Some(tune_factor_count(complete.view(), strategy, &config.factor_options)?),
        None => None,
    };

    let bootstrap = if config.bootstrap_iterations > 0 {
        let draws = bootstrap_means(
            extracted.features.view(),
            config.bootstrap_iterations,
            config.bootstrap_seed,
        )?;
        Some(BootstrapSummary::from_draws(draws.view()))
    } else {
        None
    };

    let model = FittedModel::new(extracted.names.clone(), standardization, factors)?;

    Ok(MatchReport {
        model,
        factor_count,
        factor_source,
        eigenvalues,
        compatibility,
        matches,
        cohort_a_records: split.cohort_a.record_indices,
        cohort_b_records: split.cohort_b.record_indices,
        dropped_incomplete: split.dropped_incomplete,
        unlabelled: split.unlabelled,
        tuning,
        bootstrap,
    })
}

fn kaiser_count_from(eigenvalues: &Array1<f64>) -> usize {
    match kaiser_count(eigenvalues.view()) {
        0 => {
            log::warn!(
                "No correlation eigenvalue exceeds {KAISER_THRESHOLD}; using a single factor"
            );
            1
        }
        count => count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn kaiser_count_is_at_least_one() {
        assert_eq!(kaiser_count_from(&array![0.9, 0.6, 0.5]), 1);
        assert_eq!(kaiser_count_from(&array![2.4, 1.3, 0.2, 0.1]), 2);
    }
}
