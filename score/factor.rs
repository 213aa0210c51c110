//! # Latent Factor Model
//!
//! Maximum-likelihood factor analysis fitted by alternating between an
//! eigendecomposition of the noise-whitened covariance and a noise-variance
//! update. Each iteration:
//!
//! 1.  Whitens the sample covariance by the current noise standard deviations
//!     and takes its leading `k` eigenpairs.
//! 2.  Rebuilds the loadings as `sqrt(max(s - 1, 0)) * v * sqrt(psi)` and scores
//!     the Gaussian log-likelihood of the model.
//! 3.  Stops once the likelihood gain drops below the tolerance, otherwise sets
//!     each noise variance to the feature variance the loadings leave unexplained.
//!
//! Latent scores for new rows are posterior means under the fitted model. The
//! fit is refused up front for data whose correlation matrix is singular, since
//! such data would otherwise surface as NaN loadings.
//!
//! The module also hosts the Kaiser rule used to choose the factor count.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{Eigh, Inverse, UPLO};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

/// Feature variances below this are considered constant.
pub const VARIANCE_EPSILON: f64 = 1.0e-12;
/// Smallest correlation eigenvalue accepted before the data counts as collinear.
pub const SINGULARITY_THRESHOLD: f64 = 1.0e-10;
/// Eigenvalues above this count toward the Kaiser factor count.
pub const KAISER_THRESHOLD: f64 = 1.0;
const NOISE_VARIANCE_FLOOR: f64 = 1.0e-12;

#[derive(Error, Debug)]
pub enum FactorError {
    #[error("Cannot fit on an empty cohort: no complete records are available.")]
    EmptyCohort,

    #[error("Degenerate input for factor analysis: {0}")]
    DegenerateInput(String),

    #[error(
        "Requested {requested} factors, but the factor count must lie between 1 and the number of features ({features})."
    )]
    InvalidFactorCount { requested: usize, features: usize },

    #[error("Input has {found} feature columns, but the model was fitted on {expected}.")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("A linear algebra routine failed: {0}")]
    LinalgError(#[from] LinalgError),
}

/// Convergence settings for the factor fit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorOptions {
    pub max_iterations: usize,
    /// Minimum log-likelihood gain required to keep iterating.
    pub tolerance: f64,
}

impl Default for FactorOptions {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1.0e-2,
        }
    }
}

/// A fitted factor model. Fit once, then only used to transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorModel {
    n_factors: usize,
    iterations: usize,
    log_likelihood: f64,
    /// Column means of the fit data.
    mean: Array1<f64>,
    /// Shape: [n_factors, n_features].
    loadings: Array2<f64>,
    /// Per-feature unique variance.
    noise_variance: Array1<f64>,
}

impl FactorModel {
    pub fn fit(data: ArrayView2<f64>, n_factors: usize) -> Result<Self, FactorError> {
        Self::fit_with_options(data, n_factors, &FactorOptions::default())
    }

    pub fn fit_with_options(
        data: ArrayView2<f64>,
        n_factors: usize,
        options: &FactorOptions,
    ) -> Result<Self, FactorError> {
        let (n_samples, n_features) = data.dim();
        if n_samples == 0 {
            return Err(FactorError::EmptyCohort);
        }
        if n_factors == 0 || n_factors > n_features {
            return Err(FactorError::InvalidFactorCount {
                requested: n_factors,
                features: n_features,
            });
        }
        check_conditioning(data)?;

        let mean = data.mean_axis(Axis(0)).ok_or(FactorError::EmptyCohort)?;
        let centered = &data - &mean;
        let n = n_samples as f64;
        let covariance = centered.t().dot(&centered) / n;
        let variance = covariance.diag().to_owned();

        let llconst = n_features as f64 * (2.0 * PI).ln() + n_factors as f64;
        let mut psi = Array1::<f64>::ones(n_features);
        let mut loadings = Array2::<f64>::zeros((n_factors, n_features));
        let mut previous = f64::NEG_INFINITY;
        let mut log_likelihood = f64::NEG_INFINITY;
        let mut iterations = 0;
        let mut converged = false;
        let max_iterations = options.max_iterations.max(1);

        while iterations < max_iterations {
            iterations += 1;
            let sqrt_psi = psi.mapv(|value| value.sqrt() + NOISE_VARIANCE_FLOOR);
            let whitened = Array2::from_shape_fn((n_features, n_features), |(i, j)| {
                covariance[[i, j]] / (sqrt_psi[i] * sqrt_psi[j])
            });

            // Ascending order, so the leading factors sit at the end.
            let (eigenvalues, eigenvectors) = whitened.eigh(UPLO::Lower)?;
            let split = n_features - n_factors;
            let unexplained: f64 = eigenvalues.iter().take(split).sum();

            let mut log_det = 0.0;
            for factor in 0..n_factors {
                let index = n_features - 1 - factor;
                let value = eigenvalues[index];
                log_det += value.max(NOISE_VARIANCE_FLOOR).ln();
                let weight = (value - 1.0).max(0.0).sqrt();
                for feature in 0..n_features {
                    loadings[[factor, feature]] =
                        weight * eigenvectors[[feature, index]] * sqrt_psi[feature];
                }
            }

            log_likelihood =
                -0.5 * n * (llconst + log_det + unexplained + psi.mapv(f64::ln).sum());
            if log_likelihood - previous < options.tolerance {
                converged = true;
                break;
            }
            previous = log_likelihood;

            let explained = loadings.mapv(|w| w * w).sum_axis(Axis(0));
            psi = (&variance - &explained).mapv(|value| value.max(NOISE_VARIANCE_FLOOR));
        }

        if converged {
            log::debug!(
                "Factor analysis with {} factors converged after {} iterations (log-likelihood {:.6})",
                n_factors,
                iterations,
                log_likelihood
            );
        } else {
            log::warn!(
                "Factor analysis with {} factors stopped at the iteration limit ({}) before converging",
                n_factors,
                max_iterations
            );
        }

        Ok(Self {
            n_factors,
            iterations,
            log_likelihood,
            mean,
            loadings,
            noise_variance: psi,
        })
    }

    /// Posterior mean of the latent factors for each row of `data`.
    pub fn transform(&self, data: ArrayView2<f64>) -> Result<Array2<f64>, FactorError> {
        if data.ncols() != self.n_features() {
            return Err(FactorError::DimensionMismatch {
                expected: self.n_features(),
                found: data.ncols(),
            });
        }
        if data.nrows() == 0 {
            return Ok(Array2::zeros((0, self.n_factors)));
        }

        let centered = &data - &self.mean;
        let weighted = &self.loadings / &self.noise_variance;
        let precision = Array2::<f64>::eye(self.n_factors) + weighted.dot(&self.loadings.t());
        let posterior_covariance = precision.inv()?;
        Ok(centered.dot(&weighted.t()).dot(&posterior_covariance))
    }

    pub fn n_factors(&self) -> usize {
        self.n_factors
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn loadings(&self) -> &Array2<f64> {
        &self.loadings
    }

    pub fn noise_variance(&self) -> &Array1<f64> {
        &self.noise_variance
    }

    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Sum of squared loadings, the factor-count search objective.
    pub fn loading_energy(&self) -> f64 {
        self.loadings.iter().map(|w| w * w).sum()
    }
}

/// Pearson correlation matrix of the columns of `data`.
///
/// A zero-variance column makes the matrix undefined and is reported as
/// [`FactorError::DegenerateInput`].
pub fn correlation_matrix(data: ArrayView2<f64>) -> Result<Array2<f64>, FactorError> {
    let (n_samples, n_features) = data.dim();
    if n_samples == 0 {
        return Err(FactorError::EmptyCohort);
    }
    if data.iter().any(|value| !value.is_finite()) {
        return Err(FactorError::DegenerateInput(
            "input contains missing or non-finite values".to_string(),
        ));
    }

    let mean = data.mean_axis(Axis(0)).ok_or(FactorError::EmptyCohort)?;
    let centered = &data - &mean;
    let covariance = centered.t().dot(&centered) / n_samples as f64;

    let mut scale = Array1::<f64>::zeros(n_features);
    for feature in 0..n_features {
        let variance = covariance[[feature, feature]];
        if variance < VARIANCE_EPSILON {
            return Err(FactorError::DegenerateInput(format!(
                "feature column {feature} is constant"
            )));
        }
        scale[feature] = variance.sqrt();
    }

    Ok(Array2::from_shape_fn(
        (n_features, n_features),
        |(i, j)| {
            if i == j {
                1.0
            } else {
                covariance[[i, j]] / (scale[i] * scale[j])
            }
        },
    ))
}

/// Eigenvalues of the correlation matrix, largest first.
pub fn correlation_eigenvalues(data: ArrayView2<f64>) -> Result<Array1<f64>, FactorError> {
    let correlation = correlation_matrix(data)?;
    let (eigenvalues, _) = correlation.eigh(UPLO::Lower)?;
    Ok(eigenvalues.iter().rev().copied().collect())
}

/// Number of eigenvalues above [`KAISER_THRESHOLD`]. May be zero.
pub fn kaiser_count(eigenvalues: ArrayView1<f64>) -> usize {
    eigenvalues
        .iter()
        .filter(|&&value| value > KAISER_THRESHOLD)
        .count()
}

/// Kaiser criterion: the number of correlation eigenvalues above 1.0.
pub fn kaiser_factor_count(data: ArrayView2<f64>) -> Result<usize, FactorError> {
    let eigenvalues = correlation_eigenvalues(data)?;
    Ok(kaiser_count(eigenvalues.view()))
}

/// Rejects data whose correlation matrix is singular or nearly so.
pub fn check_conditioning(data: ArrayView2<f64>) -> Result<(), FactorError> {
    let eigenvalues = correlation_eigenvalues(data)?;
    let smallest = eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);
    if !(smallest > SINGULARITY_THRESHOLD) {
        return Err(FactorError::DegenerateInput(format!(
            "correlation matrix is singular or ill-conditioned (smallest eigenvalue {smallest:.3e})"
        )));
    }
    Ok(())
}
