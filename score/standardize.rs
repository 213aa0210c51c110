use crate::factor::FactorError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Standard deviations below this are treated as zero and replaced by a unit scale.
pub const SCALE_FLOOR: f64 = 1.0e-9;

/// Which rows the standardization statistics are estimated from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScalerReference {
    /// Estimate on cohort A alone and reuse the result for cohort B.
    #[default]
    CohortA,
    /// Estimate on both cohorts stacked together.
    Pooled,
}

/// Per-feature mean and scale, fitted once and passed explicitly to every
/// transform so both cohorts land on the same axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardizationParams {
    means: Array1<f64>,
    scales: Array1<f64>,
}

impl StandardizationParams {
    /// Fits mean and population standard deviation per column.
    ///
    /// A constant column keeps a unit scale, so it standardizes to all zeros and
    /// is rejected later by the factor fit instead of producing infinities here.
    pub fn fit(data: ArrayView2<f64>) -> Result<Self, FactorError> {
        let means = data.mean_axis(Axis(0)).ok_or(FactorError::EmptyCohort)?;
        let scales = data
            .std_axis(Axis(0), 0.0)
            .mapv(|scale| if scale < SCALE_FLOOR { 1.0 } else { scale });
        Ok(Self { means, scales })
    }

    pub fn means(&self) -> ArrayView1<'_, f64> {
        self.means.view()
    }

    pub fn scales(&self) -> ArrayView1<'_, f64> {
        self.scales.view()
    }

    pub fn n_features(&self) -> usize {
        self.means.len()
    }

    /// Returns `(data - mean) / scale` without touching the fitted statistics.
    pub fn transform(&self, data: ArrayView2<f64>) -> Result<Array2<f64>, FactorError> {
        if data.ncols() != self.n_features() {
            return Err(FactorError::DimensionMismatch {
                expected: self.n_features(),
                found: data.ncols(),
            });
        }
        Ok((&data - &self.means) / &self.scales)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn fitted_cohort_is_centered_and_unit_scaled() {
        let data = array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0], [4.0, 40.0]];
        let params = StandardizationParams::fit(data.view()).unwrap();
        let scaled = params.transform(data.view()).unwrap();

        for column in scaled.columns() {
            assert_abs_diff_eq!(column.mean().unwrap(), 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(column.std(0.0), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn second_cohort_reuses_reference_statistics() {
        let reference = array![[0.0], [2.0]];
        let other = array![[1.0], [3.0]];
        let params = StandardizationParams::fit(reference.view()).unwrap();
        let scaled = params.transform(other.view()).unwrap();

        assert_abs_diff_eq!(params.means()[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(params.scales()[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(scaled[[0, 0]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(scaled[[1, 0]], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn constant_column_keeps_unit_scale() {
        let data = array![[5.0, 1.0], [5.0, 2.0], [5.0, 3.0]];
        let params = StandardizationParams::fit(data.view()).unwrap();
        assert_eq!(params.scales()[0], 1.0);
        let scaled = params.transform(data.view()).unwrap();
        assert!(scaled.column(0).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn empty_input_is_an_empty_cohort() {
        let data = Array2::<f64>::zeros((0, 3));
        assert!(matches!(
            StandardizationParams::fit(data.view()),
            Err(FactorError::EmptyCohort)
        ));
    }

    #[test]
    fn transform_rejects_wrong_width() {
        let params = StandardizationParams::fit(array![[1.0, 2.0], [3.0, 4.0]].view()).unwrap();
        let result = params.transform(array![[1.0, 2.0, 3.0]].view());
        assert!(matches!(
            result,
            Err(FactorError::DimensionMismatch {
                expected: 2,
                found: 3
            })
        ));
    }
}
