use ndarray::{Array2, ArrayView1, ArrayView2, Zip};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompatError {
    #[error(
        "Latent score matrices disagree on dimensionality: cohort A has {left} factors, cohort B has {right}."
    )]
    DimensionMismatch { left: usize, right: usize },
}

/// Similarity of two latent vectors: `1 / (1 + euclidean distance)`.
///
/// Always in (0, 1], exactly 1.0 for identical vectors.
pub fn compatibility(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let squared: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let delta = x - y;
            delta * delta
        })
        .sum();
    1.0 / (1.0 + squared.sqrt())
}

/// Dense `n x m` compatibility between every cohort-A row and every cohort-B row.
///
/// Entries are raw pairwise scores with no row or column normalization. An empty
/// cohort yields an empty matrix of the matching shape.
pub fn compatibility_matrix(
    cohort_a: ArrayView2<f64>,
    cohort_b: ArrayView2<f64>,
) -> Result<Array2<f64>, CompatError> {
    let n = cohort_a.nrows();
    let m = cohort_b.nrows();
    if n == 0 || m == 0 {
        return Ok(Array2::zeros((n, m)));
    }
    if cohort_a.ncols() != cohort_b.ncols() {
        return Err(CompatError::DimensionMismatch {
            left: cohort_a.ncols(),
            right: cohort_b.ncols(),
        });
    }

    let mut scores = Array2::<f64>::zeros((n, m));
    Zip::from(scores.rows_mut())
        .and(cohort_a.rows())
        .par_for_each(|mut row, latent_a| {
            for (score, latent_b) in row.iter_mut().zip(cohort_b.rows()) {
                *score = compatibility(latent_a, latent_b);
            }
        });
    Ok(scores)
}
