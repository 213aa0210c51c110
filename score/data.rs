//! # Survey Feature Extraction
//!
//! This module is the entry point for respondent data. It reads delimited survey
//! files, selects the fixed set of scoring columns, and turns them into the
//! `ndarray` structures used by the statistical core.
//!
//! - Strict Schema: the scoring columns are fixed at design time (five
//!   personality traits and four relationship-behavior measures plus the group
//!   label). A missing column is a hard error raised before any computation.
//! - Lenient Cells: malformed cells never raise. Anything that cannot be read as
//!   a finite number becomes `NaN`, and rows carrying a `NaN` are excluded from a
//!   cohort before any model is fitted. Nothing is imputed.

use ndarray::{Array1, Array2, ArrayView1, Axis, ShapeBuilder};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Big Five personality traits, in scoring order.
pub const PERSONALITY_COLUMNS: [&str; 5] = [
    "Extroversao",
    "Amabilidade",
    "Escrupulo",
    "Neuroticismo",
    "Abertura_A_Experiencia",
];

/// Relationship-behavior measures, in scoring order after the personality traits.
pub const RELATIONSHIP_COLUMNS: [&str; 4] = [
    "Impulso_Proprio",
    "Impulso_Casal",
    "Sociosexualidade_Geral",
    "Satisfacao_Individual",
];

/// Binary group label separating the two cohorts.
pub const GROUP_LABEL_COLUMN: &str = "Sexo";

/// A comprehensive error type for all data loading and extraction failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input data. Please check spelling and case."
    )]
    MissingColumn(String),
    #[error("A feature schema must name at least one feature column.")]
    EmptySchema,
    #[error("Extracted columns could not be assembled into a matrix: {0}")]
    ShapeError(#[from] ndarray::ShapeError),
}

/// The named columns read from a survey: an ordered feature list and a group label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSchema {
    features: Vec<String>,
    label: String,
}

impl FeatureSchema {
    /// The fixed survey schema: personality traits, then relationship measures,
    /// split by `Sexo`.
    pub fn survey() -> Self {
        let features = PERSONALITY_COLUMNS
            .iter()
            .chain(RELATIONSHIP_COLUMNS.iter())
            .map(|name| name.to_string())
            .collect();
        Self {
            features,
            label: GROUP_LABEL_COLUMN.to_string(),
        }
    }

    pub fn new<I, S>(features: I, label: impl Into<String>) -> Result<Self, DataError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let features: Vec<String> = features.into_iter().map(Into::into).collect();
        if features.is_empty() {
            return Err(DataError::EmptySchema);
        }
        Ok(Self {
            features,
            label: label.into(),
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.features
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn n_features(&self) -> usize {
        self.features.len()
    }
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::survey()
    }
}

/// Label values identifying the two cohorts in the group-label column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CohortLabels {
    pub cohort_a: f64,
    pub cohort_b: f64,
}

impl Default for CohortLabels {
    fn default() -> Self {
        Self {
            cohort_a: 0.0,
            cohort_b: 1.0,
        }
    }
}

/// Every record of the dataset restricted to the schema columns.
/// Missing or malformed cells are `NaN`.
#[derive(Debug, Clone)]
pub struct ExtractedFeatures {
    /// Shape: [n_records, n_features].
    pub features: Array2<f64>,
    /// Group label per record, `NaN` when missing or malformed.
    pub labels: Array1<f64>,
    pub names: Vec<String>,
}

/// One cohort's complete rows and the record index each row came from.
#[derive(Debug, Clone)]
pub struct Cohort {
    /// Shape: [n_members, n_features]. Contains no `NaN`.
    pub features: Array2<f64>,
    pub record_indices: Vec<usize>,
}

impl Cohort {
    pub fn len(&self) -> usize {
        self.record_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record_indices.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct CohortSplit {
    pub cohort_a: Cohort,
    pub cohort_b: Cohort,
    /// Labelled records excluded because a feature value was missing.
    pub dropped_incomplete: usize,
    /// Records whose label matched neither cohort.
    pub unlabelled: usize,
}

impl ExtractedFeatures {
    pub fn n_records(&self) -> usize {
        self.features.nrows()
    }

    /// All complete records regardless of label, in record order.
    pub fn complete_rows(&self) -> Array2<f64> {
        let indices: Vec<usize> = (0..self.n_records())
            .filter(|&row| is_complete(self.features.row(row)))
            .collect();
        self.features.select(Axis(0), &indices)
    }

    /// Separates records by label, dropping any row with a missing feature.
    pub fn split_cohorts(&self, labels: CohortLabels) -> CohortSplit {
        let mut members_a = Vec::new();
        let mut members_b = Vec::new();
        let mut dropped_incomplete = 0;
        let mut unlabelled = 0;

        for (row, &label) in self.labels.iter().enumerate() {
            let bucket = if label == labels.cohort_a {
                &mut members_a
            } else if label == labels.cohort_b {
                &mut members_b
            } else {
                unlabelled += 1;
                continue;
            };

            if is_complete(self.features.row(row)) {
                bucket.push(row);
            } else {
                dropped_incomplete += 1;
            }
        }

        if dropped_incomplete > 0 {
            log::info!(
                "Excluded {} labelled records with missing feature values",
                dropped_incomplete
            );
        }
        if unlabelled > 0 {
            log::warn!(
                "{} records carry a group label outside {{{}, {}}} and belong to neither cohort",
                unlabelled,
                labels.cohort_a,
                labels.cohort_b
            );
        }

        CohortSplit {
            cohort_a: Cohort {
                features: self.features.select(Axis(0), &members_a),
                record_indices: members_a,
            },
            cohort_b: Cohort {
                features: self.features.select(Axis(0), &members_b),
                record_indices: members_b,
            },
            dropped_incomplete,
            unlabelled,
        }
    }
}

fn is_complete(row: ArrayView1<f64>) -> bool {
    row.iter().all(|value| value.is_finite())
}

/// Reads a delimited survey file with a header row.
///
/// Every column is read as text so a stray word in a numeric column cannot
/// abort the parse; numeric coercion happens in [`extract_features`].
pub fn load_survey(path: &Path, separator: u8) -> Result<DataFrame, DataError> {
    log::info!("Loading survey data from '{}'", path.display());

    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(Some(0))
                .with_parse_options(CsvParseOptions::default().with_separator(separator)),
        )
        .finish()?;

    log::info!(
        "Loaded {} records with {} columns",
        df.height(),
        df.width()
    );
    Ok(df)
}

/// Selects the schema columns from `df` and coerces them to `f64`.
///
/// Fails with [`DataError::MissingColumn`] for the first absent column, checked
/// before any value is read.
pub fn extract_features(
    df: &DataFrame,
    schema: &FeatureSchema,
) -> Result<ExtractedFeatures, DataError> {
    let required = schema
        .feature_names()
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(schema.label()));
    for name in required {
        if df.get_column_index(name).is_none() {
            return Err(DataError::MissingColumn(name.to_string()));
        }
    }

    let n_records = df.height();
    let n_features = schema.n_features();
    let mut buffer = Vec::with_capacity(n_records * n_features);
    for name in schema.feature_names() {
        let mut column = coerce_numeric_column(df, name)?;
        buffer.append(&mut column);
    }
    let features = Array2::from_shape_vec((n_records, n_features).f(), buffer)?;
    let labels = Array1::from_vec(coerce_numeric_column(df, schema.label())?);

    let missing = features.iter().filter(|value| !value.is_finite()).count();
    log::debug!(
        "Extracted {} records x {} features ({} missing cells)",
        n_records,
        n_features,
        missing
    );

    Ok(ExtractedFeatures {
        features,
        labels,
        names: schema.feature_names().to_vec(),
    })
}

/// Non-strict cast to `f64`: unparsable, null and non-finite cells all become `NaN`.
fn coerce_numeric_column(df: &DataFrame, name: &str) -> Result<Vec<f64>, DataError> {
    let column = df.column(name)?;
    let casted = column.cast(&DataType::Float64)?;
    let values = casted
        .f64()?
        .into_iter()
        .map(|cell| match cell {
            Some(value) if value.is_finite() => value,
            _ => f64::NAN,
        })
        .collect();
    Ok(values)
}
