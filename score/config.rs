use crate::data::CohortLabels;
use crate::factor::FactorOptions;
use crate::standardize::ScalerReference;
use crate::tune::SearchStrategy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

/// Settings for one matching run. Every field has a default, so an empty
/// document is a valid configuration.
///
/// ```toml
/// factors = 3
/// scaler_reference = "pooled"
/// bootstrap_iterations = 1000
///
/// [cohort_labels]
/// cohort_a = 0.0
/// cohort_b = 1.0
///
/// [tuning]
/// kind = "swarm"
/// particles = 50
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchConfig {
    /// Fixed factor count. When absent the Kaiser rule decides.
    pub factors: Option<usize>,
    pub scaler_reference: ScalerReference,
    /// Number of bootstrap resamples; 0 disables the bootstrap.
    pub bootstrap_iterations: usize,
    pub bootstrap_seed: u64,
    pub cohort_labels: CohortLabels,
    pub factor_options: FactorOptions,
    /// Runs the factor-count search alongside matching when present.
    pub tuning: Option<SearchStrategy>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            factors: None,
            scaler_reference: ScalerReference::default(),
            bootstrap_iterations: 0,
            bootstrap_seed: 42,
            cohort_labels: CohortLabels::default(),
            factor_options: FactorOptions::default(),
            tuning: None,
        }
    }
}

impl MatchConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}
