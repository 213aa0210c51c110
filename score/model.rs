use crate::factor::{FactorError, FactorModel};
use crate::standardize::StandardizationParams;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error(
        "Model file is inconsistent: {names} feature names, {scaled} standardized features, {factored} factor-model features."
    )]
    InconsistentDimensions {
        names: usize,
        scaled: usize,
        factored: usize,
    },
    #[error("Projection through the stored model failed: {0}")]
    FactorError(#[from] FactorError),
}

/// Everything needed to place new respondents in the latent space used for
/// matching: the feature order, the standardization and the factor model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub feature_names: Vec<String>,
    pub standardization: StandardizationParams,
    pub factors: FactorModel,
}

impl FittedModel {
    pub fn new(
        feature_names: Vec<String>,
        standardization: StandardizationParams,
        factors: FactorModel,
    ) -> Result<Self, ModelError> {
        let model = Self {
            feature_names,
            standardization,
            factors,
        };
        model.check_dimensions()?;
        Ok(model)
    }

    fn check_dimensions(&self) -> Result<(), ModelError> {
        let names = self.feature_names.len();
        let scaled = self.standardization.n_features();
        let factored = self.factors.n_features();
        if names != scaled || scaled != factored {
            return Err(ModelError::InconsistentDimensions {
                names,
                scaled,
                factored,
            });
        }
        Ok(())
    }

    /// Standardizes raw feature rows and projects them onto the factors.
    pub fn latent_scores(&self, raw: ArrayView2<f64>) -> Result<Array2<f64>, ModelError> {
        let standardized = self.standardization.transform(raw)?;
        Ok(self.factors.transform(standardized.view())?)
    }

    /// Saves the model to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads a model from a TOML file, rejecting files whose parts disagree on width.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model: Self = toml::from_str(&toml_string)?;
        model.check_dimensions()?;
        Ok(model)
    }
}
