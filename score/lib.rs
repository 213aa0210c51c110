#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

//! Latent-factor compatibility scoring and optimal one-to-one matching between
//! two survey cohorts.
//!
//! The pipeline reads respondent features, standardizes them with parameters
//! fitted once, projects both cohorts into a shared factor space, scores every
//! cross-cohort pair and solves the assignment problem over those scores.

pub mod assign;
pub mod bootstrap;
pub mod compat;
pub mod config;
pub mod data;
pub mod factor;
pub mod model;
pub mod pipeline;
pub mod standardize;
pub mod tune;

pub use assign::{Match, optimal_matching};
pub use compat::compatibility_matrix;
pub use config::MatchConfig;
pub use data::{FeatureSchema, extract_features, load_survey};
pub use factor::{FactorModel, FactorOptions, kaiser_factor_count};
pub use model::FittedModel;
pub use pipeline::{MatchReport, PipelineError, run_pipeline};
pub use standardize::{ScalerReference, StandardizationParams};
pub use tune::{IntegerSearch, SearchOutcome, SearchStrategy, tune_factor_count};
