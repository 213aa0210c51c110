#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use itertools::Itertools;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use rapport::bootstrap::BootstrapSummary;
use rapport::data::{FeatureSchema, extract_features, load_survey};
use rapport::factor::{FactorOptions, correlation_eigenvalues, kaiser_factor_count};
use rapport::pipeline::MatchReport;
use rapport::tune::{ParticleSwarm, SearchStrategy, tune_factor_count};
use rapport::{MatchConfig, run_pipeline};

#[derive(Clone, Copy, ValueEnum)]
pub enum StrategyCli {
    Swarm,
    Grid,
    HillClimb,
}

#[derive(Args)]
pub struct MatchArgs {
    /// Path to the survey file (header row, one respondent per line)
    pub survey: PathBuf,

    /// TOML configuration file; command-line flags take precedence
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory for the output files
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,

    /// Fixed number of latent factors instead of the Kaiser rule
    #[arg(long, value_name = "K")]
    pub factors: Option<usize>,

    /// Field separator of the survey file ("tab" or a single character)
    #[arg(long, default_value = "tab", value_parser = parse_separator)]
    pub separator: u8,

    /// Also run the factor-count search and report its result
    #[arg(long)]
    pub tune: bool,

    /// Number of bootstrap resamples of the feature means (writes bootstrap.tsv)
    #[arg(long, value_name = "N")]
    pub bootstrap: Option<usize>,
}

#[derive(Args)]
pub struct TuneArgs {
    /// Path to the survey file
    pub survey: PathBuf,

    #[arg(long, value_enum, default_value_t = StrategyCli::Swarm)]
    pub strategy: StrategyCli,

    /// Seed for the particle swarm
    #[arg(long, default_value = "42")]
    pub seed: u64,

    #[arg(long, default_value = "tab", value_parser = parse_separator)]
    pub separator: u8,
}

#[derive(Args)]
pub struct FactorsArgs {
    /// Path to the survey file
    pub survey: PathBuf,

    #[arg(long, default_value = "tab", value_parser = parse_separator)]
    pub separator: u8,
}

#[derive(Parser)]
#[command(
    name = "rapport",
    about = "Latent-factor compatibility scoring and optimal matching for survey cohorts",
    long_about = "Projects two survey cohorts into a shared factor space, scores every \
                 cross-cohort pair and finds the one-to-one matching with the highest total score."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(
        about = "Score and match the cohorts (outputs: matches.tsv, compatibility.tsv, loadings.tsv, factor_model.toml)"
    )]
    Match(MatchArgs),
    #[command(about = "Search for the factor count with the largest sum of squared loadings")]
    Tune(TuneArgs),
    #[command(about = "Print correlation eigenvalues and the Kaiser factor count")]
    Factors(FactorsArgs),
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let Cli { command } = cli;

    let result = match command {
        Some(Commands::Match(args)) => run_match(args),
        Some(Commands::Tune(args)) => run_tune(args),
        Some(Commands::Factors(args)) => run_factors(args),
        None => print_help(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn print_help() -> Result<(), Box<dyn Error>> {
    Cli::command().print_help()?;
    println!();
    Ok(())
}

fn parse_separator(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\\t" | "\t" => Ok(b'\t'),
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii() => Ok(c as u8),
                _ => Err(format!(
                    "separator must be a single ASCII character or \"tab\", got {other:?}"
                )),
            }
        }
    }
}

fn run_match(args: MatchArgs) -> Result<(), Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => MatchConfig::load(path)?,
        None => MatchConfig::default(),
    };
    if args.factors.is_some() {
        config.factors = args.factors;
    }
    if args.tune && config.tuning.is_none() {
        config.tuning = Some(SearchStrategy::default());
    }
    if let Some(iterations) = args.bootstrap {
        config.bootstrap_iterations = iterations;
    }

    println!("Loading survey from {}", args.survey.display());
    let df = load_survey(&args.survey, args.separator)?;
    let report = run_pipeline(&df, &config)?;

    println!(
        "Cohort A: {} respondents, cohort B: {} respondents ({} incomplete, {} unlabelled records skipped)",
        report.cohort_a_records.len(),
        report.cohort_b_records.len(),
        report.dropped_incomplete,
        report.unlabelled
    );
    println!(
        "Latent factors: {} ({:?})",
        report.factor_count, report.factor_source
    );

    fs::create_dir_all(&args.out_dir)?;
    let matches_path = args.out_dir.join("matches.tsv");
    save_matches(&report, &matches_path)?;
    save_compatibility(&report, &args.out_dir.join("compatibility.tsv"))?;
    save_loadings(&report, &args.out_dir.join("loadings.tsv"))?;
    report.model.save(&args.out_dir.join("factor_model.toml"))?;

    println!(
        "Matched {} pairs, total compatibility {:.6}; wrote {}",
        report.matches.len(),
        report.total_score(),
        matches_path.display()
    );

    if let Some(outcome) = &report.tuning {
        println!(
            "Factor-count search: best k = {} (sum of squared loadings {:.6}, {} fits)",
            outcome.best, outcome.value, outcome.evaluations
        );
    }
    if let Some(summary) = &report.bootstrap {
        let bootstrap_path = args.out_dir.join("bootstrap.tsv");
        save_bootstrap(summary, &report.model.feature_names, &bootstrap_path)?;
        println!(
            "Bootstrap: {} resamples written to {}",
            summary.iterations,
            bootstrap_path.display()
        );
    }
    Ok(())
}

fn run_tune(args: TuneArgs) -> Result<(), Box<dyn Error>> {
    let df = load_survey(&args.survey, args.separator)?;
    let extracted = extract_features(&df, &FeatureSchema::survey())?;
    let complete = extracted.complete_rows();

    let strategy = match args.strategy {
        StrategyCli::Swarm => SearchStrategy::Swarm(ParticleSwarm::default().with_seed(args.seed)),
        StrategyCli::Grid => SearchStrategy::Grid,
        StrategyCli::HillClimb => SearchStrategy::HillClimb,
    };
    let outcome = tune_factor_count(complete.view(), &strategy, &FactorOptions::default())?;
    println!(
        "Best factor count: {} (sum of squared loadings {:.6}, {} fits over {} complete records)",
        outcome.best,
        outcome.value,
        outcome.evaluations,
        complete.nrows()
    );
    Ok(())
}

fn run_factors(args: FactorsArgs) -> Result<(), Box<dyn Error>> {
    let df = load_survey(&args.survey, args.separator)?;
    let extracted = extract_features(&df, &FeatureSchema::survey())?;
    let complete = extracted.complete_rows();
    let eigenvalues = correlation_eigenvalues(complete.view())?;
    println!(
        "Correlation eigenvalues: {}",
        eigenvalues.iter().map(|value| format!("{value:.4}")).join(", ")
    );
    println!(
        "Kaiser factor count: {}",
        kaiser_factor_count(complete.view())?
    );
    Ok(())
}

fn tsv_writer(path: &Path) -> Result<csv::Writer<fs::File>, csv::Error> {
    csv::WriterBuilder::new().delimiter(b'\t').from_path(path)
}

fn save_matches(report: &MatchReport, path: &Path) -> Result<(), Box<dyn Error>> {
    let mut writer = tsv_writer(path)?;
    writer.write_record([
        "rank",
        "cohort_a_record",
        "cohort_b_record",
        "cohort_a_index",
        "cohort_b_index",
        "score",
    ])?;
    for (rank, pair) in report.matches.iter().enumerate() {
        let (record_a, record_b) = report.record_pair(pair);
        writer.write_record([
            (rank + 1).to_string(),
            record_a.to_string(),
            record_b.to_string(),
            pair.cohort_a.to_string(),
            pair.cohort_b.to_string(),
            pair.score.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn save_compatibility(report: &MatchReport, path: &Path) -> Result<(), Box<dyn Error>> {
    let mut writer = tsv_writer(path)?;
    let header = std::iter::once("cohort_a_record".to_string())
        .chain(report.cohort_b_records.iter().map(|record| record.to_string()));
    writer.write_record(header)?;
    for (row, record) in report.compatibility.rows().into_iter().zip(&report.cohort_a_records) {
        let fields = std::iter::once(record.to_string()).chain(row.iter().map(|s| s.to_string()));
        writer.write_record(fields)?;
    }
    writer.flush()?;
    Ok(())
}

fn save_loadings(report: &MatchReport, path: &Path) -> Result<(), Box<dyn Error>> {
    let mut writer = tsv_writer(path)?;
    let header = std::iter::once("factor".to_string())
        .chain(report.model.feature_names.iter().cloned());
    writer.write_record(header)?;
    for (factor, row) in report.loadings().rows().into_iter().enumerate() {
        let fields = std::iter::once(format!("factor_{}", factor + 1))
            .chain(row.iter().map(|w| w.to_string()));
        writer.write_record(fields)?;
    }
    writer.flush()?;
    Ok(())
}

fn save_bootstrap(
    summary: &BootstrapSummary,
    feature_names: &[String],
    path: &Path,
) -> Result<(), Box<dyn Error>> {
    let mut writer = tsv_writer(path)?;
    writer.write_record(["feature", "mean", "lower_2_5", "upper_97_5"])?;
    for (i, name) in feature_names.iter().enumerate() {
        writer.write_record([
            name.clone(),
            summary.mean[i].to_string(),
            summary.lower[i].to_string(),
            summary.upper[i].to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separator_accepts_tab_names_and_single_characters() {
        assert_eq!(parse_separator("tab").unwrap(), b'\t');
        assert_eq!(parse_separator("\\t").unwrap(), b'\t');
        assert_eq!(parse_separator(",").unwrap(), b',');
        assert_eq!(parse_separator(";").unwrap(), b';');
        assert!(parse_separator(",,").is_err());
        assert!(parse_separator("").is_err());
    }

    #[test]
    fn every_subcommand_reads_tab_separated_input_by_default() {
        let defaults = [
            ("match", Cli::try_parse_from(["rapport", "match", "survey.tsv"])),
            ("tune", Cli::try_parse_from(["rapport", "tune", "survey.tsv"])),
            ("factors", Cli::try_parse_from(["rapport", "factors", "survey.tsv"])),
        ];
        for (name, parsed) in defaults {
            let separator = match parsed.unwrap().command {
                Some(Commands::Match(args)) => args.separator,
                Some(Commands::Tune(args)) => args.separator,
                Some(Commands::Factors(args)) => args.separator,
                None => panic!("no subcommand parsed for {name}"),
            };
            assert_eq!(separator, b'\t', "{name}");
        }
    }

    #[test]
    fn explicit_separator_overrides_the_default() {
        let cli = Cli::try_parse_from(["rapport", "factors", "survey.csv", "--separator", ","]).unwrap();
        match cli.command {
            Some(Commands::Factors(args)) => assert_eq!(args.separator, b','),
            _ => panic!("expected the factors subcommand"),
        }
    }
}
