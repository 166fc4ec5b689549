//! chartforge: ingest chart QA datasets and advance derivation stages.
//!
//! Samples live in a SQLite database, images in a blob directory. Every
//! subcommand is safe to re-run: stages only fill columns that are still
//! empty.
//!
//! # Usage
//!
//! ```text
//! chartforge ingest --manifest chartx/manifest.jsonl --dataset chartx
//! chartforge run                       # every stage, in dependency order
//! chartforge run --stage preprocess -l 1000
//! chartforge verify --count 500
//! chartforge clean
//! ```
//!
//! # Exit status
//!
//! `0` when every requested stage ran to completion, `1` on a store or
//! configuration error, `2` when the failure budget was exceeded.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use chartforge_normalize::{NormalizeConfig, ResizeFilter};
use chartforge_pipeline::{
    DatasetKind, FsBlobStore, ManifestSource, Pipeline, PipelineConfig, PipelineError, RunSummary,
    SqliteRecordStore, Stage, StoreError,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;

/// Deduplicating multi-stage derivation pipeline for chart QA datasets.
#[derive(Parser)]
#[command(name = "chartforge", version)]
struct Cli {
    /// SQLite database holding the sample table.
    #[arg(long, global = true, default_value = "chartforge.db")]
    db: PathBuf,

    /// Directory holding image blobs.
    #[arg(long, global = true, default_value = "blobs")]
    blobs: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import samples from a JSON-lines dataset manifest.
    Ingest(IngestArgs),
    /// Advance stages over pending samples.
    Run(RunArgs),
    /// Check stored samples and images for consistency.
    Verify(VerifyArgs),
    /// Delete every sample and every blob.
    Clean,
}

#[derive(Args)]
struct IngestArgs {
    /// Manifest with one `{"image", "question", "answer", "chart_type"}`
    /// object per line. Image paths are relative to the manifest.
    #[arg(long)]
    manifest: PathBuf,

    /// Chart category vocabulary of the dataset.
    #[arg(long, value_enum)]
    dataset: Dataset,

    /// Source tag stored on each sample (defaults to the dataset name).
    #[arg(long)]
    source: Option<String>,

    /// Stop after inserting this many samples.
    #[arg(short, long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    limit: Option<usize>,

    /// Wipe every sample and blob first.
    #[arg(short, long)]
    clean: bool,

    /// Largest tolerated number of failed records.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_FAILURE_BUDGET)]
    failure_budget: usize,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct RunArgs {
    /// Stage to run; repeatable. Runs every stage when omitted.
    #[arg(long = "stage", value_enum)]
    stages: Vec<StageArg>,

    /// Process at most this many pending samples per stage.
    #[arg(short, long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    limit: Option<usize>,

    /// Wipe every sample and blob first.
    #[arg(short, long)]
    clean: bool,

    /// Print counters as JSON.
    #[arg(long)]
    json: bool,

    /// Samples written per committed batch.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_BATCH_SIZE, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    batch_size: usize,

    /// Largest tolerated number of failed content keys.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_FAILURE_BUDGET)]
    failure_budget: usize,

    /// Side length of the normalized square canvas, in pixels.
    #[arg(long, default_value_t = NormalizeConfig::DEFAULT_TARGET_SIZE, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    target_size: u32,

    /// Resampling filter for the letterbox resize.
    #[arg(long, value_enum, default_value_t = Filter::Lanczos3)]
    resize_filter: Filter,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, the config flags above are ignored. Fields left
    /// out keep their defaults.
    #[arg(long)]
    config_json: Option<String>,
}

#[derive(Args)]
struct VerifyArgs {
    /// Check the first N samples.
    #[arg(long, default_value_t = 100, conflicts_with = "all")]
    count: usize,

    /// Check every sample.
    #[arg(long)]
    all: bool,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
}

/// Dataset selection.
#[derive(Clone, Copy, ValueEnum)]
enum Dataset {
    /// ChartX chart_type labels.
    Chartx,
    /// ChartBench type labels.
    Chartbench,
    /// ChartQA-X chart ids such as `two_col_1043`.
    Chartqax,
    /// Labels are category names (`BAR`, `PIE`, ...).
    Generic,
}

impl From<Dataset> for DatasetKind {
    fn from(d: Dataset) -> Self {
        match d {
            Dataset::Chartx => Self::ChartX,
            Dataset::Chartbench => Self::ChartBench,
            Dataset::Chartqax => Self::ChartQaX,
            Dataset::Generic => Self::Generic,
        }
    }
}

/// Stage selection.
#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StageArg {
    Preprocess,
    Perturb,
    Explain,
    Evaluate,
}

impl From<StageArg> for Stage {
    fn from(s: StageArg) -> Self {
        match s {
            StageArg::Preprocess => Self::Preprocess,
            StageArg::Perturb => Self::Perturb,
            StageArg::Explain => Self::Explain,
            StageArg::Evaluate => Self::Evaluate,
        }
    }
}

/// Resize filter selection.
#[derive(Clone, Copy, ValueEnum)]
enum Filter {
    /// Nearest-neighbor (fastest, blocky).
    Nearest,
    /// Bilinear interpolation.
    Triangle,
    /// Bicubic Catmull-Rom.
    CatmullRom,
    /// Gaussian.
    Gaussian,
    /// Lanczos with 3 lobes (sharpest).
    Lanczos3,
}

impl From<Filter> for ResizeFilter {
    fn from(f: Filter) -> Self {
        match f {
            Filter::Nearest => Self::Nearest,
            Filter::Triangle => Self::Triangle,
            Filter::CatmullRom => Self::CatmullRom,
            Filter::Gaussian => Self::Gaussian,
            Filter::Lanczos3 => Self::Lanczos3,
        }
    }
}

/// Build a [`PipelineConfig`] from `run` arguments.
///
/// `--config-json` wins over the individual flags.
fn config_from_args(args: &RunArgs) -> Result<PipelineConfig, String> {
    if let Some(ref json) = args.config_json {
        return serde_json::from_str(json).map_err(|e| format!("error parsing --config-json: {e}"));
    }

    Ok(PipelineConfig {
        normalize: NormalizeConfig {
            target_size: args.target_size,
            resize_filter: args.resize_filter.into(),
            ..NormalizeConfig::default()
        },
        batch_size: args.batch_size,
        failure_budget: args.failure_budget,
    })
}

type Stores = Pipeline<SqliteRecordStore, FsBlobStore>;

fn open(cli: &Cli, config: PipelineConfig) -> Result<Stores, PipelineError> {
    tracing::debug!(db = %cli.db.display(), blobs = %cli.blobs.display(), "opening stores");
    let records = SqliteRecordStore::open(&cli.db)?;
    let blobs = FsBlobStore::open(&cli.blobs)?;
    Pipeline::new(records, blobs, config)
}

/// Exit status for a run-level error: `2` for an exceeded failure
/// budget, `1` otherwise.
const fn exit_status(error: &PipelineError) -> u8 {
    if error.is_budget_exceeded() { 2 } else { 1 }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), PipelineError> {
    let json = serde_json::to_string_pretty(value).map_err(StoreError::from)?;
    println!("{json}");
    Ok(())
}

fn print_summary(summary: &RunSummary, json: bool) -> Result<(), PipelineError> {
    if json {
        return print_json(summary);
    }
    for report in &summary.reports {
        println!("{report}");
    }
    Ok(())
}

fn ingest(cli: &Cli, args: &IngestArgs) -> Result<(), PipelineError> {
    let config = PipelineConfig {
        failure_budget: args.failure_budget,
        ..PipelineConfig::default()
    };
    let mut pipeline = open(cli, config)?;
    if args.clean {
        pipeline.clean()?;
    }
    let mut source = ManifestSource::open(&args.manifest, args.dataset.into())?;
    if let Some(name) = &args.source {
        source = source.with_name(name.clone());
    }
    let report = pipeline.ingest(&mut source, args.limit)?;
    if args.json {
        return print_json(&report);
    }
    println!(
        "ingest     inserted={} failed={} unique_images={}",
        report.inserted, report.failed, report.unique_images
    );
    if !report.unknown_labels.is_empty() {
        println!("unknown chart types: {}", report.unknown_labels.join(", "));
    }
    Ok(())
}

fn run(cli: &Cli, args: &RunArgs) -> Result<(), PipelineError> {
    let config = config_from_args(args).map_err(PipelineError::InvalidConfig)?;
    let mut pipeline = open(cli, config)?;
    if args.clean {
        pipeline.clean()?;
    }
    let stages: Vec<Stage> = args.stages.iter().copied().map(Stage::from).collect();
    match pipeline.run(&stages, args.limit) {
        Ok(summary) => print_summary(&summary, args.json),
        Err(failure) => {
            // Counters first: they say how far the table got.
            print_summary(&failure.summary, args.json)?;
            Err(failure.error)
        }
    }
}

fn verify(cli: &Cli, args: &VerifyArgs) -> Result<bool, PipelineError> {
    let pipeline = open(cli, PipelineConfig::default())?;
    let limit = (!args.all).then_some(args.count);
    let report = pipeline.verify(limit)?;
    if args.json {
        print_json(&report)?;
    } else {
        println!(
            "verify     rows={} preprocessed={} distinct_raw={} distinct_good={} raw_ok={} good_ok={} sharing_violations={} errors={}",
            report.rows,
            report.preprocessed,
            report.distinct_raw,
            report.distinct_good,
            report.raw_ok,
            report.good_ok,
            report.sharing_violations,
            report.errors,
        );
        for detail in &report.details {
            println!("  {detail}");
        }
    }
    Ok(report.is_ok())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init();

    let result = match &cli.command {
        Command::Ingest(args) => ingest(&cli, args),
        Command::Run(args) => run(&cli, args),
        Command::Verify(args) => match verify(&cli, args) {
            Ok(true) => Ok(()),
            Ok(false) => return ExitCode::FAILURE,
            Err(e) => Err(e),
        },
        Command::Clean => open(&cli, PipelineConfig::default())
            .and_then(|mut pipeline| pipeline.clean().map_err(PipelineError::from)),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(exit_status(&e))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn run_args(argv: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Command::Run(args) => args,
            _ => unreachable!("expected the run subcommand"),
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_build_config() {
        let args = run_args(&[
            "chartforge",
            "run",
            "--batch-size",
            "10",
            "--target-size",
            "256",
            "--resize-filter",
            "nearest",
        ]);
        let config = config_from_args(&args).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.normalize.target_size, 256);
        assert_eq!(config.normalize.resize_filter, ResizeFilter::Nearest);
        assert_eq!(config.failure_budget, PipelineConfig::DEFAULT_FAILURE_BUDGET);
    }

    #[test]
    fn config_json_overrides_flags() {
        let args = run_args(&[
            "chartforge",
            "run",
            "--batch-size",
            "10",
            "--config-json",
            r#"{"failure_budget": 3}"#,
        ]);
        let config = config_from_args(&args).unwrap();
        assert_eq!(config.failure_budget, 3);
        assert_eq!(config.batch_size, PipelineConfig::DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn bad_config_json_is_an_error() {
        let args = run_args(&["chartforge", "run", "--config-json", "{"]);
        assert!(config_from_args(&args).is_err());
    }

    #[test]
    fn stages_are_repeatable() {
        let args = run_args(&[
            "chartforge",
            "run",
            "--stage",
            "evaluate",
            "--stage",
            "perturb",
            "-l",
            "5",
        ]);
        let stages: Vec<Stage> = args.stages.iter().copied().map(Stage::from).collect();
        assert_eq!(
            chartforge_pipeline::plan(&stages),
            vec![Stage::Perturb, Stage::Evaluate]
        );
        assert_eq!(args.limit, Some(5));
    }

    #[test]
    fn zero_batch_size_is_refused_by_parser() {
        assert!(Cli::try_parse_from(["chartforge", "run", "--batch-size", "0"]).is_err());
    }

    #[test]
    fn zero_limit_is_refused_by_parser() {
        assert!(Cli::try_parse_from(["chartforge", "run", "-l", "0"]).is_err());
        assert!(
            Cli::try_parse_from([
                "chartforge", "ingest", "--manifest", "m.jsonl", "--dataset", "generic", "-l", "0",
            ])
            .is_err()
        );
    }

    #[test]
    fn verify_accepts_non_default_target_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut png = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(image::RgbImage::from_fn(20, 10, |x, _| {
            if x < 10 {
                image::Rgb([200, 0, 0])
            } else {
                image::Rgb([255, 255, 255])
            }
        }))
        .write_to(&mut png, image::ImageFormat::Png)
        .unwrap();
        std::fs::write(dir.path().join("chart.png"), png.into_inner()).unwrap();
        let manifest = dir.path().join("manifest.jsonl");
        std::fs::write(
            &manifest,
            r#"{"image": "chart.png", "question": "q", "answer": "a", "chart_type": "BAR"}"#,
        )
        .unwrap();

        let db = dir.path().join("s.db");
        let blobs = dir.path().join("blobs");
        let parse = |rest: &[&str]| {
            let mut argv: Vec<String> = vec![
                "chartforge".to_string(),
                "--db".to_string(),
                db.display().to_string(),
                "--blobs".to_string(),
                blobs.display().to_string(),
            ];
            argv.extend(rest.iter().map(ToString::to_string));
            Cli::try_parse_from(argv).unwrap()
        };

        let cli = parse(&[
            "ingest",
            "--manifest",
            manifest.to_str().unwrap(),
            "--dataset",
            "generic",
        ]);
        let Command::Ingest(args) = &cli.command else {
            unreachable!("expected the ingest subcommand");
        };
        ingest(&cli, args).unwrap();

        let cli = parse(&["run", "--stage", "preprocess", "--target-size", "64"]);
        let Command::Run(args) = &cli.command else {
            unreachable!("expected the run subcommand");
        };
        run(&cli, args).unwrap();

        let cli = parse(&["verify", "--all"]);
        let Command::Verify(args) = &cli.command else {
            unreachable!("expected the verify subcommand");
        };
        assert!(verify(&cli, args).unwrap());
    }

    #[test]
    fn verify_count_conflicts_with_all() {
        assert!(
            Cli::try_parse_from(["chartforge", "verify", "--count", "5", "--all"]).is_err()
        );
    }

    #[test]
    fn global_paths_follow_subcommand() {
        let cli =
            Cli::try_parse_from(["chartforge", "clean", "--db", "x.db", "--blobs", "b"]).unwrap();
        assert_eq!(cli.db, PathBuf::from("x.db"));
        assert_eq!(cli.blobs, PathBuf::from("b"));
    }

    #[test]
    fn run_against_temp_stores() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli::try_parse_from([
            "chartforge",
            "--db",
            dir.path().join("s.db").to_str().unwrap(),
            "--blobs",
            dir.path().join("blobs").to_str().unwrap(),
            "run",
        ])
        .unwrap();
        let Command::Run(args) = &cli.command else {
            unreachable!("expected the run subcommand");
        };
        run(&cli, args).unwrap();
        let pipeline = open(&cli, PipelineConfig::default()).unwrap();
        assert_eq!(pipeline.verify(None).unwrap().rows, 0);
    }

    #[test]
    fn budget_errors_exit_with_two() {
        let err = PipelineError::FailureBudgetExceeded {
            stage: Stage::Perturb,
            skipped: 5,
            budget: 4,
        };
        assert_eq!(exit_status(&err), 2);
        assert_eq!(
            exit_status(&PipelineError::InvalidConfig("x".to_string())),
            1
        );
    }
}
