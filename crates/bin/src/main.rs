//! Strata CLI binary.
//!
//! Builds correlation tables and runs the delta reconciliation over CSV files.

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use strata::smoothing::PartitionHook;
use strata::table::{read_correlation_csv, read_csv, write_correlation_csv};
use strata::{
    CorrelationMode, MetricConfig, Pipeline, PipelineConfig, ProgressHook, similarity_check,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Strata: correlation-aware smoothing of survey cuts", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the repaired category correlation table from a panel
    Correlation {
        /// Long-form panel CSV
        #[arg(long)]
        input: PathBuf,

        /// Metric whose national series drive the correlation
        #[arg(long)]
        metric: String,

        /// Pipeline configuration (JSON); defaults are used when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output CSV
        #[arg(long)]
        output: PathBuf,
    },

    /// Smooth and reconcile every configured metric
    Reconcile {
        /// Long-form panel CSV
        #[arg(long)]
        input: PathBuf,

        /// Correlation table CSV written by `strata correlation`
        #[arg(long)]
        correlation: PathBuf,

        /// Pipeline configuration (JSON)
        #[arg(long)]
        config: PathBuf,

        /// Output directory; one `<METRIC>.csv` per metric
        #[arg(long)]
        output: PathBuf,

        /// Report series whose smoothed mean drifts from the raw mean by more
        /// than this relative threshold
        #[arg(long)]
        check: Option<f64>,

        /// Hide the progress bar
        #[arg(long)]
        quiet: bool,
    },
}

fn main() {
    init_tracing();
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Correlation {
            input,
            metric,
            config,
            output,
        } => build_correlation(&input, &metric, config.as_deref(), &output)?,
        Commands::Reconcile {
            input,
            correlation,
            config,
            output,
            check,
            quiet,
        } => reconcile(&input, &correlation, &config, &output, check, quiet)?,
    }

    Ok(())
}

fn build_correlation(
    input: &Path,
    metric: &str,
    config: Option<&Path>,
    output: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = match config {
        Some(path) => PipelineConfig::from_path(path)?,
        None => PipelineConfig {
            metrics: vec![MetricConfig::new(metric)],
            ..PipelineConfig::default()
        },
    };
    let pipeline = Pipeline::new(config)?;

    let frame = read_csv(BufReader::new(File::open(input)?))?;
    let matrix = pipeline.build_correlation(&frame, metric)?;

    let category_col = &pipeline.config().columns.category;
    write_correlation_csv(&matrix, category_col, BufWriter::new(File::create(output)?))?;
    info!(
        categories = matrix.len(),
        output = %output.display(),
        "wrote correlation table"
    );
    Ok(())
}

fn reconcile(
    input: &Path,
    correlation: &Path,
    config: &Path,
    output: &Path,
    check: Option<f64>,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = Pipeline::new(PipelineConfig::from_path(config)?)?;
    let columns = &pipeline.config().columns;

    let frame = read_csv(BufReader::new(File::open(input)?))?;
    let matrix = read_correlation_csv(BufReader::new(File::open(correlation)?), &columns.category)?;
    info!(
        rows = frame.height(),
        categories = matrix.len(),
        "loaded inputs"
    );

    let planned = pipeline.planned_partitions(&frame)?;
    let pb = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(planned as u64)
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("█▓░"),
    );
    pb.set_message("Smoothing partitions...");

    let reporter = pb.clone();
    let progress = ProgressHook::new(planned)
        .with_reporter(move |completed, _total| reporter.set_position(completed as u64));
    let hooks: Vec<Arc<dyn PartitionHook>> = vec![Arc::new(progress)];

    let tables = match pipeline.run(&frame, Arc::new(matrix), &hooks) {
        Ok(tables) => {
            pb.finish_with_message("Done");
            tables
        }
        Err(e) => {
            pb.finish_with_message("Failed!");
            return Err(e.into());
        }
    };

    fs::create_dir_all(output)?;
    for table in &tables {
        let path = output.join(format!("{}.csv", table.metric()));
        table.write_csv(columns, BufWriter::new(File::create(&path)?))?;
        info!(metric = table.metric(), rows = table.len(), path = %path.display(), "wrote output");

        if let Some(threshold) = check {
            if !table.variants().contains(&CorrelationMode::Correlated) {
                warn!(metric = table.metric(), "no correlated variant to check");
                continue;
            }
            let report = similarity_check(table, CorrelationMode::Correlated, threshold);
            for group in report.flagged_groups().take(10) {
                warn!(
                    metric = table.metric(),
                    cut = %group.cut,
                    dimensions = ?group.dimensions,
                    category = group.category,
                    raw_mean = group.raw_mean,
                    smoothed_mean = group.smoothed_mean,
                    "smoothed mean drifts from raw mean by {:.1}%",
                    group.relative_delta * 100.0
                );
            }
        }
    }

    Ok(())
}
