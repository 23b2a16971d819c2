//! cohort CLI: train segmentation models, segment record files, serve
//! single inferences.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;

use cohort::store::FeatureSource;
use cohort::{
    train_models, Algorithm, CohortConfig, FsModelStore, JsonFeatureSource, SegmentationContext,
    SegmentationService, Strategy, StrategyConfig,
};

#[derive(Parser)]
#[command(name = "cohort", version, about = "Audience segmentation")]
struct Cli {
    /// TOML configuration file; defaults apply when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model directory, overriding `[store] model_dir`.
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit preprocessor, reducer, strategy and profiles from a JSON record file.
    Train {
        /// JSON array of record objects.
        #[arg(long)]
        records: PathBuf,

        /// Field holding the record id.
        #[arg(long, default_value = "id")]
        id_field: String,
    },

    /// Segment a JSON record file and print metrics and profiles.
    Segment {
        /// JSON array of record objects.
        #[arg(long)]
        records: PathBuf,

        /// kmeans, hierarchical or dbscan.
        #[arg(long)]
        algorithm: Option<Algorithm>,

        /// Target segment count (ignored by dbscan).
        #[arg(long)]
        k: Option<usize>,

        /// Field holding the record id.
        #[arg(long, default_value = "id")]
        id_field: String,

        /// Also save the fitted context to this file.
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Assign one free-text item to a segment.
    Infer {
        /// Item text.
        text: String,
    },

    /// Print component health.
    Health,
}

#[derive(Serialize)]
struct SegmentOutput<'a> {
    metrics: &'a cohort::EvaluationMetrics,
    profiles: &'a std::collections::BTreeMap<cohort::SegmentLabel, cohort::SegmentProfile>,
}

fn print_json<T: Serialize>(value: &T) -> cohort::Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| cohort::Error::Serialization {
        field: "output".to_string(),
        message: e.to_string(),
    })?;
    println!("{json}");
    Ok(())
}

fn run(cli: Cli) -> cohort::Result<ExitCode> {
    let mut config = CohortConfig::load_or_default(cli.config.as_deref())?;
    if let Some(dir) = cli.model_dir {
        config.store.model_dir = dir;
    }

    match cli.command {
        Commands::Train { records, id_field } => {
            let records = JsonFeatureSource::new(records).with_id_field(id_field).fetch()?;
            let store = FsModelStore::new(&config.store.model_dir);
            let summary = train_models(&records, &config, &store)?;
            print_json(&summary)?;
        }

        Commands::Segment {
            records,
            algorithm,
            k,
            id_field,
            save,
        } => {
            let records = JsonFeatureSource::new(records).with_id_field(id_field).fetch()?;
            let strategy_config = StrategyConfig {
                algorithm: algorithm.unwrap_or(config.strategy.algorithm),
                ..config.strategy.clone()
            };
            let k = k.unwrap_or(strategy_config.n_segments);
            let mut context = SegmentationContext::with_strategy(Strategy::from_config(&strategy_config));
            let run = context.run_segmentation(&records, k)?;
            print_json(&SegmentOutput {
                metrics: &run.metrics,
                profiles: &run.profiles,
            })?;
            if let Some(path) = save {
                context.save_model(&path)?;
            }
        }

        Commands::Infer { text } => {
            let service = SegmentationService::start(config);
            print_json(&service.infer(&text)?)?;
        }

        Commands::Health => {
            let service = SegmentationService::start(config);
            let report = service.health();
            print_json(&report)?;
            if !report.is_healthy() {
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
