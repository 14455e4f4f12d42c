//! Stage 06: train and evaluate the hybrid model per granularity.
//!
//! With `--all`, the earlier stages run first so a fresh checkout can go
//! from raw CSVs to metrics in one command.

use std::path::PathBuf;

use safracast::logging;
use safracast::pipeline::{self, GranularityOutcome};
use safracast::settings::PipelineSettings;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    let settings = load_settings(options.config.as_deref())?;
    if let Err(err) = logging::init(&settings.paths.results_dir) {
        eprintln!("Logging disabled: {err}");
    }

    let summary = if options.all_stages {
        pipeline::run_all(&settings).map_err(|err| err.to_string())?
    } else {
        pipeline::run_train(&settings).map_err(|err| err.to_string())?
    };

    for (granularity, outcome) in &summary.entries {
        match outcome {
            GranularityOutcome::Completed(metrics) => println!(
                "hibrido_{:<7} | R²: {:.4} | RMSE: {:.4} sc/ha",
                granularity.as_str(),
                metrics.r2,
                metrics.rmse
            ),
            GranularityOutcome::Skipped(reason) => println!(
                "hibrido_{:<7} | skipped: {reason}",
                granularity.as_str()
            ),
        }
    }
    Ok(())
}

fn load_settings(config: Option<&std::path::Path>) -> Result<PipelineSettings, String> {
    match config {
        Some(path) => PipelineSettings::load(path).map_err(|err| err.to_string()),
        None => Ok(PipelineSettings::default()),
    }
}

#[derive(Debug, Clone, Default)]
struct CliOptions {
    config: Option<PathBuf>,
    all_stages: bool,
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut options = CliOptions::default();
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let value = iter.next().ok_or("--config requires a path")?;
                options.config = Some(PathBuf::from(value));
            }
            "--all" => options.all_stages = true,
            "--help" | "-h" => return Err(usage()),
            other => return Err(format!("Unknown argument: {other}\n{}", usage())),
        }
    }
    Ok(options)
}

fn usage() -> String {
    "Usage: safracast-train [--config <settings.toml>] [--all]\n\
     \n\
     --all  run prepare, master and feature stages before training"
        .to_string()
}
