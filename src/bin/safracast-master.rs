//! Stage 04: join the processed tables into the three master datasets.

use std::path::PathBuf;

use safracast::logging;
use safracast::pipeline;
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
    pipeline::run_master(&settings).map_err(|err| err.to_string())
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
            "--help" | "-h" => return Err(usage()),
            other => return Err(format!("Unknown argument: {other}\n{}", usage())),
        }
    }
    Ok(options)
}

fn usage() -> String {
    "Usage: safracast-master [--config <settings.toml>]".to_string()
}
