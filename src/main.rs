use std::path::PathBuf;

use clap::Parser;
use framefit::{config::ResolvedPipeline, FrameFitError, PipelineConfig};
use tracing_subscriber::EnvFilter;

/// Estimate and apply reference frame transformations described by a JSON pipeline.
#[derive(Debug, Parser)]
#[command(author, version, about = "Reference frame transformation pipeline")]
struct Args {
    /// Path to the JSON pipeline description.
    config: PathBuf,

    /// Print presenter output as a single JSON object instead of text.
    #[arg(long)]
    json: bool,

    /// Log progress to stderr. `RUST_LOG` takes precedence when set.
    #[arg(short, long)]
    verbose: bool,
}

fn render(resolved: &ResolvedPipeline, json: bool) -> Result<String, FrameFitError> {
    if json {
        let mut output = serde_json::Map::new();
        for presenter in &resolved.presenters {
            let value: serde_json::Value = serde_json::from_str(&presenter.as_json()?)?;
            output.insert(presenter.name().to_string(), value);
        }
        return Ok(serde_json::to_string_pretty(&output)?);
    }

    Ok(resolved
        .presenters
        .iter()
        .map(|p| format!("== {} ==\n{}", p.name(), p.as_text()))
        .collect::<Vec<_>>()
        .join("\n\n"))
}

fn run_from_file(args: &Args) -> Result<String, FrameFitError> {
    let config = PipelineConfig::from_file(&args.config)?;
    let base_dir = args.config.parent();

    let mut resolved = config.resolve(base_dir)?;
    resolved.execute()?;
    render(&resolved, args.json)
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run_from_file(&args) {
        Ok(output) => println!("{output}"),
        Err(err) => {
            eprintln!("error: {err}");
            let root = err.root_cause();
            if root.to_string() != err.to_string() {
                eprintln!("caused by: {root}");
            }
            std::process::exit(1);
        }
    }
}
