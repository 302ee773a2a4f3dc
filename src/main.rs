use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod evaluate;
mod evaluators;
mod flow;
mod models;
mod output;
mod pipeline;
mod project;
mod scoring;
mod transform;

use crate::config::{EnvConfig, Settings};
use crate::output::OutputFormat;
use crate::pipeline::Pipeline;

/// Question-answering quality evaluation - run the flow over the test dataset,
/// score the answers and upload the report to the project
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Optional TOML settings file overriding paths and service endpoints
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Output format: plain or json
    #[arg(short, long, default_value = "plain")]
    output: OutputFormat,

    /// Verbose output - log each request at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let settings = match &args.settings {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };
    let env = EnvConfig::from_env();
    info!(prefix = %env.prefix, "Starting quality evaluation");

    let outcome = Pipeline::new(env, settings)
        .run()
        .await
        .context("Quality evaluation failed")?;

    info!(
        run = %outcome.run.name,
        written = outcome.transform.written,
        skipped = outcome.transform.skipped_failed,
        file_id = %outcome.uploaded.id,
        "Quality evaluation finished"
    );
    output::print_report(&outcome.report, args.output);

    Ok(())
}
