//! Patent Value - event-study valuation of patent grants.
//!
//! Reads a CSV of patent events with firm returns, volatility and market
//! capitalization, values each event, and writes one row per firm-day.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use patent_common::config::{config_path, Config};
use patent_common::logging::init_logging;
use patent_common::{Error, ResultExt};
use patent_value::report::render_run;
use patent_value::{Pipeline, PipelineOptions};

/// Estimate patent values from stock-market reactions to patent grants.
#[derive(Parser, Debug)]
#[command(name = "patent-value")]
#[command(version)]
#[command(about = "Estimate patent values from stock-market reactions to patent grants.", long_about = None)]
struct Cli {
    /// Input CSV with Stkcd, date, ret_d0, ret_d1, ret_d2, vol, mkcap
    input: PathBuf,

    /// Output CSV for firm-day results
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Signal-to-noise parameter of the valuation model
    #[arg(short, long)]
    gamma: Option<f64>,

    /// Configuration file (default: ~/.patent-value/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Do not print table previews
    #[arg(short, long)]
    quiet: bool,
}

/// File the configuration is read from.
fn config_source(cli: &Cli) -> PathBuf {
    cli.config.clone().unwrap_or_else(config_path)
}

fn load_config(cli: &Cli) -> patent_common::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .map_err(|e| Error::Config(format!("{e:#}")))?;

    config
        .apply_env_overrides()
        .map_err(|e| Error::Config(format!("{e:#}")))?;

    if let Some(gamma) = cli.gamma {
        config.valuation.gamma = gamma;
    }
    if let Some(output) = &cli.output {
        config.output.path = output.clone();
    }

    config
        .validate()
        .map_err(|e| Error::Config(e.to_string()))?;
    Ok(config)
}

fn run(cli: Cli) -> patent_common::Result<()> {
    let config = load_config(&cli)?;

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );
    tracing::info!("Patent Value v{}", env!("CARGO_PKG_VERSION"));

    // Config loading runs before a subscriber exists, so report it here.
    let source = config_source(&cli);
    if source.exists() {
        tracing::info!(path = %source.display(), "Configuration loaded");
    } else {
        tracing::info!(path = %source.display(), "Config file not found, using defaults");
    }
    if let Ok(effective) = serde_json::to_string(&config) {
        tracing::debug!(config = %effective, "Effective configuration");
    }

    let pipeline = Pipeline::new(PipelineOptions::from(&config)).context("configuring pipeline")?;
    let run = pipeline
        .run_files(&cli.input, &config.output.path)
        .context(format!("processing {}", cli.input.display()))?;

    if !cli.quiet {
        println!("{}", render_run(&run, config.output.preview_rows));
        println!("Results saved to: {}", config.output.path.display());
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Run failed");
            eprintln!("error: {e}");
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}
