//! `demand-forecast` command-line entry point.
//!
//! Every subcommand prints exactly one JSON line to stdout as its last
//! output; diagnostics go to stderr.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::error::ErrorKind as ClapErrorKind;
use clap::{Parser, Subcommand};

use demand_forecast::{
    init_tracing, preprocess, run_stage, ErrorKind, ForecastConfig, ForecastResult, ModelTrainer,
    PredictionEngine, PredictionRequest, StageReport,
};

#[derive(Parser, Debug)]
#[command(name = "demand-forecast", version, about = "Retail demand forecasting pipeline")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory that relative data/model paths are resolved against
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Debug-level diagnostics on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reshape and join the raw tables into the long table
    Preprocess {
        /// Load at most N products
        #[arg(long, value_name = "N", conflicts_with = "all_products")]
        max_products: Option<usize>,

        /// Load every product
        #[arg(long)]
        all_products: bool,
    },
    /// Train the model on the long table
    Train,
    /// Forecast demand; REQUEST is a JSON object with optional
    /// category, store, start_date and end_date
    Predict {
        #[arg(value_name = "REQUEST")]
        request: Option<String>,
    },
}

impl Cli {
    fn load_config(&self) -> ForecastResult<ForecastConfig> {
        let config = match &self.config {
            Some(path) => ForecastConfig::from_toml_file(path)?,
            None => ForecastConfig::default(),
        };
        Ok(match &self.base_dir {
            Some(dir) => config.with_base_dir(dir),
            None => config,
        })
    }
}

fn main() -> Result<()> {
    let line = match Cli::try_parse() {
        Ok(cli) => {
            init_tracing(cli.verbose);
            run_command(&cli)
        }
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => err.exit(),
            _ => usage_error_line(&err),
        },
    };

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", line)?;
    stdout.flush()?;
    Ok(())
}

/// Report an unusable command line the same way as a failed stage.
fn usage_error_line(err: &clap::Error) -> String {
    let report: StageReport<()> = StageReport::Error {
        message: format!("Invalid arguments: {}", err.render().to_string().trim()),
        kind: ErrorKind::Other,
    };
    report.to_json_line()
}

fn run_command(cli: &Cli) -> String {
    match &cli.command {
        Command::Preprocess {
            max_products,
            all_products,
        } => {
            let cap = if *all_products {
                Some(None)
            } else {
                max_products.map(Some)
            };
            run_stage("Preprocessing", || preprocess(&cli.load_config()?, cap)).to_json_line()
        }
        Command::Train => run_stage("Training", || {
            let config = cli.load_config()?;
            ModelTrainer::new(&config).train()
        })
        .to_json_line(),
        Command::Predict { request } => run_stage("Prediction", || {
            let config = cli.load_config()?;
            let request = match request {
                Some(text) => PredictionRequest::from_json(text)?,
                None => PredictionRequest::builtin_default(&config.prediction),
            };
            PredictionEngine::new(&config).predict(&request)
        })
        .to_json_line(),
    }
}
