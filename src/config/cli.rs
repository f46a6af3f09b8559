//! CLI argument parsing and validation
//!
//! # Usage
//!
//! ```bash
//! vuelta simulate loop.yaml
//! vuelta simulate loop.yaml --epochs 3 --max-steps 40 --json
//! vuelta validate loop.yaml
//! vuelta info loop.yaml --format yaml
//! ```

use super::schema::LoopSpec;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Vuelta: epoch-level training loop orchestration
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "vuelta")]
#[command(version)]
#[command(about = "Run, validate and inspect epoch-level training loop configurations")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Drive the loop with a simulated model
    Simulate(SimulateArgs),

    /// Validate a configuration file without running it
    Validate(ValidateArgs),

    /// Display information about a configuration
    Info(InfoArgs),
}

/// Arguments for the simulate command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct SimulateArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Override max_epochs
    #[arg(short, long)]
    pub epochs: Option<usize>,

    /// Override max_steps
    #[arg(long)]
    pub max_steps: Option<usize>,

    /// Override the simulation seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Override the metrics file
    #[arg(long)]
    pub metrics_path: Option<PathBuf>,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the validate command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct ValidateArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Show detailed validation report
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for the info command
#[derive(Parser, Debug, Clone, PartialEq)]
pub struct InfoArgs {
    /// Path to YAML configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Output format (text, json, yaml)
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Output format for info command
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "yaml" => Ok(OutputFormat::Yaml),
            _ => Err(format!(
                "Unknown output format: {}. Valid formats: text, json, yaml",
                s
            )),
        }
    }
}

/// Parse CLI arguments from an iterator (for testing)
pub fn parse_args<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}

/// Apply command-line overrides to a LoopSpec
pub fn apply_overrides(spec: &mut LoopSpec, args: &SimulateArgs) {
    if let Some(epochs) = args.epochs {
        spec.trainer.max_epochs = epochs;
        spec.trainer.min_epochs = spec.trainer.min_epochs.min(epochs);
    }
    if let Some(max_steps) = args.max_steps {
        spec.trainer.max_steps = Some(max_steps);
    }
    if let Some(seed) = args.seed {
        spec.simulation.model.seed = seed;
    }
    if let Some(path) = &args.metrics_path {
        spec.logging.metrics_path = Some(path.clone());
    }
}
