use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Kalmar state-space estimation engine.
#[derive(Parser)]
#[command(
    name = "kalmar",
    version,
    about = "Kalman, adaptive, ensemble and particle filtering of price series"
)]
pub struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Fit every configured filter to a series and write a JSON report.
    Analyze(AnalyzeArgs),
}

/// Arguments for the `analyze` subcommand.
#[derive(clap::Args)]
pub struct AnalyzeArgs {
    /// Path to TOML configuration file; built-in defaults if omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Path to the input series (JSON array or {"values", "timestamps"}).
    #[arg(short, long)]
    pub input: PathBuf,

    /// Path for the JSON report; defaults to <input>.report.json.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Override the RNG seed from config.
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Override the forecast horizon from config.
    #[arg(long)]
    pub horizon: Option<usize>,
}
