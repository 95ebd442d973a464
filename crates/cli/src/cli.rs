use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Incremental SQL pipelines over streaming connectors.
///
/// `check` compiles a program without running it; `run` starts a pipeline
/// described by a TOML file and keeps it running until interrupted.
#[derive(Parser, Debug)]
#[command(name = "ripple", version, about = "Incremental SQL pipelines over streaming connectors")]
pub struct CliArgs {
    /// Configuration profile; keys are looked up as {PROFILE}_{KEY} first
    #[arg(long, env = "RIPPLE_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Emit logs as JSON lines (overrides RIPPLE_LOG_FORMAT)
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a SQL program and print its schema and plan as JSON
    Check {
        /// File holding CREATE TABLE / CREATE VIEW statements
        sql: PathBuf,

        /// Print only the schema
        #[arg(long)]
        schema_only: bool,
    },

    /// Run a pipeline file until Ctrl-C, then print its final metrics
    Run {
        /// Pipeline description (TOML)
        pipeline: PathBuf,

        /// Parallelism override for this run
        #[arg(long)]
        workers: Option<usize>,

        /// Seconds between metrics log lines
        #[arg(long, env = "RIPPLE_METRICS_INTERVAL_SECS", default_value = "30")]
        metrics_interval: u64,
    },
}
