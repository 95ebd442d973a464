mod cli;
mod config;
mod run;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use ripple_core::config::{load_dotenv, LogFormat};
use ripple_core::Config;
use tracing_subscriber::EnvFilter;

use crate::cli::{CliArgs, Command};
use crate::config::PipelineFile;

fn load_config(args: &CliArgs) -> Config {
    load_dotenv();
    match &args.profile {
        Some(profile) => Config::for_profile(profile),
        None => Config::from_env(),
    }
}

fn init_tracing(config: &Config, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json || config.log.format == LogFormat::Json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config = load_config(&args);
    init_tracing(&config, args.json_logs);
    config.log_summary();

    match args.command {
        Command::Check { sql, schema_only } => run::check(&sql, schema_only),
        Command::Run {
            pipeline,
            workers,
            metrics_interval,
        } => {
            let mut file = PipelineFile::load(&pipeline)?;
            if workers.is_some() {
                file.workers = workers;
            }
            run::run(config, file, Duration::from_secs(metrics_interval)).await
        }
    }
}
