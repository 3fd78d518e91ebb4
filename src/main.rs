//! Settle CLI entry point.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use settle::cli::{commands, handle_error, Cli, Commands};
use settle::infrastructure::config::ConfigLoader;
use settle::infrastructure::logging::LoggerImpl;

async fn run(cli: Cli) -> Result<bool> {
    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    let _logger = LoggerImpl::init(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Run(args) => commands::run::execute(args, config, cli.json).await,
        Commands::List { suites } => {
            commands::list::execute(&suites, cli.json);
            Ok(true)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let json = cli.json;

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            handle_error(&err, json);
            ExitCode::from(2)
        }
    }
}
