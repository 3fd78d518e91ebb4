//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::scenarios::Suite;

#[derive(Parser, Debug)]
#[command(name = "settle")]
#[command(about = "Settle - convergence verification for self-healing clusters", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file, instead of .settle/config.yaml
    #[arg(short, long, global = true, env = "SETTLE_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run verification scenarios against the current cluster
    Run(RunArgs),

    /// List available scenarios
    List {
        /// Only scenarios of these suites
        #[arg(value_enum)]
        suites: Vec<Suite>,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Suites to run; all suites when omitted
    #[arg(value_enum)]
    pub suites: Vec<Suite>,

    /// Only run scenarios whose name contains this text
    #[arg(short, long)]
    pub scenario: Option<String>,

    /// Override every wait's timeout, in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,
}
