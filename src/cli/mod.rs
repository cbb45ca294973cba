//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{PresetsCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Integration test harness for multi-process pipelines
#[derive(Debug, Parser, Clone)]
#[command(name = "harness")]
#[command(version = "0.1.0")]
#[command(about = "Runs multi-process pipeline tests from YAML definitions", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run harness definitions as a suite
    Run(RunCommand),

    /// Validate harness definitions
    Validate(ValidateCommand),

    /// List available component presets
    Presets(PresetsCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
