//! CLI command definitions

use crate::execution::RunOverrides;
use clap::Args;
use std::time::Duration;

/// Run one or more harness definitions
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to a harness YAML file (repeatable)
    #[arg(short, long, required = true)]
    pub file: Vec<String>,

    /// Configuration value overrides (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub value: Vec<(String, String)>,

    /// Delay between component launches, overriding the definition
    #[arg(long)]
    pub stagger_ms: Option<u64>,

    /// Bound on waiting for each test to settle, overriding the definition
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Don't echo component output
    #[arg(short, long)]
    pub quiet: bool,

    /// Print the suite report as JSON
    #[arg(long)]
    pub json: bool,
}

impl RunCommand {
    pub fn overrides(&self) -> RunOverrides {
        RunOverrides {
            stagger: self.stagger_ms.map(Duration::from_millis),
            wait_timeout: self.timeout_secs.map(Duration::from_secs),
            values: self.value.clone(),
            quiet: self.quiet,
        }
    }
}

/// Validate harness definitions
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to a harness YAML file (repeatable)
    #[arg(short, long, required = true)]
    pub file: Vec<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List the component presets available to a definition
#[derive(Debug, Args, Clone)]
pub struct PresetsCommand {
    /// Harness YAML file whose local presets are included
    #[arg(short, long)]
    pub file: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
