use anyhow::{Context, Result};
use harness::cli::commands::{PresetsCommand, RunCommand, ValidateCommand};
use harness::cli::output::*;
use harness::cli::{Cli, Command};
use harness::core::config::HarnessConfig;
use harness::component::PresetRegistry;
use harness::execution::TestSuite;
use tracing::{error, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_suite(cmd).await?,
        Command::Validate(cmd) => validate_definitions(cmd)?,
        Command::Presets(cmd) => list_presets(cmd)?,
    }

    Ok(())
}

async fn run_suite(cmd: &RunCommand) -> Result<()> {
    let mut definitions = Vec::with_capacity(cmd.file.len());
    for file in &cmd.file {
        let config = HarnessConfig::from_file(file)
            .with_context(|| format!("Failed to load harness definition {}", file))?;
        println!("{} Loaded test: {}", INFO, style(&config.name).bold());
        definitions.push(config);
    }

    let mut suite = TestSuite::new(definitions, cmd.overrides());
    suite.add_event_handler(|event| {
        if let Some(line) = format_harness_event(event) {
            println!("{}", line);
        }
    });

    // Ctrl-C interrupts the current test; it still tears down before returning
    let interrupt = suite.interrupt_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, tearing down");
            interrupt.interrupt();
        }
    });

    println!();
    let report = suite.run().await;

    println!("\n{}", format_suite_report(&report));
    if cmd.json {
        println!("\n{}", serde_json::to_string_pretty(&report)?);
    }

    if !report.is_success() {
        error!("{} of {} tests failed", report.failed(), report.results.len());
        std::process::exit(1);
    }

    Ok(())
}

fn validate_definitions(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating harness definitions...", INFO);

    let mut failed = false;
    for file in &cmd.file {
        match HarnessConfig::from_file(file) {
            Ok(config) => {
                println!("{} {} is valid", CHECK, style(file).bold());
                println!("  Name: {}", style(&config.name).bold());
                println!("  Components: {}", style(config.components.len()).cyan());
                println!("  Values: {}", style(config.get_values().len()).cyan());
                if !config.runs_on_this_platform() {
                    println!(
                        "  {} Skipped on {} (platforms: {})",
                        WARN,
                        std::env::consts::OS,
                        config.platforms.join(", ")
                    );
                }

                if cmd.json {
                    let json = serde_json::to_string_pretty(&config)?;
                    println!("\n{}", json);
                }
            }
            Err(e) => {
                failed = true;
                println!("{} {} failed validation:", CROSS, style(file).bold());
                println!("  {}", style(format!("{:#}", e)).red());
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn list_presets(cmd: &PresetsCommand) -> Result<()> {
    let registry = match &cmd.file {
        Some(file) => HarnessConfig::from_file(file)
            .with_context(|| format!("Failed to load harness definition {}", file))?
            .preset_registry(),
        None => PresetRegistry::with_builtins(),
    };

    if cmd.json {
        let presets: serde_json::Map<String, serde_json::Value> = registry
            .iter()
            .map(|(name, descriptor)| Ok((name.to_string(), serde_json::to_value(descriptor)?)))
            .collect::<Result<_>>()?;
        println!("{}", serde_json::to_string_pretty(&presets)?);
        return Ok(());
    }

    println!("{} Available presets:", INFO);
    for (name, descriptor) in registry.iter() {
        println!("{}", format_preset(name, descriptor));
    }
    Ok(())
}
