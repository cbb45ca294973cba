//! CLI output formatting

use crate::component::{CommandTemplate, ComponentDescriptor};
use crate::execution::{HarnessEvent, SuiteReport, TestOutcome};
use console::Emoji;
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

const DIVIDER_WIDTH: usize = 60;

/// Horizontal rule between report sections
pub fn divider() -> String {
    style("─".repeat(DIVIDER_WIDTH)).dim().to_string()
}

/// Format a duration for display
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{:.1}s", duration.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Format a harness event for display
pub fn format_harness_event(event: &HarnessEvent) -> Option<String> {
    match event {
        HarnessEvent::RunStarted {
            run_id,
            name,
            components,
        } => Some(format!(
            "{} Starting test {} ({} components, {})",
            ROCKET,
            style(name).bold(),
            components,
            style(&run_id.to_string()[..8]).dim()
        )),
        HarnessEvent::ComponentStarted { id, description } => Some(format!(
            "{} [{}] {}",
            SPINNER,
            style(id).cyan(),
            style(description).dim()
        )),
        HarnessEvent::ComponentFinished { id } => {
            Some(format!("{} [{}] finished", CHECK, style(id).green()))
        }
        HarnessEvent::ComponentFailed { id, error } => Some(format!(
            "{} [{}] {}",
            CROSS,
            style(id).red(),
            style(error).dim()
        )),
        HarnessEvent::VerificationFinished { error: None } => {
            Some(format!("{} Verification passed", CHECK))
        }
        HarnessEvent::VerificationFinished { error: Some(error) } => Some(format!(
            "{} Verification failed: {}",
            CROSS,
            style(error).red()
        )),
        HarnessEvent::TeardownStarted => Some(format!("{} Tearing down", INFO)),
        HarnessEvent::ComponentTerminated { .. } => None,
        HarnessEvent::RunFinished { error: None, .. } => None,
        HarnessEvent::RunFinished {
            error: Some(error), ..
        } => Some(format!("{} {}", WARN, style(error).yellow())),
    }
}

/// Format the end-of-suite summary
pub fn format_suite_report(report: &SuiteReport) -> String {
    let mut lines = vec![divider(), style("Test summary").bold().to_string(), divider()];

    for result in &report.results {
        let line = match &result.outcome {
            TestOutcome::Passed {
                duration,
                completion,
            } => format!(
                "{} {} {} ({})",
                CHECK,
                style(&result.name).green(),
                style(format_duration(*duration)).dim(),
                completion
            ),
            TestOutcome::Skipped { reason } => format!(
                "{} {} {}",
                SKIP,
                style(&result.name).dim(),
                style(reason).dim()
            ),
            TestOutcome::Failed { duration, error } => format!(
                "{} {} {}\n    {}",
                CROSS,
                style(&result.name).red(),
                style(format_duration(*duration)).dim(),
                style(error).red()
            ),
        };
        lines.push(line);
    }

    lines.push(divider());
    lines.push(format!(
        "{} passed, {} skipped, {} failed in {}",
        style(report.passed()).green(),
        style(report.skipped()).dim(),
        style(report.failed()).red(),
        format_duration(report.duration)
    ));
    lines.join("\n")
}

fn format_command(command: &CommandTemplate) -> String {
    match command {
        CommandTemplate::Line(line) => line.clone(),
        CommandTemplate::Args(args) => args.join(" "),
    }
}

/// Format a preset for the `presets` listing
pub fn format_preset(name: &str, descriptor: &ComponentDescriptor) -> String {
    let mut text = format!(
        "  {}  {}",
        style(name).bold(),
        style(format_command(&descriptor.command)).dim()
    );
    if !descriptor.required_keys.is_empty() {
        text.push_str(&format!(
            "\n      requires: {}",
            style(descriptor.required_keys.join(", ")).cyan()
        ));
    }
    if !descriptor.teardown.is_empty() {
        let teardown: Vec<String> = descriptor.teardown.iter().map(format_command).collect();
        text.push_str(&format!("\n      teardown: {}", teardown.join("; ")));
    }
    text
}
