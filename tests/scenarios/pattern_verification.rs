//! Test: output-driven verification with pattern countdowns

use crate::helpers::*;
use harness::core::{Completion, HarnessError};
use harness::execution::{LinePattern, PatternCountdown};
use harness::PipelineComponent;
use std::sync::Arc;
use std::time::Duration;

/// A player printing frame rates; the run passes once three are above threshold
#[tokio::test]
async fn test_countdown_on_frame_rate_lines() {
    let player = shell(
        "player",
        r#"echo "FPS: i1: 0.0"; for i in 1 2 3; do printf 'FPS: i1: \033[32m25.0\033[0m\n'; sleep 0.05; done; exec sleep 5"#,
    );
    let countdown = PatternCountdown::attach(
        player.output(),
        LinePattern::regex(r"FPS: i1:\s*([0-9.]+)", Some(0.5))
            .unwrap()
            .strip_colors(true),
        3,
        Duration::from_secs(5),
    );

    let mut orchestrator = orchestrator("frame rate");
    orchestrator.add_component(player.clone() as Arc<dyn PipelineComponent>);
    orchestrator.set_verification(countdown);

    let result = run_orchestrator(&orchestrator).await;

    assert_run_succeeded(&result);
    assert_eq!(result.outcome.unwrap().completion, Completion::Verified);
    assert!(player.runner().unwrap().was_terminated_proactively());
}

/// Lines from both streams reach the combined output bus
#[tokio::test]
async fn test_countdown_counts_stderr_lines() {
    let probe = shell(
        "probe",
        "echo 'videotimestamp-i1: 1' 1>&2; echo 'videotimestamp-i1: 2'; exec sleep 5",
    );
    let countdown = PatternCountdown::attach(
        probe.output(),
        LinePattern::contains("videotimestamp-i1"),
        2,
        Duration::from_secs(5),
    );
    let stderr = LineRecorder::attach(probe.stderr());

    let mut orchestrator = orchestrator("timestamps");
    orchestrator.add_component(probe as Arc<dyn PipelineComponent>);
    orchestrator.set_verification(countdown);

    let result = run_orchestrator(&orchestrator).await;

    assert_run_succeeded(&result);
    assert_eq!(stderr.lines(), vec!["videotimestamp-i1: 1"]);
}

/// Too few matches within the window fails with the observed count
#[tokio::test]
async fn test_countdown_timeout_reports_observed_matches() {
    let probe = shell("probe", "echo 'frame'; exec sleep 5");
    let countdown = PatternCountdown::attach(
        probe.output(),
        LinePattern::contains("frame"),
        3,
        Duration::from_millis(500),
    );

    let mut orchestrator = orchestrator("too few frames");
    orchestrator.add_component(probe as Arc<dyn PipelineComponent>);
    orchestrator.set_verification(countdown);

    let result = run_orchestrator(&orchestrator).await;

    assert_run_failed(&result, |e| {
        *e == HarnessError::VerificationTimeout {
            expected: 3,
            observed: 1,
            timeout_ms: 500,
        }
    });
}
