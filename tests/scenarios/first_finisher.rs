//! Test: the first component to finish settles the run and the rest are torn down

use crate::helpers::*;
use harness::core::{Completion, HarnessError};
use harness::execution::verify_fn;
use harness::process::RunnerPhase;
use harness::{ComponentId, PipelineComponent};
use std::sync::Arc;
use std::time::Duration;

/// C1 exits 0 after 100 ms while C2 would run for 5 s
#[tokio::test]
async fn test_short_component_finishing_tears_down_long_one() {
    let mut orchestrator = orchestrator("first finisher");
    let quick = shell("quick", "sleep 0.1; exit 0");
    let slow = shell("slow", "exec sleep 5");
    orchestrator.add_component(quick.clone() as Arc<dyn PipelineComponent>);
    orchestrator.add_component(slow.clone() as Arc<dyn PipelineComponent>);
    orchestrator.set_verification(verify_fn(|| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok::<(), HarnessError>(())
    }));

    let result = run_orchestrator(&orchestrator).await;

    assert_run_succeeded(&result);
    assert!(matches!(
        result.outcome.as_ref().unwrap().completion,
        Completion::ComponentFinished {
            id: ComponentId(1),
            ..
        }
    ));
    assert!(
        result.elapsed < Duration::from_secs(4),
        "Slow component should have been killed. {}",
        result.summary()
    );
    assert_all_terminated(&result);

    let runner = slow.runner().unwrap();
    assert_eq!(runner.phase(), RunnerPhase::Exited);
    assert!(runner.was_terminated_proactively());
    assert_eq!(runner.kill_attempts(), 1);
    assert_eq!(quick.runner().unwrap().exit_code(), Some(0));
}

/// Verification succeeding settles the run while every component is still running
#[tokio::test]
async fn test_verification_success_tears_down_running_components() {
    let mut orchestrator = orchestrator("verified");
    let first = shell("first", "exec sleep 5");
    let second = shell("second", "exec sleep 5");
    orchestrator.add_component(first.clone() as Arc<dyn PipelineComponent>);
    orchestrator.add_component(second.clone() as Arc<dyn PipelineComponent>);
    orchestrator.set_verification(verify_fn(|| async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok::<(), HarnessError>(())
    }));

    let result = run_orchestrator(&orchestrator).await;

    assert_run_succeeded(&result);
    assert_eq!(
        result.outcome.as_ref().unwrap().completion,
        Completion::Verified
    );
    assert_all_terminated(&result);
    for component in [&first, &second] {
        let runner = component.runner().unwrap();
        assert!(runner.was_terminated_proactively());
        assert_eq!(runner.kill_attempts(), 1);
    }
}

/// Once settled during the stagger, later components never launch
#[tokio::test]
async fn test_settling_during_stagger_skips_later_launches() {
    let mut orchestrator = orchestrator("early exit");
    orchestrator.settings_mut().stagger = Duration::from_secs(5);
    orchestrator.add_component(shell("instant", "exit 0") as Arc<dyn PipelineComponent>);
    let never = shell("never", "exec sleep 5");
    orchestrator.add_component(never.clone() as Arc<dyn PipelineComponent>);

    let result = run_orchestrator(&orchestrator).await;

    assert_run_succeeded(&result);
    assert!(result.elapsed < Duration::from_secs(4), "{}", result.summary());
    assert_eq!(never.runner().unwrap().phase(), RunnerPhase::Idle);
    assert_eq!(never.runner().unwrap().kill_attempts(), 0);
}
