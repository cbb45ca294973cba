//! Test: preconditions of a run

use crate::helpers::*;
use harness::core::HarnessError;
use harness::PipelineComponent;
use std::sync::Arc;

#[tokio::test]
async fn test_empty_pipeline() {
    let orchestrator = orchestrator("empty");

    assert_eq!(orchestrator.run().await.unwrap_err(), HarnessError::EmptyPipeline);
    assert_eq!(orchestrator.teardown_count(), 0);
}

#[tokio::test]
async fn test_orchestrator_runs_only_once() {
    let mut orchestrator = orchestrator("once");
    orchestrator.add_component(shell("quick", "exit 0") as Arc<dyn PipelineComponent>);

    let first = run_orchestrator(&orchestrator).await;
    assert_run_succeeded(&first);

    assert_eq!(orchestrator.run().await.unwrap_err(), HarnessError::AlreadySettled);
    assert_eq!(orchestrator.teardown_count(), 1);
}

/// A component launched outside the orchestrator rejects the orchestrator's start
#[tokio::test]
async fn test_double_start_is_rejected_without_side_effects() {
    let worker = shell("worker", "exec sleep 5");
    let mut orchestrator = orchestrator("double start");
    orchestrator.add_component(worker.clone() as Arc<dyn PipelineComponent>);
    orchestrator.add_component(shell("other", "exec sleep 5") as Arc<dyn PipelineComponent>);

    // Start the worker a second time once the orchestrator has launched it
    let second = {
        let worker = Arc::clone(&worker);
        tokio::spawn(async move {
            while worker
                .runner()
                .map(|r| r.phase() != harness::process::RunnerPhase::Running)
                .unwrap_or(true)
            {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
            let outcome = worker.run().await;
            worker.terminate();
            outcome
        })
    };

    let result = run_orchestrator(&orchestrator).await;

    assert!(matches!(
        second.await.unwrap(),
        Err(HarnessError::ComponentAlreadyStarted(_))
    ));
    // The orchestrator's own start of the worker ends cleanly after the terminate
    assert_run_succeeded(&result);
    assert_eq!(worker.runner().unwrap().kill_attempts(), 1);
}
