//! Test: failures from components and verification are re-raised after teardown

use crate::helpers::*;
use harness::core::HarnessError;
use harness::execution::{verify_fn, NeverVerifies};
use harness::PipelineComponent;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A single component exiting 2 while verification never completes
#[tokio::test]
async fn test_nonzero_exit_fails_the_run() {
    let mut orchestrator = orchestrator("exit 2");
    orchestrator.add_component(shell("failing", "exit 2") as Arc<dyn PipelineComponent>);
    orchestrator.set_verification(NeverVerifies);

    let result = run_orchestrator(&orchestrator).await;

    assert_run_failed(&result, |e| {
        matches!(e, HarnessError::ProcessExitNonZero { code: Some(2), .. })
    });
    assert_all_terminated(&result);
}

/// The pending verification is interrupted during teardown
#[tokio::test]
async fn test_pending_verification_is_interrupted() {
    let finished = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&finished);

    let mut orchestrator = orchestrator("interrupt verification");
    orchestrator.add_component(shell("failing", "sleep 0.1; exit 2") as Arc<dyn PipelineComponent>);
    orchestrator.set_verification(verify_fn(move || {
        let observed = Arc::clone(&observed);
        async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            observed.fetch_add(1, Ordering::SeqCst);
            Ok::<(), HarnessError>(())
        }
    }));

    let result = run_orchestrator(&orchestrator).await;
    tokio::time::sleep(Duration::from_secs(3)).await;

    assert!(result.error().is_some(), "{}", result.summary());
    assert_eq!(finished.load(Ordering::SeqCst), 0, "Verification should have been aborted");
}

/// Verification failing stops the components that are still running
#[tokio::test]
async fn test_verification_failure_fails_the_run() {
    let mut orchestrator = orchestrator("verification failure");
    let worker = shell("worker", "exec sleep 5");
    orchestrator.add_component(worker.clone() as Arc<dyn PipelineComponent>);
    orchestrator.set_verification(verify_fn(|| async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Err::<(), _>(HarnessError::verification("no frames received"))
    }));

    let result = run_orchestrator(&orchestrator).await;

    assert_run_failed(&result, |e| {
        *e == HarnessError::VerificationFailed("no frames received".to_string())
    });
    assert!(worker.runner().unwrap().was_terminated_proactively());
    assert!(result.elapsed < Duration::from_secs(4), "{}", result.summary());
}

/// A component that cannot be spawned fails the run
#[tokio::test]
async fn test_missing_executable_fails_the_run() {
    let mut orchestrator = orchestrator("missing executable");
    orchestrator.add_component(Arc::new(harness::ShellComponent::from_args(
        "ghost",
        ["/nonexistent/harness-ghost-binary"],
    )) as Arc<dyn PipelineComponent>);

    let result = run_orchestrator(&orchestrator).await;

    assert_run_failed(&result, |e| matches!(e, HarnessError::SpawnFailed { .. }));
}

/// The wait timeout elapses while every component keeps running
#[tokio::test]
async fn test_wait_timeout() {
    let mut orchestrator = orchestrator("timeout");
    orchestrator.settings_mut().wait_timeout = Some(Duration::from_millis(300));
    orchestrator.add_component(shell("worker", "exec sleep 5") as Arc<dyn PipelineComponent>);
    orchestrator.set_verification(NeverVerifies);

    let result = run_orchestrator(&orchestrator).await;

    assert_run_failed(&result, |e| *e == HarnessError::TimedOut(300));
    assert_all_terminated(&result);
}

/// Interrupting the wait still tears everything down
#[tokio::test]
async fn test_interrupt_tears_down() {
    let mut orchestrator = orchestrator("interrupted");
    orchestrator.settings_mut().wait_timeout = None;
    let worker = shell("worker", "exec sleep 5");
    orchestrator.add_component(worker.clone() as Arc<dyn PipelineComponent>);

    let interrupt = orchestrator.interrupt_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        interrupt.interrupt();
    });

    let result = run_orchestrator(&orchestrator).await;

    assert_run_failed(&result, |e| *e == HarnessError::InterruptedWait);
    assert!(worker.runner().unwrap().was_terminated_proactively());
}

/// A required key missing from the configuration fails before anything launches
#[tokio::test]
async fn test_missing_configuration_fails_before_launch() {
    let mut descriptor =
        harness::ComponentDescriptor::from_args("probe", ["echo", "{{ collector }}"]);
    descriptor.required_keys.push("collector".to_string());
    let probe = Arc::new(harness::ShellComponent::new(descriptor));

    let mut orchestrator = orchestrator("missing key");
    orchestrator.add_component(probe.clone() as Arc<dyn PipelineComponent>);

    let outcome = orchestrator.run().await;

    assert_eq!(
        outcome.unwrap_err(),
        HarnessError::ConfigurationMissing("collector".to_string())
    );
    assert_eq!(orchestrator.teardown_count(), 0);
    assert!(probe.runner().is_none());
}
