//! Test utility functions for the harness scenarios

#![allow(dead_code)]

use harness::core::{ComponentState, HarnessError, LineBus, RunReport};
use harness::execution::{OrchestratorSettings, TestOrchestrator};
use harness::{ComponentId, ShellComponent};

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Settings that keep scenarios fast and the test output clean
pub fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        stagger: Duration::from_millis(20),
        wait_timeout: Some(Duration::from_secs(10)),
        teardown_timeout: Duration::from_secs(5),
        echo_output: false,
    }
}

pub fn orchestrator(name: &str) -> TestOrchestrator {
    TestOrchestrator::with_settings(name, fast_settings())
}

/// Component running `script` under `sh -c`
pub fn shell(name: &str, script: &str) -> Arc<ShellComponent> {
    Arc::new(ShellComponent::from_args(name, ["sh", "-c", script]))
}

/// Result of running an orchestrator, with timing and final component states
#[derive(Debug)]
pub struct HarnessTestResult {
    pub outcome: Result<RunReport, HarnessError>,
    pub elapsed: Duration,
    pub states: Vec<Option<ComponentState>>,
    pub teardowns: usize,
}

impl HarnessTestResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&HarnessError> {
        self.outcome.as_ref().err()
    }

    pub fn state(&self, id: usize) -> Option<&ComponentState> {
        self.states.get(id - 1).and_then(Option::as_ref)
    }

    pub fn summary(&self) -> String {
        format!(
            "outcome: {:?}, elapsed: {:?}, states: {:?}, teardowns: {}",
            self.outcome, self.elapsed, self.states, self.teardowns
        )
    }
}

/// Run the orchestrator and capture everything the assertions need
pub async fn run_orchestrator(orchestrator: &TestOrchestrator) -> HarnessTestResult {
    let clock = Instant::now();
    let outcome = orchestrator.run().await;
    let elapsed = clock.elapsed();

    let states = (1..=orchestrator.component_count())
        .map(|id| orchestrator.component_state(ComponentId(id)))
        .collect();

    HarnessTestResult {
        outcome,
        elapsed,
        states,
        teardowns: orchestrator.teardown_count(),
    }
}

/// Assert the run succeeded
pub fn assert_run_succeeded(result: &HarnessTestResult) {
    assert!(result.is_success(), "Run should succeed. {}", result.summary());
    assert_eq!(result.teardowns, 1, "Teardown should run exactly once");
}

/// Assert the run failed with an error matching `predicate`
pub fn assert_run_failed<F>(result: &HarnessTestResult, predicate: F)
where
    F: Fn(&HarnessError) -> bool,
{
    match result.error() {
        Some(error) => assert!(predicate(error), "Unexpected error. {}", result.summary()),
        None => panic!("Run should fail. {}", result.summary()),
    }
    assert_eq!(result.teardowns, 1, "Teardown should run exactly once");
}

/// Every started component ends up terminated
pub fn assert_all_terminated(result: &HarnessTestResult) {
    for (index, state) in result.states.iter().enumerate() {
        assert_eq!(
            state.as_ref(),
            Some(&ComponentState::Terminated),
            "Component {} should be terminated. {}",
            index + 1,
            result.summary()
        );
    }
}

/// Collects every line published on a bus
#[derive(Debug, Clone, Default)]
pub struct LineRecorder {
    lines: Arc<Mutex<Vec<String>>>,
}

impl LineRecorder {
    pub fn attach(bus: &LineBus) -> Self {
        let recorder = Self::default();
        let sink = Arc::clone(&recorder.lines);
        bus.subscribe(move |line: &String| sink.lock().unwrap().push(line.clone()));
        recorder
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn contains(&self, text: &str) -> bool {
        self.lines().iter().any(|line| line.contains(text))
    }
}

/// Unique scratch path for a scenario
pub fn temp_path(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("harness_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_file(&path);
    path
}
