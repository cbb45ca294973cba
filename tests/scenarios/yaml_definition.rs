//! Test: harness definitions loaded from YAML

use crate::helpers::*;
use harness::core::{Completion, HarnessError};
use harness::execution::{build_orchestrator, RunOverrides, TestOutcome, TestSuite};
use harness::HarnessConfig;
use std::time::Duration;

fn overrides() -> RunOverrides {
    RunOverrides {
        stagger: Some(Duration::from_millis(20)),
        wait_timeout: Some(Duration::from_secs(10)),
        values: Vec::new(),
        quiet: true,
    }
}

/// Presets, values and a regex verification, end to end
#[tokio::test]
async fn test_definition_with_presets_and_verification() {
    let yaml = r#"
name: "Player stream"
values:
  rate: "25.0"
presets:
  player:
    command: ["sh", "-c", "for i in 1 2; do echo 'FPS: i1: {{ rate }}'; done; exec sleep 5"]
    required_keys: [rate]
components:
  - preset: shell
    name: collector
    values: { script: "exec sleep 5" }
  - preset: player
verification:
  component: 2
  pattern: 'FPS: i1:\s*([0-9.]+)'
  use_regex: true
  min_value: 0.5
  count: 2
  timeout_secs: 5
"#;

    let config = HarnessConfig::from_yaml(yaml).unwrap();
    let orchestrator = build_orchestrator(&config, &overrides()).unwrap();

    let result = run_orchestrator(&orchestrator).await;

    assert_run_succeeded(&result);
    assert_eq!(
        result.outcome.as_ref().unwrap().completion,
        Completion::Verified
    );
    assert_all_terminated(&result);
}

/// Teardown commands from a preset run when the component is stopped
#[tokio::test]
async fn test_definition_teardown_commands() {
    let marker = temp_path("yaml_teardown");
    let yaml = format!(
        r#"
name: "Container cleanup"
presets:
  container:
    command: ["sh", "-c", "exec sleep 5"]
    teardown:
      - ["touch", "{}"]
components:
  - preset: container
  - preset: shell
    values: {{ script: "sleep 0.2" }}
"#,
        marker.display()
    );

    let config = HarnessConfig::from_yaml(&yaml).unwrap();
    let orchestrator = build_orchestrator(&config, &overrides()).unwrap();

    let result = run_orchestrator(&orchestrator).await;

    assert_run_succeeded(&result);
    assert!(marker.exists(), "Teardown command should have created the marker");
    std::fs::remove_file(&marker).ok();
}

/// A missing value fails the run before launch
#[tokio::test]
async fn test_definition_missing_value() {
    let yaml = r#"
name: "Needs collector"
presets:
  probe:
    command: "echo {{ collector }}"
    required_keys: [collector]
components:
  - preset: probe
"#;

    let config = HarnessConfig::from_yaml(yaml).unwrap();
    let orchestrator = build_orchestrator(&config, &overrides()).unwrap();

    assert_eq!(
        orchestrator.run().await.unwrap_err(),
        HarnessError::ConfigurationMissing("collector".to_string())
    );

    let with_value = RunOverrides {
        values: vec![("collector".to_string(), "udp://127.0.0.1:5000".to_string())],
        ..overrides()
    };
    let orchestrator = build_orchestrator(&config, &with_value).unwrap();
    assert_run_succeeded(&run_orchestrator(&orchestrator).await);
}

/// A suite of definitions reports each outcome
#[tokio::test]
async fn test_suite_of_definitions() {
    let passing = HarnessConfig::from_yaml(
        r#"
name: "passes"
components:
  - command: "true"
"#,
    )
    .unwrap();
    let failing = HarnessConfig::from_yaml(
        r#"
name: "fails"
components:
  - command: "false"
"#,
    )
    .unwrap();

    let report = TestSuite::new(vec![passing, failing], overrides()).run().await;

    assert_eq!(report.results.len(), 2);
    assert!(matches!(report.results[0].outcome, TestOutcome::Passed { .. }));
    match &report.results[1].outcome {
        TestOutcome::Failed { error, .. } => assert!(error.contains("exit code 1")),
        other => panic!("Expected failure, got {:?}", other),
    }
    assert!(!report.is_success());
}
