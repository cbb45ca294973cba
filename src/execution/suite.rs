//! Suite runner - executes harness definitions one after another

use crate::component::{PipelineComponent, ShellComponent};
use crate::core::config::{HarnessConfig, StreamSelector, VerificationConfig};
use crate::core::{HarnessError, RunReport};
use crate::execution::orchestrator::{
    HarnessEvent, InterruptHandle, OrchestratorSettings, TestOrchestrator,
};
use crate::execution::verification::{LinePattern, PatternCountdown};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Settings applied on top of every definition
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub stagger: Option<Duration>,
    pub wait_timeout: Option<Duration>,
    /// Configuration values replacing those of the definition
    pub values: Vec<(String, String)>,
    /// Suppress echoing component output to the console
    pub quiet: bool,
}

/// Build an orchestrator for one harness definition
pub fn build_orchestrator(
    config: &HarnessConfig,
    overrides: &RunOverrides,
) -> Result<TestOrchestrator, HarnessError> {
    let settings = OrchestratorSettings {
        stagger: overrides
            .stagger
            .or(config.stagger_ms.map(Duration::from_millis))
            .unwrap_or(crate::execution::orchestrator::DEFAULT_STAGGER),
        wait_timeout: overrides
            .wait_timeout
            .or(config.wait_timeout_secs.map(Duration::from_secs)),
        teardown_timeout: config
            .teardown_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(crate::execution::orchestrator::DEFAULT_TEARDOWN_TIMEOUT),
        echo_output: !overrides.quiet,
    };

    let mut orchestrator = TestOrchestrator::with_settings(&config.name, settings);
    *orchestrator.configuration_mut() = config.configuration();
    for (key, value) in &overrides.values {
        orchestrator.configuration_mut().set(key.clone(), value.clone());
    }

    let descriptors = config
        .descriptors()
        .map_err(|e| HarnessError::InvalidDefinition(format!("{:#}", e)))?;
    let components: Vec<Arc<ShellComponent>> = descriptors
        .into_iter()
        .map(|descriptor| Arc::new(ShellComponent::new(descriptor)))
        .collect();
    for component in &components {
        orchestrator.add_component(Arc::clone(component) as Arc<dyn PipelineComponent>);
    }

    if let Some(verification) = &config.verification {
        let watched = components
            .get(verification.component.wrapping_sub(1))
            .ok_or_else(|| {
                HarnessError::InvalidDefinition(format!(
                    "verification watches unknown component {}",
                    verification.component
                ))
            })?;
        orchestrator.set_verification(pattern_countdown(verification, watched)?);
    }

    Ok(orchestrator)
}

fn pattern_countdown(
    verification: &VerificationConfig,
    watched: &ShellComponent,
) -> Result<PatternCountdown, HarnessError> {
    let pattern = if verification.use_regex {
        LinePattern::regex(&verification.pattern, verification.min_value)?
    } else {
        LinePattern::contains(&verification.pattern)
    }
    .strip_colors(verification.strip_colors);

    let bus = match verification.stream {
        StreamSelector::Output => watched.output(),
        StreamSelector::Stdout => watched.stdout(),
        StreamSelector::Stderr => watched.stderr(),
    };

    Ok(PatternCountdown::attach(
        bus,
        pattern,
        verification.count,
        Duration::from_secs(verification.timeout_secs),
    ))
}

/// Outcome of one test in a suite
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TestOutcome {
    Passed { duration: Duration, completion: String },
    Skipped { reason: String },
    Failed { duration: Duration, error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub name: String,
    pub outcome: TestOutcome,
}

/// Results of a whole suite
#[derive(Debug, Clone, Default, Serialize)]
pub struct SuiteReport {
    pub results: Vec<TestResult>,
    pub duration: Duration,
}

impl SuiteReport {
    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, TestOutcome::Passed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, TestOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TestOutcome::Failed { .. }))
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    fn count<F: Fn(&TestOutcome) -> bool>(&self, predicate: F) -> usize {
        self.results.iter().filter(|r| predicate(&r.outcome)).count()
    }
}

type EventHandler = Arc<dyn Fn(&HarnessEvent) + Send + Sync>;

/// Runs harness definitions in order, sharing one interrupt handle
pub struct TestSuite {
    definitions: Vec<HarnessConfig>,
    overrides: RunOverrides,
    interrupt: InterruptHandle,
    event_handlers: Vec<EventHandler>,
}

impl TestSuite {
    pub fn new(definitions: Vec<HarnessConfig>, overrides: RunOverrides) -> Self {
        Self {
            definitions,
            overrides,
            interrupt: InterruptHandle::new(),
            event_handlers: Vec::new(),
        }
    }

    /// Handle that interrupts the current test and skips the rest
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Add a handler subscribed to every test's events
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(&HarnessEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    pub async fn run(&self) -> SuiteReport {
        let clock = Instant::now();
        let mut results = Vec::with_capacity(self.definitions.len());

        for definition in &self.definitions {
            let outcome = self.run_one(definition).await;
            results.push(TestResult {
                name: definition.name.clone(),
                outcome,
            });
        }

        SuiteReport {
            results,
            duration: clock.elapsed(),
        }
    }

    async fn run_one(&self, definition: &HarnessConfig) -> TestOutcome {
        if !definition.runs_on_this_platform() {
            info!(
                "Skipping {}: not supported on {}",
                definition.name,
                std::env::consts::OS
            );
            return TestOutcome::Skipped {
                reason: format!("not supported on {}", std::env::consts::OS),
            };
        }
        if self.interrupt.is_interrupted() {
            return TestOutcome::Skipped {
                reason: "interrupted".to_string(),
            };
        }

        let clock = Instant::now();
        let mut orchestrator = match build_orchestrator(definition, &self.overrides) {
            Ok(orchestrator) => orchestrator,
            Err(e) => {
                warn!("Could not set up {}: {}", definition.name, e);
                return TestOutcome::Failed {
                    duration: clock.elapsed(),
                    error: e.to_string(),
                };
            }
        };
        orchestrator.set_interrupt_handle(self.interrupt.clone());
        for handler in &self.event_handlers {
            let handler = Arc::clone(handler);
            orchestrator
                .events()
                .subscribe(move |event: &HarnessEvent| handler(event));
        }

        match orchestrator.run().await {
            Ok(RunReport {
                duration,
                completion,
                ..
            }) => TestOutcome::Passed {
                duration,
                completion: completion.to_string(),
            },
            Err(e) => TestOutcome::Failed {
                duration: clock.elapsed(),
                error: e.to_string(),
            },
        }
    }
}
