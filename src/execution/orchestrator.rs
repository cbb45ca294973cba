//! Test orchestrator - launches components, races them against verification and
//! tears everything down once the run settles

use crate::component::{ComponentContext, PipelineComponent};
use crate::core::{
    Completion, ComponentId, ComponentState, Configuration, EventBus, HarnessError, LineBus,
    RunReport, SettlementGate, SubscriptionId,
};
use crate::execution::verification::Verification;
use chrono::Utc;
use console::style;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default delay between component launches
pub const DEFAULT_STAGGER: Duration = Duration::from_secs(2);

/// Default bound on each component's teardown
pub const DEFAULT_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Events that can occur during a harness run
#[derive(Debug, Clone)]
pub enum HarnessEvent {
    RunStarted {
        run_id: Uuid,
        name: String,
        components: usize,
    },
    ComponentStarted {
        id: ComponentId,
        description: String,
    },
    ComponentFinished {
        id: ComponentId,
    },
    ComponentFailed {
        id: ComponentId,
        error: String,
    },
    VerificationFinished {
        error: Option<String>,
    },
    TeardownStarted,
    ComponentTerminated {
        id: ComponentId,
    },
    RunFinished {
        run_id: Uuid,
        error: Option<String>,
    },
}

/// Timing and echo settings for a run
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Delay between consecutive launches
    pub stagger: Duration,
    /// Bound on waiting for the run to settle; `None` waits indefinitely
    pub wait_timeout: Option<Duration>,
    /// Bound on each component's teardown before its task is aborted
    pub teardown_timeout: Duration,
    /// Print component output to the console, prefixed by the component name
    pub echo_output: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            stagger: DEFAULT_STAGGER,
            wait_timeout: None,
            teardown_timeout: DEFAULT_TEARDOWN_TIMEOUT,
            echo_output: true,
        }
    }
}

/// Handle for interrupting waits from another task (e.g. a Ctrl-C listener)
///
/// Interrupting is sticky: every current and future wait observes it.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    interrupted: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Resolve once `interrupt` has been called
    pub async fn interrupted(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_interrupted() {
                return;
            }
            notified.await;
        }
    }
}

struct RegisteredComponent {
    id: ComponentId,
    component: Arc<dyn PipelineComponent>,
    state: Arc<Mutex<ComponentState>>,
}

impl RegisteredComponent {
    fn set_state(&self, state: ComponentState) {
        set_state(&self.state, state);
    }
}

fn set_state(slot: &Mutex<ComponentState>, state: ComponentState) {
    *slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
}

/// Runs one test: a set of components plus one verification
///
/// The first of these settles the run: any component returning (success or
/// error), or the verification returning. Everything started is then torn down
/// before `run` returns. An orchestrator runs at most once.
pub struct TestOrchestrator {
    name: String,
    configuration: Configuration,
    settings: OrchestratorSettings,
    components: Vec<RegisteredComponent>,
    verification: Option<Arc<dyn Verification>>,
    gate: Arc<SettlementGate<Completion>>,
    consumed: AtomicBool,
    interrupt: InterruptHandle,
    events: EventBus<HarnessEvent>,
    teardowns: AtomicUsize,
}

impl TestOrchestrator {
    pub fn new(name: &str) -> Self {
        Self::with_settings(name, OrchestratorSettings::default())
    }

    pub fn with_settings(name: &str, settings: OrchestratorSettings) -> Self {
        Self {
            name: name.to_string(),
            configuration: Configuration::new(),
            settings,
            components: Vec::new(),
            verification: None,
            gate: Arc::new(SettlementGate::new()),
            consumed: AtomicBool::new(false),
            interrupt: InterruptHandle::new(),
            events: EventBus::new(),
            teardowns: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut OrchestratorSettings {
        &mut self.settings
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /// Mutable configuration; frozen once `run` starts
    pub fn configuration_mut(&mut self) -> &mut Configuration {
        &mut self.configuration
    }

    /// Register a component; ids are sequential from 1 in registration order
    pub fn add_component(&mut self, component: Arc<dyn PipelineComponent>) -> ComponentId {
        let id = ComponentId(self.components.len() + 1);
        debug!("Registered component {}: {}", id, component.output_prefix());
        self.components.push(RegisteredComponent {
            id,
            component,
            state: Arc::new(Mutex::new(ComponentState::Created)),
        });
        id
    }

    pub fn set_verification<V>(&mut self, verification: V)
    where
        V: Verification + 'static,
    {
        self.verification = Some(Arc::new(verification));
    }

    /// Share an interrupt handle, e.g. across a suite of runs
    pub fn set_interrupt_handle(&mut self, interrupt: InterruptHandle) {
        self.interrupt = interrupt;
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Lifecycle events published while the run progresses
    pub fn events(&self) -> &EventBus<HarnessEvent> {
        &self.events
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn component_state(&self, id: ComponentId) -> Option<ComponentState> {
        self.components
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.state.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    /// How many times teardown has executed
    pub fn teardown_count(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    /// Execute the test
    ///
    /// # Errors
    /// - `AlreadySettled` if this orchestrator has already run
    /// - `EmptyPipeline` if no component is registered
    /// - any configure error, before anything is launched
    /// - the error that settled the run, re-raised after teardown
    /// - `TimedOut` or `InterruptedWait` if the wait was cut short
    pub async fn run(&self) -> Result<RunReport, HarnessError> {
        if self.components.is_empty() {
            return Err(HarnessError::EmptyPipeline);
        }
        if self.consumed.swap(true, Ordering::SeqCst) {
            return Err(HarnessError::AlreadySettled);
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();

        info!("Starting test: {} ({})", self.name, run_id);
        self.events.publish(HarnessEvent::RunStarted {
            run_id,
            name: self.name.clone(),
            components: self.components.len(),
        });

        let configuration = Arc::new(self.configuration.clone());
        if let Err(e) = self.configure_all(&configuration) {
            error!("Configuration failed: {}", e);
            self.gate.try_settle_error(e.clone());
            self.finish(run_id, Some(&e));
            return Err(e);
        }

        let verification = self.spawn_verification();
        let mut tasks = Vec::with_capacity(self.components.len());
        let mut echoes = Vec::new();

        let outcome = self.launch_and_wait(&mut tasks, &mut echoes).await;
        if let Err(e) = &outcome {
            // Timeouts and interrupts never reached the gate on their own
            self.gate.try_settle_error(e.clone());
        }

        self.teardown(tasks, verification).await;
        for (bus, subscription) in echoes {
            bus.unsubscribe(subscription);
        }

        match outcome {
            Ok(completion) => {
                info!("Test {} passed: {}", self.name, completion);
                self.finish(run_id, None);
                Ok(RunReport {
                    run_id,
                    name: self.name.clone(),
                    started_at,
                    duration: clock.elapsed(),
                    completion,
                })
            }
            Err(e) => {
                error!("Test {} failed: {}", self.name, e);
                self.finish(run_id, Some(&e));
                Err(e)
            }
        }
    }

    fn finish(&self, run_id: Uuid, error: Option<&HarnessError>) {
        self.events.publish(HarnessEvent::RunFinished {
            run_id,
            error: error.map(ToString::to_string),
        });
    }

    fn configure_all(&self, configuration: &Arc<Configuration>) -> Result<(), HarnessError> {
        for registered in &self.components {
            registered.component.configure(ComponentContext {
                id: registered.id,
                configuration: Arc::clone(configuration),
            })?;
            registered.set_state(ComponentState::Configured);
        }
        Ok(())
    }

    /// Launch with staggering, then wait for settlement
    async fn launch_and_wait(
        &self,
        tasks: &mut Vec<JoinHandle<()>>,
        echoes: &mut Vec<(LineBus, SubscriptionId)>,
    ) -> Result<Completion, HarnessError> {
        let last = self.components.len() - 1;
        for (index, registered) in self.components.iter().enumerate() {
            if self.gate.is_settled() {
                info!("Run settled during startup, not launching remaining components");
                break;
            }

            if self.settings.echo_output {
                echoes.extend(self.echo(registered));
            }
            tasks.push(self.launch(registered));

            if index < last {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.stagger) => {}
                    _ = self.gate.wait(None) => {}
                    _ = self.interrupt.interrupted() => return Err(HarnessError::InterruptedWait),
                }
            }
        }

        tokio::select! {
            outcome = self.gate.wait(self.settings.wait_timeout) => outcome,
            _ = self.interrupt.interrupted() => Err(HarnessError::InterruptedWait),
        }
    }

    fn launch(&self, registered: &RegisteredComponent) -> JoinHandle<()> {
        let id = registered.id;
        let description = registered.component.description();
        info!("Starting task: {}", description);
        registered.set_state(ComponentState::Started);
        self.events.publish(HarnessEvent::ComponentStarted {
            id,
            description: description.clone(),
        });

        let component = Arc::clone(&registered.component);
        let state = Arc::clone(&registered.state);
        let gate = Arc::clone(&self.gate);
        let events = self.events.clone();
        tokio::spawn(async move {
            match component.run().await {
                Ok(()) => {
                    debug!("Task finished: {}", description);
                    set_state(&state, ComponentState::Succeeded);
                    events.publish(HarnessEvent::ComponentFinished { id });
                    gate.try_settle_value(Completion::ComponentFinished { id, description });
                }
                Err(e) => {
                    warn!("Task failed: {}: {}", description, e);
                    set_state(
                        &state,
                        ComponentState::Failed {
                            error: e.to_string(),
                        },
                    );
                    events.publish(HarnessEvent::ComponentFailed {
                        id,
                        error: e.to_string(),
                    });
                    gate.try_settle_error(e);
                }
            }
        })
    }

    /// Print component output to the console
    fn echo(&self, registered: &RegisteredComponent) -> Vec<(LineBus, SubscriptionId)> {
        let Some(streams) = registered.component.streams() else {
            return Vec::new();
        };
        let prefix = registered.component.output_prefix();

        let out_prefix = prefix.clone();
        let stdout = streams.stdout.subscribe(move |line: &String| {
            println!("{} {}", style(&out_prefix).cyan(), line);
        });
        let stderr = streams.stderr.subscribe(move |line: &String| {
            eprintln!("{} {}", style(&prefix).yellow(), line);
        });

        vec![(streams.stdout, stdout), (streams.stderr, stderr)]
    }

    fn spawn_verification(&self) -> Option<JoinHandle<()>> {
        let verification = self.verification.clone()?;
        let gate = Arc::clone(&self.gate);
        let events = self.events.clone();
        Some(tokio::spawn(async move {
            match verification.verify().await {
                Ok(()) => {
                    info!("Verification passed");
                    events.publish(HarnessEvent::VerificationFinished { error: None });
                    gate.try_settle_value(Completion::Verified);
                }
                Err(e) => {
                    warn!("Verification failed: {}", e);
                    events.publish(HarnessEvent::VerificationFinished {
                        error: Some(e.to_string()),
                    });
                    gate.try_settle_error(e);
                }
            }
        }))
    }

    /// Stop everything that was started, in registration order
    async fn teardown(&self, tasks: Vec<JoinHandle<()>>, verification: Option<JoinHandle<()>>) {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        info!("Terminating all tasks");
        self.events.publish(HarnessEvent::TeardownStarted);

        // Launched components are exactly the first `tasks.len()` registered
        let started = &self.components[..tasks.len()];
        for registered in started {
            registered.component.terminate();
            registered.set_state(ComponentState::Terminating);
        }

        if let Some(verification) = verification {
            verification.abort();
            if let Err(e) = verification.await {
                if e.is_panic() {
                    warn!("Verification panicked: {}", e);
                }
            }
        }

        for (registered, mut task) in started.iter().zip(tasks) {
            let description = registered.component.description();
            info!("Stopping task: {}", description);

            let stopped = tokio::time::timeout(self.settings.teardown_timeout, async {
                let waited = registered.component.wait().await;
                let joined = (&mut task).await;
                (waited, joined)
            })
            .await;

            match stopped {
                Ok((waited, joined)) => {
                    if let Err(e) = waited {
                        warn!("Error while stopping {}: {}", description, e);
                    }
                    if let Err(e) = joined {
                        warn!("Task for {} ended abnormally: {}", description, e);
                    }
                }
                Err(_) => {
                    warn!(
                        "{} did not stop within {:?}, aborting",
                        description, self.settings.teardown_timeout
                    );
                    task.abort();
                    let _ = task.await;
                }
            }

            registered.set_state(ComponentState::Terminated);
            self.events
                .publish(HarnessEvent::ComponentTerminated { id: registered.id });
        }
    }
}
