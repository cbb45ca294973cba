//! Shell component - a pipeline component backed by one external process

use crate::component::{
    ComponentContext, ComponentDescriptor, ComponentStreams, PipelineComponent, RenderedCommand,
};
use crate::core::{ComponentId, HarnessError, LineBus};
use crate::process::{ProcessRunner, RunnerPhase};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// State fixed at configure time
#[derive(Debug)]
struct Prepared {
    id: ComponentId,
    rendered: RenderedCommand,
    runner: ProcessRunner,
}

/// Runs the command of a `ComponentDescriptor`
///
/// The output buses exist from construction, so callers can subscribe before the
/// component is configured or launched.
#[derive(Debug)]
pub struct ShellComponent {
    descriptor: ComponentDescriptor,
    stdout: LineBus,
    stderr: LineBus,
    output: LineBus,
    prepared: OnceLock<Prepared>,
    teardown_started: AtomicBool,
    teardown_task: Mutex<Option<JoinHandle<()>>>,
}

impl ShellComponent {
    pub fn new(descriptor: ComponentDescriptor) -> Self {
        Self {
            descriptor,
            stdout: LineBus::new(),
            stderr: LineBus::new(),
            output: LineBus::new(),
            prepared: OnceLock::new(),
            teardown_started: AtomicBool::new(false),
            teardown_task: Mutex::new(None),
        }
    }

    /// Component running a fixed argument list
    pub fn from_args<I, S>(name: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ComponentDescriptor::from_args(name, args))
    }

    pub fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }

    pub fn id(&self) -> Option<ComponentId> {
        self.prepared.get().map(|p| p.id)
    }

    /// The process runner, once configured
    pub fn runner(&self) -> Option<&ProcessRunner> {
        self.prepared.get().map(|p| &p.runner)
    }

    pub fn stdout(&self) -> &LineBus {
        &self.stdout
    }

    pub fn stderr(&self) -> &LineBus {
        &self.stderr
    }

    pub fn output(&self) -> &LineBus {
        &self.output
    }

    fn spawn_teardown(&self, prepared: &Prepared) {
        if prepared.rendered.teardown.is_empty()
            || prepared.runner.phase() == RunnerPhase::Idle
            || self.teardown_started.swap(true, Ordering::SeqCst)
        {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available for teardown of {}", prepared.rendered.name);
            return;
        };

        let commands = prepared.rendered.teardown.clone();
        let handle = runtime.spawn(async move {
            for command in commands {
                run_teardown_command(&command).await;
            }
        });
        *self
            .teardown_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(handle);
    }
}

/// Run one teardown command, logging instead of failing
async fn run_teardown_command(command: &[String]) {
    let Some((program, args)) = command.split_first() else {
        return;
    };
    let command_line = command.join(" ");
    debug!("Running teardown command: {}", command_line);

    match Command::new(program).args(args).output().await {
        Ok(output) if output.status.success() => {}
        Ok(output) => warn!(
            "{} returned with exit code: {}",
            command_line,
            output.status.code().unwrap_or(-1)
        ),
        Err(e) => warn!("Failed to run teardown command '{}': {}", command_line, e),
    }
}

#[async_trait]
impl PipelineComponent for ShellComponent {
    fn description(&self) -> String {
        match self.prepared.get() {
            Some(prepared) => prepared.rendered.command.join(" "),
            None => format!("{} (not configured)", self.descriptor.name),
        }
    }

    fn output_prefix(&self) -> String {
        match self.prepared.get() {
            Some(prepared) => prepared.rendered.name.clone(),
            None => self.descriptor.name.clone(),
        }
    }

    fn configure(&self, context: ComponentContext) -> Result<(), HarnessError> {
        self.descriptor.validate()?;
        let rendered = self.descriptor.render(context.id, &context.configuration)?;
        let runner = ProcessRunner::new(
            rendered.command.clone(),
            context.configuration.child_environment(),
        );

        let prepared = Prepared {
            id: context.id,
            rendered,
            runner,
        };
        self.prepared.set(prepared).map_err(|_| {
            HarnessError::InvalidDefinition(format!(
                "component '{}' configured twice",
                self.descriptor.name
            ))
        })?;

        if let Some(prepared) = self.prepared.get() {
            prepared.runner.stdout().pipe(&self.stdout);
            prepared.runner.stderr().pipe(&self.stderr);
            prepared.runner.output().pipe(&self.output);
        }
        Ok(())
    }

    async fn run(&self) -> Result<(), HarnessError> {
        let prepared = self.prepared.get().ok_or_else(|| {
            HarnessError::InvalidDefinition(format!(
                "component '{}' was launched before it was configured",
                self.descriptor.name
            ))
        })?;
        prepared.runner.run().await
    }

    fn terminate(&self) {
        if let Some(prepared) = self.prepared.get() {
            self.spawn_teardown(prepared);
            prepared.runner.terminate();
        }
    }

    async fn wait(&self) -> Result<(), HarnessError> {
        let teardown = self
            .teardown_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(teardown) = teardown {
            if let Err(e) = teardown.await {
                warn!("Teardown of {} did not complete: {}", self.output_prefix(), e);
            }
        }

        if let Some(prepared) = self.prepared.get() {
            prepared.runner.wait().await;
        }
        Ok(())
    }

    fn streams(&self) -> Option<ComponentStreams> {
        Some(ComponentStreams {
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            output: self.output.clone(),
        })
    }
}
