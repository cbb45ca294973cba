//! Pipeline components - the units of work the orchestrator launches and tears down

pub mod descriptor;
pub mod shell;

use crate::core::{ComponentId, Configuration, HarnessError, LineBus};
use async_trait::async_trait;
use std::sync::Arc;

pub use descriptor::{CommandTemplate, ComponentDescriptor, PresetRegistry, RenderedCommand};
pub use shell::ShellComponent;

/// What a component receives when it is configured
#[derive(Debug, Clone)]
pub struct ComponentContext {
    /// Sequential id assigned at registration
    pub id: ComponentId,

    /// Read-only configuration shared by the whole run
    pub configuration: Arc<Configuration>,
}

/// Output buses a component exposes for echoing and verification
#[derive(Debug, Clone)]
pub struct ComponentStreams {
    pub stdout: LineBus,
    pub stderr: LineBus,
    pub output: LineBus,
}

/// Capability surface every worker exposes to the orchestrator
///
/// `run` executes on a dedicated task. `terminate` and `wait` may be called from
/// any task, any number of times, whether or not the component ever started.
#[async_trait]
pub trait PipelineComponent: Send + Sync {
    /// Human-readable description (typically the command line)
    fn description(&self) -> String;

    /// Prefix prepended to echoed output lines
    fn output_prefix(&self) -> String {
        self.description()
    }

    /// Receive the run configuration; called once, before any component starts
    fn configure(&self, context: ComponentContext) -> Result<(), HarnessError>;

    /// Do the work; returns when the underlying process exits
    async fn run(&self) -> Result<(), HarnessError>;

    /// Request a stop without waiting for it
    fn terminate(&self);

    /// Wait until every underlying resource has been released
    async fn wait(&self) -> Result<(), HarnessError>;

    /// Output buses, if the component produces line output
    fn streams(&self) -> Option<ComponentStreams> {
        None
    }
}
