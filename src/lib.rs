//! harness - integration test harness for multi-process pipelines

pub mod cli;
pub mod component;
pub mod core;
pub mod execution;
pub mod process;

// Re-export commonly used types
pub use component::{ComponentDescriptor, PipelineComponent, PresetRegistry, ShellComponent};
pub use crate::core::config::HarnessConfig;
pub use crate::core::{Completion, ComponentId, Configuration, HarnessError, LineBus, RunReport};
pub use execution::{
    verify_fn, InterruptHandle, OrchestratorSettings, PatternCountdown, TestOrchestrator,
    TestSuite, Verification,
};
pub use process::ProcessRunner;
