//! Lifecycle and outcome models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Sequential component identifier assigned at registration, starting at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComponentId(pub usize);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a registered pipeline component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentState {
    /// Registered, not yet configured
    Created,
    /// Configured, waiting to be launched
    Configured,
    /// Launched on its own task
    Started,
    /// Run routine returned normally
    Succeeded,
    /// Run routine returned an error
    Failed { error: String },
    /// Termination requested during teardown
    Terminating,
    /// Fully released
    Terminated,
}

impl ComponentState {
    /// Whether the component was ever launched
    pub fn was_started(&self) -> bool {
        !matches!(self, ComponentState::Created | ComponentState::Configured)
    }

    /// Check if the run routine has returned
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            ComponentState::Succeeded | ComponentState::Failed { .. } | ComponentState::Terminated
        )
    }
}

/// What settled a successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Completion {
    /// A component's run routine returned normally
    ComponentFinished { id: ComponentId, description: String },
    /// The verification routine returned normally
    Verified,
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::ComponentFinished { id, description } => {
                write!(f, "component {} finished ({})", id, description.trim())
            }
            Completion::Verified => write!(f, "verification passed"),
        }
    }
}

/// Summary of a successful run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub completion: Completion,
}
