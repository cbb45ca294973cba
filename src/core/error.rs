//! Error taxonomy for the harness

use thiserror::Error;

/// Errors raised by harness components, the orchestrator and verification routines
///
/// `Clone` because the settlement gate hands the same stored error to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarnessError {
    #[error("Configuration key not set: {0}")]
    ConfigurationMissing(String),

    #[error("Test has already been run")]
    AlreadySettled,

    #[error("No pipeline components are registered")]
    EmptyPipeline,

    #[error("Component was already launched: {0}")]
    ComponentAlreadyStarted(String),

    #[error("{}", exit_message(.command, *.code))]
    ProcessExitNonZero { command: String, code: Option<i32> },

    #[error("Failed to read {stream} of '{command}': {message}")]
    StreamReadError {
        command: String,
        stream: String,
        message: String,
    },

    #[error("Failed to launch '{command}': {message}")]
    SpawnFailed { command: String, message: String },

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Verification timed out after {timeout_ms}ms ({observed}/{expected} matches)")]
    VerificationTimeout {
        expected: usize,
        observed: usize,
        timeout_ms: u64,
    },

    #[error("Timed out after {0}ms waiting for the pipeline to settle")]
    TimedOut(u64),

    #[error("Wait was interrupted")]
    InterruptedWait,

    #[error("Invalid harness definition: {0}")]
    InvalidDefinition(String),
}

fn exit_message(command: &str, code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {} for command: {}", code, command),
        None => format!("terminated by signal for command: {}", command),
    }
}

impl HarnessError {
    /// Shorthand for a failed assertion inside a verification routine
    pub fn verification(reason: impl Into<String>) -> Self {
        HarnessError::VerificationFailed(reason.into())
    }
}

/// Fail verification with `message` unless `condition` holds
pub fn ensure(condition: bool, message: &str) -> Result<(), HarnessError> {
    if condition {
        Ok(())
    } else {
        Err(HarnessError::verification(format!("Assertion failed: {}", message)))
    }
}
