//! Test execution: the orchestrator, verification routines and the suite runner

pub mod orchestrator;
pub mod suite;
pub mod verification;

pub use orchestrator::{
    HarnessEvent, InterruptHandle, OrchestratorSettings, TestOrchestrator, DEFAULT_STAGGER,
    DEFAULT_TEARDOWN_TIMEOUT,
};
pub use suite::{build_orchestrator, RunOverrides, SuiteReport, TestOutcome, TestResult, TestSuite};
pub use verification::{
    strip_color_codes, verify_fn, CountdownLatch, LinePattern, NeverVerifies, PatternCountdown,
    Verification,
};
