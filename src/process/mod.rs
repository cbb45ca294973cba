//! Process boundary - launching external commands and streaming their output

pub mod runner;

pub use runner::{ProcessRunner, RunnerPhase};

/// Platform suffix for executables (".exe" on Windows, empty elsewhere)
pub fn executable_suffix() -> &'static str {
    if cfg!(windows) {
        ".exe"
    } else {
        ""
    }
}
