//! Scenario-based tests for the harness
//!
//! Every scenario launches real processes through `sh`, so they only run on unix.

#![cfg(unix)]

mod failure_handling;
mod first_finisher;
mod pattern_verification;
mod run_guards;
mod yaml_definition;
