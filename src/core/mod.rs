//! Core building blocks shared by components and the orchestrator
//!
//! This module defines the error taxonomy, the run configuration, the event bus
//! that carries output lines, the settlement gate that decides a run's outcome,
//! and the harness definition files.

pub mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod gate;
pub mod state;

pub use bus::{EventBus, LineBus, SubscriptionId};
pub use context::Configuration;
pub use error::{ensure, HarnessError};
pub use gate::SettlementGate;
pub use state::*;
