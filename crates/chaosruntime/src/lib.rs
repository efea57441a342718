//! Chaos workflow execution runtime
//!
//! This crate provides the event-driven engine: triggers, schedulers, the
//! per-kind state machines, side-effect resolution and the manager loop
//! that ties them to a repository and a playground.

mod config;
mod controller;
mod decider;
mod manager;
mod memory;
mod naming;
mod runtime;
pub mod scheduler;
pub mod sideeffect;
pub mod statemachine;
mod trigger;

pub use config::{FailurePolicy, RuntimeConfig};
pub use controller::WorkflowController;
pub use decider::{BranchDecider, TaskDecider};
pub use manager::{ManagerBuilder, WorkflowManager};
pub use memory::InMemoryRepository;
pub use naming::{NodeNameGenerator, RandomSuffixGenerator, SequentialNameGenerator};
pub use runtime::{ChaosRuntime, RuntimeBuilder};
pub use trigger::{CompositeTrigger, OperableTrigger, Trigger};
