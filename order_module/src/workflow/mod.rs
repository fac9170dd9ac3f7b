//! Per-order workflow state machine and the engine that drives it.

mod action;
mod engine;
mod error;
mod types;

pub use action::{Action, ActionOutcome, MAX_PURGE_COUNT};
pub use engine::{EngineConfig, OrderEngine};
pub use error::WorkflowError;
pub use types::{
    parse_hours, Actor, Assignee, OrderKey, WorkflowInstance, WorkflowState, MAX_HOURS,
    MIN_HOURS,
};
