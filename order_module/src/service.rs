mod config;
mod ingestion;
mod server;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::{
    FallbackAssigneeConfig, OrchestratorConfigFile, ServiceConfig, DEFAULT_LEDGER_DIR,
    DEFAULT_STATUS_CHANNEL,
};
pub use ingestion::{run_poll_cycle, spawn_poll_loop, CycleReport};
pub use server::run_service;
