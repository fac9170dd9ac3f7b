//! Durable ledger for the order orchestrator.
//!
//! Three independently loadable collections live under one root directory:
//! admins, completed-work entries and the process state flag. Each collection
//! is a whole JSON snapshot guarded by its own lock so read-modify-write
//! cycles never interleave.

mod backup;
mod collection;
mod error;
mod store;
mod types;

pub use backup::BackupSet;
pub use collection::{Collection, CollectionGuard};
pub use error::LedgerError;
pub use store::{
    AdminChange, LedgerStore, ADMINS_FILE, BACKUPS_DIR, ENTRIES_FILE, PROCESS_STATE_FILE,
};
pub use types::{sum_hours, Admin, Entry, ProcessState};
