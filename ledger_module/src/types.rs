use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A person orders can be assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admin {
    /// Stable external identity (a chat user id).
    pub id: String,
    pub display_name: String,
}

impl Admin {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// One completed piece of work. Entries are append-only; only the retention
/// cleanup removes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub admin_id: String,
    #[serde(default)]
    pub order_number: Option<String>,
    pub hours: u32,
    pub timestamp: DateTime<Utc>,
    pub completed_by_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessState {
    #[serde(default)]
    pub paused: bool,
}

/// Authoritative completed-hours total for one admin.
pub fn sum_hours(entries: &[Entry], admin_id: &str) -> u64 {
    entries
        .iter()
        .filter(|entry| entry.admin_id == admin_id)
        .map(|entry| u64::from(entry.hours))
        .sum()
}
