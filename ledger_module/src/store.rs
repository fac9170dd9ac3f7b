use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use crate::collection::Collection;
use crate::error::LedgerError;
use crate::types::{sum_hours, Admin, Entry, ProcessState};

pub const ADMINS_FILE: &str = "admins.json";
pub const ENTRIES_FILE: &str = "entries.json";
pub const PROCESS_STATE_FILE: &str = "process_state.json";
pub const BACKUPS_DIR: &str = "backups";

/// Result of registering an admin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminChange {
    Added,
    Renamed { previous: String },
    Unchanged,
}

/// Single-writer store over the three ledger collections.
///
/// This is the only component allowed to read-modify-write the collections.
/// Every composed operation (`add_entry`, `add_admin`, ...) runs inside the
/// owning collection's lock.
#[derive(Debug)]
pub struct LedgerStore {
    pub(crate) root: PathBuf,
    pub(crate) admins: Collection<Vec<Admin>>,
    pub(crate) entries: Collection<Vec<Entry>>,
    pub(crate) process_state: Collection<ProcessState>,
}

impl LedgerStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| LedgerError::io(&root, err))?;
        Ok(Self {
            admins: Collection::new("admins", root.join(ADMINS_FILE)),
            entries: Collection::new("entries", root.join(ENTRIES_FILE)),
            process_state: Collection::new("process_state", root.join(PROCESS_STATE_FILE)),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn admins(&self) -> Result<Vec<Admin>, LedgerError> {
        self.admins.read()
    }

    pub fn admin(&self, id: &str) -> Result<Option<Admin>, LedgerError> {
        Ok(self.admins.read()?.into_iter().find(|admin| admin.id == id))
    }

    /// Registers an admin, or renames it in place when the id already exists.
    pub fn add_admin(&self, admin: Admin) -> Result<AdminChange, LedgerError> {
        let id = admin.id.trim().to_string();
        if id.is_empty() {
            return Err(LedgerError::InvalidAdmin("admin id is empty".to_string()));
        }
        let display_name = match admin.display_name.trim() {
            "" => id.clone(),
            name => name.to_string(),
        };

        let change = self.admins.update(|admins| {
            match admins.iter().position(|existing| existing.id == id) {
                Some(index) if admins[index].display_name == display_name => {
                    AdminChange::Unchanged
                }
                Some(index) => AdminChange::Renamed {
                    previous: std::mem::replace(
                        &mut admins[index].display_name,
                        display_name.clone(),
                    ),
                },
                None => {
                    admins.push(Admin::new(id.clone(), display_name.clone()));
                    AdminChange::Added
                }
            }
        })?;
        info!("ledger admin {} ({}): {:?}", id, display_name, change);
        Ok(change)
    }

    pub fn remove_admin(&self, id: &str) -> Result<Option<Admin>, LedgerError> {
        let removed = self.admins.update(|admins| {
            admins
                .iter()
                .position(|admin| admin.id == id)
                .map(|index| admins.remove(index))
        })?;
        if removed.is_some() {
            info!("ledger admin {} removed", id);
        }
        Ok(removed)
    }

    pub fn entries(&self) -> Result<Vec<Entry>, LedgerError> {
        self.entries.read()
    }

    pub fn add_entry(&self, entry: Entry) -> Result<(), LedgerError> {
        let summary = format!(
            "admin={} order={} hours={}",
            entry.admin_id,
            entry.order_number.as_deref().unwrap_or("-"),
            entry.hours
        );
        self.entries.update(|entries| entries.push(entry))?;
        info!("ledger entry appended: {}", summary);
        Ok(())
    }

    pub fn total_hours(&self, admin_id: &str) -> Result<u64, LedgerError> {
        Ok(sum_hours(&self.entries.read()?, admin_id))
    }

    pub fn totals(&self) -> Result<BTreeMap<String, u64>, LedgerError> {
        let mut totals = BTreeMap::new();
        for entry in self.entries.read()? {
            *totals.entry(entry.admin_id).or_insert(0) += u64::from(entry.hours);
        }
        Ok(totals)
    }

    /// Removes entries whose timestamp is older than `now - max_age`.
    pub fn cleanup_entries(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<usize, LedgerError> {
        let cutoff = now - max_age;
        let removed = self.entries.update(|entries| {
            let before = entries.len();
            entries.retain(|entry| entry.timestamp >= cutoff);
            before - entries.len()
        })?;
        info!("ledger cleanup removed {} entries older than {}", removed, cutoff);
        Ok(removed)
    }

    pub fn process_state(&self) -> Result<ProcessState, LedgerError> {
        self.process_state.read()
    }

    /// Returns whether the flag actually changed.
    pub fn set_paused(&self, paused: bool) -> Result<bool, LedgerError> {
        self.process_state.update(|state| {
            let changed = state.paused != paused;
            state.paused = paused;
            changed
        })
    }
}
