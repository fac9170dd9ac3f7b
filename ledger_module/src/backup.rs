use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::{info, warn};

use crate::collection::{commit_all, load_required, write_snapshot};
use crate::error::LedgerError;
use crate::store::{LedgerStore, ADMINS_FILE, BACKUPS_DIR, ENTRIES_FILE, PROCESS_STATE_FILE};
use crate::types::{Admin, Entry, ProcessState};

const LABEL_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";

/// A timestamped copy of all three collections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSet {
    pub label: String,
    pub dir: PathBuf,
    pub created_at: Option<DateTime<Utc>>,
}

impl BackupSet {
    fn from_dir(dir: PathBuf) -> Option<Self> {
        let label = dir.file_name()?.to_str()?.to_string();
        let complete = [ADMINS_FILE, ENTRIES_FILE, PROCESS_STATE_FILE]
            .iter()
            .all(|file| dir.join(file).is_file());
        if !complete {
            return None;
        }
        let created_at = parse_label(&label);
        Some(Self {
            label,
            dir,
            created_at,
        })
    }
}

impl LedgerStore {
    pub fn backups_dir(&self) -> PathBuf {
        self.root.join(BACKUPS_DIR)
    }

    /// Copies the current snapshot of every collection into a new timestamped
    /// backup directory. All three collection locks are held for the copy.
    pub fn backup(&self, now: DateTime<Utc>) -> Result<BackupSet, LedgerError> {
        let admins_guard = self.admins.lock()?;
        let entries_guard = self.entries.lock()?;
        let state_guard = self.process_state.lock()?;

        let admins = admins_guard.read()?;
        let entries = entries_guard.read()?;
        let state = state_guard.read()?;

        let backups_dir = self.backups_dir();
        let base_label = now.format(LABEL_FORMAT).to_string();
        let mut label = base_label.clone();
        let mut suffix = 1;
        while backups_dir.join(&label).exists() {
            label = format!("{}-{}", base_label, suffix);
            suffix += 1;
        }
        let dir = backups_dir.join(&label);
        fs::create_dir_all(&dir).map_err(|err| LedgerError::io(&dir, err))?;

        write_snapshot("admins", &dir.join(ADMINS_FILE), &admins)?;
        write_snapshot("entries", &dir.join(ENTRIES_FILE), &entries)?;
        write_snapshot("process_state", &dir.join(PROCESS_STATE_FILE), &state)?;

        info!(
            "ledger backup {} written ({} admins, {} entries)",
            label,
            admins.len(),
            entries.len()
        );
        Ok(BackupSet {
            label,
            dir,
            created_at: Some(now),
        })
    }

    /// Complete backup sets, oldest first.
    pub fn list_backups(&self) -> Result<Vec<BackupSet>, LedgerError> {
        let backups_dir = self.backups_dir();
        let read_dir = match fs::read_dir(&backups_dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(LedgerError::io(&backups_dir, err)),
        };

        let mut sets = Vec::new();
        for item in read_dir {
            let item = item.map_err(|err| LedgerError::io(&backups_dir, err))?;
            let path = item.path();
            if !path.is_dir() {
                continue;
            }
            match BackupSet::from_dir(path.clone()) {
                Some(set) => sets.push(set),
                None => warn!("ignoring incomplete backup at {}", path.display()),
            }
        }
        sets.sort_by(|a, b| {
            (a.created_at, label_sequence(&a.label), &a.label).cmp(&(
                b.created_at,
                label_sequence(&b.label),
                &b.label,
            ))
        });
        Ok(sets)
    }

    /// Restores the most recent backup set over the live collections.
    ///
    /// Every backup file is parsed and every replacement is staged before any
    /// live file is touched, so a bad backup leaves the live ledger intact.
    pub fn restore_latest(&self) -> Result<Option<BackupSet>, LedgerError> {
        let latest = match self.list_backups()?.pop() {
            Some(set) => set,
            None => return Ok(None),
        };

        let admins_guard = self.admins.lock()?;
        let entries_guard = self.entries.lock()?;
        let state_guard = self.process_state.lock()?;

        let admins: Vec<Admin> = load_required("admins", &latest.dir.join(ADMINS_FILE))?;
        let entries: Vec<Entry> = load_required("entries", &latest.dir.join(ENTRIES_FILE))?;
        let state: ProcessState =
            load_required("process_state", &latest.dir.join(PROCESS_STATE_FILE))?;

        let staged_admins = admins_guard.stage(&admins)?;
        let staged_entries = match entries_guard.stage(&entries) {
            Ok(staged) => staged,
            Err(err) => {
                staged_admins.discard();
                return Err(err);
            }
        };
        let staged_state = match state_guard.stage(&state) {
            Ok(staged) => staged,
            Err(err) => {
                staged_admins.discard();
                staged_entries.discard();
                return Err(err);
            }
        };

        commit_all(vec![staged_admins, staged_entries, staged_state])?;

        info!(
            "ledger restored from backup {} ({} admins, {} entries, paused={})",
            latest.label,
            admins.len(),
            entries.len(),
            state.paused
        );
        Ok(Some(latest))
    }
}

/// Same-instant backups get `-1`, `-2`, ... appended; the bare label is 0.
fn label_sequence(label: &str) -> u32 {
    label
        .split_once('-')
        .and_then(|(_, suffix)| suffix.parse().ok())
        .unwrap_or(0)
}

fn parse_label(label: &str) -> Option<DateTime<Utc>> {
    let stamp = label.split('-').next()?;
    NaiveDateTime::parse_from_str(stamp, LABEL_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
