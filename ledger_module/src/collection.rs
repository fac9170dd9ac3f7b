use std::fs;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::error::LedgerError;

/// A persisted collection stored as one JSON snapshot file.
///
/// All access goes through [`Collection::lock`], so a read followed by a write
/// on the same guard is never interleaved with another writer of this
/// collection. Writes are staged to a sibling temp file and renamed into
/// place; a failed write leaves the previous snapshot on disk.
#[derive(Debug)]
pub struct Collection<T> {
    name: &'static str,
    path: PathBuf,
    lock: Mutex<()>,
    _snapshot: PhantomData<fn() -> T>,
}

/// Exclusive access to one collection for the lifetime of the guard.
pub struct CollectionGuard<'a, T> {
    collection: &'a Collection<T>,
    _guard: MutexGuard<'a, ()>,
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(name: &'static str, path: impl Into<PathBuf>) -> Self {
        Self {
            name,
            path: path.into(),
            lock: Mutex::new(()),
            _snapshot: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock(&self) -> Result<CollectionGuard<'_, T>, LedgerError> {
        let guard = self
            .lock
            .lock()
            .map_err(|_| LedgerError::LockPoisoned(self.name))?;
        Ok(CollectionGuard {
            collection: self,
            _guard: guard,
        })
    }

    pub fn read(&self) -> Result<T, LedgerError> {
        self.lock()?.read()
    }

    pub fn write(&self, snapshot: &T) -> Result<(), LedgerError> {
        self.lock()?.write(snapshot)
    }

    /// Atomic read-modify-write of the whole snapshot.
    pub fn update<O>(&self, apply: impl FnOnce(&mut T) -> O) -> Result<O, LedgerError> {
        let guard = self.lock()?;
        let mut snapshot = guard.read()?;
        let output = apply(&mut snapshot);
        guard.write(&snapshot)?;
        Ok(output)
    }
}

impl<'a, T> CollectionGuard<'a, T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn read(&self) -> Result<T, LedgerError> {
        load_snapshot(self.collection.name, &self.collection.path)
    }

    pub fn write(&self, snapshot: &T) -> Result<(), LedgerError> {
        self.stage(snapshot)?.commit()
    }

    pub(crate) fn stage(&self, snapshot: &T) -> Result<StagedWrite, LedgerError> {
        stage_snapshot(self.collection.name, &self.collection.path, snapshot)
    }
}

/// A fully written temp file waiting to be renamed over its target.
#[derive(Debug)]
pub(crate) struct StagedWrite {
    temp: PathBuf,
    target: PathBuf,
}

impl StagedWrite {
    /// The temp file is removed when the rename fails.
    pub(crate) fn commit(self) -> Result<(), LedgerError> {
        fs::rename(&self.temp, &self.target).map_err(|err| {
            let _ = fs::remove_file(&self.temp);
            LedgerError::io(&self.target, err)
        })
    }

    pub(crate) fn discard(self) {
        let _ = fs::remove_file(&self.temp);
    }
}

/// Commits every staged write or none of them.
///
/// Each live target is copied to a `.bak` sibling first. If a rename fails,
/// targets already replaced get their copy back (or are removed when there
/// was no live file) and the remaining temp files are discarded.
pub(crate) fn commit_all(staged: Vec<StagedWrite>) -> Result<(), LedgerError> {
    let mut asides = Vec::with_capacity(staged.len());
    let mut failure = None;
    for write in &staged {
        match set_aside(&write.target) {
            Ok(aside) => asides.push(aside),
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }
    if let Some(err) = failure {
        remove_asides(&asides);
        staged.into_iter().for_each(StagedWrite::discard);
        return Err(err);
    }

    let targets: Vec<PathBuf> = staged.iter().map(|write| write.target.clone()).collect();
    let mut pending = staged.into_iter();
    let mut committed = 0;
    while let Some(write) = pending.next() {
        if let Err(err) = write.commit() {
            pending.for_each(StagedWrite::discard);
            for (target, aside) in targets.iter().zip(&asides).take(committed) {
                roll_back(target, aside.as_deref());
            }
            remove_asides(&asides);
            return Err(err);
        }
        committed += 1;
    }

    remove_asides(&asides);
    Ok(())
}

fn set_aside(target: &Path) -> Result<Option<PathBuf>, LedgerError> {
    match fs::symlink_metadata(target) {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(LedgerError::io(target, err)),
    }
    let aside = sibling_path(target, ".bak");
    fs::copy(target, &aside).map_err(|err| {
        let _ = fs::remove_file(&aside);
        LedgerError::io(target, err)
    })?;
    Ok(Some(aside))
}

fn roll_back(target: &Path, aside: Option<&Path>) {
    let result = match aside {
        Some(aside) => fs::rename(aside, target),
        None => fs::remove_file(target),
    };
    if let Err(err) = result {
        warn!("failed to roll back {}: {}", target.display(), err);
    }
}

fn remove_asides(asides: &[Option<PathBuf>]) {
    for aside in asides.iter().flatten() {
        let _ = fs::remove_file(aside);
    }
}

/// Missing or empty files read as the default snapshot.
pub(crate) fn load_snapshot<T>(name: &'static str, path: &Path) -> Result<T, LedgerError>
where
    T: DeserializeOwned + Default,
{
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
        Err(err) => return Err(LedgerError::io(path, err)),
    };
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    parse_snapshot(name, path, &content)
}

/// Like [`load_snapshot`] but the file must exist.
pub(crate) fn load_required<T>(name: &'static str, path: &Path) -> Result<T, LedgerError>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path).map_err(|err| LedgerError::io(path, err))?;
    parse_snapshot(name, path, &content)
}

pub(crate) fn write_snapshot<T: Serialize>(
    name: &'static str,
    path: &Path,
    snapshot: &T,
) -> Result<(), LedgerError> {
    stage_snapshot(name, path, snapshot)?.commit()
}

fn parse_snapshot<T: DeserializeOwned>(
    name: &'static str,
    path: &Path,
    content: &str,
) -> Result<T, LedgerError> {
    serde_json::from_str(content).map_err(|source| LedgerError::Corrupt {
        collection: name,
        path: path.to_path_buf(),
        source,
    })
}

fn stage_snapshot<T: Serialize>(
    name: &'static str,
    target: &Path,
    snapshot: &T,
) -> Result<StagedWrite, LedgerError> {
    let json = serde_json::to_string_pretty(snapshot).map_err(|source| LedgerError::Serialize {
        collection: name,
        source,
    })?;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|err| LedgerError::io(parent, err))?;
    }

    let temp = temp_path(target);
    let result = fs::File::create(&temp).and_then(|mut file| {
        file.write_all(json.as_bytes())?;
        file.sync_all()
    });
    if let Err(err) = result {
        let _ = fs::remove_file(&temp);
        return Err(LedgerError::io(&temp, err));
    }

    Ok(StagedWrite {
        temp,
        target: target.to_path_buf(),
    })
}

fn temp_path(target: &Path) -> PathBuf {
    sibling_path(target, ".tmp")
}

fn sibling_path(target: &Path, extension: &str) -> PathBuf {
    let mut file_name = target
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    file_name.push(extension);
    target.with_file_name(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_reads_as_default() {
        let temp = TempDir::new().expect("tempdir");
        let collection: Collection<Vec<String>> =
            Collection::new("names", temp.path().join("names.json"));

        assert!(collection.read().expect("read").is_empty());
    }

    #[test]
    fn update_persists_and_leaves_no_temp_file() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("names.json");
        let collection: Collection<Vec<String>> = Collection::new("names", &path);

        let len = collection
            .update(|names| {
                names.push("budi".to_string());
                names.len()
            })
            .expect("update");

        assert_eq!(len, 1);
        assert_eq!(collection.read().expect("read"), vec!["budi".to_string()]);
        assert!(!temp.path().join("names.json.tmp").exists());
    }

    #[test]
    fn corrupt_snapshot_is_reported_and_not_overwritten() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("names.json");
        fs::write(&path, "{not json").expect("seed");
        let collection: Collection<Vec<String>> = Collection::new("names", &path);

        let err = collection
            .update(|names| names.push("x".to_string()))
            .expect_err("corrupt");

        assert!(matches!(err, LedgerError::Corrupt { collection: "names", .. }));
        assert_eq!(fs::read_to_string(&path).expect("read"), "{not json");
    }

    #[test]
    fn failed_commit_rolls_back_earlier_writes() {
        let temp = TempDir::new().expect("tempdir");
        let first = temp.path().join("first.json");
        let second = temp.path().join("second.json");
        let third = temp.path().join("third.json");
        fs::write(&first, "[\"old\"]").expect("seed");

        let staged = vec![
            stage_snapshot("first", &first, &vec!["new"]).expect("stage"),
            stage_snapshot("second", &second, &vec!["new"]).expect("stage"),
            stage_snapshot("third", &third, &vec!["new"]).expect("stage"),
        ];
        fs::remove_file(temp_path(&second)).expect("drop temp");

        let err = commit_all(staged).expect_err("second rename fails");

        assert!(matches!(err, LedgerError::Io { .. }));
        assert_eq!(fs::read_to_string(&first).expect("read"), "[\"old\"]");
        assert!(!second.exists());
        assert!(!third.exists());
        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .expect("read dir")
            .filter_map(|item| item.ok())
            .map(|item| item.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp") || name.ends_with(".bak"))
            .collect();
        assert!(leftovers.is_empty(), "leftovers: {:?}", leftovers);
    }

    #[test]
    fn commit_all_replaces_every_target() {
        let temp = TempDir::new().expect("tempdir");
        let first = temp.path().join("first.json");
        let second = temp.path().join("second.json");
        fs::write(&first, "[]").expect("seed");

        let staged = vec![
            stage_snapshot("first", &first, &vec!["a"]).expect("stage"),
            stage_snapshot("second", &second, &vec!["b"]).expect("stage"),
        ];
        commit_all(staged).expect("commit");

        let first_read: Vec<String> = load_required("first", &first).expect("first");
        let second_read: Vec<String> = load_required("second", &second).expect("second");
        assert_eq!(first_read, vec!["a".to_string()]);
        assert_eq!(second_read, vec!["b".to_string()]);
        assert!(!temp.path().join("first.json.bak").exists());
    }
}
