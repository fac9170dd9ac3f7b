use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt {collection} snapshot at {}: {source}", path.display())]
    Corrupt {
        collection: &'static str,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize {collection}: {source}")]
    Serialize {
        collection: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
    #[error("invalid admin: {0}")]
    InvalidAdmin(String),
}

impl LedgerError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        LedgerError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
