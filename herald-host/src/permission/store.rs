//! Permission snapshot loading and level lookup

use super::{Level, ADMIN, GUEST, USER};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for reading a permission file
#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("Failed to read permission file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse permission file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Per-user entry in the permission file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Explicit level; absent or zero means the default user level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Level>,
}

impl UserRecord {
    pub fn with_level(level: Level) -> Self {
        Self { level: Some(level) }
    }

    /// Effective level of this user
    pub fn effective_level(&self) -> Level {
        self.level.filter(|l| *l > 0).unwrap_or(USER)
    }
}

/// Immutable authorization data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSnapshot {
    #[serde(default)]
    pub admins: HashSet<String>,
    #[serde(default)]
    pub users: HashMap<String, UserRecord>,
}

impl PermissionSnapshot {
    /// Snapshot with no admins and no users
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_admin(mut self, actor: impl Into<String>) -> Self {
        self.admins.insert(actor.into());
        self
    }

    pub fn with_user(mut self, actor: impl Into<String>, record: UserRecord) -> Self {
        self.users.insert(actor.into(), record);
        self
    }
}

/// How the last `load` went
#[derive(Debug)]
pub enum LoadStatus {
    /// File read and parsed
    Loaded,
    /// File absent; empty snapshot in use
    Defaulted,
    /// File unreadable or malformed; empty snapshot retained
    Malformed(PermissionError),
}

impl LoadStatus {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadStatus::Loaded)
    }
}

/// Answers level queries from a snapshot loaded once
///
/// Lookups are pure reads, so the store is shared as `Arc<PermissionStore>`
/// across concurrent dispatches without locking.
#[derive(Debug, Clone, Default)]
pub struct PermissionStore {
    snapshot: PermissionSnapshot,
    source: Option<PathBuf>,
}

impl PermissionStore {
    /// Create a store around an existing snapshot
    pub fn from_snapshot(snapshot: PermissionSnapshot) -> Self {
        Self {
            snapshot,
            source: None,
        }
    }

    /// Load the permission file at `path`
    ///
    /// Never fails: a missing file yields an empty snapshot with
    /// `LoadStatus::Defaulted`, an unreadable or malformed one yields an empty
    /// snapshot with `LoadStatus::Malformed`.
    pub fn load(path: impl AsRef<Path>) -> (Self, LoadStatus) {
        let path = path.as_ref();

        if !path.exists() {
            tracing::warn!(path = %path.display(), "Permission file not found, using empty defaults");
            return (Self::with_source(PermissionSnapshot::empty(), path), LoadStatus::Defaulted);
        }

        match Self::read(path) {
            Ok(snapshot) => {
                tracing::info!(
                    path = %path.display(),
                    admins = snapshot.admins.len(),
                    users = snapshot.users.len(),
                    "Permission file loaded"
                );
                (Self::with_source(snapshot, path), LoadStatus::Loaded)
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to load permission file");
                (
                    Self::with_source(PermissionSnapshot::empty(), path),
                    LoadStatus::Malformed(e),
                )
            }
        }
    }

    /// Read and parse a permission file
    pub fn read(path: impl AsRef<Path>) -> Result<PermissionSnapshot, PermissionError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| PermissionError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| PermissionError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn with_source(snapshot: PermissionSnapshot, path: &Path) -> Self {
        Self {
            snapshot,
            source: Some(path.to_path_buf()),
        }
    }

    /// Authorization level of `actor`
    pub fn level(&self, actor: &str) -> Level {
        if self.snapshot.admins.contains(actor) {
            return ADMIN;
        }
        self.snapshot
            .users
            .get(actor)
            .map(UserRecord::effective_level)
            .unwrap_or(GUEST)
    }

    /// The snapshot in use
    pub fn snapshot(&self) -> &PermissionSnapshot {
        &self.snapshot
    }

    /// File the snapshot was loaded from, if any
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}
