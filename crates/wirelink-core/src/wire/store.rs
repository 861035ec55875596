//! Per-user key-value storage backing Wire sessions.
//!
//! The session layer only needs a `get`/`set` capability. Two stores ship:
//! an in-process map and a JSON file in the data directory.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::CoreError;

/// Keys written by the session layer.
pub mod keys {
    /// Per-user base URL override.
    pub const URL: &str = "url";
    /// Bearer token.
    pub const TOKEN: &str = "token";
    /// Bare refresh cookie.
    pub const COOKIE: &str = "cookie";
    /// Full `Set-Cookie` header.
    pub const FULL_COOKIE: &str = "full-cookie";
    /// Token expiry (Unix seconds).
    pub const TOKEN_EXPIRES_AT: &str = "token_expires_at";
    /// Wire user id of the connected account.
    pub const USER_ID: &str = "user_id";
}

/// Get/set capability over per-user string values.
///
/// No transactions: concurrent writers for the same key race and the last
/// write wins.
pub trait SessionStore: Send + Sync + fmt::Debug {
    /// Read a value. Missing keys yield `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn get(&self, user_id: &str, key: &str) -> Result<Option<String>, CoreError>;

    /// Write a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn set(&self, user_id: &str, key: &str, value: &str) -> Result<(), CoreError>;
}

type UserValues = BTreeMap<String, BTreeMap<String, String>>;

/// In-process session store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    values: Mutex<UserValues>,
}

impl MemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, user_id: &str, key: &str) -> Result<Option<String>, CoreError> {
        let values = self.values.lock().map_err(|_| poisoned())?;
        Ok(values.get(user_id).and_then(|v| v.get(key)).cloned())
    }

    fn set(&self, user_id: &str, key: &str, value: &str) -> Result<(), CoreError> {
        let mut values = self.values.lock().map_err(|_| poisoned())?;
        values
            .entry(user_id.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Session store persisted as a JSON document.
///
/// Every `get` reads the file and every `set` merges into what is on disk
/// under the lock, so several processes can share one file. Writers in
/// different processes still race and the last write wins.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileSessionStore {
    /// File name used inside the data directory.
    pub const FILE_NAME: &str = "sessions.json";

    /// Open the store at `path`. A missing file reads as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let store = Self {
            path: path.into(),
            guard: Mutex::new(()),
        };
        store.read_doc()?;
        Ok(store)
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_doc(&self) -> Result<UserValues, CoreError> {
        if !self.path.exists() {
            return Ok(UserValues::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(UserValues::new());
        }
        serde_json::from_str(&content).map_err(|e| {
            CoreError::Serialization(format!("parsing {}: {e}", self.path.display()))
        })
    }

    fn write_doc(&self, values: &UserValues) -> Result<(), CoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(values)
            .map_err(|e| CoreError::Serialization(format!("serializing sessions: {e}")))?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, user_id: &str, key: &str) -> Result<Option<String>, CoreError> {
        let _guard = self.guard.lock().map_err(|_| poisoned())?;
        let mut values = self.read_doc()?;
        Ok(values.get_mut(user_id).and_then(|v| v.remove(key)))
    }

    fn set(&self, user_id: &str, key: &str, value: &str) -> Result<(), CoreError> {
        let _guard = self.guard.lock().map_err(|_| poisoned())?;
        let mut values = self.read_doc()?;
        values
            .entry(user_id.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self.write_doc(&values)
    }
}

fn poisoned() -> CoreError {
    CoreError::Storage("session store lock poisoned".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_isolates_users() {
        let store = MemorySessionStore::new();
        store.set("alice", keys::TOKEN, "a-token").unwrap();
        store.set("bob", keys::TOKEN, "b-token").unwrap();

        assert_eq!(store.get("alice", keys::TOKEN).unwrap().as_deref(), Some("a-token"));
        assert_eq!(store.get("bob", keys::TOKEN).unwrap().as_deref(), Some("b-token"));
        assert_eq!(store.get("carol", keys::TOKEN).unwrap(), None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(FileSessionStore::FILE_NAME);

        let store = FileSessionStore::open(&path).unwrap();
        store.set("alice", keys::COOKIE, "zuid-value").unwrap();
        store.set("alice", keys::TOKEN_EXPIRES_AT, "1700000000").unwrap();
        drop(store);

        let reopened = FileSessionStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("alice", keys::COOKIE).unwrap().as_deref(),
            Some("zuid-value")
        );
        assert_eq!(
            reopened.get("alice", keys::TOKEN_EXPIRES_AT).unwrap().as_deref(),
            Some("1700000000")
        );
    }

    #[test]
    fn file_stores_on_one_path_see_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FileSessionStore::FILE_NAME);
        let server = FileSessionStore::open(&path).unwrap();
        let cli = FileSessionStore::open(&path).unwrap();

        cli.set("alice", keys::TOKEN, "from-login").unwrap();
        assert_eq!(
            server.get("alice", keys::TOKEN).unwrap().as_deref(),
            Some("from-login")
        );

        server.set("bob", keys::TOKEN, "refreshed").unwrap();

        let reopened = FileSessionStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("alice", keys::TOKEN).unwrap().as_deref(),
            Some("from-login")
        );
        assert_eq!(
            reopened.get("bob", keys::TOKEN).unwrap().as_deref(),
            Some("refreshed")
        );
    }

    #[test]
    fn file_store_rejects_corrupt_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FileSessionStore::FILE_NAME);
        fs::write(&path, "not json").unwrap();

        let err = FileSessionStore::open(&path).unwrap_err();
        assert!(matches!(err, CoreError::Serialization(_)));
    }
}
