//! Share backend over a local folder tree.
//!
//! Each user owns `<root_dir>/<user_id>/`. Node ids are assigned by
//! [`LocalShareBackend::index_user_folder`] and kept stable across re-indexing
//! as long as the relative path does not change. The node index and the
//! share list live as JSON documents in the data directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{Days, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::CoreError;
use crate::sharing::{NewShare, NodeKind, Share, ShareBackend, StorageNode, materialize};

/// Node index file name inside the data directory.
pub const NODES_FILE: &str = "nodes.json";
/// Share list file name inside the data directory.
pub const SHARES_FILE: &str = "shares.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct NodeIndex {
    next_id: u64,
    users: BTreeMap<String, Vec<StorageNode>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ShareList {
    next_id: u64,
    shares: Vec<Share>,
}

/// Share backend for files stored under a local root directory.
#[derive(Debug)]
pub struct LocalShareBackend {
    root_dir: PathBuf,
    data_dir: PathBuf,
    public_url: String,
    default_expiration_days: Option<u64>,
    guard: Mutex<()>,
}

impl LocalShareBackend {
    /// Create a backend. Nothing is read until the first call.
    #[must_use]
    pub fn new(root_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>, public_url: &str) -> Self {
        Self {
            root_dir: root_dir.into(),
            data_dir: data_dir.into(),
            public_url: public_url.trim_end_matches('/').to_string(),
            default_expiration_days: None,
            guard: Mutex::new(()),
        }
    }

    /// Apply an expiration (in days) to shares created without one.
    #[must_use]
    pub const fn with_default_expiration(mut self, days: Option<u64>) -> Self {
        self.default_expiration_days = days;
        self
    }

    /// Root of the shared folder tree.
    #[must_use]
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Folder holding `user_id`'s files.
    ///
    /// # Errors
    ///
    /// Returns an error if the user id is empty, is `.` or `..`, or contains
    /// a path separator.
    pub fn user_dir(&self, user_id: &str) -> Result<PathBuf, CoreError> {
        let plain = !user_id.is_empty()
            && user_id != "."
            && user_id != ".."
            && !user_id.contains(['/', '\\']);
        if !plain {
            return Err(CoreError::Path(format!("invalid user id: {user_id:?}")));
        }
        Ok(self.root_dir.join(user_id))
    }

    /// Scan `user_id`'s folder and refresh the node index.
    ///
    /// Known paths keep their id, new paths get fresh ids and vanished
    /// paths are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder or the index cannot be read or written.
    pub fn index_user_folder(&self, user_id: &str) -> Result<Vec<StorageNode>, CoreError> {
        let user_dir = self.user_dir(user_id)?;
        let _guard = self.lock()?;

        fs::create_dir_all(&user_dir)?;
        let mut found = Vec::new();
        scan(&user_dir, "", &mut found)?;
        found.sort_by(|a, b| a.0.cmp(&b.0));

        let mut index: NodeIndex = self.read_doc(NODES_FILE)?;
        let known: BTreeMap<String, u64> = index
            .users
            .get(user_id)
            .into_iter()
            .flatten()
            .map(|node| (node.path.clone(), node.id))
            .collect();

        let mut nodes = Vec::with_capacity(found.len());
        for (path, kind) in found {
            let id = known.get(&path).copied().unwrap_or_else(|| {
                index.next_id += 1;
                index.next_id
            });
            let name = path.rsplit('/').next().unwrap_or(&path).to_string();
            nodes.push(StorageNode { id, name, kind, path });
        }

        log::debug!("indexed {} nodes for {user_id}", nodes.len());
        index.users.insert(user_id.to_string(), nodes.clone());
        self.write_doc(NODES_FILE, &index)?;
        Ok(nodes)
    }

    /// Indexed nodes of `user_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read.
    pub fn list(&self, user_id: &str) -> Result<Vec<StorageNode>, CoreError> {
        let _guard = self.lock()?;
        let mut index: NodeIndex = self.read_doc(NODES_FILE)?;
        Ok(index.users.remove(user_id).unwrap_or_default())
    }

    /// All persisted shares.
    ///
    /// # Errors
    ///
    /// Returns an error if the share list cannot be read.
    pub fn shares(&self) -> Result<Vec<Share>, CoreError> {
        let _guard = self.lock()?;
        let list: ShareList = self.read_doc(SHARES_FILE)?;
        Ok(list.shares)
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, CoreError> {
        self.guard
            .lock()
            .map_err(|_| CoreError::Storage("share backend lock poisoned".to_string()))
    }

    fn read_doc<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T, CoreError> {
        let path = self.data_dir.join(name);
        if !path.exists() {
            return Ok(T::default());
        }
        let content = fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map_err(|e| CoreError::Serialization(format!("parsing {}: {e}", path.display())))
    }

    fn write_doc<T: Serialize>(&self, name: &str, doc: &T) -> Result<(), CoreError> {
        fs::create_dir_all(&self.data_dir)?;
        let json = serde_json::to_string_pretty(doc)
            .map_err(|e| CoreError::Serialization(format!("serializing {name}: {e}")))?;
        fs::write(self.data_dir.join(name), json)?;
        Ok(())
    }

    fn default_expiration(&self) -> Option<NaiveDate> {
        let days = self.default_expiration_days?;
        Utc::now().date_naive().checked_add_days(Days::new(days))
    }
}

fn scan(dir: &Path, prefix: &str, found: &mut Vec<(String, NodeKind)>) -> Result<(), CoreError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            found.push((path.clone(), NodeKind::Folder));
            scan(&entry.path(), &path, found)?;
        } else if file_type.is_file() {
            found.push((path, NodeKind::File));
        }
    }
    Ok(())
}

impl ShareBackend for LocalShareBackend {
    fn resolve_node(&self, user_id: &str, node_id: u64) -> Result<Option<StorageNode>, CoreError> {
        Ok(self.list(user_id)?.into_iter().find(|node| node.id == node_id))
    }

    fn read_file(&self, user_id: &str, node: &StorageNode) -> Result<Vec<u8>, CoreError> {
        if node.kind != NodeKind::File {
            return Err(CoreError::Storage(format!("{} is a folder", node.name)));
        }
        let path = self.user_dir(user_id)?.join(&node.path);
        Ok(fs::read(path)?)
    }

    fn create_share(&self, user_id: &str, share: NewShare) -> Result<Share, CoreError> {
        let default_expiration = self.default_expiration();
        let _guard = self.lock()?;
        let mut list: ShareList = self.read_doc(SHARES_FILE)?;
        list.next_id += 1;
        let share = materialize(list.next_id, user_id, share, default_expiration);
        list.shares.push(share.clone());
        self.write_doc(SHARES_FILE, &list)?;
        Ok(share)
    }

    fn update_share(&self, share: &Share) -> Result<(), CoreError> {
        let _guard = self.lock()?;
        let mut list: ShareList = self.read_doc(SHARES_FILE)?;
        let stored = list
            .shares
            .iter_mut()
            .find(|stored| stored.id == share.id)
            .ok_or_else(|| CoreError::Storage(format!("unknown share {}", share.id)))?;
        *stored = share.clone();
        self.write_doc(SHARES_FILE, &list)
    }

    fn share_url(&self, share: &Share) -> String {
        format!("{}/s/{}", self.public_url, share.token)
    }
}
