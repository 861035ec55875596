//! In-process share backend.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{Days, NaiveDate, Utc};

use crate::CoreError;
use crate::sharing::{NewShare, NodeKind, Share, ShareBackend, StorageNode, materialize};

#[derive(Debug, Default)]
struct MemoryState {
    nodes: BTreeMap<(String, u64), (StorageNode, Vec<u8>)>,
    shares: Vec<Share>,
    next_share_id: u64,
}

/// Share backend holding nodes and shares in memory.
#[derive(Debug)]
pub struct MemoryShareBackend {
    state: Mutex<MemoryState>,
    public_url: String,
    default_expiration_days: Option<u64>,
}

impl MemoryShareBackend {
    /// Create an empty backend serving links under `public_url`.
    #[must_use]
    pub fn new(public_url: &str) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            public_url: public_url.trim_end_matches('/').to_string(),
            default_expiration_days: None,
        }
    }

    /// Apply an expiration to shares created without one.
    #[must_use]
    pub const fn with_default_expiration(mut self, days: u64) -> Self {
        self.default_expiration_days = Some(days);
        self
    }

    /// Add a file to `user_id`'s namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend lock is poisoned.
    pub fn add_file(
        &self,
        user_id: &str,
        id: u64,
        name: &str,
        contents: impl Into<Vec<u8>>,
    ) -> Result<(), CoreError> {
        self.add_node(user_id, id, name, NodeKind::File, contents.into())
    }

    /// Add a folder to `user_id`'s namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend lock is poisoned.
    pub fn add_folder(&self, user_id: &str, id: u64, name: &str) -> Result<(), CoreError> {
        self.add_node(user_id, id, name, NodeKind::Folder, Vec::new())
    }

    /// Snapshot of all shares.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend lock is poisoned.
    pub fn shares(&self) -> Result<Vec<Share>, CoreError> {
        Ok(self.lock()?.shares.clone())
    }

    fn add_node(
        &self,
        user_id: &str,
        id: u64,
        name: &str,
        kind: NodeKind,
        contents: Vec<u8>,
    ) -> Result<(), CoreError> {
        let node = StorageNode {
            id,
            name: name.to_string(),
            kind,
            path: name.to_string(),
        };
        self.lock()?
            .nodes
            .insert((user_id.to_string(), id), (node, contents));
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, CoreError> {
        self.state
            .lock()
            .map_err(|_| CoreError::Storage("share backend lock poisoned".to_string()))
    }

    fn default_expiration(&self) -> Option<NaiveDate> {
        let days = self.default_expiration_days?;
        Utc::now().date_naive().checked_add_days(Days::new(days))
    }
}

impl ShareBackend for MemoryShareBackend {
    fn resolve_node(&self, user_id: &str, node_id: u64) -> Result<Option<StorageNode>, CoreError> {
        Ok(self
            .lock()?
            .nodes
            .get(&(user_id.to_string(), node_id))
            .map(|(node, _)| node.clone()))
    }

    fn read_file(&self, user_id: &str, node: &StorageNode) -> Result<Vec<u8>, CoreError> {
        let state = self.lock()?;
        match state.nodes.get(&(user_id.to_string(), node.id)) {
            Some((stored, contents)) if stored.kind == NodeKind::File => Ok(contents.clone()),
            Some(_) => Err(CoreError::Storage(format!("{} is a folder", node.name))),
            None => Err(CoreError::Storage(format!("no node {} for {user_id}", node.id))),
        }
    }

    fn create_share(&self, user_id: &str, share: NewShare) -> Result<Share, CoreError> {
        let default_expiration = self.default_expiration();
        let mut state = self.lock()?;
        state.next_share_id += 1;
        let share = materialize(state.next_share_id, user_id, share, default_expiration);
        state.shares.push(share.clone());
        Ok(share)
    }

    fn update_share(&self, share: &Share) -> Result<(), CoreError> {
        let mut state = self.lock()?;
        let stored = state
            .shares
            .iter_mut()
            .find(|stored| stored.id == share.id)
            .ok_or_else(|| CoreError::Storage(format!("unknown share {}", share.id)))?;
        *stored = share.clone();
        Ok(())
    }

    fn share_url(&self, share: &Share) -> String {
        format!("{}/s/{}", self.public_url, share.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharing::permissions;

    fn new_share(node: StorageNode) -> NewShare {
        NewShare {
            node,
            permissions: permissions::READ,
            label: "Wire (Ops)".to_string(),
            expiration: None,
            password: None,
        }
    }

    #[test]
    fn nodes_are_scoped_per_user() {
        let backend = MemoryShareBackend::new("https://files.example.com");
        backend.add_file("alice", 1, "a.txt", "alpha").unwrap();

        assert!(backend.resolve_node("alice", 1).unwrap().is_some());
        assert!(backend.resolve_node("bob", 1).unwrap().is_none());

        let node = backend.resolve_node("alice", 1).unwrap().unwrap();
        assert_eq!(backend.read_file("alice", &node).unwrap(), b"alpha");
    }

    #[test]
    fn folders_cannot_be_read() {
        let backend = MemoryShareBackend::new("https://files.example.com");
        backend.add_folder("alice", 2, "docs").unwrap();
        let node = backend.resolve_node("alice", 2).unwrap().unwrap();
        assert!(backend.read_file("alice", &node).is_err());
    }

    #[test]
    fn default_expiration_applies_until_cleared() {
        let backend = MemoryShareBackend::new("https://files.example.com/").with_default_expiration(7);
        backend.add_file("alice", 1, "a.txt", "alpha").unwrap();
        let node = backend.resolve_node("alice", 1).unwrap().unwrap();

        let mut share = backend.create_share("alice", new_share(node)).unwrap();
        assert!(share.expiration.is_some());
        assert_eq!(
            backend.share_url(&share),
            format!("https://files.example.com/s/{}", share.token)
        );

        share.expiration = None;
        backend.update_share(&share).unwrap();
        assert_eq!(backend.shares().unwrap()[0].expiration, None);
    }
}
