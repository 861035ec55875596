//! Share links for host-platform files, delivered as Wire messages.
//!
//! The host platform is reached through [`ShareBackend`]: node lookup in a
//! user's namespace, file contents, and share persistence. [`LinkSharer`]
//! turns a batch of node ids into shares and posts them as one message.

pub mod local;
pub mod memory;
pub mod orchestrator;

use std::fmt::{self, Write as _};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::CoreError;
use crate::wire::ConversationRef;

pub use local::LocalShareBackend;
pub use memory::MemoryShareBackend;
pub use orchestrator::{LinkSharer, compose_links_message};

/// Share permission bits.
pub mod permissions {
    /// Open and download.
    pub const READ: u8 = 1;
    /// Modify contents.
    pub const UPDATE: u8 = 2;
}

/// Length of generated share tokens.
pub const TOKEN_LENGTH: usize = 15;

/// Kind of a storage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Regular file.
    File,
    /// Directory.
    Folder,
}

/// File or folder in a user's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageNode {
    /// Stable numeric id.
    pub id: u64,
    /// Base name, shown in link messages.
    pub name: String,
    /// File or folder.
    pub kind: NodeKind,
    /// Path relative to the user's root.
    pub path: String,
}

/// Permission requested for a batch of links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Read only.
    #[default]
    View,
    /// Read and update.
    Edit,
}

impl Permission {
    /// Parse a permission name. Anything but `edit` is view.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("edit") {
            Self::Edit
        } else {
            Self::View
        }
    }

    /// Share permission bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        match self {
            Self::View => permissions::READ,
            Self::Edit => permissions::READ | permissions::UPDATE,
        }
    }
}

/// Share to be created for a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewShare {
    /// Shared node.
    pub node: StorageNode,
    /// Permission bits.
    pub permissions: u8,
    /// Human readable label.
    pub label: String,
    /// Last day the link is valid.
    pub expiration: Option<NaiveDate>,
    /// Plaintext password; hashed by the backend.
    pub password: Option<String>,
}

/// Persisted share link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    /// Backend assigned id.
    pub id: u64,
    /// Public token used in the URL.
    pub token: String,
    /// Owning user.
    pub owner: String,
    /// Shared node id.
    pub node_id: u64,
    /// Shared node name.
    pub node_name: String,
    /// Permission bits.
    pub permissions: u8,
    /// Human readable label.
    pub label: String,
    /// Last day the link is valid.
    pub expiration: Option<NaiveDate>,
    /// SHA-256 hex digest of the password.
    pub password_hash: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Share {
    /// Whether the share allows updates.
    #[must_use]
    pub const fn can_update(&self) -> bool {
        self.permissions & permissions::UPDATE != 0
    }
}

/// One batch of links to post into a conversation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShareLinkRequest {
    /// Node ids in the sender's namespace.
    pub file_ids: Vec<u64>,
    /// Target conversation.
    pub conversation: ConversationRef,
    /// Text placed above the links.
    pub comment: String,
    /// Requested permission.
    pub permission: Permission,
    /// Last day the links are valid.
    pub expiration_date: Option<NaiveDate>,
    /// Password protecting the links.
    pub password: Option<String>,
}

/// Host-platform storage and share persistence.
pub trait ShareBackend: Send + Sync + fmt::Debug {
    /// Look up a node by id in the user's namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace cannot be read. Unknown ids are `Ok(None)`.
    fn resolve_node(&self, user_id: &str, node_id: u64) -> Result<Option<StorageNode>, CoreError>;

    /// Read the contents of a file node.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is not a file or cannot be read.
    fn read_file(&self, user_id: &str, node: &StorageNode) -> Result<Vec<u8>, CoreError>;

    /// Create a share. Backends may apply a default expiration when none is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the share cannot be persisted.
    fn create_share(&self, user_id: &str, share: NewShare) -> Result<Share, CoreError>;

    /// Persist changes to an existing share.
    ///
    /// # Errors
    ///
    /// Returns an error if the share is unknown or cannot be persisted.
    fn update_share(&self, share: &Share) -> Result<(), CoreError>;

    /// Public URL of a share.
    fn share_url(&self, share: &Share) -> String;
}

/// SHA-256 hex digest of a share password.
#[must_use]
pub fn hash_password(password: &str) -> String {
    Sha256::digest(password.as_bytes())
        .iter()
        .fold(String::with_capacity(64), |mut hex, byte| {
            let _ = write!(hex, "{byte:02x}");
            hex
        })
}

/// Random share token of [`TOKEN_LENGTH`] characters.
#[must_use]
pub fn generate_token() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(TOKEN_LENGTH)
        .collect()
}

/// Build a [`Share`] from a request, hashing its password.
pub(crate) fn materialize(
    id: u64,
    owner: &str,
    request: NewShare,
    default_expiration: Option<NaiveDate>,
) -> Share {
    Share {
        id,
        token: generate_token(),
        owner: owner.to_string(),
        node_id: request.node.id,
        node_name: request.node.name,
        permissions: request.permissions,
        label: request.label,
        expiration: request.expiration.or(default_expiration),
        password_hash: request.password.as_deref().map(hash_password),
        created_at: Utc::now(),
    }
}
