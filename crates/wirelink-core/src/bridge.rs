//! Wiring of the bridge components from configuration.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::AppConfig;
use crate::paths::AppPaths;
use crate::sharing::{LinkSharer, LocalShareBackend};
use crate::wire::{FileSessionStore, SessionManager, WireClient, WireTransport};

/// Fully wired bridge: sessions, Wire client, share backend and link sharer.
#[derive(Debug, Clone)]
pub struct Bridge {
    sessions: SessionManager,
    client: WireClient,
    files: Arc<LocalShareBackend>,
    links: LinkSharer,
}

impl Bridge {
    /// Build the bridge from configuration and resolved paths.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the session
    /// store cannot be opened.
    pub fn open(config: &AppConfig, paths: &AppPaths) -> Result<Self> {
        let transport = WireTransport::new(config.runtime.request_timeout(), config.wire.user_agent.as_str())
            .context("building Wire HTTP client")?;
        let store = FileSessionStore::open(paths.sessions_file())
            .with_context(|| format!("opening session store {}", paths.sessions_file().display()))?;
        let sessions = SessionManager::new(transport, Arc::new(store), Some(config.wire.api_url.as_str()));
        let client = WireClient::new(sessions.clone());

        let files = Arc::new(
            LocalShareBackend::new(&paths.files_dir, &paths.data_dir, &config.sharing.public_url)
                .with_default_expiration(config.sharing.default_expiration_days),
        );
        let links = LinkSharer::new(client.clone(), files.clone());

        log::debug!("bridge ready: {paths}");
        Ok(Self {
            sessions,
            client,
            files,
            links,
        })
    }

    /// Session manager.
    #[must_use]
    pub const fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Wire API client.
    #[must_use]
    pub const fn client(&self) -> &WireClient {
        &self.client
    }

    /// Local share backend.
    #[must_use]
    pub fn files(&self) -> &LocalShareBackend {
        &self.files
    }

    /// Link sharer.
    #[must_use]
    pub const fn links(&self) -> &LinkSharer {
        &self.links
    }
}
