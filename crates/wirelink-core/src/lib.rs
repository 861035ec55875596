//! Core library for wirelink - a bridge between file hosting and Wire.
//!
//! This crate provides:
//! - Configuration loading and management
//! - XDG-compliant path resolution
//! - Schema and example config generation
//! - Wire API transport, token sessions and typed operations
//! - Share links for local files, posted as Wire messages
//! - Inline image rendering for avatars
//! - Common types and error handling

pub mod bridge;
pub mod config;
pub mod error;
pub mod kitty;
pub mod paths;
pub mod schema;
pub mod sharing;
pub mod wire;

pub use bridge::Bridge;
pub use config::{
    AppConfig, LogLevel, LoggingConfig, PathsConfig, RuntimeConfig, ServerConfig, SharingConfig,
    WireConfig,
};
pub use error::{ApiError, ApiResult, CoreError, Result};
pub use paths::{AppPaths, default_data_dir, default_state_dir};
pub use schema::{generate_example_config, generate_schema, write_generated_files};
pub use sharing::{
    LinkSharer, LocalShareBackend, MemoryShareBackend, Permission, Share, ShareBackend,
    ShareLinkRequest, StorageNode,
};
pub use wire::{
    ApiRequest, ApiResponse, Avatar, ConversationRef, MemorySessionStore, Session, SessionManager,
    SessionStore, WireClient, WireTransport,
};

/// Application name used for config directories and environment prefix.
pub const APP_NAME: &str = "wirelink";

/// Returns the environment variable prefix for this application.
#[must_use]
pub fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_prefix_is_upper_case() {
        assert_eq!(env_prefix(), "WIRELINK");
    }
}
