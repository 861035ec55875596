//! Wire API client and session handling.
//!
//! This module provides:
//! - An authenticated HTTP transport with uniform error mapping
//! - Per-user session storage and the token refresh lifecycle
//! - Typed operations (conversations, teams, avatars, messages, assets)

pub mod client;
pub mod message;
pub mod models;
pub mod session;
pub mod store;
pub mod transport;

pub use client::WireClient;
pub use message::{MessageEncoder, OutgoingMessage, PlaintextOtrEncoder};
pub use models::{
    ApiRequest, ApiResponse, Avatar, ConnectionInfo, ConversationRef, CookieMaterial, LoginGrant,
    RawBody, RefreshGrant, Session,
};
pub use session::{DEFAULT_API_URL, SessionManager, extract_cookie};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
pub use transport::{DEFAULT_USER_AGENT, WireTransport, encode_query};
