//! Error types for the core library.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Core library error type.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A configuration-related error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A path resolution or validation error.
    #[error("path error: {0}")]
    Path(String),

    /// An I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A storage backend error (session store, node index, shares).
    #[error("storage error: {0}")]
    Storage(String),

    /// A generic error for other cases.
    #[error("error: {0}")]
    Other(String),
}

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Failure of an operation against the Wire API or of the orchestration around it.
///
/// Every variant renders as `{"error": "<message>"}` when serialized, which is
/// the shape the inbound endpoints return to the UI layer.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request used a method other than GET, POST, PUT or DELETE.
    #[error("Bad HTTP method")]
    BadMethod,

    /// The remote service answered with a status of 400 or above.
    ///
    /// The real status and body are discarded.
    #[error("Bad credentials")]
    BadCredentials,

    /// Login was rejected by the remote service.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The remote response was missing required material (cookie, JSON body).
    #[error("Invalid response")]
    InvalidResponse,

    /// The remote service refused to issue a new access token.
    #[error("Access token refresh refused")]
    RefreshRefused,

    /// None of the requested files could be resolved.
    #[error("Files not found")]
    FilesNotFound,

    /// No Wire account is connected for this user.
    #[error("Not connected to Wire")]
    NotConnected,

    /// Network or transport-level failure.
    #[error("{0}")]
    Transport(String),

    /// Local storage failure while carrying out the operation.
    #[error("{0}")]
    Storage(#[from] CoreError),
}

impl ApiError {
    /// The user-facing message carried in the `error` field.
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl Serialize for ApiError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("error", &self.message())?;
        map.end()
    }
}

/// Result of any remote-facing operation.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
