//! Data models for the Wire API layer.

use std::collections::BTreeMap;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ApiError, ApiResult};

/// Tokens are refreshed when they expire within this many seconds.
pub const REFRESH_MARGIN_SECS: i64 = 60;

/// Per-user connection state for the Wire API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// API base URL, without trailing slash (e.g. `https://prod-nginz-https.wire.com`).
    pub base_url: String,
    /// Short-lived bearer token.
    pub access_token: String,
    /// Bare `zuid` cookie value used to renew the access token.
    pub refresh_cookie: String,
    /// Unmodified `Set-Cookie` header, kept for replay.
    pub full_cookie: String,
    /// Token expiry (Unix seconds). `None` when unknown.
    pub token_expires_at: Option<i64>,
    /// Wire user id of the connected account, used as message sender.
    pub remote_user_id: String,
}

impl Session {
    /// Whether a bearer token is stored.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.access_token.is_empty()
    }

    /// Whether the token has to be renewed before the next request at `now`.
    ///
    /// Sessions without a refresh cookie or a known expiry never ask for a refresh.
    #[must_use]
    pub fn needs_refresh(&self, now: i64) -> bool {
        if self.refresh_cookie.is_empty() {
            return false;
        }
        self.token_expires_at
            .is_some_and(|expires_at| now > expires_at.saturating_sub(REFRESH_MARGIN_SECS))
    }
}

/// Description of a single call against the Wire API.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// Endpoint path relative to the base URL, without leading slash.
    pub endpoint: String,
    /// HTTP method. Only GET, POST, PUT and DELETE are dispatched.
    pub method: Method,
    /// Query parameters for GET, JSON body for the other methods.
    pub params: Map<String, Value>,
    /// Value of the `Content-Type` header.
    pub content_type: String,
    /// Decode the response as JSON (otherwise return raw bytes and headers).
    pub expect_json: bool,
    /// Send the `zuid` refresh cookie.
    pub use_cookie: bool,
    /// Pre-encoded body. Takes precedence over `params` for non-GET calls.
    pub raw_body: Option<Vec<u8>>,
}

impl ApiRequest {
    /// Default request content type.
    pub const JSON_CONTENT_TYPE: &str = "application/json";

    /// Create a request for `endpoint` with the given method.
    #[must_use]
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            params: Map::new(),
            content_type: Self::JSON_CONTENT_TYPE.to_string(),
            expect_json: true,
            use_cookie: false,
            raw_body: None,
        }
    }

    /// Create a GET request.
    #[must_use]
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    /// Create a POST request.
    #[must_use]
    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::POST, endpoint)
    }

    /// Add a parameter.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Set the content type.
    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Return raw bytes and headers instead of decoded JSON.
    #[must_use]
    pub fn raw(mut self) -> Self {
        self.expect_json = false;
        self
    }

    /// Send the refresh cookie along with the bearer token.
    #[must_use]
    pub fn with_cookie(mut self) -> Self {
        self.use_cookie = true;
        self
    }

    /// Use a pre-encoded body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.raw_body = Some(body.into());
        self
    }
}

/// Successful response from the Wire API.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    /// Decoded JSON body.
    Json(Value),
    /// Raw body with response headers (asset downloads).
    Raw(RawBody),
}

impl ApiResponse {
    /// Take the decoded JSON body.
    ///
    /// # Errors
    ///
    /// Returns `InvalidResponse` when the response was fetched raw.
    pub fn into_json(self) -> ApiResult<Value> {
        match self {
            Self::Json(value) => Ok(value),
            Self::Raw(_) => Err(ApiError::InvalidResponse),
        }
    }

    /// Take the raw body.
    ///
    /// # Errors
    ///
    /// Returns `InvalidResponse` when the response was decoded as JSON.
    pub fn into_raw(self) -> ApiResult<RawBody> {
        match self {
            Self::Raw(raw) => Ok(raw),
            Self::Json(_) => Err(ApiError::InvalidResponse),
        }
    }
}

/// Undecoded response body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawBody {
    /// Response bytes.
    pub body: Vec<u8>,
    /// Response headers, lower-cased names, values in arrival order.
    pub headers: BTreeMap<String, Vec<String>>,
}

impl RawBody {
    /// First value of a header, if present.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

/// Cookie material extracted from a `Set-Cookie` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieMaterial {
    /// Bare cookie value.
    pub cookie: String,
    /// Full header as received.
    pub full_cookie: String,
}

/// Outcome of `POST /login`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginGrant {
    /// Bearer token.
    pub access_token: String,
    /// Lifetime in seconds.
    pub expires_in: i64,
    /// Wire user id of the account.
    pub user: Option<String>,
    /// Refresh cookie.
    pub cookie: CookieMaterial,
}

/// Outcome of `POST /access`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshGrant {
    /// New bearer token.
    pub access_token: String,
    /// Lifetime in seconds.
    pub expires_in: i64,
    /// Replacement cookie, when the service rotated it.
    pub cookie: Option<CookieMaterial>,
}

/// Connection summary served to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    /// Whether an access token is stored.
    pub connected: bool,
    /// Effective API base URL.
    pub url: String,
    /// Base URL without scheme, for display.
    pub display_url: String,
}

/// Target conversation of an outgoing message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationRef {
    /// Conversation id.
    pub id: String,
    /// Federation domain of the conversation.
    #[serde(default)]
    pub domain: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Member records as returned by the conversation listing.
    #[serde(default)]
    pub members: Vec<Value>,
}

/// Avatar lookup result.
#[derive(Debug, Clone, PartialEq)]
pub enum Avatar {
    /// Downloaded image bytes.
    Image(Vec<u8>),
    /// The user has no downloadable avatar; their profile is returned instead.
    UserInfo(Value),
    /// The team has no downloadable avatar; the team record is returned instead.
    TeamInfo(Value),
}
