//! Token lifecycle for Wire accounts.
//!
//! The manager owns the login and cookie-based refresh calls and is the only
//! writer of per-user session values. Before every authenticated request the
//! facade calls [`SessionManager::ensure_fresh_token`], which renews the
//! bearer token when it expires within [`REFRESH_MARGIN_SECS`].
//!
//! A failed refresh is logged and leaves the stale token in place; the
//! request that follows fails with `Bad credentials` instead of looping.
//! Concurrent requests for the same user are not serialized, so two of them
//! may both refresh and the last write wins.
//!
//! [`REFRESH_MARGIN_SECS`]: crate::wire::models::REFRESH_MARGIN_SECS

use std::sync::Arc;

use reqwest::Response;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE, USER_AGENT};
use serde_json::{Value, json};

use crate::CoreError;
use crate::error::{ApiError, ApiResult};
use crate::wire::models::{ConnectionInfo, CookieMaterial, LoginGrant, RefreshGrant, Session};
use crate::wire::store::{SessionStore, keys};
use crate::wire::transport::WireTransport;

/// Base URL used when neither the user nor the install configures one.
pub const DEFAULT_API_URL: &str = "https://prod-nginz-https.wire.com";

/// Manages per-user Wire sessions on top of a [`SessionStore`].
#[derive(Debug, Clone)]
pub struct SessionManager {
    transport: WireTransport,
    store: Arc<dyn SessionStore>,
    default_base_url: String,
}

impl SessionManager {
    /// Create a manager. An empty or missing install-wide URL falls back to
    /// [`DEFAULT_API_URL`].
    #[must_use]
    pub fn new(
        transport: WireTransport,
        store: Arc<dyn SessionStore>,
        default_base_url: Option<&str>,
    ) -> Self {
        let default_base_url = default_base_url
            .filter(|url| !url.trim().is_empty())
            .unwrap_or(DEFAULT_API_URL)
            .trim_end_matches('/')
            .to_string();

        Self {
            transport,
            store,
            default_base_url,
        }
    }

    /// Transport used for every call.
    #[must_use]
    pub const fn transport(&self) -> &WireTransport {
        &self.transport
    }

    /// Backing session store.
    #[must_use]
    pub const fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Effective base URL for `user_id`: user override, else install default.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn base_url(&self, user_id: &str) -> Result<String, CoreError> {
        let url = self
            .store
            .get(user_id, keys::URL)?
            .filter(|url| !url.trim().is_empty())
            .map_or_else(
                || self.default_base_url.clone(),
                |url| url.trim_end_matches('/').to_string(),
            );
        Ok(url)
    }

    /// Store a per-user base URL override.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn set_base_url(&self, user_id: &str, url: &str) -> Result<(), CoreError> {
        self.store.set(user_id, keys::URL, url.trim_end_matches('/'))
    }

    /// Load the current session for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn load(&self, user_id: &str) -> Result<Session, CoreError> {
        let value = |key: &str| -> Result<String, CoreError> {
            Ok(self.store.get(user_id, key)?.unwrap_or_default())
        };

        let token_expires_at = value(keys::TOKEN_EXPIRES_AT)?.trim().parse::<i64>().ok();

        Ok(Session {
            base_url: self.base_url(user_id)?,
            access_token: value(keys::TOKEN)?,
            refresh_cookie: value(keys::COOKIE)?,
            full_cookie: value(keys::FULL_COOKIE)?,
            token_expires_at,
            remote_user_id: value(keys::USER_ID)?,
        })
    }

    /// Whether an access token is stored for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn is_connected(&self, user_id: &str) -> Result<bool, CoreError> {
        Ok(self.load(user_id)?.is_connected())
    }

    /// Connection state and effective URL for the UI layer.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn connection_info(&self, user_id: &str) -> Result<ConnectionInfo, CoreError> {
        let session = self.load(user_id)?;
        let display_url = session
            .base_url
            .split_once("://")
            .map_or(session.base_url.as_str(), |(_, rest)| rest)
            .to_string();

        Ok(ConnectionInfo {
            connected: session.is_connected(),
            url: session.base_url,
            display_url,
        })
    }

    /// Refresh the token when it expires within the refresh margin.
    ///
    /// Sessions without cookie or known expiry are left alone. Refresh
    /// failures are logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns an error only if the session store cannot be accessed.
    pub async fn ensure_fresh_token(&self, user_id: &str) -> Result<(), CoreError> {
        let session = self.load(user_id)?;
        if session.needs_refresh(now()) {
            log::debug!("access token for {user_id} expires soon, refreshing");
            self.refresh(user_id).await?;
        }
        Ok(())
    }

    /// Renew the access token of `user_id` with its refresh cookie.
    ///
    /// Returns `false` when renewal was impossible; the previous token is kept.
    ///
    /// # Errors
    ///
    /// Returns an error only if the session store cannot be accessed.
    pub async fn refresh(&self, user_id: &str) -> Result<bool, CoreError> {
        let session = self.load(user_id)?;
        if session.refresh_cookie.is_empty() {
            log::error!("no Wire cookie found for {user_id}");
            return Ok(false);
        }

        let grant = match self
            .refresh_token_request(&session.base_url, &session.refresh_cookie, &session.access_token)
            .await
        {
            Ok(grant) => grant,
            Err(e) => {
                log::error!("Wire token for {user_id} is not valid anymore, impossible to refresh it: {e}");
                return Ok(false);
            }
        };

        self.store.set(user_id, keys::TOKEN, &grant.access_token)?;
        if let Some(ref cookie) = grant.cookie {
            self.store_cookie(user_id, cookie)?;
        }
        let expires_at = now().saturating_add(grant.expires_in);
        self.store
            .set(user_id, keys::TOKEN_EXPIRES_AT, &expires_at.to_string())?;

        log::info!("Wire access token for {user_id} successfully refreshed");
        Ok(true)
    }

    /// `POST <base_url>/access` with the bearer token and refresh cookie.
    ///
    /// # Errors
    ///
    /// Returns `RefreshRefused` for a status of 400 or above,
    /// `InvalidResponse` when `access_token` or `expires_in` is missing or
    /// `expires_in` is out of range, and
    /// `Transport` for network failures.
    pub async fn refresh_token_request(
        &self,
        base_url: &str,
        cookie: &str,
        token: &str,
    ) -> ApiResult<RefreshGrant> {
        let url = format!("{base_url}/access");
        let response = self
            .transport
            .http()
            .post(&url)
            .header(USER_AGENT, self.transport.user_agent())
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(COOKIE, format!("zuid={cookie}"))
            .send()
            .await
            .map_err(|e| {
                log::warn!("Wire token refresh error: {e}");
                ApiError::Transport(e.to_string())
            })?;

        if response.status().as_u16() >= 400 {
            return Err(ApiError::RefreshRefused);
        }

        let cookie = set_cookie_header(&response).map(|header| extract_cookie(&header));
        let body = response_json(response).await?;
        let (access_token, expires_in) = token_fields(&body).ok_or(ApiError::InvalidResponse)?;

        Ok(RefreshGrant {
            access_token,
            expires_in,
            cookie,
        })
    }

    /// `POST <base_url>/login?persist=true` with email and password.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredentials` for a status of 400 or above,
    /// `InvalidResponse` when the `Set-Cookie` header or token fields are
    /// missing and `Transport` for network failures.
    pub async fn login(&self, base_url: &str, username: &str, password: &str) -> ApiResult<LoginGrant> {
        let url = format!("{}/login?persist=true", base_url.trim_end_matches('/'));
        let body = json!({
            "email": username,
            "password": password,
            "persist": true,
        });

        let response = self
            .transport
            .http()
            .post(&url)
            .header(USER_AGENT, self.transport.user_agent())
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| {
                log::warn!("Wire login error: {e}");
                ApiError::Transport(e.to_string())
            })?;

        if response.status().as_u16() >= 400 {
            log::warn!("Wire login for {username} refused with {}", response.status());
            return Err(ApiError::InvalidCredentials);
        }

        let Some(header) = set_cookie_header(&response) else {
            return Err(ApiError::InvalidResponse);
        };
        let cookie = extract_cookie(&header);
        let body = response_json(response).await?;
        let (access_token, expires_in) = token_fields(&body).ok_or(ApiError::InvalidResponse)?;

        Ok(LoginGrant {
            access_token,
            expires_in,
            user: body["user"].as_str().map(String::from),
            cookie,
        })
    }

    /// Log `user_id` in and persist the resulting session.
    ///
    /// # Errors
    ///
    /// Returns the login error, or a storage error if the session cannot be saved.
    pub async fn connect(&self, user_id: &str, username: &str, password: &str) -> ApiResult<LoginGrant> {
        let base_url = self.base_url(user_id)?;
        let grant = self.login(&base_url, username, password).await?;

        self.store.set(user_id, keys::TOKEN, &grant.access_token)?;
        self.store_cookie(user_id, &grant.cookie)?;
        let expires_at = now().saturating_add(grant.expires_in);
        self.store
            .set(user_id, keys::TOKEN_EXPIRES_AT, &expires_at.to_string())?;
        if let Some(ref remote_user) = grant.user {
            self.store.set(user_id, keys::USER_ID, remote_user)?;
        }

        log::info!("connected {user_id} to Wire at {base_url}");
        Ok(grant)
    }

    fn store_cookie(&self, user_id: &str, cookie: &CookieMaterial) -> Result<(), CoreError> {
        self.store.set(user_id, keys::COOKIE, &cookie.cookie)?;
        self.store.set(user_id, keys::FULL_COOKIE, &cookie.full_cookie)
    }
}

/// Split a `Set-Cookie` header into the bare `zuid` value and the full header.
///
/// The `zuid=` prefix is stripped and everything from `; Path=` on is dropped.
#[must_use]
pub fn extract_cookie(set_cookie: &str) -> CookieMaterial {
    let value = set_cookie.strip_prefix("zuid=").unwrap_or(set_cookie);
    let value = value
        .find("; Path=")
        .map_or(value, |end| &value[..end]);

    CookieMaterial {
        cookie: value.to_string(),
        full_cookie: set_cookie.to_string(),
    }
}

/// First `Set-Cookie` header carrying `zuid`, else the first one.
fn set_cookie_header(response: &Response) -> Option<String> {
    let headers: Vec<String> = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .collect();

    headers
        .iter()
        .find(|header| header.starts_with("zuid="))
        .or_else(|| headers.first())
        .cloned()
}

async fn response_json(response: Response) -> ApiResult<Value> {
    let bytes = response.bytes().await.map_err(|e| {
        log::warn!("Wire API error while reading body: {e}");
        ApiError::Transport(e.to_string())
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        log::warn!("undecodable Wire token response: {e}");
        ApiError::InvalidResponse
    })
}

fn token_fields(body: &Value) -> Option<(String, i64)> {
    let access_token = body["access_token"].as_str()?.to_string();
    let expires_in = body["expires_in"]
        .as_i64()
        .or_else(|| body["expires_in"].as_str().and_then(|s| s.parse().ok()))?;
    if now().checked_add(expires_in).is_none() {
        log::warn!("Wire token response has an out-of-range expires_in: {expires_in}");
        return None;
    }
    Some((access_token, expires_in))
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::store::MemorySessionStore;
    use crate::wire::transport::DEFAULT_USER_AGENT;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const USER: &str = "alice";

    fn manager(base_url: &str) -> SessionManager {
        let transport = WireTransport::new(Duration::from_secs(5), DEFAULT_USER_AGENT).unwrap();
        SessionManager::new(transport, Arc::new(MemorySessionStore::new()), Some(base_url))
    }

    fn seed(manager: &SessionManager, token: &str, cookie: &str, expires_at: i64) {
        let store = manager.store();
        store.set(USER, keys::TOKEN, token).unwrap();
        store.set(USER, keys::COOKIE, cookie).unwrap();
        store
            .set(USER, keys::TOKEN_EXPIRES_AT, &expires_at.to_string())
            .unwrap();
    }

    #[test]
    fn cookie_extraction_strips_prefix_and_attributes() {
        let header = "zuid=abc.def-123; Path=/access; Expires=Tue, 01 Dec 2026 10:00:00 GMT; HttpOnly; Secure";
        let material = extract_cookie(header);
        assert_eq!(material.cookie, "abc.def-123");
        assert_eq!(material.full_cookie, header);

        assert_eq!(extract_cookie("zuid=plain").cookie, "plain");
    }

    #[test]
    fn base_url_prefers_user_override() {
        let manager = manager("https://install.example.com/");
        assert_eq!(manager.base_url(USER).unwrap(), "https://install.example.com");

        manager.set_base_url(USER, "https://user.example.com/").unwrap();
        assert_eq!(manager.base_url(USER).unwrap(), "https://user.example.com");
        assert_eq!(manager.base_url("bob").unwrap(), "https://install.example.com");
    }

    #[test]
    fn missing_install_url_falls_back_to_default() {
        let transport = WireTransport::new(Duration::from_secs(5), DEFAULT_USER_AGENT).unwrap();
        let manager = SessionManager::new(transport, Arc::new(MemorySessionStore::new()), Some(" "));
        assert_eq!(manager.base_url(USER).unwrap(), DEFAULT_API_URL);

        let info = manager.connection_info(USER).unwrap();
        assert!(!info.connected);
        assert_eq!(info.display_url, "prod-nginz-https.wire.com");
    }

    #[test]
    fn refresh_is_only_needed_near_expiry() {
        let session = Session {
            refresh_cookie: "c".into(),
            token_expires_at: Some(1_000),
            ..Session::default()
        };
        assert!(!session.needs_refresh(900));
        assert!(!session.needs_refresh(940));
        assert!(session.needs_refresh(941));
        assert!(session.needs_refresh(2_000));

        let no_cookie = Session {
            token_expires_at: Some(1_000),
            ..Session::default()
        };
        assert!(!no_cookie.needs_refresh(2_000));

        let unknown_expiry = Session {
            refresh_cookie: "c".into(),
            ..Session::default()
        };
        assert!(!unknown_expiry.needs_refresh(2_000));
    }

    #[tokio::test]
    async fn fresh_tokens_make_no_network_call() {
        let server = MockServer::start().await;
        Mock::given(path("/access"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let manager = manager(&server.uri());
        seed(&manager, "tok", "cookie", now() + 3_600);

        manager.ensure_fresh_token(USER).await.unwrap();
        assert_eq!(manager.load(USER).unwrap().access_token, "tok");
    }

    #[tokio::test]
    async fn expiring_tokens_are_refreshed_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/access"))
            .and(header("authorization", "Bearer old-token"))
            .and(header("cookie", "zuid=old-cookie"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "zuid=new-cookie; Path=/access; HttpOnly")
                    .set_body_json(json!({
                        "access_token": "new-token",
                        "expires_in": 900,
                        "token_type": "Bearer"
                    })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager(&server.uri());
        seed(&manager, "old-token", "old-cookie", now() + 30);

        manager.ensure_fresh_token(USER).await.unwrap();

        let session = manager.load(USER).unwrap();
        assert_eq!(session.access_token, "new-token");
        assert_eq!(session.refresh_cookie, "new-cookie");
        assert_eq!(session.full_cookie, "zuid=new-cookie; Path=/access; HttpOnly");
        let expires_at = session.token_expires_at.unwrap();
        assert!((now() + 890..=now() + 900).contains(&expires_at));

        manager.ensure_fresh_token(USER).await.unwrap();
    }

    #[tokio::test]
    async fn refresh_without_new_cookie_keeps_the_old_one() {
        let server = MockServer::start().await;
        Mock::given(path("/access"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": "new-token", "expires_in": 900 })),
            )
            .mount(&server)
            .await;

        let manager = manager(&server.uri());
        seed(&manager, "old-token", "old-cookie", now() - 10);

        assert!(manager.refresh(USER).await.unwrap());
        let session = manager.load(USER).unwrap();
        assert_eq!(session.access_token, "new-token");
        assert_eq!(session.refresh_cookie, "old-cookie");
    }

    #[tokio::test]
    async fn incomplete_refresh_keeps_the_stale_token() {
        let server = MockServer::start().await;
        Mock::given(path("/access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "label": "nope" })))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager(&server.uri());
        let expired_at = now() - 10;
        seed(&manager, "old-token", "old-cookie", expired_at);

        assert!(!manager.refresh(USER).await.unwrap());
        let session = manager.load(USER).unwrap();
        assert_eq!(session.access_token, "old-token");
        assert_eq!(session.token_expires_at, Some(expired_at));
    }

    #[tokio::test]
    async fn out_of_range_expiry_keeps_the_stale_token() {
        let server = MockServer::start().await;
        Mock::given(path("/access"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": "t", "expires_in": i64::MAX })),
            )
            .expect(2)
            .mount(&server)
            .await;

        let manager = manager(&server.uri());
        let expired_at = now() - 10;
        seed(&manager, "old-token", "old-cookie", expired_at);

        manager.ensure_fresh_token(USER).await.unwrap();
        let session = manager.load(USER).unwrap();
        assert_eq!(session.access_token, "old-token");
        assert_eq!(session.token_expires_at, Some(expired_at));

        let err = manager
            .refresh_token_request(&server.uri(), "old-cookie", "old-token")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse));
    }

    #[test]
    fn extreme_stored_expiry_does_not_overflow() {
        let session = Session {
            refresh_cookie: "c".into(),
            token_expires_at: Some(i64::MIN),
            ..Session::default()
        };
        assert!(session.needs_refresh(0));

        let far_future = Session {
            token_expires_at: Some(i64::MAX),
            ..session
        };
        assert!(!far_future.needs_refresh(0));
    }

    #[tokio::test]
    async fn refused_refresh_is_reported() {
        let server = MockServer::start().await;
        Mock::given(path("/access"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let manager = manager(&server.uri());
        let err = manager
            .refresh_token_request(&server.uri(), "cookie", "token")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::RefreshRefused));
    }

    #[tokio::test]
    async fn login_extracts_cookie_and_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(query_param("persist", "true"))
            .and(body_json(json!({
                "email": "alice@example.com",
                "password": "hunter2",
                "persist": true
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "zuid=login-cookie; Path=/access; Secure")
                    .set_body_json(json!({
                        "access_token": "login-token",
                        "expires_in": 900,
                        "user": "0f7b1e2c-wire-user"
                    })),
            )
            .mount(&server)
            .await;

        let manager = manager(&server.uri());
        let grant = manager.connect(USER, "alice@example.com", "hunter2").await.unwrap();
        assert_eq!(grant.cookie.cookie, "login-cookie");

        let session = manager.load(USER).unwrap();
        assert_eq!(session.access_token, "login-token");
        assert_eq!(session.refresh_cookie, "login-cookie");
        assert_eq!(session.full_cookie, "zuid=login-cookie; Path=/access; Secure");
        assert_eq!(session.remote_user_id, "0f7b1e2c-wire-user");
        assert!(session.token_expires_at.is_some());
        assert!(manager.is_connected(USER).unwrap());
    }

    #[tokio::test]
    async fn login_without_cookie_is_an_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(path("/login"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": "t", "expires_in": 900 })),
            )
            .mount(&server)
            .await;

        let manager = manager(&server.uri());
        let err = manager.login(&server.uri(), "a", "b").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse));
        assert_eq!(err.message(), "Invalid response");
    }

    #[tokio::test]
    async fn rejected_login_is_invalid_credentials() {
        let server = MockServer::start().await;
        Mock::given(path("/login"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "label": "invalid-credentials" })))
            .mount(&server)
            .await;

        let manager = manager(&server.uri());
        let err = manager.connect(USER, "a", "wrong").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidCredentials));
        assert!(!manager.is_connected(USER).unwrap());
    }

    #[tokio::test]
    async fn concurrent_stale_requests_may_both_refresh() {
        let server = MockServer::start().await;
        Mock::given(path("/access"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": "racer", "expires_in": 900 }))
                    .set_delay(Duration::from_millis(50)),
            )
            .expect(1_u64..=2)
            .mount(&server)
            .await;

        let manager = manager(&server.uri());
        seed(&manager, "old-token", "cookie", now() - 5);

        let (first, second) = tokio::join!(
            manager.ensure_fresh_token(USER),
            manager.ensure_fresh_token(USER)
        );
        first.unwrap();
        second.unwrap();

        assert_eq!(manager.load(USER).unwrap().access_token, "racer");
    }
}
