//! HTTP endpoints of the wirelink bridge.
//!
//! The host platform's auth proxy identifies the caller with the
//! `X-User-Id` header. Failures answer 400 with `{"error": "<message>"}`,
//! a missing caller header answers 401.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use clap::{Args, Parser};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use wirelink_core::kitty::ImageFormat;
use wirelink_core::wire::ConnectionInfo;
use wirelink_core::{
    ApiError, AppConfig, AppPaths, Avatar, Bridge, ConversationRef, Permission, ShareLinkRequest,
};

/// Header carrying the host-platform user id.
const USER_HEADER: &str = "x-user-id";

fn main() -> anyhow::Result<()> {
    try_main()
}

#[tokio::main]
async fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let paths = AppPaths::discover(cli.common.config.as_deref())?;
    let config = AppConfig::load(&paths, false)?;
    let paths = paths.apply_overrides(&config)?;

    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(config.logging.level.as_filter())
        .parse_default_env();
    if let Some(file) = config.logging.open_file()? {
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();

    paths.ensure_directories()?;
    let bridge = Bridge::open(&config, &paths)?;
    let app = app(Arc::new(bridge));

    let host = cli.common.host.unwrap_or_else(|| config.server.host.clone());
    let port = cli.common.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))?;
    info!("Starting API server on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Debug, Parser)]
#[command(author, version, about = "HTTP endpoints of the wirelink bridge")]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Address to bind (defaults to server.host)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (defaults to server.port)
    #[arg(short, long)]
    port: Option<u16>,
}

type AppState = Arc<Bridge>;

fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/is-connected", get(is_connected))
        .route("/login", post(login))
        .route("/conversations", get(conversations))
        .route("/avatar/user/{domain}/{id}", get(user_avatar))
        .route("/avatar/team/{domain}/{id}", get(team_avatar))
        .route("/send-message", post(send_message))
        .route("/send-links", post(send_links))
        .route("/send-file", post(send_file))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error answer: status plus `{"error": message}`.
#[derive(Debug)]
struct Failure {
    status: StatusCode,
    message: String,
}

impl Failure {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<ApiError> for Failure {
    fn from(err: ApiError) -> Self {
        Self::bad_request(err.message())
    }
}

impl From<JsonRejection> for Failure {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type Answer<T> = std::result::Result<T, Failure>;

/// Caller identity taken from the `X-User-Id` header.
#[derive(Debug)]
struct Caller(String);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Failure;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Answer<Self> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|user| !user.is_empty())
            .map(|user| Self(user.to_string()))
            .ok_or_else(|| Failure {
                status: StatusCode::UNAUTHORIZED,
                message: "Missing X-User-Id header".to_string(),
            })
    }
}

fn require_connected(bridge: &Bridge, user_id: &str) -> Answer<()> {
    if bridge.sessions().is_connected(user_id).map_err(ApiError::from)? {
        Ok(())
    } else {
        Err(ApiError::NotConnected.into())
    }
}

#[derive(Serialize)]
struct RootResponse {
    name: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn is_connected(State(bridge): State<AppState>, Caller(user): Caller) -> Answer<Json<ConnectionInfo>> {
    let info = bridge.sessions().connection_info(&user).map_err(ApiError::from)?;
    Ok(Json(info))
}

#[derive(Debug, Deserialize)]
struct LoginBody {
    login: String,
    password: String,
    #[serde(default)]
    url: Option<String>,
}

async fn login(
    State(bridge): State<AppState>,
    Caller(user): Caller,
    body: std::result::Result<Json<LoginBody>, JsonRejection>,
) -> Answer<Json<Value>> {
    let Json(body) = body?;
    if let Some(url) = body.url.as_deref().filter(|url| !url.trim().is_empty()) {
        bridge.sessions().set_base_url(&user, url).map_err(ApiError::from)?;
    }

    let grant = bridge.sessions().connect(&user, &body.login, &body.password).await?;
    Ok(Json(json!({ "connected": true, "user_id": grant.user })))
}

async fn conversations(State(bridge): State<AppState>, Caller(user): Caller) -> Answer<Json<Vec<Value>>> {
    require_connected(&bridge, &user)?;
    Ok(Json(bridge.client().get_my_conversations(&user).await?))
}

fn avatar_response(avatar: Avatar) -> Response {
    match avatar {
        Avatar::Image(bytes) => {
            let mime = ImageFormat::detect(&bytes).map_or("application/octet-stream", ImageFormat::mime_type);
            ([(header::CONTENT_TYPE, mime)], bytes).into_response()
        }
        Avatar::UserInfo(info) => Json(json!({ "userInfo": info })).into_response(),
        Avatar::TeamInfo(info) => Json(json!({ "teamInfo": info })).into_response(),
    }
}

async fn user_avatar(
    State(bridge): State<AppState>,
    Caller(user): Caller,
    Path((domain, id)): Path<(String, String)>,
) -> Answer<Response> {
    let avatar = bridge.client().get_user_avatar(&user, &domain, &id).await?;
    Ok(avatar_response(avatar))
}

async fn team_avatar(
    State(bridge): State<AppState>,
    Caller(user): Caller,
    Path((domain, id)): Path<(String, String)>,
) -> Answer<Response> {
    let avatar = bridge.client().get_team_avatar(&user, &domain, &id).await?;
    Ok(avatar_response(avatar))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageBody {
    message: String,
    conversation_id: String,
}

async fn send_message(
    State(bridge): State<AppState>,
    Caller(user): Caller,
    body: std::result::Result<Json<SendMessageBody>, JsonRejection>,
) -> Answer<Json<Value>> {
    let Json(body) = body?;
    require_connected(&bridge, &user)?;

    let conversation = ConversationRef {
        id: body.conversation_id,
        ..ConversationRef::default()
    };
    Ok(Json(bridge.client().send_message(&user, &body.message, &conversation).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendLinksBody {
    file_ids: Vec<u64>,
    conversation_id: String,
    #[serde(default)]
    conversation_domain: String,
    #[serde(default)]
    conversation_name: String,
    #[serde(default)]
    conversation_members: Vec<Value>,
    #[serde(default)]
    comment: String,
    #[serde(default)]
    permission: String,
    #[serde(default)]
    expiration_date: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl SendLinksBody {
    fn into_request(self) -> Answer<ShareLinkRequest> {
        let expiration_date = match self.expiration_date.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(date) => Some(
                NaiveDate::parse_from_str(date, "%Y-%m-%d")
                    .map_err(|_| Failure::bad_request("Invalid expiration date"))?,
            ),
        };

        Ok(ShareLinkRequest {
            file_ids: self.file_ids,
            conversation: ConversationRef {
                id: self.conversation_id,
                domain: self.conversation_domain,
                name: self.conversation_name,
                members: self.conversation_members,
            },
            comment: self.comment,
            permission: Permission::from_name(&self.permission),
            expiration_date,
            password: self.password.filter(|password| !password.is_empty()),
        })
    }
}

async fn send_links(
    State(bridge): State<AppState>,
    Caller(user): Caller,
    body: std::result::Result<Json<SendLinksBody>, JsonRejection>,
) -> Answer<Json<Value>> {
    let Json(body) = body?;
    let request = body.into_request()?;
    require_connected(&bridge, &user)?;

    Ok(Json(bridge.links().send_links(&user, &request).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendFileBody {
    file_id: u64,
    conversation_id: String,
}

async fn send_file(
    State(bridge): State<AppState>,
    Caller(user): Caller,
    body: std::result::Result<Json<SendFileBody>, JsonRejection>,
) -> Answer<Json<Value>> {
    let Json(body) = body?;
    require_connected(&bridge, &user)?;

    let conversation = ConversationRef {
        id: body.conversation_id,
        ..ConversationRef::default()
    };
    Ok(Json(bridge.links().send_file(&user, body.file_id, &conversation).await?))
}
