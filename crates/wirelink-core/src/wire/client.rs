//! Typed operations against the Wire API.
//!
//! Each call runs the session pre-flight (token refresh when close to
//! expiry) and then dispatches through the transport. Conversations and
//! teams are fetched fresh on every call; nothing is cached.
//!
//! [`WireClient::get_my_conversations`] returns every conversation, not only
//! team conversations, and a failed teams fetch fails the whole listing
//! instead of returning the conversations without team names.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{ApiError, ApiResult};
use crate::wire::message::{MessageEncoder, PlaintextOtrEncoder};
use crate::wire::models::{ApiRequest, ApiResponse, Avatar, ConversationRef};
use crate::wire::session::SessionManager;

/// Team name used when a conversation references an unknown team.
const UNKNOWN_TEAM_NAME: &str = "??";

/// Wire API client for one install, serving any number of users.
#[derive(Debug, Clone)]
pub struct WireClient {
    sessions: SessionManager,
    encoder: Arc<dyn MessageEncoder>,
}

impl WireClient {
    /// Create a client sending plaintext messages.
    #[must_use]
    pub fn new(sessions: SessionManager) -> Self {
        Self::with_encoder(sessions, Arc::new(PlaintextOtrEncoder))
    }

    /// Create a client with a custom message encoder.
    #[must_use]
    pub fn with_encoder(sessions: SessionManager, encoder: Arc<dyn MessageEncoder>) -> Self {
        Self { sessions, encoder }
    }

    /// Session manager used for the pre-flight check.
    #[must_use]
    pub const fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Run an authenticated request for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns the transport's error, or a storage error if the session
    /// cannot be loaded.
    pub async fn request(&self, user_id: &str, req: &ApiRequest) -> ApiResult<ApiResponse> {
        self.sessions.ensure_fresh_token(user_id).await?;
        let session = self.sessions.load(user_id)?;
        self.sessions.transport().request(&session, req).await
    }

    async fn get_json(&self, user_id: &str, endpoint: String) -> ApiResult<Value> {
        self.request(user_id, &ApiRequest::get(endpoint))
            .await?
            .into_json()
    }

    /// Download an asset as raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the asset cannot be fetched.
    pub async fn download_asset(&self, user_id: &str, domain: &str, key: &str) -> ApiResult<Vec<u8>> {
        let raw = self
            .request(user_id, &ApiRequest::get(format!("assets/{domain}/{key}")).raw())
            .await?
            .into_raw()?;
        Ok(raw.body)
    }

    /// Upload bytes as an asset and return its key.
    ///
    /// # Errors
    ///
    /// Returns an error if the upload fails or the response carries no key.
    pub async fn upload_asset(&self, user_id: &str, contents: Vec<u8>) -> ApiResult<String> {
        let req = ApiRequest::post("assets/v3")
            .content_type("application/octet-stream")
            .body(contents);
        let created = self.request(user_id, &req).await?.into_json()?;
        created["key"]
            .as_str()
            .map(String::from)
            .ok_or(ApiError::InvalidResponse)
    }

    /// Fetch a user profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile cannot be fetched.
    pub async fn get_user(&self, user_id: &str, domain: &str, remote_user_id: &str) -> ApiResult<Value> {
        self.get_json(user_id, format!("users/{domain}/{remote_user_id}"))
            .await
    }

    /// Avatar image of a user, or their profile when no image can be fetched.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile itself cannot be fetched.
    pub async fn get_user_avatar(
        &self,
        user_id: &str,
        domain: &str,
        remote_user_id: &str,
    ) -> ApiResult<Avatar> {
        let user_info = self.get_user(user_id, domain, remote_user_id).await?;
        let Some(key) = complete_image_key(&user_info) else {
            return Ok(Avatar::UserInfo(user_info));
        };

        match self.download_asset(user_id, domain, &key).await {
            Ok(bytes) => Ok(Avatar::Image(bytes)),
            Err(e) => {
                log::debug!("avatar asset {key} of {remote_user_id} unavailable: {e}");
                Ok(Avatar::UserInfo(user_info))
            }
        }
    }

    /// Avatar image of a team, or the team record when no image can be fetched.
    ///
    /// # Errors
    ///
    /// Returns an error if neither the asset nor the team can be fetched.
    pub async fn get_team_avatar(&self, user_id: &str, domain: &str, team_id: &str) -> ApiResult<Avatar> {
        if let Ok(bytes) = self.download_asset(user_id, domain, team_id).await {
            return Ok(Avatar::Image(bytes));
        }
        let team_info = self.get_json(user_id, format!("teams/{team_id}")).await?;
        Ok(Avatar::TeamInfo(team_info))
    }

    /// Conversations of `user_id` keyed by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing cannot be fetched or has no
    /// `conversations` array.
    pub async fn get_my_conversations_per_id(&self, user_id: &str) -> ApiResult<BTreeMap<String, Value>> {
        let listing = self.get_json(user_id, "conversations".to_string()).await?;
        per_id(listing, "conversations")
    }

    /// Teams of `user_id` keyed by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing cannot be fetched or has no `teams` array.
    pub async fn get_my_teams_per_id(&self, user_id: &str) -> ApiResult<BTreeMap<String, Value>> {
        let listing = self.get_json(user_id, "teams".to_string()).await?;
        per_id(listing, "teams")
    }

    /// Conversations of `user_id` with team names and 1:1 counterpart names.
    ///
    /// Conversations attached to a team get a `team_name` (`??` when the team
    /// is unknown). Unnamed conversations with exactly one other member are
    /// named after that member.
    ///
    /// # Errors
    ///
    /// Returns an error if conversations or teams cannot be fetched. A failed
    /// counterpart lookup only leaves the conversation unnamed.
    pub async fn get_my_conversations(&self, user_id: &str) -> ApiResult<Vec<Value>> {
        let listing = self.get_json(user_id, "conversations".to_string()).await?;
        let teams = self.get_my_teams_per_id(user_id).await?;
        let conversations = take_array(listing, "conversations")?;

        let mut joined = Vec::with_capacity(conversations.len());
        for mut conversation in conversations {
            let Some(fields) = conversation.as_object_mut() else {
                continue;
            };

            if let Some(team_id) = fields.get("team").and_then(Value::as_str) {
                let team_name = teams
                    .get(team_id)
                    .and_then(|team| team["name"].as_str())
                    .unwrap_or(UNKNOWN_TEAM_NAME)
                    .to_string();
                fields.insert("team_name".to_string(), Value::String(team_name));
            }

            let unnamed = fields.get("name").is_none_or(Value::is_null);
            if unnamed && let Some((domain, remote_id)) = sole_counterpart(fields) {
                match self.get_user(user_id, &domain, &remote_id).await {
                    Ok(info) => {
                        if let Some(name) = info["name"].as_str() {
                            fields.insert("name".to_string(), Value::String(name.to_string()));
                        }
                    }
                    Err(e) => log::debug!("could not resolve counterpart {remote_id}: {e}"),
                }
            }

            joined.push(conversation);
        }

        Ok(joined)
    }

    /// Send `message` as `user_id` into `conversation`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be loaded or the post fails.
    pub async fn send_message(
        &self,
        user_id: &str,
        message: &str,
        conversation: &ConversationRef,
    ) -> ApiResult<Value> {
        let sender = self.sessions.load(user_id)?.remote_user_id;
        log::debug!(
            "sending message to {} ({} members)",
            conversation.id,
            conversation.members.len()
        );

        let outgoing = self.encoder.encode(&sender, message, conversation);
        let req = ApiRequest::post(outgoing.endpoint)
            .content_type(outgoing.content_type)
            .body(outgoing.body.to_string());

        self.request(user_id, &req).await?.into_json()
    }
}

/// Key of the first `image` asset of `complete` size.
fn complete_image_key(user_info: &Value) -> Option<String> {
    user_info["assets"]
        .as_array()?
        .iter()
        .find(|asset| asset["type"] == "image" && asset["size"] == "complete")
        .and_then(|asset| asset["key"].as_str())
        .map(String::from)
}

/// Qualified id of the only other member, if there is exactly one.
fn sole_counterpart(conversation: &serde_json::Map<String, Value>) -> Option<(String, String)> {
    let others = conversation.get("members")?.get("others")?.as_array()?;
    let [member] = others.as_slice() else {
        return None;
    };
    let qualified = &member["qualified_id"];
    Some((
        qualified["domain"].as_str()?.to_string(),
        qualified["id"].as_str()?.to_string(),
    ))
}

fn take_array(mut listing: Value, field: &str) -> ApiResult<Vec<Value>> {
    match listing.get_mut(field).map(Value::take) {
        Some(Value::Array(items)) => Ok(items),
        _ => {
            log::warn!("Wire listing without `{field}` array");
            Err(ApiError::InvalidResponse)
        }
    }
}

fn per_id(listing: Value, field: &str) -> ApiResult<BTreeMap<String, Value>> {
    Ok(take_array(listing, field)?
        .into_iter()
        .filter_map(|item| {
            let id = item["id"].as_str()?.to_string();
            Some((id, item))
        })
        .collect())
}
