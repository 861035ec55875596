//! Batch share-link creation and delivery.

use std::fmt::Write as _;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{ApiError, ApiResult};
use crate::sharing::{NewShare, NodeKind, ShareBackend, ShareLinkRequest, StorageNode};
use crate::wire::{ConversationRef, WireClient};

/// Creates host-platform shares and posts them into Wire conversations.
#[derive(Debug, Clone)]
pub struct LinkSharer {
    client: WireClient,
    backend: Arc<dyn ShareBackend>,
}

impl LinkSharer {
    /// Create a sharer.
    #[must_use]
    pub fn new(client: WireClient, backend: Arc<dyn ShareBackend>) -> Self {
        Self { client, backend }
    }

    /// Wire client used for delivery.
    #[must_use]
    pub const fn client(&self) -> &WireClient {
        &self.client
    }

    /// Share backend.
    #[must_use]
    pub const fn backend(&self) -> &Arc<dyn ShareBackend> {
        &self.backend
    }

    /// Create one share per resolvable id and post them as a single message.
    ///
    /// Unknown ids are skipped. When no expiration is requested, any default
    /// expiration applied by the backend is cleared.
    ///
    /// # Errors
    ///
    /// Returns `FilesNotFound` when no id resolved (nothing is sent), a
    /// storage error if a share cannot be persisted, or the delivery error.
    pub async fn send_links(&self, user_id: &str, request: &ShareLinkRequest) -> ApiResult<Value> {
        let label = format!("Wire ({})", request.conversation.name);
        let mut links = Vec::new();

        for &file_id in &request.file_ids {
            let Some(node) = self.backend.resolve_node(user_id, file_id)? else {
                log::debug!("file {file_id} not found for {user_id}, skipping");
                continue;
            };

            let name = node.name.clone();
            let mut share = self.backend.create_share(
                user_id,
                NewShare {
                    node,
                    permissions: request.permission.bits(),
                    label: label.clone(),
                    expiration: request.expiration_date,
                    password: request.password.clone(),
                },
            )?;

            if request.expiration_date.is_none() {
                share.expiration = None;
                self.backend.update_share(&share)?;
            }

            links.push((name, self.backend.share_url(&share)));
        }

        if links.is_empty() {
            return Err(ApiError::FilesNotFound);
        }

        let message = compose_links_message(&request.comment, &links);
        self.client
            .send_message(user_id, &message, &request.conversation)
            .await
    }

    /// Upload a file as a Wire asset and announce it in `conversation`.
    ///
    /// # Errors
    ///
    /// Returns `FilesNotFound` for unknown ids and folders, a storage error
    /// if the file cannot be read, or the upload or delivery error.
    pub async fn send_file(
        &self,
        user_id: &str,
        file_id: u64,
        conversation: &ConversationRef,
    ) -> ApiResult<Value> {
        let node = self.resolve_file(user_id, file_id)?;
        let contents = self.backend.read_file(user_id, &node)?;
        log::debug!("uploading {} ({} bytes) for {user_id}", node.name, contents.len());

        let key = self.client.upload_asset(user_id, contents).await?;
        let message = format!("`{}`: asset {key}", node.name);
        self.client
            .send_message(user_id, &message, conversation)
            .await
    }

    fn resolve_file(&self, user_id: &str, file_id: u64) -> ApiResult<StorageNode> {
        match self.backend.resolve_node(user_id, file_id)? {
            Some(node) if node.kind == NodeKind::File => Ok(node),
            _ => Err(ApiError::FilesNotFound),
        }
    }
}

/// Comment on the first line, then one `` `name`: url `` line per link.
#[must_use]
pub fn compose_links_message(comment: &str, links: &[(String, String)]) -> String {
    let mut message = format!("{comment}\n");
    for (name, url) in links {
        let _ = writeln!(message, "`{name}`: {url}");
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharing::{MemoryShareBackend, Permission, hash_password, permissions};
    use crate::wire::store::keys;
    use crate::wire::{DEFAULT_USER_AGENT, MemorySessionStore, SessionManager, SessionStore, WireTransport};
    use chrono::NaiveDate;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const USER: &str = "alice";

    fn sharer(server: &MockServer, backend: Arc<MemoryShareBackend>) -> LinkSharer {
        let transport = WireTransport::new(Duration::from_secs(5), DEFAULT_USER_AGENT).unwrap();
        let store = Arc::new(MemorySessionStore::new());
        store.set(USER, keys::TOKEN, "tok").unwrap();
        store.set(USER, keys::USER_ID, "me-123").unwrap();
        let uri = server.uri();
        let client = WireClient::new(SessionManager::new(transport, store, Some(uri.as_str())));
        LinkSharer::new(client, backend)
    }

    fn conversation() -> ConversationRef {
        ConversationRef {
            id: "conv-1".into(),
            domain: "wire.com".into(),
            name: "Ops".into(),
            members: Vec::new(),
        }
    }

    async fn mount_message(server: &MockServer, expected: u64) {
        Mock::given(method("POST"))
            .and(path("/conversations/conv-1/otr/messages"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "time": "now" })))
            .expect(expected)
            .mount(server)
            .await;
    }

    async fn sent_text(server: &MockServer) -> String {
        let received = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&received.last().unwrap().body).unwrap();
        body["data"].as_str().unwrap().to_string()
    }

    #[test]
    fn message_lists_one_link_per_line() {
        let links = vec![
            ("a.txt".to_string(), "https://x/s/1".to_string()),
            ("b.txt".to_string(), "https://x/s/2".to_string()),
        ];
        assert_eq!(
            compose_links_message("Have a look", &links),
            "Have a look\n`a.txt`: https://x/s/1\n`b.txt`: https://x/s/2\n"
        );
    }

    #[tokio::test]
    async fn view_link_without_expiration_is_read_only() {
        let server = MockServer::start().await;
        mount_message(&server, 1).await;
        let backend = Arc::new(MemoryShareBackend::new("https://cloud.example.com").with_default_expiration(7));
        backend.add_file(USER, 42, "report.pdf", "%PDF").unwrap();

        let request = ShareLinkRequest {
            file_ids: vec![42],
            conversation: conversation(),
            comment: "Quarterly numbers".into(),
            permission: Permission::View,
            ..ShareLinkRequest::default()
        };
        sharer(&server, Arc::clone(&backend))
            .send_links(USER, &request)
            .await
            .unwrap();

        let shares = backend.shares().unwrap();
        assert_eq!(shares.len(), 1);
        assert_eq!(shares[0].permissions, permissions::READ);
        assert_eq!(shares[0].expiration, None);
        assert_eq!(shares[0].label, "Wire (Ops)");

        let url = backend.share_url(&shares[0]);
        let text = sent_text(&server).await;
        assert!(text.starts_with("Quarterly numbers\n"));
        assert!(text.contains(&format!("`report.pdf`: {url}")));
    }

    #[tokio::test]
    async fn unresolvable_ids_send_nothing() {
        let server = MockServer::start().await;
        mount_message(&server, 0).await;
        let backend = Arc::new(MemoryShareBackend::new("https://cloud.example.com"));

        let request = ShareLinkRequest {
            file_ids: vec![7, 8],
            conversation: conversation(),
            ..ShareLinkRequest::default()
        };
        let err = sharer(&server, backend).send_links(USER, &request).await.unwrap_err();
        assert!(matches!(err, ApiError::FilesNotFound));
        assert_eq!(err.message(), "Files not found");
    }

    #[tokio::test]
    async fn edit_links_carry_expiration_and_password() {
        let server = MockServer::start().await;
        mount_message(&server, 1).await;
        let backend = Arc::new(MemoryShareBackend::new("https://cloud.example.com"));
        backend.add_file(USER, 1, "plan.odt", "plan").unwrap();
        backend.add_folder(USER, 2, "designs").unwrap();
        let until = NaiveDate::from_ymd_opt(2027, 1, 31).unwrap();

        let request = ShareLinkRequest {
            file_ids: vec![1, 99, 2],
            conversation: conversation(),
            comment: String::new(),
            permission: Permission::Edit,
            expiration_date: Some(until),
            password: Some("pw".into()),
        };
        sharer(&server, Arc::clone(&backend))
            .send_links(USER, &request)
            .await
            .unwrap();

        let shares = backend.shares().unwrap();
        assert_eq!(shares.len(), 2);
        for share in &shares {
            assert!(share.can_update());
            assert_eq!(share.expiration, Some(until));
            assert_eq!(share.password_hash.as_deref(), Some(hash_password("pw").as_str()));
        }
        let text = sent_text(&server).await;
        assert!(text.contains("`plan.odt`: "));
        assert!(text.contains("`designs`: "));
    }

    #[tokio::test]
    async fn send_file_uploads_then_announces_the_asset() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/assets/v3"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "key": "3-1-abc" })))
            .expect(1)
            .mount(&server)
            .await;
        mount_message(&server, 1).await;
        let backend = Arc::new(MemoryShareBackend::new("https://cloud.example.com"));
        backend.add_file(USER, 5, "photo.png", b"\x89PNG".to_vec()).unwrap();

        sharer(&server, backend)
            .send_file(USER, 5, &conversation())
            .await
            .unwrap();

        let received = server.received_requests().await.unwrap();
        assert_eq!(received[0].body, b"\x89PNG");
        assert_eq!(sent_text(&server).await, "`photo.png`: asset 3-1-abc");
    }

    #[tokio::test]
    async fn folders_cannot_be_sent_as_files() {
        let server = MockServer::start().await;
        let backend = Arc::new(MemoryShareBackend::new("https://cloud.example.com"));
        backend.add_folder(USER, 2, "designs").unwrap();

        let err = sharer(&server, backend)
            .send_file(USER, 2, &conversation())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::FilesNotFound));
    }
}
