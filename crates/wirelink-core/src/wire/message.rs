//! Outgoing message payloads.
//!
//! Messages are not end-to-end encrypted. The plaintext encoder reproduces
//! the OTR endpoint's payload shape with placeholder recipients, so an
//! encrypting encoder can later be swapped in behind [`MessageEncoder`].

use std::fmt;

use serde_json::{Value, json};

use crate::wire::models::ConversationRef;

/// Client id listed in `report_missing`.
///
/// Static value kept from the current wire shape; not derived from any device.
pub const MISSING_REPORT_CLIENT_ID: &str = "99db9768-04e3-4b5d-9268-831b6a25c4ab";

/// Content type of OTR message posts.
pub const OTR_CONTENT_TYPE: &str = "application/json;charset=utf-8";

/// A message ready to be posted.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    /// Endpoint relative to the API base URL.
    pub endpoint: String,
    /// Request content type.
    pub content_type: String,
    /// JSON payload.
    pub body: Value,
}

/// Turns plaintext into a postable message for a conversation.
pub trait MessageEncoder: Send + Sync + fmt::Debug {
    /// Build the payload sent by `sender` into `conversation`.
    fn encode(&self, sender: &str, content: &str, conversation: &ConversationRef) -> OutgoingMessage;
}

/// Sends content unencrypted in the OTR payload shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextOtrEncoder;

impl MessageEncoder for PlaintextOtrEncoder {
    fn encode(&self, sender: &str, content: &str, conversation: &ConversationRef) -> OutgoingMessage {
        // `data` and `blob` carry the same content for the two API generations.
        let body = json!({
            "data": content,
            "blob": content,
            "sender": sender,
            "recipients": {
                "additionalProp1": {
                    "additionalProp1": "string",
                    "additionalProp2": "string",
                    "additionalProp3": "string",
                },
            },
            "report_missing": [MISSING_REPORT_CLIENT_ID],
            "native_push": true,
            "native_priority": "low",
            "transient": true,
        });

        OutgoingMessage {
            endpoint: format!("conversations/{}/otr/messages", conversation.id),
            content_type: OTR_CONTENT_TYPE.to_string(),
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_payload_keeps_the_otr_shape() {
        let conversation = ConversationRef {
            id: "conv-1".into(),
            domain: "wire.com".into(),
            name: "Ops".into(),
            members: Vec::new(),
        };
        let message = PlaintextOtrEncoder.encode("client-7", "hello", &conversation);

        assert_eq!(message.endpoint, "conversations/conv-1/otr/messages");
        assert_eq!(message.content_type, "application/json;charset=utf-8");
        assert_eq!(message.body["data"], "hello");
        assert_eq!(message.body["blob"], "hello");
        assert_eq!(message.body["sender"], "client-7");
        assert_eq!(message.body["report_missing"][0], MISSING_REPORT_CLIENT_ID);
        assert_eq!(message.body["native_push"], true);
        assert_eq!(message.body["native_priority"], "low");
        assert_eq!(message.body["transient"], true);
        assert_eq!(
            message.body["recipients"]["additionalProp1"]["additionalProp3"],
            "string"
        );
    }
}
