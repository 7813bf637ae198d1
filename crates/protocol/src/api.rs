//! HTTP request and response bodies

use serde::{Deserialize, Serialize};

use crate::types::{AgentRef, CustomerProfile, Message, Rating, SessionStatus};

/// Context metadata attached to every chat send
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMeta {
    pub lang: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
}

/// Body of a chat send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub session_id: String,
    pub shop_domain: String,
    /// Client-generated id for the optimistic message; the server reuses it
    /// so the realtime echo deduplicates against the local copy.
    pub client_message_id: String,
    pub meta: ChatMeta,
}

/// Successful chat send response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub status: Option<SessionStatus>,
}

/// Server-side view of a session, fetched on startup to catch up after
/// a reload. Every field is optional; a bare `{}` is a valid snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(default)]
    pub status: Option<SessionStatus>,
    #[serde(default)]
    pub assigned_to: Option<AgentRef>,
    #[serde(default)]
    pub initial_suggestions: Vec<String>,
    #[serde(default)]
    pub customer: Option<CustomerProfile>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Body of a feedback submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    pub shop_domain: String,
    pub session_id: String,
    pub message_id: String,
    /// The user message that led to the rated reply
    pub user_query: String,
    pub ai_response: String,
    pub rating: Rating,
    #[serde(rename = "type")]
    pub feedback_type: String,
}

/// Body of a client-side error report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shop_domain: Option<String>,
    pub context: String,
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sender;

    #[test]
    fn chat_request_uses_camel_case_keys() {
        let request = ChatRequest {
            message: "where is my order?".to_string(),
            session_id: "sess-1".to_string(),
            shop_domain: "shop.example.com".to_string(),
            client_message_id: "msg-local-1".to_string(),
            meta: ChatMeta {
                lang: "it".to_string(),
                page_url: Some("https://shop.example.com/products/scarf".to_string()),
            },
        };

        let serialized = serde_json::to_value(&request).expect("serialize");
        assert_eq!(serialized["sessionId"], "sess-1");
        assert_eq!(serialized["shopDomain"], "shop.example.com");
        assert_eq!(serialized["clientMessageId"], "msg-local-1");
        assert_eq!(serialized["meta"]["lang"], "it");
    }

    #[test]
    fn empty_snapshot_parses_with_defaults() {
        let snapshot: SessionSnapshot = serde_json::from_str("{}").expect("parse empty snapshot");
        assert!(snapshot.status.is_none());
        assert!(snapshot.assigned_to.is_none());
        assert!(snapshot.initial_suggestions.is_empty());
        assert!(snapshot.customer.is_none());
        assert!(snapshot.messages.is_empty());
    }

    #[test]
    fn snapshot_parses_full_payload() {
        let json = r#"{
          "status":"escalated",
          "assignedTo":{"id":"agent-1","name":"Marco"},
          "initialSuggestions":["Track my order","Find a gift"],
          "customer":{"email":"anna@example.com","firstName":"Anna"},
          "messages":[
            {"id":"m1","sender":"user","type":"text","text":"ciao","timestamp":"2024-03-01T10:00:00Z"},
            {"id":"m2","sender":"assistant","type":"text","text":"Ciao Anna!","timestamp":"2024-03-01T10:00:02Z"}
          ]
        }"#;

        let snapshot: SessionSnapshot = serde_json::from_str(json).expect("parse snapshot");
        assert_eq!(snapshot.status, Some(SessionStatus::Escalated));
        assert_eq!(snapshot.initial_suggestions.len(), 2);
        assert_eq!(
            snapshot.customer.as_ref().and_then(|c| c.first_name.as_deref()),
            Some("Anna")
        );
        assert_eq!(snapshot.messages.len(), 2);
        assert_eq!(snapshot.messages[0].sender, Sender::User);
    }

    #[test]
    fn feedback_request_renames_type_field() {
        let request = FeedbackRequest {
            shop_domain: "shop.example.com".to_string(),
            session_id: "sess-1".to_string(),
            message_id: "m2".to_string(),
            user_query: "where is my order?".to_string(),
            ai_response: "It shipped yesterday.".to_string(),
            rating: Rating::Up,
            feedback_type: "chat_message".to_string(),
        };

        let serialized = serde_json::to_value(&request).expect("serialize");
        assert_eq!(serialized["type"], "chat_message");
        assert_eq!(serialized["rating"], "up");
        assert_eq!(serialized["userQuery"], "where is my order?");
        assert_eq!(serialized["aiResponse"], "It shipped yesterday.");
    }
}
