//! Core types shared across the protocol

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Escalated,
    Completed,
    Abandoned,
}

impl SessionStatus {
    /// Terminal sessions accept no further messages; a new session must be
    /// started before the next send.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Abandoned)
    }
}

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Assistant,
    System,
}

/// Feedback rating attached to an assistant message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Up,
    Down,
}

/// A human agent a session can be escalated to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Customer identity resolved by the server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shopify_id: Option<String>,
}

/// A product recommendation rendered as a card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_url: Option<String>,
}

/// Result row of an order lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCard {
    pub order_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_url: Option<String>,
}

/// Input field type on an order lookup form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormFieldKind {
    Text,
    Email,
    #[serde(other)]
    Other,
}

impl Default for FormFieldKind {
    fn default() -> Self {
        FormFieldKind::Text
    }
}

/// One input field on an order lookup form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    pub label: String,
    #[serde(default)]
    pub kind: FormFieldKind,
    #[serde(default)]
    pub required: bool,
}

/// Order lookup form definition sent by the assistant
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderFormConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub fields: Vec<FormField>,
}

/// Rendering intent of a message together with its payload.
///
/// The tag travels inline with the rest of the message fields on the wire,
/// so this enum is flattened into [`Message`]. Tags the client does not
/// recognize fall back to [`MessageKind::Unknown`] instead of failing the
/// whole parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum MessageKind {
    Text {
        text: String,
    },
    ProductCards {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default)]
        products: Vec<ProductCard>,
    },
    OrderForm {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default)]
        form: OrderFormConfig,
    },
    OrderResults {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default)]
        orders: Vec<OrderCard>,
        #[serde(default)]
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        in_reply_to: Option<String>,
    },
    Nudge {
        text: String,
    },
    Welcome {
        text: String,
    },
    ClientError {
        text: String,
    },
    #[serde(other)]
    Unknown,
}

impl MessageKind {
    /// Wire tag for this kind
    pub fn tag(&self) -> &'static str {
        match self {
            MessageKind::Text { .. } => "text",
            MessageKind::ProductCards { .. } => "product_cards",
            MessageKind::OrderForm { .. } => "order_form",
            MessageKind::OrderResults { .. } => "order_results",
            MessageKind::Nudge { .. } => "nudge",
            MessageKind::Welcome { .. } => "welcome",
            MessageKind::ClientError { .. } => "client_error",
            MessageKind::Unknown => "unknown",
        }
    }

    /// Display text carried by this kind, if any
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageKind::Text { text }
            | MessageKind::Nudge { text }
            | MessageKind::Welcome { text }
            | MessageKind::ClientError { text } => Some(text),
            MessageKind::ProductCards { text, .. }
            | MessageKind::OrderForm { text, .. }
            | MessageKind::OrderResults { text, .. } => text.as_deref(),
            MessageKind::Unknown => None,
        }
    }
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender: Sender,
    #[serde(default = "unix_epoch", deserialize_with = "lenient_instant")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub no_nudge: bool,
    #[serde(flatten)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Rating>,
}

impl Message {
    pub fn user_text(id: String, text: String, timestamp: DateTime<Utc>) -> Self {
        Message {
            id,
            sender: Sender::User,
            timestamp,
            hidden: false,
            no_nudge: false,
            kind: MessageKind::Text { text },
            feedback: None,
        }
    }

    pub fn welcome(id: String, text: String, timestamp: DateTime<Utc>) -> Self {
        Message {
            id,
            sender: Sender::Assistant,
            timestamp,
            hidden: false,
            no_nudge: true,
            kind: MessageKind::Welcome { text },
            feedback: None,
        }
    }

    /// Synthetic assistant message surfacing a local failure to the user.
    /// Never sent to the server.
    pub fn client_error(id: String, text: String, timestamp: DateTime<Utc>) -> Self {
        Message {
            id,
            sender: Sender::Assistant,
            timestamp,
            hidden: false,
            no_nudge: true,
            kind: MessageKind::ClientError { text },
            feedback: None,
        }
    }

    /// Messages that exist only on this client and must survive a merge
    /// against the server's view of the conversation.
    pub fn is_local_transient(&self) -> bool {
        matches!(
            self.kind,
            MessageKind::ClientError { .. } | MessageKind::Welcome { .. }
        )
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

pub(crate) fn unix_epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

/// Timestamps arrive from storage and from the server; a malformed or
/// missing one sorts the message to the front rather than rejecting it.
pub(crate) fn lenient_instant<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|parsed| parsed.with_timezone(&Utc))
            .unwrap_or(DateTime::UNIX_EPOCH),
        serde_json::Value::Number(raw) => raw
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or(DateTime::UNIX_EPOCH),
        _ => DateTime::UNIX_EPOCH,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_flat_product_cards_message() {
        let json = r#"{
          "id":"msg-1",
          "sender":"assistant",
          "type":"product_cards",
          "text":"Here are a few options",
          "products":[{"title":"Wool scarf","price":"29.90 EUR","imageUrl":"https://cdn.example/scarf.jpg"}],
          "timestamp":"2024-03-01T10:15:00Z"
        }"#;

        let parsed: Message = serde_json::from_str(json).expect("parse product cards message");
        assert_eq!(parsed.id, "msg-1");
        assert_eq!(parsed.sender, Sender::Assistant);
        assert!(!parsed.hidden);
        match &parsed.kind {
            MessageKind::ProductCards { text, products } => {
                assert_eq!(text.as_deref(), Some("Here are a few options"));
                assert_eq!(products.len(), 1);
                assert_eq!(products[0].title, "Wool scarf");
                assert_eq!(products[0].image_url.as_deref(), Some("https://cdn.example/scarf.jpg"));
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn unknown_type_tag_falls_back_instead_of_failing() {
        let json = r#"{
          "id":"msg-2",
          "sender":"assistant",
          "type":"hologram",
          "payload":{"anything":"goes"},
          "timestamp":"2024-03-01T10:15:00Z"
        }"#;

        let parsed: Message = serde_json::from_str(json).expect("parse unknown kind");
        assert_eq!(parsed.kind, MessageKind::Unknown);
        assert_eq!(parsed.kind.tag(), "unknown");
    }

    #[test]
    fn missing_timestamp_defaults_to_epoch() {
        let json = r#"{"id":"msg-3","sender":"user","type":"text","text":"hi"}"#;
        let parsed: Message = serde_json::from_str(json).expect("parse without timestamp");
        assert_eq!(parsed.timestamp, DateTime::UNIX_EPOCH);
    }

    #[test]
    fn malformed_timestamp_defaults_to_epoch() {
        let json = r#"{
          "id":"msg-4",
          "sender":"user",
          "type":"text",
          "text":"hi",
          "timestamp":"yesterday-ish"
        }"#;
        let parsed: Message = serde_json::from_str(json).expect("parse with bad timestamp");
        assert_eq!(parsed.timestamp, DateTime::UNIX_EPOCH);
    }

    #[test]
    fn numeric_timestamp_is_read_as_unix_seconds() {
        let json = r#"{"id":"msg-5","sender":"user","type":"text","text":"hi","timestamp":1709287200}"#;
        let parsed: Message = serde_json::from_str(json).expect("parse with numeric timestamp");
        assert_eq!(parsed.timestamp.timestamp(), 1709287200);
    }

    #[test]
    fn roundtrip_keeps_kind_inline() {
        let message = Message {
            id: "msg-6".to_string(),
            sender: Sender::Assistant,
            timestamp: DateTime::parse_from_rfc3339("2024-03-01T10:15:00Z")
                .expect("fixture timestamp")
                .with_timezone(&Utc),
            hidden: false,
            no_nudge: false,
            kind: MessageKind::OrderResults {
                text: Some("Found it".to_string()),
                orders: vec![OrderCard {
                    order_number: "#1042".to_string(),
                    status: Some("fulfilled".to_string()),
                    placed_at: None,
                    tracking_url: None,
                }],
                success: true,
                in_reply_to: Some("msg-form-1".to_string()),
            },
            feedback: None,
        };

        let serialized = serde_json::to_value(&message).expect("serialize");
        assert_eq!(serialized["type"], "order_results");
        assert_eq!(serialized["success"], true);
        assert_eq!(serialized["inReplyTo"], "msg-form-1");
        assert!(serialized.get("kind").is_none());

        let reparsed: Message = serde_json::from_value(serialized).expect("reparse");
        assert_eq!(reparsed, message);
    }

    #[test]
    fn hidden_and_no_nudge_default_to_false() {
        let json = r#"{"id":"msg-7","sender":"system","type":"text","text":"internal"}"#;
        let parsed: Message = serde_json::from_str(json).expect("parse");
        assert!(!parsed.hidden);
        assert!(!parsed.no_nudge);
    }

    #[test]
    fn terminal_statuses() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Abandoned.is_terminal());
        assert!(!SessionStatus::Active.is_terminal());
        assert!(!SessionStatus::Escalated.is_terminal());
    }

    #[test]
    fn welcome_and_client_error_are_local_transients() {
        let now = Utc::now();
        let welcome = Message::welcome("w-1".to_string(), "Ciao!".to_string(), now);
        let error = Message::client_error("e-1".to_string(), "Ops".to_string(), now);
        let user = Message::user_text("u-1".to_string(), "hello".to_string(), now);
        assert!(welcome.is_local_transient());
        assert!(error.is_local_transient());
        assert!(!user.is_local_transient());
    }
}
