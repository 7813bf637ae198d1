//! Client → Server channel events

use serde::{Deserialize, Serialize};

/// Events sent from the widget to the realtime channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    /// Bind this connection to a session so the server can route pushes to it.
    /// Sent once after every successful connect.
    #[serde(rename = "join_session")]
    JoinSession { session_id: String },

    /// Ask the server to compose a proactive follow-up for a stalled batch.
    #[serde(rename = "nudge:request")]
    NudgeRequest {
        session_id: String,
        trigger_message_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::ClientEvent;

    #[test]
    fn serializes_join_session() {
        let event = ClientEvent::JoinSession {
            session_id: "sess-1".to_string(),
        };
        let serialized = serde_json::to_value(&event).expect("serialize");
        assert_eq!(serialized["type"], "join_session");
        assert_eq!(serialized["sessionId"], "sess-1");
    }

    #[test]
    fn serializes_nudge_request_with_colon_tag() {
        let event = ClientEvent::NudgeRequest {
            session_id: "sess-2".to_string(),
            trigger_message_id: "msg-9".to_string(),
        };
        let serialized = serde_json::to_value(&event).expect("serialize");
        assert_eq!(serialized["type"], "nudge:request");
        assert_eq!(serialized["sessionId"], "sess-2");
        assert_eq!(serialized["triggerMessageId"], "msg-9");
    }

    #[test]
    fn roundtrip_nudge_request() {
        let json = r#"{"type":"nudge:request","sessionId":"sess-3","triggerMessageId":"msg-1"}"#;
        let parsed: ClientEvent = serde_json::from_str(json).expect("parse nudge:request");
        match &parsed {
            ClientEvent::NudgeRequest {
                session_id,
                trigger_message_id,
            } => {
                assert_eq!(session_id, "sess-3");
                assert_eq!(trigger_message_id, "msg-1");
            }
            other => panic!("unexpected variant: {:?}", other),
        }
        let serialized = serde_json::to_string(&parsed).expect("serialize");
        let _: ClientEvent = serde_json::from_str(&serialized).expect("reparse");
    }
}
