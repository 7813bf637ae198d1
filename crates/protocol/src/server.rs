//! Server → Client channel events

use serde::{Deserialize, Serialize};

use crate::types::{AgentRef, Message, SessionStatus};

/// Events pushed by the server over the realtime channel.
///
/// Event names the client does not recognize parse as [`ChannelEvent::Unknown`]
/// so a server rollout of a new event never breaks an open connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ChannelEvent {
    /// A new message for the joined session
    #[serde(rename = "message:received")]
    MessageReceived { message: Message },

    /// The assistant started composing a reply
    #[serde(rename = "thinking:start")]
    ThinkingStart {
        #[serde(default)]
        intent: Option<String>,
    },

    /// Session status or assignment changed server-side
    #[serde(rename = "session:updated")]
    SessionUpdated {
        #[serde(default)]
        status: Option<SessionStatus>,
        #[serde(default)]
        assigned_to: Option<AgentRef>,
    },

    #[serde(other)]
    Unknown,
}
