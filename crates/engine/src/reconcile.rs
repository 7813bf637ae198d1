//! Message reconciliation
//!
//! Messages reach the widget from three places: the local optimistic path,
//! HTTP responses, and realtime pushes. The same logical message can arrive
//! on more than one of them; these routines keep the log deduplicated with
//! the server as the source of truth.

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};

use yuume_protocol::{Message, Sender};

/// What happened to a realtime message offered to the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// The log already holds a message with this id
    Duplicate,
    /// Suppressed internal signaling; remember the id so redelivery stays out
    Discarded,
}

/// Merge the server's snapshot of the conversation into the local log.
///
/// Local messages survive only when the server does not know their id, or
/// when they are client-side transients (welcome, synthetic error bubbles)
/// that were never sent upstream. For any id both sides know, the server's
/// copy wins. The result is sorted by timestamp and deduplicated by id.
pub fn merge_snapshot(local: Vec<Message>, server: Vec<Message>) -> Vec<Message> {
    let server_ids: HashSet<String> = server.iter().map(|m| m.id.clone()).collect();

    let mut merged: Vec<Message> = server;
    let mut retained: Vec<Message> = local
        .into_iter()
        .filter(|m| !server_ids.contains(m.id.as_str()) || m.is_local_transient())
        .collect();
    merged.append(&mut retained);

    // Stable sort keeps arrival order for equal timestamps
    merged.sort_by_key(|m| m.timestamp);

    let mut seen: HashSet<String> = HashSet::with_capacity(merged.len());
    merged.retain(|m| seen.insert(m.id.clone()));
    merged
}

/// Offer a realtime message to the log.
///
/// System-authored and hidden messages are internal signaling and are
/// dropped, but anything authored by the assistant is appended no matter how
/// it is flagged; assistant output must never be silently lost.
pub fn append_realtime(log: &mut Vec<Message>, incoming: Message) -> AppendOutcome {
    if log.iter().any(|m| m.id == incoming.id) {
        return AppendOutcome::Duplicate;
    }

    let internal = incoming.sender == Sender::System || incoming.hidden;
    if internal && incoming.sender != Sender::Assistant {
        return AppendOutcome::Discarded;
    }

    log.push(incoming);
    AppendOutcome::Appended
}

/// Append the local echo of a user send before the server confirms it,
/// returning the message for broadcast.
pub fn append_optimistic_user(
    log: &mut Vec<Message>,
    id: String,
    text: String,
    now: DateTime<Utc>,
) -> Message {
    let message = Message::user_text(id, text, now);
    log.push(message.clone());
    message
}

/// Bounded id memory for discarded realtime messages.
///
/// The server may redeliver after a reconnect; remembering discarded ids
/// keeps redelivery silent without growing without bound over a long-lived
/// tab.
#[derive(Debug, Clone)]
pub struct RecentIds {
    cap: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentIds {
    pub fn new(cap: usize) -> Self {
        RecentIds {
            cap: cap.max(1),
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn insert(&mut self, id: String) {
        if self.seen.contains(&id) {
            return;
        }
        while self.order.len() >= self.cap {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.order.push_back(id.clone());
        self.seen.insert(id);
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use yuume_protocol::{Message, MessageKind, Sender};

    fn at(base: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
        base + Duration::seconds(secs)
    }

    fn server_text(id: &str, text: &str, timestamp: DateTime<Utc>) -> Message {
        Message {
            id: id.to_string(),
            sender: Sender::Assistant,
            timestamp,
            hidden: false,
            no_nudge: false,
            kind: MessageKind::Text {
                text: text.to_string(),
            },
            feedback: None,
        }
    }

    #[test]
    fn server_copy_wins_for_shared_ids() {
        let base = Utc::now();
        let local = vec![Message::user_text(
            "m1".to_string(),
            "local copy".to_string(),
            at(base, 0),
        )];
        let server = vec![server_text("m1", "server copy", at(base, 1))];

        let merged = merge_snapshot(local, server);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].kind.text(), Some("server copy"));
    }

    #[test]
    fn local_only_messages_survive_the_merge() {
        let base = Utc::now();
        let local = vec![
            Message::welcome("w1".to_string(), "Ciao!".to_string(), at(base, 0)),
            Message::user_text("u1".to_string(), "pending send".to_string(), at(base, 5)),
        ];
        let server = vec![server_text("s1", "reply", at(base, 3))];

        let merged = merge_snapshot(local, server);
        let ids: Vec<&str> = merged.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["w1", "s1", "u1"]);
    }

    #[test]
    fn client_error_bubbles_survive_the_merge() {
        let base = Utc::now();
        let local = vec![Message::client_error(
            "e1".to_string(),
            "Ops".to_string(),
            at(base, 2),
        )];
        let server = vec![server_text("s1", "reply", at(base, 1))];

        let merged = merge_snapshot(local, server);
        assert_eq!(merged.len(), 2);
        assert!(merged.iter().any(|m| m.id == "e1"));
    }

    #[test]
    fn merge_sorts_by_timestamp_with_epoch_fallback_first() {
        let base = Utc::now();
        let mut undated = server_text("old", "no clock", base);
        undated.timestamp = DateTime::UNIX_EPOCH;
        let server = vec![server_text("s2", "later", at(base, 10)), undated];

        let merged = merge_snapshot(Vec::new(), server);
        let ids: Vec<&str> = merged.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["old", "s2"]);
    }

    #[test]
    fn merge_is_idempotent() {
        let base = Utc::now();
        let server = vec![
            server_text("s1", "one", at(base, 0)),
            server_text("s2", "two", at(base, 1)),
        ];

        let once = merge_snapshot(Vec::new(), server.clone());
        let twice = merge_snapshot(once.clone(), server);
        assert_eq!(once, twice);
    }

    #[test]
    fn duplicate_ids_within_a_snapshot_keep_the_first_occurrence() {
        let base = Utc::now();
        let server = vec![
            server_text("s1", "first", at(base, 0)),
            server_text("s1", "second", at(base, 5)),
        ];

        let merged = merge_snapshot(Vec::new(), server);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].kind.text(), Some("first"));
    }

    #[test]
    fn realtime_append_rejects_known_ids() {
        let base = Utc::now();
        let mut log = vec![server_text("s1", "hello", base)];
        let outcome = append_realtime(&mut log, server_text("s1", "hello again", at(base, 1)));
        assert_eq!(outcome, AppendOutcome::Duplicate);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn realtime_append_discards_system_messages() {
        let base = Utc::now();
        let mut log = Vec::new();
        let mut message = server_text("sys-1", "internal", base);
        message.sender = Sender::System;

        let outcome = append_realtime(&mut log, message);
        assert_eq!(outcome, AppendOutcome::Discarded);
        assert!(log.is_empty());
    }

    #[test]
    fn realtime_append_discards_hidden_user_messages() {
        let base = Utc::now();
        let mut log = Vec::new();
        let mut message = Message::user_text("u1".to_string(), "ghost".to_string(), base);
        message.hidden = true;

        let outcome = append_realtime(&mut log, message);
        assert_eq!(outcome, AppendOutcome::Discarded);
        assert!(log.is_empty());
    }

    #[test]
    fn hidden_assistant_messages_are_never_suppressed() {
        let base = Utc::now();
        let mut log = Vec::new();
        let mut message = server_text("a1", "quietly important", base);
        message.hidden = true;

        let outcome = append_realtime(&mut log, message);
        assert_eq!(outcome, AppendOutcome::Appended);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn recent_ids_evict_oldest_beyond_cap() {
        let mut recent = RecentIds::new(3);
        for id in ["a", "b", "c", "d"] {
            recent.insert(id.to_string());
        }
        assert!(!recent.contains("a"));
        assert!(recent.contains("b"));
        assert!(recent.contains("c"));
        assert!(recent.contains("d"));
    }

    #[test]
    fn recent_ids_reinsert_is_a_noop() {
        let mut recent = RecentIds::new(2);
        recent.insert("a".to_string());
        recent.insert("a".to_string());
        recent.insert("b".to_string());
        assert!(recent.contains("a"));
        assert!(recent.contains("b"));
    }
}
