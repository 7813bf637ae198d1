//! Pure state transition function
//!
//! All session and message logic lives here as a pure, synchronous
//! function: `transition(state, input, now, config) -> (state, effects)`.
//! No IO, no async, no locking — fully unit-testable. The engine loop
//! feeds it host commands, network results, channel events, and timer
//! expirations, then executes the returned effects.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use yuume_protocol::{
    new_id, AgentRef, ChatMeta, ChatRequest, ChatResponse, ChannelEvent, ClientEvent,
    CustomerProfile, FeedbackRequest, Message, MessageKind, Rating, Sender, SessionSnapshot,
    SessionStatus,
};

use crate::api::ChatFailKind;
use crate::channel::ConnectionStatus;
use crate::config::EngineConfig;
use crate::engine::EngineEvent;
use crate::locale::{self, Lang};
use crate::nudge::{self, NudgeEffect, NudgeGates, NudgeState, NudgeTimerKind};
use crate::reconcile::{self, AppendOutcome, RecentIds};
use crate::store::PersistedSession;

/// Ids of discarded realtime messages worth remembering
pub const SEEN_REALTIME_CAP: usize = 256;

// ---------------------------------------------------------------------------
// EngineState — pure data snapshot of the widget
// ---------------------------------------------------------------------------

/// Transient "assistant is composing" indicator
#[derive(Debug, Clone, PartialEq)]
pub struct Thinking {
    pub intent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EngineState {
    pub session_id: String,
    pub status: SessionStatus,
    pub messages: Vec<Message>,
    pub assigned_agent: Option<AgentRef>,
    pub suggestions: Vec<String>,
    pub profile: Option<CustomerProfile>,
    pub thinking: Option<Thinking>,
    pub last_activity: DateTime<Utc>,
    pub lang: Lang,
    pub chat_open: bool,
    pub input_focused: bool,
    pub channel_status: ConnectionStatus,
    /// Welcome text has already been rewritten with the shopper's name
    pub welcome_personalized: bool,
    /// Client message ids sent but not yet answered; results for ids outside
    /// this set belong to a replaced session and are dropped
    pub pending_sends: HashSet<String>,
    /// Discarded realtime ids, so redelivery stays silent
    pub seen_realtime: RecentIds,
    pub nudge: NudgeState,
}

impl EngineState {
    pub fn from_persisted(persisted: PersistedSession, lang: Lang) -> Self {
        EngineState {
            session_id: persisted.session_id,
            status: persisted.status,
            messages: persisted.messages,
            assigned_agent: None,
            suggestions: Vec::new(),
            profile: persisted.profile,
            thinking: None,
            last_activity: persisted.last_activity,
            lang,
            chat_open: false,
            input_focused: false,
            channel_status: ConnectionStatus::Reconnecting,
            welcome_personalized: false,
            pending_sends: HashSet::new(),
            seen_realtime: RecentIds::new(SEEN_REALTIME_CAP),
            nudge: NudgeState::default(),
        }
    }

    pub fn to_persisted(&self) -> PersistedSession {
        PersistedSession {
            session_id: self.session_id.clone(),
            status: self.status,
            messages: self.messages.clone(),
            last_activity: self.last_activity,
            profile: self.profile.clone(),
        }
    }
}

impl Default for EngineState {
    fn default() -> Self {
        EngineState::from_persisted(PersistedSession::fresh(DateTime::UNIX_EPOCH), Lang::En)
    }
}

// ---------------------------------------------------------------------------
// Input — everything that can happen to the widget
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Input {
    // Host actions
    UserSubmitted { text: String },
    ResetRequested,
    DomainChanged,
    ShopDomainMissing,
    IdentityReceived { profile: CustomerProfile },
    FeedbackSubmitted { message_id: String, rating: Rating },
    ChatOpened { open: bool },
    InputFocusChanged { focused: bool },
    ScrollMoved { offset: f64 },

    // Network results
    ChatAccepted {
        client_message_id: String,
        response: ChatResponse,
    },
    ChatFailed {
        client_message_id: String,
        kind: ChatFailKind,
    },
    SnapshotLoaded { snapshot: SessionSnapshot },
    SnapshotMissing,

    // Realtime channel
    Channel(ChannelEvent),
    ChannelStatusChanged { status: ConnectionStatus },

    // Timers
    ExpiryCheck,
    NudgeTimer {
        kind: NudgeTimerKind,
        batch_id: String,
    },
}

// ---------------------------------------------------------------------------
// Effects — describe IO to be executed by the engine loop
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Effect {
    /// Write the current state to the session store
    Persist,
    /// POST the chat request; the result comes back as ChatAccepted/ChatFailed
    SendChat { request: ChatRequest },
    /// Send an event over the realtime channel (fire-and-forget)
    SendChannel { event: ClientEvent },
    /// Re-bind the realtime channel to a new session id
    JoinChannel { session_id: String },
    /// POST feedback; failures are logged and dropped
    SubmitFeedback { request: FeedbackRequest },
    StartNudgeTimer {
        kind: NudgeTimerKind,
        batch_id: String,
    },
    CancelNudgeTimers,
    /// Broadcast to engine subscribers
    Emit(EngineEvent),
}

// ---------------------------------------------------------------------------
// transition() — the pure core
// ---------------------------------------------------------------------------

/// Pure, synchronous state transition.
///
/// Given the current state and an input, returns the new state and a list
/// of effects (persistence, network sends, timer changes, broadcasts) to
/// execute.
pub fn transition(
    mut state: EngineState,
    input: Input,
    now: DateTime<Utc>,
    config: &EngineConfig,
) -> (EngineState, Vec<Effect>) {
    let mut effects: Vec<Effect> = Vec::new();

    match input {
        // -- Host actions ------------------------------------------------------
        Input::UserSubmitted { text } => {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                if state.status.is_terminal() {
                    // The conversation is closed server-side; a new message
                    // starts a new session instead of resurrecting the old one.
                    effects.extend(start_new_session(&mut state, now, true));
                }

                let client_message_id = new_id();
                let message = reconcile::append_optimistic_user(
                    &mut state.messages,
                    client_message_id.clone(),
                    trimmed.to_string(),
                    now,
                );
                state.pending_sends.insert(client_message_id.clone());
                state.last_activity = now;

                effects.push(Effect::Persist);
                effects.push(Effect::SendChat {
                    request: ChatRequest {
                        message: trimmed.to_string(),
                        session_id: state.session_id.clone(),
                        shop_domain: config.shop_domain.clone(),
                        client_message_id,
                        meta: ChatMeta {
                            lang: config.lang.clone(),
                            page_url: config.page_url.clone(),
                        },
                    },
                });
                effects.push(Effect::Emit(EngineEvent::MessageAppended { message }));
            }
        }

        Input::ResetRequested => {
            effects.extend(start_new_session(&mut state, now, true));
        }

        Input::DomainChanged => {
            // A different merchant: nothing from the old conversation applies,
            // identity included.
            effects.extend(start_new_session(&mut state, now, false));
        }

        Input::ShopDomainMissing => {
            let bubble = Message::client_error(
                new_id(),
                locale::missing_configuration(state.lang).to_string(),
                now,
            );
            state.messages.push(bubble.clone());
            effects.push(Effect::Persist);
            effects.push(Effect::Emit(EngineEvent::MessageAppended { message: bubble }));
        }

        Input::IdentityReceived { profile } => {
            apply_profile(&mut state, profile, &mut effects);
        }

        Input::FeedbackSubmitted { message_id, rating } => {
            apply_feedback(&mut state, &message_id, rating, config, &mut effects);
        }

        Input::ChatOpened { open } => {
            state.chat_open = open;
        }

        Input::InputFocusChanged { focused } => {
            state.input_focused = focused;
        }

        Input::ScrollMoved { offset } => {
            if let Some(effect) = nudge::on_scroll(&mut state.nudge, offset, &config.nudge) {
                let session_id = state.session_id.clone();
                effects.extend(lower_nudge_effect(&session_id, effect));
            }
        }

        // -- Network results ---------------------------------------------------
        Input::ChatAccepted {
            client_message_id,
            response,
        } => {
            // Results for a send made under a replaced session are stale
            if state.pending_sends.remove(&client_message_id) {
                clear_thinking(&mut state, &mut effects);

                if let Some(message) = response.message {
                    let id = message.id.clone();
                    match reconcile::append_realtime(&mut state.messages, message.clone()) {
                        AppendOutcome::Appended => {
                            effects.push(Effect::Persist);
                            effects
                                .push(Effect::Emit(EngineEvent::MessageAppended { message }));
                        }
                        // The realtime echo got here first
                        AppendOutcome::Duplicate => {}
                        AppendOutcome::Discarded => {
                            state.seen_realtime.insert(id);
                        }
                    }
                }
                if let Some(status) = response.status {
                    set_status(&mut state, status, &mut effects);
                }
            }
        }

        Input::ChatFailed {
            client_message_id,
            kind,
        } => {
            if state.pending_sends.remove(&client_message_id) {
                clear_thinking(&mut state, &mut effects);

                let text = match kind {
                    ChatFailKind::SessionExpired => {
                        // The server no longer knows this session; restart and
                        // tell the shopper why the log just reset.
                        effects.extend(start_new_session(&mut state, now, true));
                        locale::session_expired(state.lang)
                    }
                    ChatFailKind::Transient => locale::generic_send_error(state.lang),
                };

                let bubble = Message::client_error(new_id(), text.to_string(), now);
                state.messages.push(bubble.clone());
                effects.push(Effect::Persist);
                effects.push(Effect::Emit(EngineEvent::MessageAppended { message: bubble }));
            }
        }

        Input::SnapshotLoaded { snapshot } => {
            apply_snapshot(&mut state, snapshot, &mut effects);
        }

        // Expected for brand-new sessions; nothing to reconcile
        Input::SnapshotMissing => {}

        // -- Realtime channel --------------------------------------------------
        Input::Channel(event) => match event {
            ChannelEvent::MessageReceived { message } => {
                if !state.seen_realtime.contains(&message.id) {
                    let id = message.id.clone();
                    let from_assistant = message.sender == Sender::Assistant;
                    match reconcile::append_realtime(&mut state.messages, message.clone()) {
                        AppendOutcome::Appended => {
                            if from_assistant {
                                clear_thinking(&mut state, &mut effects);
                            }
                            effects.push(Effect::Persist);
                            effects
                                .push(Effect::Emit(EngineEvent::MessageAppended { message }));
                        }
                        AppendOutcome::Duplicate => {}
                        AppendOutcome::Discarded => {
                            state.seen_realtime.insert(id);
                        }
                    }
                }
            }

            ChannelEvent::ThinkingStart { intent } => {
                state.thinking = Some(Thinking { intent });
                effects.push(Effect::Emit(EngineEvent::ThinkingChanged {
                    thinking: state.thinking.clone(),
                }));
            }

            ChannelEvent::SessionUpdated {
                status,
                assigned_to,
            } => {
                let released = status == Some(SessionStatus::Active)
                    && state.status == SessionStatus::Escalated;
                if let Some(status) = status {
                    set_status(&mut state, status, &mut effects);
                }
                if let Some(agent) = assigned_to {
                    set_agent(&mut state, Some(agent), &mut effects);
                } else if released {
                    // Back from escalation with no agent in the payload means
                    // the handoff ended
                    set_agent(&mut state, None, &mut effects);
                }
            }

            ChannelEvent::Unknown => {}
        },

        Input::ChannelStatusChanged { status } => {
            if state.channel_status != status {
                state.channel_status = status;
                effects.push(Effect::Emit(EngineEvent::ConnectionChanged { status }));
            }
        }

        // -- Timers ------------------------------------------------------------
        Input::ExpiryCheck => {
            if now.signed_duration_since(state.last_activity) >= config.session_timeout() {
                effects.extend(start_new_session(&mut state, now, false));
            }
        }

        Input::NudgeTimer { kind, batch_id } => {
            let gates = NudgeGates {
                chat_open: state.chat_open,
                channel_online: state.channel_status == ConnectionStatus::Online,
                has_session: !state.session_id.is_empty(),
                input_focused: state.input_focused,
                tail: state.messages.last(),
            };
            if let Some(effect) = nudge::on_timer(&mut state.nudge, kind, &batch_id, &gates) {
                let session_id = state.session_id.clone();
                effects.extend(lower_nudge_effect(&session_id, effect));
            }
        }
    }

    // Any input can change what the nudge scheduler sees; re-check it once
    // per step so arming and cancellation stay in sync with the log.
    let gates = NudgeGates {
        chat_open: state.chat_open,
        channel_online: state.channel_status == ConnectionStatus::Online,
        has_session: !state.session_id.is_empty(),
        input_focused: state.input_focused,
        tail: state.messages.last(),
    };
    let nudge_effects = nudge::evaluate(&mut state.nudge, &gates, &config.nudge);
    if !nudge_effects.is_empty() {
        let session_id = state.session_id.clone();
        for effect in nudge_effects {
            effects.extend(lower_nudge_effect(&session_id, effect));
        }
    }

    (state, effects)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Replace the session wholesale: fresh id, fresh log, welcome re-seeded.
fn start_new_session(
    state: &mut EngineState,
    now: DateTime<Utc>,
    keep_profile: bool,
) -> Vec<Effect> {
    state.session_id = new_id();
    state.status = SessionStatus::Active;
    state.assigned_agent = None;
    state.suggestions.clear();
    state.thinking = None;
    if !keep_profile {
        state.profile = None;
    }
    state.last_activity = now;
    state.pending_sends.clear();
    state.seen_realtime.clear();
    state.nudge.reset();

    state.messages.clear();
    let first_name = state
        .profile
        .as_ref()
        .and_then(|p| p.first_name.as_deref())
        .map(str::trim)
        .filter(|name| !name.is_empty());
    let text = match first_name {
        Some(name) => locale::welcome_named(state.lang, name),
        None => locale::welcome(state.lang).to_string(),
    };
    state.welcome_personalized = first_name.is_some();
    state.messages.push(Message::welcome(new_id(), text, now));

    vec![
        Effect::CancelNudgeTimers,
        Effect::JoinChannel {
            session_id: state.session_id.clone(),
        },
        Effect::Persist,
        Effect::Emit(EngineEvent::SessionReplaced {
            session_id: state.session_id.clone(),
        }),
    ]
}

fn clear_thinking(state: &mut EngineState, effects: &mut Vec<Effect>) {
    if state.thinking.take().is_some() {
        effects.push(Effect::Emit(EngineEvent::ThinkingChanged { thinking: None }));
    }
}

fn set_status(state: &mut EngineState, status: SessionStatus, effects: &mut Vec<Effect>) {
    if state.status != status {
        state.status = status;
        effects.push(Effect::Persist);
        effects.push(Effect::Emit(EngineEvent::StatusChanged { status }));
    }
}

fn set_agent(state: &mut EngineState, agent: Option<AgentRef>, effects: &mut Vec<Effect>) {
    if state.assigned_agent != agent {
        state.assigned_agent = agent.clone();
        effects.push(Effect::Emit(EngineEvent::AgentChanged { agent }));
    }
}

/// Merge identity fields and personalize the welcome message once, while it
/// is still the only thing in the log.
fn apply_profile(state: &mut EngineState, incoming: CustomerProfile, effects: &mut Vec<Effect>) {
    let mut merged = state.profile.take().unwrap_or_default();
    if incoming.email.is_some() {
        merged.email = incoming.email;
    }
    if incoming.first_name.is_some() {
        merged.first_name = incoming.first_name;
    }
    if incoming.last_name.is_some() {
        merged.last_name = incoming.last_name;
    }
    if incoming.shopify_id.is_some() {
        merged.shopify_id = incoming.shopify_id;
    }
    state.profile = Some(merged);
    effects.push(Effect::Persist);

    if state.welcome_personalized || state.messages.len() != 1 {
        return;
    }
    let first_name = match state
        .profile
        .as_ref()
        .and_then(|p| p.first_name.as_deref())
        .map(str::trim)
        .filter(|name| !name.is_empty())
    {
        Some(name) => name.to_string(),
        None => return,
    };
    if let Some(first) = state.messages.first_mut() {
        if matches!(first.kind, MessageKind::Welcome { .. }) {
            first.kind = MessageKind::Welcome {
                text: locale::welcome_named(state.lang, &first_name),
            };
            state.welcome_personalized = true;
            let message = first.clone();
            effects.push(Effect::Emit(EngineEvent::MessageUpdated { message }));
        }
    }
}

fn apply_snapshot(state: &mut EngineState, snapshot: SessionSnapshot, effects: &mut Vec<Effect>) {
    if let Some(status) = snapshot.status {
        set_status(state, status, effects);
    }
    if let Some(agent) = snapshot.assigned_to {
        set_agent(state, Some(agent), effects);
    }
    if !snapshot.initial_suggestions.is_empty() && state.suggestions != snapshot.initial_suggestions
    {
        state.suggestions = snapshot.initial_suggestions;
        effects.push(Effect::Emit(EngineEvent::SuggestionsChanged {
            suggestions: state.suggestions.clone(),
        }));
    }
    if let Some(customer) = snapshot.customer {
        apply_profile(state, customer, effects);
    }
    if !snapshot.messages.is_empty() {
        let before = std::mem::take(&mut state.messages);
        state.messages = reconcile::merge_snapshot(before.clone(), snapshot.messages);
        if state.messages != before {
            effects.push(Effect::Persist);
            effects.push(Effect::Emit(EngineEvent::MessagesMerged));
        }
    }
}

/// Attach a rating and build the upstream report with its conversational
/// context: the rated reply plus the user message that led to it.
fn apply_feedback(
    state: &mut EngineState,
    message_id: &str,
    rating: Rating,
    config: &EngineConfig,
    effects: &mut Vec<Effect>,
) {
    let Some(index) = state.messages.iter().position(|m| m.id == message_id) else {
        return;
    };
    // The welcome bubble is not rateable
    if matches!(state.messages[index].kind, MessageKind::Welcome { .. }) {
        return;
    }

    state.messages[index].feedback = Some(rating);
    let ai_response = state.messages[index]
        .kind
        .text()
        .unwrap_or_default()
        .to_string();
    let user_query = state.messages[..index]
        .iter()
        .rev()
        .find(|m| m.sender == Sender::User)
        .and_then(|m| m.kind.text())
        .unwrap_or_default()
        .to_string();
    let message = state.messages[index].clone();

    effects.push(Effect::Persist);
    effects.push(Effect::SubmitFeedback {
        request: FeedbackRequest {
            shop_domain: config.shop_domain.clone(),
            session_id: state.session_id.clone(),
            message_id: message_id.to_string(),
            user_query,
            ai_response,
            rating,
            feedback_type: "chat_message".to_string(),
        },
    });
    effects.push(Effect::Emit(EngineEvent::MessageUpdated { message }));
}

fn lower_nudge_effect(session_id: &str, effect: NudgeEffect) -> Vec<Effect> {
    match effect {
        NudgeEffect::StartSettleTimer { batch_id } => vec![Effect::StartNudgeTimer {
            kind: NudgeTimerKind::Settle,
            batch_id,
        }],
        NudgeEffect::StartFireTimer { batch_id } => vec![Effect::StartNudgeTimer {
            kind: NudgeTimerKind::Fire,
            batch_id,
        }],
        NudgeEffect::CancelTimers => vec![Effect::CancelNudgeTimers],
        NudgeEffect::Fire { trigger_message_id } => vec![
            Effect::SendChannel {
                event: ClientEvent::NudgeRequest {
                    session_id: session_id.to_string(),
                    trigger_message_id: trigger_message_id.clone(),
                },
            },
            Effect::Emit(EngineEvent::NudgeRequested { trigger_message_id }),
        ],
    }
}
