//! Engine actor and public handle
//!
//! The engine runs as a single tokio task owning all session state.
//! Hosts communicate through [`ChatClient`], a cheap-to-clone handle:
//! commands go over an mpsc channel, reads come from an `ArcSwap`
//! snapshot, and changes are announced on a broadcast channel. Every
//! loop iteration feeds one input through the pure transition function
//! and then executes the returned effects.

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use yuume_protocol::{
    new_id, AgentRef, ChatRequest, ChatResponse, CustomerProfile, ErrorReport, FeedbackRequest,
    Message, Rating, SessionSnapshot, SessionStatus,
};

use crate::api::{ApiClient, ApiError};
use crate::channel::{self, ChannelHandle, ChannelUpdate, ConnectionStatus};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::locale::{self, Lang};
use crate::nudge::NudgeTimerKind;
use crate::store::SessionStore;
use crate::transition::{transition, Effect, EngineState, Input, Thinking};

/// Host-facing view of the conversation, swapped atomically after every step
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub session_id: String,
    pub status: SessionStatus,
    pub messages: Vec<Message>,
    pub assigned_agent: Option<AgentRef>,
    pub suggestions: Vec<String>,
    pub profile: Option<CustomerProfile>,
    pub thinking: Option<Thinking>,
    pub connection: ConnectionStatus,
}

impl EngineSnapshot {
    fn from_state(state: &EngineState) -> Self {
        EngineSnapshot {
            session_id: state.session_id.clone(),
            status: state.status,
            messages: state.messages.clone(),
            assigned_agent: state.assigned_agent.clone(),
            suggestions: state.suggestions.clone(),
            profile: state.profile.clone(),
            thinking: state.thinking.clone(),
            connection: state.channel_status,
        }
    }
}

/// Broadcast to subscribers on every externally visible change
#[derive(Debug, Clone)]
pub enum EngineEvent {
    MessageAppended { message: Message },
    /// An existing message changed in place (feedback, personalization)
    MessageUpdated { message: Message },
    /// The log was reconciled against a server snapshot; re-read it whole
    MessagesMerged,
    SessionReplaced { session_id: String },
    StatusChanged { status: SessionStatus },
    AgentChanged { agent: Option<AgentRef> },
    ThinkingChanged { thinking: Option<Thinking> },
    SuggestionsChanged { suggestions: Vec<String> },
    ConnectionChanged { status: ConnectionStatus },
    NudgeRequested { trigger_message_id: String },
}

enum EngineMsg {
    SendMessage {
        text: String,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    ResetSession,
    SubmitFeedback {
        message_id: String,
        rating: Rating,
    },
    SetChatOpen(bool),
    SetInputFocus(bool),
    ReportScroll(f64),
    SetNetworkOnline(bool),
    SetIdentity(CustomerProfile),
    SetShopDomain(String),
    Shutdown {
        reply: oneshot::Sender<()>,
    },

    // Results posted back by spawned tasks
    ChatResult {
        client_message_id: String,
        result: Result<ChatResponse, ApiError>,
    },
    SnapshotResult {
        result: Result<Option<SessionSnapshot>, ApiError>,
    },
    NudgeTimerFired {
        kind: NudgeTimerKind,
        batch_id: String,
    },
}

/// Handle to a running engine (cheap to Clone).
#[derive(Clone)]
pub struct ChatClient {
    tx: mpsc::Sender<EngineMsg>,
    snapshot: Arc<ArcSwap<EngineSnapshot>>,
    events: broadcast::Sender<EngineEvent>,
    connection: watch::Receiver<ConnectionStatus>,
}

impl ChatClient {
    /// Load the persisted session (expiry-checked), seed the welcome message
    /// when the log is empty, and spawn the engine loop plus the realtime
    /// channel. The initial server snapshot fetch starts in the background.
    pub fn spawn(config: EngineConfig) -> Result<ChatClient, EngineError> {
        let lang = Lang::from_tag(&config.lang);
        let store = SessionStore::open(
            &config.data_dir(),
            &config.shop_domain,
            config.session_timeout(),
        );

        let mut persisted = store.load();
        if persisted.messages.is_empty() {
            let now = Utc::now();
            persisted.messages.push(Message::welcome(
                new_id(),
                locale::welcome(lang).to_string(),
                now,
            ));
            persisted.touch(now);
            store.persist(&persisted);
        }
        let state = EngineState::from_persisted(persisted, lang);

        let api = ApiClient::new(&config.api_base)?;
        let (channel, channel_rx) =
            channel::spawn(config.socket_url.clone(), state.session_id.clone());

        let snapshot = Arc::new(ArcSwap::from_pointee(EngineSnapshot::from_state(&state)));
        let (events_tx, _) = broadcast::channel(256);
        let (connection_tx, connection_rx) = watch::channel(state.channel_status);
        let (command_tx, command_rx) = mpsc::channel(64);

        if !config.shop_domain.trim().is_empty() {
            let api = api.clone();
            let tx = command_tx.clone();
            let shop_domain = config.shop_domain.clone();
            let session_id = state.session_id.clone();
            tokio::spawn(async move {
                let result = api.fetch_snapshot(&shop_domain, &session_id).await;
                let _ = tx.send(EngineMsg::SnapshotResult { result }).await;
            });
        }

        info!(
            component = "engine",
            event = "engine.started",
            session_id = %state.session_id,
            restored_messages = state.messages.len(),
            "Engine started"
        );

        let actor = EngineActor {
            self_tx: command_tx.downgrade(),
            config,
            state,
            store,
            api,
            channel,
            channel_rx,
            commands: command_rx,
            snapshot: snapshot.clone(),
            events: events_tx.clone(),
            connection: connection_tx,
            nudge_timer: None,
        };
        tokio::spawn(actor.run());

        Ok(ChatClient {
            tx: command_tx,
            snapshot,
            events: events_tx,
            connection: connection_rx,
        })
    }

    /// Send a user message. Errors are integration bugs (no shop domain,
    /// engine gone); delivery failures surface as messages in the log.
    pub async fn send_message(&self, text: String) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineMsg::SendMessage {
                text,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::Closed)?;
        reply_rx.await.map_err(|_| EngineError::Closed)?
    }

    pub async fn reset_session(&self) {
        self.send(EngineMsg::ResetSession).await;
    }

    pub async fn submit_feedback(&self, message_id: String, rating: Rating) {
        self.send(EngineMsg::SubmitFeedback { message_id, rating })
            .await;
    }

    pub async fn set_chat_open(&self, open: bool) {
        self.send(EngineMsg::SetChatOpen(open)).await;
    }

    pub async fn set_input_focus(&self, focused: bool) {
        self.send(EngineMsg::SetInputFocus(focused)).await;
    }

    pub async fn report_scroll(&self, offset: f64) {
        self.send(EngineMsg::ReportScroll(offset)).await;
    }

    pub async fn set_network_online(&self, online: bool) {
        self.send(EngineMsg::SetNetworkOnline(online)).await;
    }

    pub async fn set_identity(&self, profile: CustomerProfile) {
        self.send(EngineMsg::SetIdentity(profile)).await;
    }

    pub async fn set_shop_domain(&self, shop_domain: String) {
        self.send(EngineMsg::SetShopDomain(shop_domain)).await;
    }

    /// Stop the engine: cancels timers, closes the channel, persists once
    /// more. Resolves when the loop has exited.
    pub async fn shutdown(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineMsg::Shutdown { reply: reply_tx }).await;
        let _ = reply_rx.await;
    }

    /// Lock-free snapshot read.
    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        self.snapshot.load_full()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.clone()
    }

    async fn send(&self, msg: EngineMsg) {
        if self.tx.send(msg).await.is_err() {
            warn!(
                component = "engine",
                event = "engine.command.dropped",
                "Engine loop gone, command dropped"
            );
        }
    }
}

struct EngineActor {
    config: EngineConfig,
    state: EngineState,
    store: SessionStore,
    api: ApiClient,
    channel: ChannelHandle,
    channel_rx: mpsc::Receiver<ChannelUpdate>,
    commands: mpsc::Receiver<EngineMsg>,
    /// Weak so in-flight tasks keep the loop alive but the loop never
    /// keeps itself alive after the last handle drops
    self_tx: mpsc::WeakSender<EngineMsg>,
    snapshot: Arc<ArcSwap<EngineSnapshot>>,
    events: broadcast::Sender<EngineEvent>,
    connection: watch::Sender<ConnectionStatus>,
    nudge_timer: Option<JoinHandle<()>>,
}

impl EngineActor {
    async fn run(mut self) {
        let poll = self.config.expiry_poll();
        let mut expiry = interval_at(Instant::now() + poll, poll);
        expiry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut channel_open = true;

        loop {
            tokio::select! {
                msg = self.commands.recv() => match msg {
                    Some(EngineMsg::Shutdown { reply }) => {
                        self.close().await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(msg) => self.handle_msg(msg).await,
                    // Last handle dropped
                    None => {
                        self.close().await;
                        return;
                    }
                },
                update = self.channel_rx.recv(), if channel_open => match update {
                    Some(ChannelUpdate::Status(status)) => {
                        let _ = self.connection.send(status);
                        self.step(Input::ChannelStatusChanged { status }).await;
                    }
                    Some(ChannelUpdate::Event(event)) => {
                        self.step(Input::Channel(event)).await;
                    }
                    None => channel_open = false,
                },
                _ = expiry.tick() => self.step(Input::ExpiryCheck).await,
            }
        }
    }

    async fn handle_msg(&mut self, msg: EngineMsg) {
        match msg {
            EngineMsg::SendMessage { text, reply } => {
                if self.config.shop_domain.trim().is_empty() {
                    let _ = reply.send(Err(EngineError::MissingShopDomain));
                    self.report_missing_domain();
                    self.step(Input::ShopDomainMissing).await;
                } else {
                    let _ = reply.send(Ok(()));
                    self.step(Input::UserSubmitted { text }).await;
                }
            }
            EngineMsg::ResetSession => self.step(Input::ResetRequested).await,
            EngineMsg::SubmitFeedback { message_id, rating } => {
                self.step(Input::FeedbackSubmitted { message_id, rating })
                    .await;
            }
            EngineMsg::SetChatOpen(open) => self.step(Input::ChatOpened { open }).await,
            EngineMsg::SetInputFocus(focused) => {
                self.step(Input::InputFocusChanged { focused }).await;
            }
            EngineMsg::ReportScroll(offset) => self.step(Input::ScrollMoved { offset }).await,
            EngineMsg::SetNetworkOnline(online) => self.channel.set_network_online(online).await,
            EngineMsg::SetIdentity(profile) => {
                self.step(Input::IdentityReceived { profile }).await;
            }
            EngineMsg::SetShopDomain(shop_domain) => {
                if shop_domain != self.config.shop_domain {
                    self.config.shop_domain = shop_domain;
                    self.store = SessionStore::open(
                        &self.config.data_dir(),
                        &self.config.shop_domain,
                        self.config.session_timeout(),
                    );
                    self.step(Input::DomainChanged).await;
                }
            }
            EngineMsg::ChatResult {
                client_message_id,
                result,
            } => match result {
                Ok(response) => {
                    self.step(Input::ChatAccepted {
                        client_message_id,
                        response,
                    })
                    .await;
                }
                Err(err) => {
                    warn!(
                        component = "engine",
                        event = "engine.chat.failed",
                        error = %err,
                        "Chat send failed"
                    );
                    self.step(Input::ChatFailed {
                        client_message_id,
                        kind: err.kind(),
                    })
                    .await;
                }
            },
            EngineMsg::SnapshotResult { result } => match result {
                Ok(Some(snapshot)) => self.step(Input::SnapshotLoaded { snapshot }).await,
                Ok(None) => self.step(Input::SnapshotMissing).await,
                // Normal for a session the server has never seen
                Err(err) => {
                    debug!(
                        component = "engine",
                        event = "engine.snapshot.unavailable",
                        error = %err,
                        "No server snapshot, continuing with the local session"
                    );
                    self.step(Input::SnapshotMissing).await;
                }
            },
            EngineMsg::NudgeTimerFired { kind, batch_id } => {
                self.step(Input::NudgeTimer { kind, batch_id }).await;
            }
            EngineMsg::Shutdown { .. } => unreachable!("handled in run()"),
        }
    }

    /// Feed one input through the transition, publish the fresh snapshot,
    /// then execute the effects. Snapshot first: a subscriber reading the
    /// snapshot on an emitted event must already see the new state.
    async fn step(&mut self, input: Input) {
        let state = std::mem::take(&mut self.state);
        let (state, effects) = transition(state, input, Utc::now(), &self.config);
        self.state = state;
        self.snapshot
            .store(Arc::new(EngineSnapshot::from_state(&self.state)));
        self.apply_effects(effects).await;
    }

    async fn apply_effects(&mut self, effects: Vec<Effect>) {
        // One store write per step no matter how many changes asked for it
        let mut persist = false;

        for effect in effects {
            match effect {
                Effect::Persist => persist = true,
                Effect::SendChat { request } => self.spawn_chat(request),
                Effect::SendChannel { event } => self.channel.send(event).await,
                Effect::JoinChannel { session_id } => self.channel.rejoin(session_id).await,
                Effect::SubmitFeedback { request } => self.spawn_feedback(request),
                Effect::StartNudgeTimer { kind, batch_id } => {
                    self.start_nudge_timer(kind, batch_id);
                }
                Effect::CancelNudgeTimers => {
                    if let Some(timer) = self.nudge_timer.take() {
                        timer.abort();
                    }
                }
                Effect::Emit(event) => {
                    let _ = self.events.send(event);
                }
            }
        }

        if persist {
            self.store.persist(&self.state.to_persisted());
        }
    }

    fn spawn_chat(&self, request: ChatRequest) {
        let Some(tx) = self.self_tx.upgrade() else {
            return;
        };
        let api = self.api.clone();
        tokio::spawn(async move {
            let client_message_id = request.client_message_id.clone();
            let result = api.post_chat(&request).await;
            let _ = tx
                .send(EngineMsg::ChatResult {
                    client_message_id,
                    result,
                })
                .await;
        });
    }

    fn spawn_feedback(&self, request: FeedbackRequest) {
        let api = self.api.clone();
        tokio::spawn(async move {
            if let Err(err) = api.submit_feedback(&request).await {
                warn!(
                    component = "engine",
                    event = "engine.feedback.failed",
                    error = %err,
                    "Feedback submission failed"
                );
            }
        });
    }

    fn report_missing_domain(&self) {
        let api = self.api.clone();
        let report = ErrorReport {
            shop_domain: None,
            context: "send_message".to_string(),
            detail: "shop domain is not configured".to_string(),
        };
        tokio::spawn(async move {
            if let Err(err) = api.report_error(&report).await {
                debug!(
                    component = "engine",
                    event = "engine.error_report.failed",
                    error = %err,
                    "Error report failed"
                );
            }
        });
    }

    /// One timer slot: settle and fire never overlap, and a new schedule
    /// replaces whatever was pending.
    fn start_nudge_timer(&mut self, kind: NudgeTimerKind, batch_id: String) {
        if let Some(timer) = self.nudge_timer.take() {
            timer.abort();
        }
        let Some(tx) = self.self_tx.upgrade() else {
            return;
        };
        let delay = match kind {
            NudgeTimerKind::Settle => self.config.nudge.settle_delay(),
            NudgeTimerKind::Fire => self.config.nudge.idle_timeout(),
        };
        self.nudge_timer = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(EngineMsg::NudgeTimerFired { kind, batch_id }).await;
        }));
    }

    async fn close(&mut self) {
        if let Some(timer) = self.nudge_timer.take() {
            timer.abort();
        }
        self.channel.shutdown().await;
        self.store.persist(&self.state.to_persisted());
        info!(
            component = "engine",
            event = "engine.stopped",
            session_id = %self.state.session_id,
            "Engine stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;
    use yuume_protocol::MessageKind;

    fn test_config(data_dir: &Path) -> EngineConfig {
        EngineConfig {
            shop_domain: "shop.example.com".to_string(),
            api_base: "http://127.0.0.1:9".to_string(),
            socket_url: "ws://127.0.0.1:9".to_string(),
            data_dir: Some(data_dir.to_path_buf()),
            ..EngineConfig::default()
        }
    }

    async fn wait_for<F>(rx: &mut broadcast::Receiver<EngineEvent>, pred: F) -> EngineEvent
    where
        F: Fn(&EngineEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(event) if pred(&event) => return event,
                    Ok(_) => {}
                    Err(err) => panic!("event stream ended: {err}"),
                }
            }
        })
        .await
        .expect("timed out waiting for engine event")
    }

    #[tokio::test]
    async fn spawn_seeds_a_welcome_message() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = ChatClient::spawn(test_config(dir.path())).expect("spawn");

        let snap = client.snapshot();
        assert_eq!(snap.status, SessionStatus::Active);
        assert_eq!(snap.messages.len(), 1);
        assert!(matches!(snap.messages[0].kind, MessageKind::Welcome { .. }));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn reset_replaces_the_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = ChatClient::spawn(test_config(dir.path())).expect("spawn");
        let old_id = client.snapshot().session_id.clone();

        let mut events = client.subscribe();
        client.reset_session().await;
        wait_for(&mut events, |e| {
            matches!(e, EngineEvent::SessionReplaced { .. })
        })
        .await;

        let snap = client.snapshot();
        assert_ne!(snap.session_id, old_id);
        assert_eq!(snap.messages.len(), 1);
        assert!(matches!(snap.messages[0].kind, MessageKind::Welcome { .. }));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn unreachable_api_surfaces_an_error_bubble() {
        let dir = tempfile::tempdir().expect("tempdir");
        let client = ChatClient::spawn(test_config(dir.path())).expect("spawn");

        let mut events = client.subscribe();
        client
            .send_message("where is my order?".to_string())
            .await
            .expect("send accepted");

        // Optimistic echo first, then the failure bubble once the request
        // to the dead endpoint gives up
        wait_for(&mut events, |e| {
            matches!(
                e,
                EngineEvent::MessageAppended { message }
                    if matches!(message.kind, MessageKind::ClientError { .. })
            )
        })
        .await;

        let snap = client.snapshot();
        assert!(snap
            .messages
            .iter()
            .any(|m| m.kind.text() == Some("where is my order?")));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn missing_shop_domain_is_rethrown() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = test_config(dir.path());
        config.shop_domain = String::new();
        let client = ChatClient::spawn(config).expect("spawn");

        let mut events = client.subscribe();
        let result = client.send_message("hello".to_string()).await;
        assert!(matches!(result, Err(EngineError::MissingShopDomain)));

        wait_for(&mut events, |e| {
            matches!(
                e,
                EngineEvent::MessageAppended { message }
                    if matches!(message.kind, MessageKind::ClientError { .. })
            )
        })
        .await;

        client.shutdown().await;
    }

    #[tokio::test]
    async fn session_persists_across_engine_instances() {
        let dir = tempfile::tempdir().expect("tempdir");

        let client = ChatClient::spawn(test_config(dir.path())).expect("spawn");
        let first_id = client.snapshot().session_id.clone();
        client.shutdown().await;

        let client = ChatClient::spawn(test_config(dir.path())).expect("spawn");
        assert_eq!(client.snapshot().session_id, first_id);
        client.shutdown().await;
    }
}
