//! Realtime channel manager
//!
//! Owns the WebSocket to the chat service: connects, joins the current
//! session, decodes pushes, and reconnects forever with capped backoff.
//! The engine sees decoded [`ChannelEvent`]s and a coarse
//! [`ConnectionStatus`]; everything socket-shaped stays in here.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use yuume_protocol::{ChannelEvent, ClientEvent};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Coarse connectivity as shown to the shopper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Online,
    /// Our server is unreachable but the device itself has a network
    Reconnecting,
    /// The device reports no network; retrying is pointless until it returns
    Offline,
}

#[derive(Debug)]
pub enum ChannelCommand {
    Send(ClientEvent),
    /// Drop the connection and reconnect joined to a new session
    Rejoin { session_id: String },
    NetworkChanged { online: bool },
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum ChannelUpdate {
    Status(ConnectionStatus),
    Event(ChannelEvent),
}

/// Where one connection's serve loop left the manager
enum ServeOutcome {
    Disconnected,
    Rejoin,
    WentOffline,
    Shutdown,
}

#[derive(Clone)]
pub struct ChannelHandle {
    tx: mpsc::Sender<ChannelCommand>,
}

impl ChannelHandle {
    pub async fn send(&self, event: ClientEvent) {
        let _ = self.tx.send(ChannelCommand::Send(event)).await;
    }

    pub async fn rejoin(&self, session_id: String) {
        let _ = self.tx.send(ChannelCommand::Rejoin { session_id }).await;
    }

    pub async fn set_network_online(&self, online: bool) {
        let _ = self
            .tx
            .send(ChannelCommand::NetworkChanged { online })
            .await;
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(ChannelCommand::Shutdown).await;
    }
}

/// Spawn the channel manager task. The returned receiver carries decoded
/// events and status changes until shutdown.
pub fn spawn(socket_url: String, session_id: String) -> (ChannelHandle, mpsc::Receiver<ChannelUpdate>) {
    let (command_tx, command_rx) = mpsc::channel(64);
    let (update_tx, update_rx) = mpsc::channel(256);

    let manager = ChannelManager {
        socket_url,
        session_id,
        online: true,
        commands: command_rx,
        updates: update_tx,
    };
    tokio::spawn(manager.run());

    (ChannelHandle { tx: command_tx }, update_rx)
}

struct ChannelManager {
    socket_url: String,
    session_id: String,
    online: bool,
    commands: mpsc::Receiver<ChannelCommand>,
    updates: mpsc::Sender<ChannelUpdate>,
}

impl ChannelManager {
    async fn run(mut self) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if !self.online {
                if !self.wait_for_network().await {
                    break;
                }
                backoff = INITIAL_BACKOFF;
            }

            if !self.report(ConnectionStatus::Reconnecting).await {
                break;
            }

            let socket = match timeout(CONNECT_TIMEOUT, connect_async(&self.socket_url)).await {
                Ok(Ok((socket, _))) => Some(socket),
                Ok(Err(err)) => {
                    debug!(
                        component = "channel",
                        event = "channel.connect.failed",
                        error = %err,
                        retry_in_ms = backoff.as_millis() as u64,
                        "Connect attempt failed"
                    );
                    None
                }
                Err(_) => {
                    warn!(
                        component = "channel",
                        event = "channel.connect.timeout",
                        timeout_secs = CONNECT_TIMEOUT.as_secs(),
                        "Connect attempt timed out"
                    );
                    None
                }
            };

            if let Some(socket) = socket {
                backoff = INITIAL_BACKOFF;
                match self.serve(socket).await {
                    ServeOutcome::Shutdown => break,
                    ServeOutcome::Rejoin | ServeOutcome::WentOffline => continue,
                    ServeOutcome::Disconnected => {
                        // The socket is already dead; say so before sleeping
                        // out the backoff instead of after it
                        if !self.report(ConnectionStatus::Reconnecting).await {
                            break;
                        }
                    }
                }
            }

            match self.wait_backoff(backoff).await {
                BackoffOutcome::Elapsed => {}
                BackoffOutcome::Retry => {
                    backoff = INITIAL_BACKOFF;
                    continue;
                }
                BackoffOutcome::Shutdown => break,
            }
            backoff = next_backoff(backoff);
        }

        info!(
            component = "channel",
            event = "channel.stopped",
            "Channel manager stopped"
        );
    }

    /// One connection lifetime: join, then pump frames and commands.
    async fn serve(&mut self, mut socket: Socket) -> ServeOutcome {
        let join = ClientEvent::JoinSession {
            session_id: self.session_id.clone(),
        };
        if let Err(err) = self.send_event(&mut socket, &join).await {
            warn!(
                component = "channel",
                event = "channel.join.failed",
                error = %err,
                "Join failed, reconnecting"
            );
            return ServeOutcome::Disconnected;
        }

        info!(
            component = "channel",
            event = "channel.connected",
            session_id = %self.session_id,
            "Connected and joined session"
        );
        if !self.report(ConnectionStatus::Online).await {
            return ServeOutcome::Shutdown;
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ChannelCommand::Send(event)) => {
                        if let Err(err) = self.send_event(&mut socket, &event).await {
                            warn!(
                                component = "channel",
                                event = "channel.send.failed",
                                error = %err,
                                "Send failed, reconnecting"
                            );
                            return ServeOutcome::Disconnected;
                        }
                    }
                    Some(ChannelCommand::Rejoin { session_id }) => {
                        self.session_id = session_id;
                        let _ = socket.close(None).await;
                        return ServeOutcome::Rejoin;
                    }
                    Some(ChannelCommand::NetworkChanged { online: false }) => {
                        self.online = false;
                        let _ = socket.close(None).await;
                        return ServeOutcome::WentOffline;
                    }
                    Some(ChannelCommand::NetworkChanged { online: true }) => {}
                    Some(ChannelCommand::Shutdown) | None => {
                        let _ = socket.close(None).await;
                        return ServeOutcome::Shutdown;
                    }
                },
                frame = socket.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(event) = parse_event(&text) {
                            if self.updates.send(ChannelUpdate::Event(event)).await.is_err() {
                                return ServeOutcome::Shutdown;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        if socket.send(WsMessage::Pong(payload)).await.is_err() {
                            return ServeOutcome::Disconnected;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) => {
                        info!(
                            component = "channel",
                            event = "channel.closed_by_server",
                            "Server closed the connection"
                        );
                        return ServeOutcome::Disconnected;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(
                            component = "channel",
                            event = "channel.read.failed",
                            error = %err,
                            "Read failed, reconnecting"
                        );
                        return ServeOutcome::Disconnected;
                    }
                    None => return ServeOutcome::Disconnected,
                },
            }
        }
    }

    async fn send_event(
        &self,
        socket: &mut Socket,
        event: &ClientEvent,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        match serde_json::to_string(event) {
            Ok(json) => socket.send(WsMessage::Text(json.into())).await,
            Err(err) => {
                warn!(
                    component = "channel",
                    event = "channel.send.serialize_failed",
                    error = %err,
                    "Failed to serialize outgoing event"
                );
                Ok(())
            }
        }
    }

    /// Sleep between attempts while staying responsive to commands.
    /// Returns what interrupted the wait, if anything.
    async fn wait_backoff(&mut self, backoff: Duration) -> BackoffOutcome {
        let wait = sleep(backoff);
        tokio::pin!(wait);

        loop {
            tokio::select! {
                _ = &mut wait => return BackoffOutcome::Elapsed,
                command = self.commands.recv() => match command {
                    Some(ChannelCommand::Send(event)) => {
                        // Fire-and-forget traffic; nothing buffers across outages
                        warn!(
                            component = "channel",
                            event = "channel.send.dropped",
                            dropped = ?event,
                            "Dropping outbound event while disconnected"
                        );
                    }
                    Some(ChannelCommand::Rejoin { session_id }) => {
                        self.session_id = session_id;
                        return BackoffOutcome::Retry;
                    }
                    Some(ChannelCommand::NetworkChanged { online }) => {
                        if online {
                            return BackoffOutcome::Retry;
                        }
                        self.online = false;
                        if !self.wait_for_network().await {
                            return BackoffOutcome::Shutdown;
                        }
                        return BackoffOutcome::Retry;
                    }
                    Some(ChannelCommand::Shutdown) | None => return BackoffOutcome::Shutdown,
                },
            }
        }
    }

    /// Device is offline: report it and block until the network returns.
    /// Returns false when the manager should stop instead.
    async fn wait_for_network(&mut self) -> bool {
        if !self.report(ConnectionStatus::Offline).await {
            return false;
        }
        while let Some(command) = self.commands.recv().await {
            match command {
                ChannelCommand::NetworkChanged { online: true } => {
                    self.online = true;
                    return true;
                }
                ChannelCommand::NetworkChanged { online: false } => {}
                ChannelCommand::Rejoin { session_id } => {
                    self.session_id = session_id;
                }
                ChannelCommand::Send(event) => {
                    warn!(
                        component = "channel",
                        event = "channel.send.dropped",
                        dropped = ?event,
                        "Dropping outbound event while offline"
                    );
                }
                ChannelCommand::Shutdown => return false,
            }
        }
        false
    }

    async fn report(&self, status: ConnectionStatus) -> bool {
        self.updates
            .send(ChannelUpdate::Status(status))
            .await
            .is_ok()
    }
}

fn parse_event(text: &str) -> Option<ChannelEvent> {
    match serde_json::from_str(text) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(
                component = "channel",
                event = "channel.event.parse_failed",
                error = %err,
                payload_bytes = text.len(),
                "Failed to parse channel event"
            );
            None
        }
    }
}

enum BackoffOutcome {
    Elapsed,
    Retry,
    Shutdown,
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_to_the_cap() {
        let mut backoff = INITIAL_BACKOFF;
        let mut observed = Vec::new();
        for _ in 0..5 {
            observed.push(backoff.as_secs());
            backoff = next_backoff(backoff);
        }
        assert_eq!(observed, vec![1, 2, 4, 5, 5]);
    }

    #[tokio::test]
    async fn dropped_connection_reports_reconnecting_before_the_backoff_sleep() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");

        // Accept one connection, swallow the join event, then hang up
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut socket = tokio_tungstenite::accept_async(stream)
                .await
                .expect("server handshake");
            let _ = socket.next().await;
        });

        let (handle, mut updates) = spawn(format!("ws://{addr}"), "sess-1".to_string());

        loop {
            match updates.recv().await.expect("update before connect") {
                ChannelUpdate::Status(ConnectionStatus::Online) => break,
                ChannelUpdate::Status(_) | ChannelUpdate::Event(_) => {}
            }
        }

        // The status must flip as soon as the read fails, well inside the
        // 1s backoff the manager sleeps before its next attempt
        let status = timeout(Duration::from_millis(500), async {
            loop {
                match updates.recv().await.expect("update after disconnect") {
                    ChannelUpdate::Status(status) => return status,
                    ChannelUpdate::Event(_) => {}
                }
            }
        })
        .await
        .expect("no status update after the server hung up");
        assert_eq!(status, ConnectionStatus::Reconnecting);

        handle.shutdown().await;
    }

    #[test]
    fn known_and_unknown_events_parse_and_garbage_does_not() {
        match parse_event(r#"{"type":"thinking:start","intent":"search"}"#) {
            Some(ChannelEvent::ThinkingStart { intent }) => {
                assert_eq!(intent.as_deref(), Some("search"));
            }
            other => panic!("unexpected parse result: {:?}", other),
        }

        match parse_event(r#"{"type":"typing:start","agentId":"a1"}"#) {
            Some(ChannelEvent::Unknown) => {}
            other => panic!("unexpected parse result: {:?}", other),
        }

        assert!(parse_event("not json").is_none());
    }
}
