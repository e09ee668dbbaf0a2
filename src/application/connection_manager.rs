// Streaming connection manager - reconnection, staleness detection and message batching
use crate::application::listeners::Listeners;
use crate::application::transport::{SocketId, Transport, TransportEvent};
use crate::domain::frame::{parse_frame, InboundFrame};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

const BACKOFF_MULTIPLIER: f64 = 1.5;
const PING_PAYLOAD: &str = r#"{"type":"ping"}"#;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    pub url: String,
    pub max_reconnect_attempts: u32,
    /// Base delay of the exponential backoff.
    pub reconnect_interval_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub enable_auto_reconnect: bool,
    pub ping_interval_ms: Option<u64>,
    pub connection_timeout_ms: u64,
    pub health_check_interval_ms: u64,
    pub stale_after_ms: u64,
    pub batch_size: usize,
    pub batch_flush_ms: u64,
    pub max_pending_messages: usize,
    pub reconnect_grace_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9001/live".to_string(),
            max_reconnect_attempts: 10,
            reconnect_interval_ms: 1000,
            max_reconnect_delay_ms: 30_000,
            enable_auto_reconnect: true,
            ping_interval_ms: None,
            connection_timeout_ms: 10_000,
            health_check_interval_ms: 30_000,
            stale_after_ms: 60_000,
            batch_size: 10,
            batch_flush_ms: 50,
            max_pending_messages: 100,
            reconnect_grace_ms: 200,
        }
    }
}

impl ConnectionConfig {
    /// `min(base * 1.5^(attempt-1), cap)`
    pub fn backoff_delay(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let delay = self.reconnect_interval_ms as f64 * BACKOFF_MULTIPLIER.powi(exponent);
        delay.min(self.max_reconnect_delay_ms as f64) as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Open,
    #[default]
    Closed,
    Error,
}

#[derive(Debug, Clone, Error, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ConnectionError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection not established within {0} ms")]
    Timeout(u64),

    #[error("no messages received for {0} ms")]
    Stale(u64),

    #[error("gave up after {0} connection attempts")]
    RetriesExhausted(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectMode {
    /// Keep counting attempts so the backoff keeps growing.
    KeepBackoff,
    /// Start the backoff from the base delay again.
    ResetBackoff,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChange {
    pub status: ConnectionStatus,
    pub attempt: u32,
    pub error: Option<ConnectionError>,
    pub at_ms: u64,
}

/// Read-only snapshot of a connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub attempt: u32,
    pub total_reconnects: u64,
    pub uptime_ms: u64,
    pub last_connected_at: Option<u64>,
    pub last_message_at: Option<u64>,
    pub messages_received: u64,
    pub messages_delivered: u64,
    pub parse_errors: u64,
    pub dropped_messages: u64,
    pub pending_messages: usize,
    pub terminal_error: Option<ConnectionError>,
}

#[derive(Debug, Default)]
struct Timers {
    connect_deadline: Option<u64>,
    reconnect_at: Option<u64>,
    next_health_check: Option<u64>,
    next_ping: Option<u64>,
    next_flush: Option<u64>,
}

impl Timers {
    fn earliest(&self) -> Option<u64> {
        [
            self.connect_deadline,
            self.reconnect_at,
            self.next_health_check,
            self.next_ping,
            self.next_flush,
        ]
        .into_iter()
        .flatten()
        .min()
    }
}

fn due(deadline: Option<u64>, now_ms: u64) -> bool {
    deadline.is_some_and(|at| now_ms >= at)
}

/// Owns one logical streaming connection.
///
/// All timers are plain deadlines checked by `tick(now_ms)`, so whoever owns
/// the manager decides how time passes. `disconnect` clears every deadline
/// before returning.
pub struct ConnectionManager {
    config: ConnectionConfig,
    transport: Box<dyn Transport>,
    status: ConnectionStatus,
    socket: Option<SocketId>,
    next_socket: u64,
    attempt: u32,
    total_reconnects: u64,
    uptime_ms: u64,
    opened_at: Option<u64>,
    last_connected_at: Option<u64>,
    last_message_at: Option<u64>,
    messages_received: u64,
    messages_delivered: u64,
    parse_errors: u64,
    dropped_messages: u64,
    terminal_error: Option<ConnectionError>,
    pending: VecDeque<InboundFrame>,
    timers: Timers,
    on_status: Listeners<StatusChange>,
    on_message: Listeners<InboundFrame>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, transport: Box<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            status: ConnectionStatus::Closed,
            socket: None,
            next_socket: 0,
            attempt: 0,
            total_reconnects: 0,
            uptime_ms: 0,
            opened_at: None,
            last_connected_at: None,
            last_message_at: None,
            messages_received: 0,
            messages_delivered: 0,
            parse_errors: 0,
            dropped_messages: 0,
            terminal_error: None,
            pending: VecDeque::new(),
            timers: Timers::default(),
            on_status: Listeners::new("connection status"),
            on_message: Listeners::new("connection message"),
        }
    }

    pub fn on_status(&self) -> &Listeners<StatusChange> {
        &self.on_status
    }

    /// Message handlers observe frames in arrival order, in batches of at
    /// most `batch_size` per flush.
    pub fn on_message(&self) -> &Listeners<InboundFrame> {
        &self.on_message
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Earliest pending timer deadline, for drivers that sleep between ticks.
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.earliest()
    }

    pub fn state(&self, now_ms: u64) -> ConnectionState {
        let live_uptime = self
            .opened_at
            .map(|at| now_ms.saturating_sub(at))
            .unwrap_or(0);

        ConnectionState {
            status: self.status,
            attempt: self.attempt,
            total_reconnects: self.total_reconnects,
            uptime_ms: self.uptime_ms + live_uptime,
            last_connected_at: self.last_connected_at,
            last_message_at: self.last_message_at,
            messages_received: self.messages_received,
            messages_delivered: self.messages_delivered,
            parse_errors: self.parse_errors,
            dropped_messages: self.dropped_messages,
            pending_messages: self.pending.len(),
            terminal_error: self.terminal_error.clone(),
        }
    }

    /// Open the connection. No-op while already open or connecting.
    ///
    /// After retries were exhausted this is the only way back: it clears the
    /// terminal error and restarts the attempt count.
    pub fn connect(&mut self, now_ms: u64) {
        if matches!(
            self.status,
            ConnectionStatus::Open | ConnectionStatus::Connecting
        ) {
            return;
        }

        if self.terminal_error.take().is_some() {
            self.attempt = 0;
        }
        self.timers.reconnect_at = None;
        self.begin_attempt(now_ms);
    }

    /// Tear down the socket and every timer, then report `closed`.
    pub fn disconnect(&mut self, now_ms: u64) {
        self.teardown(now_ms);
        self.timers = Timers::default();
        self.pending.clear();

        if self.status != ConnectionStatus::Closed {
            tracing::info!("Disconnected from {}", self.config.url);
            self.set_status(ConnectionStatus::Closed, None, now_ms);
        }
    }

    /// Close the current socket and open a new one after the grace delay.
    pub fn reconnect(&mut self, now_ms: u64, mode: ReconnectMode) {
        self.teardown(now_ms);
        self.timers.connect_deadline = None;
        self.timers.next_health_check = None;
        self.timers.next_ping = None;

        if mode == ReconnectMode::ResetBackoff {
            self.attempt = 0;
        }
        self.terminal_error = None;

        if self.status != ConnectionStatus::Closed {
            self.set_status(ConnectionStatus::Closed, None, now_ms);
        }
        self.timers.reconnect_at = Some(now_ms + self.config.reconnect_grace_ms);
    }

    /// Returns false when the connection is not open or the send failed.
    pub fn send(&mut self, payload: &str) -> bool {
        let Some(socket) = self.socket else {
            return false;
        };
        if self.status != ConnectionStatus::Open {
            return false;
        }

        match self.transport.send(socket, payload) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Send on {:?} failed: {}", socket, e);
                false
            }
        }
    }

    /// Feed a transport event. Events from sockets other than the current one are ignored.
    pub fn handle_event(&mut self, socket: SocketId, event: TransportEvent, now_ms: u64) {
        if self.socket != Some(socket) {
            tracing::debug!("Ignoring {:?} from stale socket {:?}", event, socket);
            return;
        }

        match event {
            TransportEvent::Opened => self.on_opened(now_ms),
            TransportEvent::Message(text) => self.on_frame(&text, now_ms),
            TransportEvent::Closed { reason } => {
                let reason = reason.unwrap_or_else(|| "closed by peer".to_string());
                self.fail(
                    ConnectionStatus::Closed,
                    ConnectionError::Transport(reason),
                    now_ms,
                );
            }
            TransportEvent::Error(message) => {
                self.fail(
                    ConnectionStatus::Error,
                    ConnectionError::Transport(message),
                    now_ms,
                );
            }
        }
    }

    /// Fire every timer that is due.
    pub fn tick(&mut self, now_ms: u64) {
        if due(self.timers.next_flush, now_ms) {
            self.flush_batch(now_ms);
        }

        if due(self.timers.connect_deadline, now_ms) {
            self.timers.connect_deadline = None;
            if self.status == ConnectionStatus::Connecting {
                tracing::warn!(
                    "Connection to {} timed out after {} ms",
                    self.config.url,
                    self.config.connection_timeout_ms
                );
                self.fail(
                    ConnectionStatus::Error,
                    ConnectionError::Timeout(self.config.connection_timeout_ms),
                    now_ms,
                );
            }
        }

        if due(self.timers.reconnect_at, now_ms) {
            self.timers.reconnect_at = None;
            self.total_reconnects += 1;
            self.begin_attempt(now_ms);
        }

        if due(self.timers.next_health_check, now_ms) {
            self.timers.next_health_check = Some(now_ms + self.config.health_check_interval_ms);
            self.check_health(now_ms);
        }

        if due(self.timers.next_ping, now_ms) {
            self.timers.next_ping = self.config.ping_interval_ms.map(|every| now_ms + every);
            if !self.send(PING_PAYLOAD) {
                tracing::debug!("Skipped heartbeat, connection not open");
            }
        }
    }

    fn begin_attempt(&mut self, now_ms: u64) {
        self.attempt += 1;
        self.next_socket += 1;
        let socket = SocketId(self.next_socket);
        self.socket = Some(socket);

        tracing::info!(
            "Connecting to {} (attempt {}/{})",
            self.config.url,
            self.attempt,
            self.config.max_reconnect_attempts
        );
        self.set_status(ConnectionStatus::Connecting, None, now_ms);

        match self.transport.open(socket, &self.config.url) {
            Ok(()) => {
                self.timers.connect_deadline = Some(now_ms + self.config.connection_timeout_ms);
            }
            Err(e) => {
                self.fail(
                    ConnectionStatus::Error,
                    ConnectionError::Transport(e.to_string()),
                    now_ms,
                );
            }
        }
    }

    fn on_opened(&mut self, now_ms: u64) {
        if self.status != ConnectionStatus::Connecting {
            return;
        }

        tracing::info!(
            "Connected to {} after {} attempt(s)",
            self.config.url,
            self.attempt
        );
        self.attempt = 0;
        self.opened_at = Some(now_ms);
        self.last_connected_at = Some(now_ms);
        self.last_message_at = Some(now_ms);
        self.timers.connect_deadline = None;
        self.timers.next_health_check = Some(now_ms + self.config.health_check_interval_ms);
        self.timers.next_ping = self.config.ping_interval_ms.map(|every| now_ms + every);
        self.set_status(ConnectionStatus::Open, None, now_ms);
    }

    fn on_frame(&mut self, text: &str, now_ms: u64) {
        self.last_message_at = Some(now_ms);
        self.messages_received += 1;

        let frame = match parse_frame(text) {
            Ok(InboundFrame::Heartbeat) => return,
            Ok(frame) => frame,
            Err(e) => {
                self.parse_errors += 1;
                tracing::debug!("Dropping malformed frame: {}", e);
                return;
            }
        };

        self.pending.push_back(frame);
        if self.pending.len() > self.config.max_pending_messages {
            let drop = self.pending.len() / 2;
            self.pending.drain(..drop);
            self.dropped_messages += drop as u64;
            tracing::warn!(
                "Message backlog over {}, dropped oldest {}",
                self.config.max_pending_messages,
                drop
            );
        }

        if self.timers.next_flush.is_none() {
            self.timers.next_flush = Some(now_ms + self.config.batch_flush_ms);
        }
    }

    fn flush_batch(&mut self, now_ms: u64) {
        let take = self.config.batch_size.max(1).min(self.pending.len());
        let batch: Vec<InboundFrame> = self.pending.drain(..take).collect();

        for frame in &batch {
            self.on_message.notify(frame);
        }
        self.messages_delivered += batch.len() as u64;

        self.timers.next_flush = if self.pending.is_empty() {
            None
        } else {
            Some(now_ms + self.config.batch_flush_ms)
        };
    }

    fn check_health(&mut self, now_ms: u64) {
        if self.status != ConnectionStatus::Open {
            return;
        }

        let silent_for = now_ms.saturating_sub(self.last_message_at.unwrap_or(now_ms));
        if silent_for > self.config.stale_after_ms {
            tracing::warn!(
                "No messages from {} for {} ms, forcing reconnect",
                self.config.url,
                silent_for
            );
            self.reconnect(now_ms, ReconnectMode::KeepBackoff);
        }
    }

    /// Close the socket without touching the status.
    fn teardown(&mut self, now_ms: u64) {
        if let Some(socket) = self.socket.take() {
            self.transport.close(socket);
        }
        if let Some(opened_at) = self.opened_at.take() {
            self.uptime_ms += now_ms.saturating_sub(opened_at);
        }
    }

    fn fail(&mut self, status: ConnectionStatus, error: ConnectionError, now_ms: u64) {
        self.teardown(now_ms);
        self.timers.connect_deadline = None;
        self.timers.next_health_check = None;
        self.timers.next_ping = None;

        if !self.config.enable_auto_reconnect {
            tracing::info!("Connection lost ({}), auto-reconnect disabled", error);
            self.set_status(status, Some(error), now_ms);
            return;
        }

        if self.attempt >= self.config.max_reconnect_attempts {
            let terminal = ConnectionError::RetriesExhausted(self.attempt);
            tracing::warn!("{} ({}), last error: {}", terminal, self.config.url, error);
            self.terminal_error = Some(terminal.clone());
            self.set_status(ConnectionStatus::Error, Some(terminal), now_ms);
            return;
        }

        let delay = self.config.backoff_delay(self.attempt);
        tracing::info!("Connection lost ({}), reconnecting in {} ms", error, delay);
        self.set_status(status, Some(error), now_ms);
        self.timers.reconnect_at = Some(now_ms + delay);
    }

    fn set_status(&mut self, status: ConnectionStatus, error: Option<ConnectionError>, now_ms: u64) {
        self.status = status;
        self.on_status.notify(&StatusChange {
            status,
            attempt: self.attempt,
            error,
            at_ms: now_ms,
        });
    }
}
