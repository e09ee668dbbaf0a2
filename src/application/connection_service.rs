// Connection service - drives a ConnectionManager from transport events, commands and its own timers
use crate::application::connection_manager::{ConnectionManager, ConnectionState, ReconnectMode};
use crate::application::transport::{SocketId, TransportEvent};
use crate::domain::clock::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
enum ConnectionCommand {
    Connect,
    Disconnect,
    Reconnect(ReconnectMode),
    Send(String, oneshot::Sender<bool>),
}

#[derive(Debug, thiserror::Error)]
#[error("connection service has stopped")]
pub struct ServiceStopped;

#[derive(Clone)]
pub struct ConnectionHandle {
    commands: mpsc::Sender<ConnectionCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    async fn command(&self, command: ConnectionCommand) -> Result<(), ServiceStopped> {
        self.commands.send(command).await.map_err(|_| ServiceStopped)
    }

    pub async fn connect(&self) -> Result<(), ServiceStopped> {
        self.command(ConnectionCommand::Connect).await
    }

    pub async fn disconnect(&self) -> Result<(), ServiceStopped> {
        self.command(ConnectionCommand::Disconnect).await
    }

    pub async fn reconnect(&self, mode: ReconnectMode) -> Result<(), ServiceStopped> {
        self.command(ConnectionCommand::Reconnect(mode)).await
    }

    /// Send a text frame. `Ok(false)` when the connection is not open.
    pub async fn send(&self, payload: impl Into<String>) -> Result<bool, ServiceStopped> {
        let (reply, rx) = oneshot::channel();
        self.command(ConnectionCommand::Send(payload.into(), reply))
            .await?;
        rx.await.map_err(|_| ServiceStopped)
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

pub fn spawn_connection(
    manager: ConnectionManager,
    events: mpsc::UnboundedReceiver<(SocketId, TransportEvent)>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
) -> (ConnectionHandle, JoinHandle<()>) {
    let (commands, command_rx) = mpsc::channel(32);
    let (state_tx, state) = watch::channel(manager.state(clock.now_ms()));

    let task = tokio::spawn(run_connection(
        manager, events, command_rx, state_tx, clock, cancel,
    ));
    (ConnectionHandle { commands, state }, task)
}

async fn run_connection(
    mut manager: ConnectionManager,
    mut events: mpsc::UnboundedReceiver<(SocketId, TransportEvent)>,
    mut commands: mpsc::Receiver<ConnectionCommand>,
    state: watch::Sender<ConnectionState>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
) {
    loop {
        let wait = manager
            .next_deadline()
            .map(|at| Duration::from_millis(at.saturating_sub(clock.now_ms())));

        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            Some((socket, event)) = events.recv() => {
                manager.handle_event(socket, event, clock.now_ms());
            }

            command = commands.recv() => {
                let Some(command) = command else { break };
                let now = clock.now_ms();
                match command {
                    ConnectionCommand::Connect => manager.connect(now),
                    ConnectionCommand::Disconnect => manager.disconnect(now),
                    ConnectionCommand::Reconnect(mode) => manager.reconnect(now, mode),
                    ConnectionCommand::Send(payload, reply) => {
                        let _ = reply.send(manager.send(&payload));
                    }
                }
            }

            _ = tokio::time::sleep(wait.unwrap_or(Duration::ZERO)), if wait.is_some() => {
                manager.tick(clock.now_ms());
            }
        }

        state.send_replace(manager.state(clock.now_ms()));
    }

    manager.disconnect(clock.now_ms());
    state.send_replace(manager.state(clock.now_ms()));
    tracing::debug!("Connection service stopped");
}
