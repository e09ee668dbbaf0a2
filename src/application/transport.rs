// Transport port - the message-oriented duplex channel behind the connection manager
use serde::Serialize;
use thiserror::Error;

/// Identifies one physical socket. Every (re)connect gets a fresh id so late
/// events from a torn-down socket can be recognised and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SocketId(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Closed { reason: Option<String> },
    Error(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no async runtime available to drive the socket")]
    NoRuntime,

    #[error("socket {0:?} is not open")]
    NotOpen(SocketId),

    #[error("send failed: {0}")]
    Send(String),

    #[error("connect failed: {0}")]
    Connect(String),
}

/// The socket side of a connection. Implementations report progress
/// asynchronously as `(SocketId, TransportEvent)` pairs through whatever
/// channel they were built with.
pub trait Transport: Send {
    /// Start opening a socket. `Opened` or `Error`/`Closed` follows later.
    fn open(&mut self, socket: SocketId, url: &str) -> Result<(), TransportError>;

    fn close(&mut self, socket: SocketId);

    fn send(&mut self, socket: SocketId, payload: &str) -> Result<(), TransportError>;
}
