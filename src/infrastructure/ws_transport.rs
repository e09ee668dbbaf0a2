// WebSocket transport - one tokio task per socket, events reported over a channel
use crate::application::transport::{SocketId, Transport, TransportError, TransportEvent};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

pub type EventSender = mpsc::UnboundedSender<(SocketId, TransportEvent)>;

struct SocketTask {
    outgoing: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

pub struct WsTransport {
    events: EventSender,
    sockets: HashMap<SocketId, SocketTask>,
}

impl WsTransport {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            sockets: HashMap::new(),
        }
    }
}

impl Transport for WsTransport {
    fn open(&mut self, socket: SocketId, url: &str) -> Result<(), TransportError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let task = runtime.spawn(run_socket(
            socket,
            url.to_string(),
            self.events.clone(),
            outgoing_rx,
            connected.clone(),
        ));

        let entry = SocketTask {
            outgoing,
            connected,
            task,
        };
        if let Some(previous) = self.sockets.insert(socket, entry) {
            previous.task.abort();
        }
        Ok(())
    }

    fn close(&mut self, socket: SocketId) {
        let Some(entry) = self.sockets.remove(&socket) else {
            return;
        };
        // An open socket sends a close frame once the outgoing sender drops.
        // One still inside the handshake has nothing to close.
        if !entry.connected.load(Ordering::Acquire) {
            entry.task.abort();
        }
    }

    fn send(&mut self, socket: SocketId, payload: &str) -> Result<(), TransportError> {
        let entry = self
            .sockets
            .get(&socket)
            .ok_or(TransportError::NotOpen(socket))?;
        entry
            .outgoing
            .send(payload.to_string())
            .map_err(|_| TransportError::NotOpen(socket))
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        for (_, entry) in self.sockets.drain() {
            entry.task.abort();
        }
    }
}

async fn run_socket(
    socket: SocketId,
    url: String,
    events: EventSender,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    connected: Arc<AtomicBool>,
) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            tracing::warn!("WebSocket connect to {} failed: {}", url, e);
            let _ = events.send((socket, TransportEvent::Error(e.to_string())));
            return;
        }
    };

    connected.store(true, Ordering::Release);
    tracing::debug!("WebSocket {:?} connected to {}", socket, url);
    if events.send((socket, TransportEvent::Opened)).is_err() {
        return;
    }

    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            payload = outgoing.recv() => match payload {
                Some(payload) => {
                    if let Err(e) = write.send(Message::text(payload)).await {
                        let _ = events.send((socket, TransportEvent::Error(e.to_string())));
                        return;
                    }
                }
                None => {
                    let _ = write.close().await;
                    return;
                }
            },

            incoming = read.next() => {
                let event = match incoming {
                    Some(Ok(Message::Text(text))) => TransportEvent::Message(text.as_str().to_string()),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => TransportEvent::Message(text),
                        Err(_) => {
                            tracing::warn!("Dropping non-UTF-8 binary frame on {:?}", socket);
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_string())
                            .filter(|r| !r.is_empty());
                        let _ = events.send((socket, TransportEvent::Closed { reason }));
                        return;
                    }
                    // Ping/pong are answered by tungstenite itself
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = events.send((socket, TransportEvent::Error(e.to_string())));
                        return;
                    }
                    None => {
                        let _ = events.send((socket, TransportEvent::Closed { reason: None }));
                        return;
                    }
                };

                if events.send((socket, event)).is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_without_runtime_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut transport = WsTransport::new(tx);
        assert!(matches!(
            transport.open(SocketId(1), "ws://127.0.0.1:1/live"),
            Err(TransportError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn test_send_to_unknown_socket_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut transport = WsTransport::new(tx);
        assert!(matches!(
            transport.send(SocketId(7), "{}"),
            Err(TransportError::NotOpen(SocketId(7)))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host_reports_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = WsTransport::new(tx);
        transport
            .open(SocketId(3), "ws://127.0.0.1:1/live")
            .expect("spawned");

        let (socket, event) = rx.recv().await.expect("event");
        assert_eq!(socket, SocketId(3));
        assert!(matches!(event, TransportEvent::Error(_)));
    }

    #[tokio::test]
    async fn test_close_during_handshake_drops_connection() {
        use tokio::io::AsyncReadExt;

        // Accepts TCP but never answers the upgrade request
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let (tx, _rx) = mpsc::unbounded_channel();
        let mut transport = WsTransport::new(tx);
        transport
            .open(SocketId(4), &format!("ws://{}/live", addr))
            .expect("spawned");

        let (mut server_side, _) = listener.accept().await.expect("accept");
        transport.close(SocketId(4));

        let mut buf = [0u8; 1024];
        let eof = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                match server_side.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        })
        .await;
        assert!(eof.is_ok(), "handshake task kept the connection alive");
    }
}
