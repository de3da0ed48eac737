//! Relay client for a single node.

use crate::error::NodeError;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tether_core::{
    Envelope, MessageEnvelope, NodeId, Payload, ProtocolError, Registration, RouteHeader,
    WireFrame,
};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Time allowed for queued frames to drain on disconnect
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Node client state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// No connection to the relay
    Disconnected,
    /// Opening the WebSocket and registering
    Connecting,
    /// Registered; sends are accepted
    Registered,
}

/// One item delivered by the receive loop
#[derive(Debug)]
pub enum Inbound {
    /// Decoded envelope of either wire variant
    Envelope(Envelope),
    /// Frame that could not be decoded
    Undecodable {
        /// Source and target, if they could still be read
        route: Option<RouteHeader>,
        /// Decode failure
        error: ProtocolError,
    },
}

/// State shared with the receive loop
///
/// `epoch` increases on every connect so a stale receive loop never
/// overwrites the state of a newer connection.
#[derive(Debug)]
struct Status {
    state: NodeState,
    epoch: u64,
}

/// Tasks and outbound queue of the current connection
struct Link {
    outbound: mpsc::UnboundedSender<WireFrame>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

/// Relay client for one node id
///
/// Keeps a single WebSocket to the relay. Outbound frames are written by a
/// writer task; inbound frames are decoded by a receive loop and queued for
/// [`recv`](Self::recv). There is no automatic reconnection.
pub struct NodeClient {
    node_id: NodeId,
    relay_url: String,
    status: Arc<Mutex<Status>>,
    link: Mutex<Option<Link>>,
    inbox: Mutex<mpsc::UnboundedReceiver<Inbound>>,
}

impl NodeClient {
    /// Create a disconnected client
    ///
    /// `relay_url` is the WebSocket URL of the relay, e.g. `ws://relay:8765/ws`.
    #[must_use]
    pub fn new(node_id: impl Into<NodeId>, relay_url: impl Into<String>) -> Self {
        let (_, inbox) = mpsc::unbounded_channel();
        Self {
            node_id: node_id.into(),
            relay_url: relay_url.into(),
            status: Arc::new(Mutex::new(Status {
                state: NodeState::Disconnected,
                epoch: 0,
            })),
            link: Mutex::new(None),
            inbox: Mutex::new(inbox),
        }
    }

    /// Local node id
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Relay URL
    #[must_use]
    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }

    /// Current state
    pub async fn state(&self) -> NodeState {
        self.status.lock().await.state
    }

    /// True while registered with the relay
    pub async fn is_connected(&self) -> bool {
        self.state().await == NodeState::Registered
    }

    /// Connect, register and start the receive loop
    ///
    /// A client that is already registered is left as is. On failure the
    /// state returns to [`NodeState::Disconnected`] and the caller may retry.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Connect`] if the relay cannot be reached or the
    /// registration cannot be sent.
    pub async fn connect(&self) -> Result<(), NodeError> {
        let epoch = {
            let mut status = self.status.lock().await;
            if status.state == NodeState::Registered {
                return Ok(());
            }
            status.state = NodeState::Connecting;
            status.epoch += 1;
            status.epoch
        };
        tracing::info!(node_id = %self.node_id, url = %self.relay_url, "connecting to relay");

        let ws = match self.open().await {
            Ok(ws) => ws,
            Err(e) => {
                self.status.lock().await.state = NodeState::Disconnected;
                tracing::error!(node_id = %self.node_id, error = %e, "failed to connect to relay");
                return Err(e);
            }
        };

        let (ws_tx, ws_rx) = ws.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        let link = Link {
            outbound,
            writer: tokio::spawn(write_loop(ws_tx, outbound_rx)),
            reader: tokio::spawn(receive_loop(
                self.node_id.clone(),
                ws_rx,
                inbox_tx,
                self.status.clone(),
                epoch,
            )),
        };

        *self.inbox.lock().await = inbox_rx;
        if let Some(old) = self.link.lock().await.replace(link) {
            old.close();
        }
        self.status.lock().await.state = NodeState::Registered;

        tracing::info!(node_id = %self.node_id, "registered with relay");
        Ok(())
    }

    async fn open(&self) -> Result<WsStream, NodeError> {
        let (mut ws, _) = connect_async(self.relay_url.as_str())
            .await
            .map_err(NodeError::Connect)?;

        let registration = Registration::new(self.node_id.clone()).to_bytes()?;
        ws.send(Message::Binary(registration))
            .await
            .map_err(NodeError::Connect)?;

        Ok(ws)
    }

    /// Send a generic binary message to `target`
    ///
    /// Fire-and-forget: returns once the frame is queued.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NotConnected`] unless registered.
    pub async fn send(&self, target: &str, payload: Payload) -> Result<(), NodeError> {
        let envelope = MessageEnvelope::new(self.node_id.clone(), target, payload);
        self.send_envelope(&envelope.into()).await
    }

    /// Send any envelope as-is
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NotConnected`] unless registered, or
    /// [`NodeError::Protocol`] if the envelope cannot be encoded.
    pub async fn send_envelope(&self, envelope: &Envelope) -> Result<(), NodeError> {
        if !self.is_connected().await {
            return Err(NodeError::NotConnected);
        }
        let frame = envelope.encode()?;

        let link = self.link.lock().await;
        let queued = link
            .as_ref()
            .is_some_and(|link| link.outbound.send(frame).is_ok());

        if queued {
            tracing::debug!(node_id = %self.node_id, to = envelope.target(), "envelope queued");
            Ok(())
        } else {
            Err(NodeError::NotConnected)
        }
    }

    /// Next inbound item; `None` once the connection has ended
    pub async fn recv(&self) -> Option<Inbound> {
        self.inbox.lock().await.recv().await
    }

    /// Close the connection and stop the receive loop; idempotent
    ///
    /// Frames already queued are written before the socket is closed.
    pub async fn disconnect(&self) {
        {
            let mut status = self.status.lock().await;
            status.state = NodeState::Disconnected;
            status.epoch += 1;
        }

        let link = self.link.lock().await.take();
        if let Some(link) = link {
            link.shutdown().await;
            tracing::info!(node_id = %self.node_id, "disconnected from relay");
        }
    }
}

impl Drop for NodeClient {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.close();
        }
    }
}

impl Link {
    /// Drop the outbound queue so the writer closes the socket; stop reading
    fn close(self) {
        drop(self.outbound);
        self.reader.abort();
    }

    /// Like [`close`](Self::close), but wait for queued frames to be written
    async fn shutdown(self) {
        drop(self.outbound);
        self.reader.abort();
        match tokio::time::timeout(SHUTDOWN_GRACE, self.writer).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "writer task did not finish cleanly"),
            Err(_) => tracing::warn!("writer did not finish within shutdown grace period"),
        }
    }
}

async fn write_loop(
    mut ws_tx: SplitSink<WsStream, Message>,
    mut outbound: mpsc::UnboundedReceiver<WireFrame>,
) {
    while let Some(frame) = outbound.recv().await {
        let message = match frame {
            WireFrame::Text(text) => Message::Text(text),
            WireFrame::Binary(bytes) => Message::Binary(bytes),
        };
        if let Err(e) = ws_tx.send(message).await {
            tracing::warn!(error = %e, "write to relay failed");
            break;
        }
    }
    if let Err(e) = ws_tx.close().await {
        tracing::debug!(error = %e, "websocket close failed");
    }
}

async fn receive_loop(
    node_id: NodeId,
    mut ws_rx: SplitStream<WsStream>,
    inbox: mpsc::UnboundedSender<Inbound>,
    status: Arc<Mutex<Status>>,
    epoch: u64,
) {
    while let Some(message) = ws_rx.next().await {
        let frame = match message {
            Ok(Message::Text(text)) => WireFrame::Text(text),
            Ok(Message::Binary(bytes)) => WireFrame::Binary(bytes),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(%node_id, error = %e, "relay connection failed");
                break;
            }
        };

        let item = match Envelope::decode(&frame) {
            Ok(envelope) => Inbound::Envelope(envelope),
            Err(error) => {
                tracing::warn!(%node_id, kind = frame.kind(), error = %error, "undecodable frame");
                Inbound::Undecodable {
                    route: RouteHeader::peek(&frame).ok(),
                    error,
                }
            }
        };

        if inbox.send(item).is_err() {
            break;
        }
    }

    let mut status = status.lock().await;
    if status.epoch == epoch {
        status.state = NodeState::Disconnected;
        tracing::info!(%node_id, "relay connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_relay::{ConnectionRegistry, RelayServer};

    async fn start_relay() -> (String, Arc<ConnectionRegistry>) {
        let server = RelayServer::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let url = format!("ws://{}/ws", server.local_addr());
        let registry = server.registry();
        tokio::spawn(server.run());
        (url, registry)
    }

    async fn wait_registered(registry: &ConnectionRegistry, node_id: &str) {
        for _ in 0..100 {
            if registry.contains(node_id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{node_id} never registered");
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let client = NodeClient::new("node_1", "ws://127.0.0.1:1/ws");
        assert_eq!(client.state().await, NodeState::Disconnected);

        let result = client.send("node_2", Payload::new()).await;
        assert!(matches!(result, Err(NodeError::NotConnected)));
        assert!(client.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_connect_failure_stays_disconnected() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = NodeClient::new("node_1", format!("ws://{addr}/ws"));
        assert!(matches!(client.connect().await, Err(NodeError::Connect(_))));
        assert_eq!(client.state().await, NodeState::Disconnected);
    }

    #[tokio::test]
    async fn test_message_between_nodes() {
        let (url, registry) = start_relay().await;
        let node_1 = NodeClient::new("node_1", url.clone());
        let node_2 = NodeClient::new("node_2", url);

        node_1.connect().await.unwrap();
        node_2.connect().await.unwrap();
        assert!(node_1.is_connected().await);
        wait_registered(&registry, "node_1").await;
        wait_registered(&registry, "node_2").await;

        let mut payload = Payload::new();
        payload.insert("message".to_string(), serde_json::json!("hello"));
        node_1.send("node_2", payload.clone()).await.unwrap();

        let item = tokio::time::timeout(Duration::from_secs(5), node_2.recv())
            .await
            .unwrap()
            .unwrap();
        match item {
            Inbound::Envelope(Envelope::Message(message)) => {
                assert_eq!(message.source, "node_1");
                assert_eq!(message.target, "node_2");
                assert_eq!(message.payload, payload);
            }
            other => panic!("unexpected inbound: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (url, registry) = start_relay().await;
        let client = NodeClient::new("node_1", url);
        client.connect().await.unwrap();
        wait_registered(&registry, "node_1").await;

        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(client.state().await, NodeState::Disconnected);
        assert!(matches!(
            client.send("node_2", Payload::new()).await,
            Err(NodeError::NotConnected)
        ));
        assert!(client.recv().await.is_none());

        for _ in 0..100 {
            if !registry.contains("node_1") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!registry.contains("node_1"));
    }

    #[tokio::test]
    async fn test_disconnect_after_relay_vanished() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Accepts one node, reads its registration, then drops the socket
        let relay = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let registration = ws.next().await.unwrap().unwrap();
            assert!(matches!(registration, Message::Binary(_)));
        });

        let client = NodeClient::new("node_1", format!("ws://{addr}/ws"));
        client.connect().await.unwrap();
        relay.await.unwrap();

        assert!(
            tokio::time::timeout(Duration::from_secs(5), client.recv())
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(client.state().await, NodeState::Disconnected);

        tokio::time::timeout(SHUTDOWN_GRACE + Duration::from_secs(1), client.disconnect())
            .await
            .unwrap();
        assert_eq!(client.state().await, NodeState::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect() {
        let (url, registry) = start_relay().await;
        let client = NodeClient::new("node_1", url);

        client.connect().await.unwrap();
        client.disconnect().await;
        client.connect().await.unwrap();

        assert_eq!(client.state().await, NodeState::Registered);
        wait_registered(&registry, "node_1").await;
    }
}
