//! WebSocket relay server.

use crate::error::RelayError;
use crate::registry::{ConnectionHandle, ConnectionRegistry, RouteOutcome};
use crate::{HANDSHAKE_TIMEOUT, MAX_MESSAGE_SIZE};
use futures_util::{SinkExt, Stream, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{NodeId, RELAY_WS_PATH, Registration, WireFrame};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};

/// Relay server configuration
#[derive(Debug, Clone)]
pub struct RelayServerConfig {
    /// Largest WebSocket message accepted from a node
    pub max_message_size: usize,
    /// Time allowed for the registration frame on the bare `/ws` path
    pub handshake_timeout: Duration,
}

impl Default for RelayServerConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }
}

/// Relay hub: accepts node connections and routes frames between them
pub struct RelayServer {
    /// Bound listener
    listener: TcpListener,
    /// Actual bound address
    local_addr: SocketAddr,
    /// Registered nodes
    registry: Arc<ConnectionRegistry>,
    /// Server configuration
    config: RelayServerConfig,
}

impl RelayServer {
    /// Bind a relay server with default configuration
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot be bound.
    pub async fn bind(bind_addr: SocketAddr) -> Result<Self, RelayError> {
        Self::bind_with_config(bind_addr, RelayServerConfig::default()).await
    }

    /// Bind a relay server with custom configuration
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot be bound.
    pub async fn bind_with_config(
        bind_addr: SocketAddr,
        config: RelayServerConfig,
    ) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(bind_addr).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
            registry: Arc::new(ConnectionRegistry::new()),
            config,
        })
    }

    /// Address the server is listening on
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared registry, for inspection
    #[must_use]
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    /// Number of registered nodes
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Run the accept loop forever
    ///
    /// # Errors
    ///
    /// Never returns under normal operation.
    pub async fn run(self) -> Result<(), RelayError> {
        self.run_until(std::future::pending()).await
    }

    /// Run the accept loop until `shutdown` resolves
    ///
    /// Each accepted connection is handled on its own task. A failing
    /// connection is logged and never affects other connections.
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok`; accept errors are logged and retried.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(addr = %self.local_addr, "relay server listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!(clients = self.registry.len(), "relay server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let registry = self.registry.clone();
                        let config = self.config.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, registry, config).await {
                                tracing::warn!(%peer, error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                }
            }
        }
    }
}

/// Serve one node connection from handshake to disconnect
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    config: RelayServerConfig,
) -> Result<(), RelayError> {
    let mut request_path = String::new();
    let capture_path = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        request_path = req.uri().path().to_string();
        Ok(resp)
    };

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_message_size);

    let ws = tokio_tungstenite::accept_hdr_async_with_config(stream, capture_path, Some(ws_config))
        .await?;
    tracing::debug!(%peer, path = %request_path, "websocket accepted");

    let (mut ws_tx, mut ws_rx) = ws.split();

    let node_id = match node_id_from_path(&request_path) {
        Some(id) => id,
        None => read_registration(&mut ws_rx, config.handshake_timeout).await?,
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<WireFrame>();
    let handle = ConnectionHandle::new(registry.next_connection_id(), peer, tx);

    // Writer task: sole owner of the sink
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = ws_tx.send(into_message(frame)).await {
                tracing::warn!(%peer, error = %e, "write failed, closing writer");
                break;
            }
        }
        if let Err(e) = ws_tx.close().await {
            tracing::debug!(%peer, error = %e, "websocket close failed");
        }
    });

    registry.register(node_id.clone(), handle.clone());

    let result = relay_frames(&node_id, &mut ws_rx, &registry).await;

    registry.unregister(&node_id, handle.id());
    drop(handle);
    if let Err(e) = writer.await {
        tracing::debug!(%peer, node_id = %node_id, error = %e, "writer task did not finish cleanly");
    }

    result
}

/// Read frames from a registered node and route each by target id
///
/// Undecodable frames are logged and skipped; the loop ends on close or
/// transport error.
async fn relay_frames<S>(
    node_id: &str,
    ws_rx: &mut S,
    registry: &ConnectionRegistry,
) -> Result<(), RelayError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(message) = ws_rx.next().await {
        let frame = match message? {
            Message::Text(text) => WireFrame::Text(text),
            Message::Binary(bytes) => WireFrame::Binary(bytes),
            Message::Close(_) => break,
            _ => continue,
        };
        let size = frame.len();

        match registry.route(frame) {
            Ok(RouteOutcome::Delivered { target }) => {
                tracing::info!(from = node_id, to = %target, bytes = size, "message relayed");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(node_id, error = %e, "dropping undecodable frame");
            }
        }
    }

    tracing::info!(node_id, "node disconnected");
    Ok(())
}

/// Wait for the binary registration frame on a bare `/ws` connection
async fn read_registration<S>(ws_rx: &mut S, timeout: Duration) -> Result<NodeId, RelayError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    tokio::time::timeout(timeout, next_registration(ws_rx))
        .await
        .map_err(|_| RelayError::HandshakeTimeout)?
}

async fn next_registration<S>(ws_rx: &mut S) -> Result<NodeId, RelayError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(message) = ws_rx.next().await {
        match message? {
            Message::Binary(bytes) => {
                let registration = Registration::from_bytes(&bytes)?;
                if registration.node_id.is_empty() {
                    return Err(RelayError::InvalidNodeId);
                }
                return Ok(registration.node_id);
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => return Err(RelayError::ClosedBeforeRegistration),
            Message::Text(_) => return Err(RelayError::UnexpectedFrame("text")),
            Message::Frame(_) => return Err(RelayError::UnexpectedFrame("raw")),
        }
    }
    Err(RelayError::ClosedBeforeRegistration)
}

/// Node id from a `/ws/{node_id}` request path
fn node_id_from_path(path: &str) -> Option<NodeId> {
    let id = path
        .strip_prefix(RELAY_WS_PATH)?
        .strip_prefix('/')?
        .trim_end_matches('/');

    if id.is_empty() || id.contains('/') {
        None
    } else {
        Some(id.to_string())
    }
}

fn into_message(frame: WireFrame) -> Message {
    match frame {
        WireFrame::Text(text) => Message::Text(text),
        WireFrame::Binary(bytes) => Message::Binary(bytes),
    }
}
