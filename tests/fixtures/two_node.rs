//! Two-node test fixture for integration testing
//!
//! Starts a real relay on `127.0.0.1:0`, a sending node (`node_1`) and a
//! receiving node (`node_2`) serving `write_storage` into a temporary
//! directory.
//!
//! # Example
//!
//! ```no_run
//! use tether_integration_tests::fixtures::TwoNodeFixture;
//!
//! #[tokio::test]
//! async fn test_basic_transfer() {
//!     let fixture = TwoNodeFixture::new().await.unwrap();
//!     // ... send_file(&fixture.sender, ...) ...
//!     fixture.cleanup().await;
//! }
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tether_files::{ReceiverConfig, TransferReceiver};
use tether_node::{NodeClient, NodeError, serve_storage};
use tether_relay::{ConnectionRegistry, RelayError, RelayServer};
use tokio::task::JoinHandle;

type FixtureError = Box<dyn std::error::Error + Send + Sync>;

/// Poll `condition` every 10ms for up to five seconds
pub async fn wait_until<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// A relay running on an ephemeral port
pub struct RelayHandle {
    /// `ws://127.0.0.1:{port}`
    pub base_url: String,
    /// Live registry
    pub registry: Arc<ConnectionRegistry>,
    task: JoinHandle<Result<(), RelayError>>,
}

impl RelayHandle {
    /// Bind and run a relay
    ///
    /// # Errors
    ///
    /// Returns error if the relay cannot bind.
    pub async fn start() -> Result<Self, RelayError> {
        let server = RelayServer::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let base_url = format!("ws://{}", server.local_addr());
        let registry = server.registry();
        let task = tokio::spawn(server.run());

        Ok(Self {
            base_url,
            registry,
            task,
        })
    }

    /// URL for the binary registration handshake
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}/ws", self.base_url)
    }

    /// URL that registers `node_id` by path
    #[must_use]
    pub fn path_url(&self, node_id: &str) -> String {
        format!("{}/ws/{node_id}", self.base_url)
    }

    /// Connect a node and wait until the relay has registered it
    ///
    /// # Errors
    ///
    /// Returns error if the connection fails or registration is not observed.
    pub async fn connect_node(&self, node_id: &str) -> Result<NodeClient, FixtureError> {
        let previous = self.registry.connection_id(node_id);
        let client = NodeClient::new(node_id, self.url());
        client.connect().await?;

        let registry = self.registry.clone();
        let registered = wait_until(|| {
            let registry = registry.clone();
            async move {
                let current = registry.connection_id(node_id);
                current.is_some() && current != previous
            }
        })
        .await;

        if registered {
            Ok(client)
        } else {
            Err(format!("{node_id} was never registered").into())
        }
    }

    /// Stop the relay
    pub fn stop(&self) {
        self.task.abort();
    }
}

/// Two-node test fixture
pub struct TwoNodeFixture {
    /// Running relay
    pub relay: RelayHandle,
    /// Sending node, `node_1`
    pub sender: NodeClient,
    /// Receiving node, `node_2`
    pub receiving: Arc<NodeClient>,
    /// Receiver state behind `node_2`
    pub receiver: Arc<TransferReceiver>,
    /// Storage root of `node_2`
    pub storage: TempDir,
    serve_task: JoinHandle<Result<(), NodeError>>,
}

impl TwoNodeFixture {
    /// Start a relay and both nodes
    ///
    /// # Errors
    ///
    /// Returns error if the relay or either node fails to start.
    pub async fn new() -> Result<Self, FixtureError> {
        let relay = RelayHandle::start().await?;
        let storage = TempDir::new()?;

        let receiving = Arc::new(relay.connect_node("node_2").await?);
        let receiver = Arc::new(TransferReceiver::new(ReceiverConfig::new(storage.path())));
        let serve_task = {
            let receiving = receiving.clone();
            let receiver = receiver.clone();
            tokio::spawn(async move { serve_storage(&receiving, &receiver).await })
        };

        let sender = relay.connect_node("node_1").await?;

        Ok(Self {
            relay,
            sender,
            receiving,
            receiver,
            storage,
            serve_task,
        })
    }

    /// Path of a stored file
    #[must_use]
    pub fn stored_path(&self, folder_id: &str, filename: &str) -> PathBuf {
        self.storage.path().join(folder_id).join(filename)
    }

    /// Storage folders created so far, excluding the scratch directory
    #[must_use]
    pub fn storage_folders(&self) -> Vec<String> {
        std::fs::read_dir(self.storage.path())
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .filter(|name| name != tether_files::SCRATCH_DIR)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Disconnect both nodes and stop the relay
    pub async fn cleanup(self) {
        self.sender.disconnect().await;
        self.receiving.disconnect().await;
        let _ = self.serve_task.await;
        self.relay.stop();
    }
}
