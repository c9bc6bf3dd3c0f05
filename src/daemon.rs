use crate::anti_entropy::{AntiEntropy, SyncHandle, SyncMode, SyncState};
use crate::config::NodeConfig;
use crate::connector::{HttpConnector, PeerConnector};
use crate::context::NodeContext;
use crate::discovery::Discovery;
use crate::node::{validate_peer_uri, KvNode};
use crate::store::{LocalStore, MemoryStore, SledStore};
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub node_id: String,
    pub uri: String,
    pub peers: usize,
    pub namespaces: Vec<String>,
    pub initial_sync: String,
    pub background_sync: Option<String>,
}

pub struct KvDaemon {
    node_id: String,
    config: NodeConfig,
    node: KvNode,
    engine: AntiEntropy,
    initial_sync: SyncHandle,
    background_sync: Option<SyncHandle>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl KvDaemon {
    pub async fn new(config: NodeConfig) -> Result<Self> {
        let store: Arc<dyn LocalStore> = if config.in_memory {
            info!("Using in-memory store");
            Arc::new(MemoryStore::new())
        } else {
            std::fs::create_dir_all(&config.data_dir)?;
            Arc::new(SledStore::open(config.data_dir.join("db"))?)
        };

        let connector = Arc::new(HttpConnector::new(
            config.replication.connect_timeout(),
            config.replication.request_timeout(),
        )?);

        Self::with_parts(config, store, connector).await
    }

    /// Builds a daemon around an explicit store and connector. Sync workers
    /// are subscribed before any seed peer is added.
    pub async fn with_parts(
        config: NodeConfig,
        store: Arc<dyn LocalStore>,
        connector: Arc<dyn PeerConnector>,
    ) -> Result<Self> {
        let node_id = config.effective_node_id();
        let self_uri = config.effective_advertise_url();
        validate_peer_uri(&self_uri)?;

        info!("Initializing KvDaemon node_id={} uri={}", node_id, self_uri);

        let ctx = NodeContext::new(
            &self_uri,
            store,
            connector,
            config.replication.clone(),
            config.sync.clone(),
        );
        let node = KvNode::new(ctx.clone());
        let engine = AntiEntropy::new(ctx);

        let initial_sync = SyncHandle::spawn(
            engine.clone(),
            SyncMode::Initial {
                limit: config.sync.initial_sync_peers,
            },
        );
        let background_sync = config
            .sync
            .background
            .then(|| SyncHandle::spawn(engine.clone(), SyncMode::Continuous));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            node_id,
            config,
            node,
            engine,
            initial_sync,
            background_sync,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub async fn run(&self) -> Result<()> {
        info!("Starting KvDaemon...");

        self.add_seed_peers();

        let discovery_handle = if self.config.discovery.enabled {
            let discovery = Discovery::new(
                self.node_id.clone(),
                self.config.discovery.clone(),
                self.engine.clone(),
            );
            match discovery.start(self.shutdown_rx.clone()).await {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!("Failed to start discovery: {}", e);
                    None
                }
            }
        } else {
            None
        };

        info!("KvDaemon running as {}", self.node.self_uri());
        self.wait_for_shutdown().await;
        info!("Shutdown signal received");

        self.initial_sync.stop();
        if let Some(background) = &self.background_sync {
            background.stop();
        }

        let drain = async {
            self.initial_sync.stopped().await;
            if let Some(background) = &self.background_sync {
                background.stopped().await;
            }
        };
        if tokio::time::timeout(Duration::from_secs(5), drain).await.is_err() {
            warn!("Sync workers did not stop in time");
        }

        if let Some(handle) = discovery_handle {
            let _ = handle.await;
        }

        Ok(())
    }

    fn add_seed_peers(&self) {
        let seeds: Vec<String> = self
            .config
            .peers
            .iter()
            .filter_map(|peer| match validate_peer_uri(peer) {
                Ok(uri) => Some(uri),
                Err(e) => {
                    warn!("Ignoring seed peer: {}", e);
                    None
                }
            })
            .collect();

        if seeds.is_empty() {
            info!("No seed peers configured, waiting for peers to join");
            return;
        }
        let added = self.node.context().registry.add(seeds);
        info!("Added {} seed peer(s)", added.len());
    }

    pub fn status(&self) -> crate::error::Result<StatusReport> {
        let ctx = self.node.context();
        Ok(StatusReport {
            node_id: self.node_id.clone(),
            uri: self.node.self_uri().to_string(),
            peers: ctx.registry.len(),
            namespaces: ctx.store.namespaces()?,
            initial_sync: describe(&self.initial_sync.state()),
            background_sync: self
                .background_sync
                .as_ref()
                .map(|handle| describe(&handle.state())),
        })
    }

    async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn node(&self) -> &KvNode {
        &self.node
    }

    pub fn initial_sync(&self) -> &SyncHandle {
        &self.initial_sync
    }

    pub fn background_sync(&self) -> Option<&SyncHandle> {
        self.background_sync.as_ref()
    }
}

fn describe(state: &SyncState) -> String {
    match state {
        SyncState::Idle => "idle".to_string(),
        SyncState::Dequeuing => "waiting".to_string(),
        SyncState::Fetching(peer) => format!("fetching from {}", peer),
        SyncState::Applying => "applying".to_string(),
        SyncState::Stopped => "stopped".to_string(),
    }
}
