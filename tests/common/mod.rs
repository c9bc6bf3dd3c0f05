#![allow(dead_code)]

use async_trait::async_trait;
use meshkv::config::{ReplicationSettings, SyncSettings};
use meshkv::*;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// In-process transport routing peer calls straight to other nodes, with
/// injectable failures and delays.
#[derive(Default)]
pub struct Network {
    nodes: RwLock<HashMap<String, KvNode>>,
    down: RwLock<HashSet<String>>,
    delays: RwLock<HashMap<String, Duration>>,
    calls: AtomicUsize,
}

impl Network {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, node: &KvNode) {
        self.nodes
            .write()
            .unwrap()
            .insert(node.self_uri().to_string(), node.clone());
    }

    pub fn set_down(&self, uri: &str) {
        self.down.write().unwrap().insert(uri.to_string());
    }

    pub fn set_up(&self, uri: &str) {
        self.down.write().unwrap().remove(uri);
    }

    pub fn set_delay(&self, uri: &str, delay: Duration) {
        self.delays.write().unwrap().insert(uri.to_string(), delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn route(&self, peer: &str) -> Result<KvNode> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.delays.read().unwrap().get(peer).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.down.read().unwrap().contains(peer) {
            return Err(Error::unreachable(peer, "injected failure"));
        }

        self.nodes
            .read()
            .unwrap()
            .get(peer)
            .cloned()
            .ok_or_else(|| Error::unreachable(peer, "no such node"))
    }
}

#[async_trait]
impl PeerConnector for Network {
    async fn get(
        &self,
        peer: &str,
        namespace: &str,
        key: &str,
        since: Option<Timestamp>,
    ) -> Result<Option<VersionedValue>> {
        self.route(peer).await?.local_get(namespace, key, since)
    }

    async fn put(
        &self,
        peer: &str,
        namespace: &str,
        key: &str,
        value: &str,
        timestamp: Timestamp,
    ) -> Result<PutAck> {
        self.route(peer)
            .await?
            .local_put(namespace, key, value, timestamp)
    }

    async fn friends(&self, peer: &str, me: Option<&str>) -> Result<Vec<String>> {
        self.route(peer).await?.friends(me)
    }

    async fn bulk_data(&self, peer: &str, since: Timestamp) -> Result<Vec<NamespaceEntries>> {
        self.route(peer).await?.bulk_export(since)
    }
}

pub fn replication(read_degree: usize, write_degree: usize, fanout: usize) -> ReplicationSettings {
    ReplicationSettings {
        read_degree,
        write_degree,
        fanout_degree: fanout,
        write_retry_rounds: 2,
        quorum_timeout_ms: 300,
        evict_after_failures: 1,
        ..Default::default()
    }
}

pub fn sync_settings() -> SyncSettings {
    SyncSettings {
        initial_sync_peers: 2,
        background: false,
        timeout_ms: 500,
    }
}

pub fn node_with(network: &Arc<Network>, uri: &str, replication: ReplicationSettings) -> KvNode {
    let ctx = NodeContext::new(
        uri,
        Arc::new(MemoryStore::new()),
        network.clone(),
        replication,
        sync_settings(),
    );
    let node = KvNode::new(ctx);
    network.register(&node);
    node
}

pub fn node(network: &Arc<Network>, uri: &str) -> KvNode {
    node_with(network, uri, replication(3, 3, 2))
}

/// Registry listener recording every event in order.
#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl PeerListener for Recorder {
    fn peer_added(&self, peer: &str) {
        self.events.lock().unwrap().push(format!("+{}", peer));
    }

    fn peer_removed(&self, peer: &str) {
        self.events.lock().unwrap().push(format!("-{}", peer));
    }
}

/// Polls `check` until it holds or `timeout` elapses.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
