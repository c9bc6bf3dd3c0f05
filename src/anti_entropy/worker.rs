use super::AntiEntropy;
use crate::peers::{ListenerId, PeerListener, PeerRegistry};
use crate::types::{normalize_uri, PeerUri};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncCommand {
    Peer(PeerUri),
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Syncs with the first `limit` distinct peers, then stops.
    Initial { limit: usize },
    /// Exchanges friends and syncs with every dequeued peer until stopped.
    Continuous,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Dequeuing,
    Fetching(PeerUri),
    Applying,
    Stopped,
}

/// Registry listener feeding a sync worker. Only pushes onto the queue so
/// registry mutations never wait on network I/O.
struct SyncQueue {
    tx: mpsc::UnboundedSender<SyncCommand>,
    removed: Arc<RwLock<HashSet<PeerUri>>>,
}

impl PeerListener for SyncQueue {
    fn peer_added(&self, peer: &str) {
        self.removed.write().unwrap().remove(peer);
        let _ = self.tx.send(SyncCommand::Peer(peer.to_string()));
    }

    fn peer_removed(&self, peer: &str) {
        self.removed.write().unwrap().insert(peer.to_string());
    }
}

pub struct SyncHandle {
    mode: SyncMode,
    tx: mpsc::UnboundedSender<SyncCommand>,
    state: watch::Receiver<SyncState>,
}

impl SyncHandle {
    /// Subscribes to the engine's registry and starts the worker. Peers added
    /// before this call are not seen; enqueue them explicitly.
    pub fn spawn(engine: AntiEntropy, mode: SyncMode) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SyncState::Idle);
        let removed = Arc::new(RwLock::new(HashSet::new()));

        let registry = engine.context().registry.clone();
        let listener_id = registry.subscribe(Arc::new(SyncQueue {
            tx: tx.clone(),
            removed: removed.clone(),
        }));

        let worker = SyncWorker {
            engine,
            mode,
            rx,
            removed,
            state: state_tx,
            registry,
            listener_id,
        };
        tokio::spawn(worker.run());

        Self {
            mode,
            tx,
            state,
        }
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn enqueue(&self, peer: &str) {
        let _ = self.tx.send(SyncCommand::Peer(normalize_uri(peer)));
    }

    /// Queues a stop token behind every peer already enqueued.
    pub fn stop(&self) {
        let _ = self.tx.send(SyncCommand::Stop);
    }

    pub fn state(&self) -> SyncState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.state.clone()
    }

    /// Waits for the worker to reach `Stopped`.
    pub async fn stopped(&self) {
        let mut rx = self.state.clone();
        while *rx.borrow_and_update() != SyncState::Stopped {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

struct SyncWorker {
    engine: AntiEntropy,
    mode: SyncMode,
    rx: mpsc::UnboundedReceiver<SyncCommand>,
    removed: Arc<RwLock<HashSet<PeerUri>>>,
    state: watch::Sender<SyncState>,
    registry: Arc<PeerRegistry>,
    listener_id: ListenerId,
}

impl SyncWorker {
    async fn run(mut self) {
        info!("Sync worker started ({:?})", self.mode);
        let mut synced: HashSet<PeerUri> = HashSet::new();

        loop {
            if let SyncMode::Initial { limit } = self.mode {
                if synced.len() >= limit {
                    break;
                }
            }

            self.set_state(SyncState::Dequeuing);
            let peer = match self.rx.recv().await {
                Some(SyncCommand::Peer(peer)) => peer,
                Some(SyncCommand::Stop) | None => break,
            };

            if self.removed.read().unwrap().contains(&peer) {
                debug!("Skipping removed peer {}", peer);
                continue;
            }
            if matches!(self.mode, SyncMode::Initial { .. }) && !synced.insert(peer.clone()) {
                debug!("Already synced with {}", peer);
                continue;
            }

            self.sync_with(&peer).await;
            self.set_state(SyncState::Idle);
        }

        self.registry.unsubscribe(self.listener_id);
        self.set_state(SyncState::Stopped);
        info!("Sync worker finished ({:?})", self.mode);
    }

    async fn sync_with(&self, peer: &str) {
        self.set_state(SyncState::Fetching(peer.to_string()));

        if self.mode == SyncMode::Continuous {
            match self.engine.exchange_friends(peer).await {
                Ok(added) if !added.is_empty() => {
                    info!("Learned {} peer(s) from {}", added.len(), peer)
                }
                Ok(_) => {}
                Err(e) => warn!("Friend exchange with {} failed: {}", peer, e),
            }
        }

        let ctx = self.engine.context();
        let since = match ctx.store.low_watermark() {
            Ok(Some(since)) => since,
            Ok(None) => {
                info!("No watermark to sync from, skipping {}", peer);
                return;
            }
            Err(e) => {
                warn!("Failed to compute low watermark: {}", e);
                return;
            }
        };

        let batches = match self.engine.fetch(peer, since).await {
            Ok(batches) => batches,
            Err(e) => {
                warn!("Sync with {} failed: {}", peer, e);
                return;
            }
        };

        self.set_state(SyncState::Applying);
        match self.engine.apply(since, &batches) {
            Ok(report) => info!(
                "Synced with {} since {}: {} applied, {} stale",
                peer, since, report.applied, report.stale
            ),
            Err(e) => warn!("Applying data from {} failed: {}", peer, e),
        }
    }

    fn set_state(&self, state: SyncState) {
        self.state.send_replace(state);
    }
}
