use crate::config::{ReplicationSettings, SyncSettings};
use crate::connector::PeerConnector;
use crate::error::Error;
use crate::peers::{EvictionTracker, PeerRegistry};
use crate::store::LocalStore;
use std::sync::Arc;

/// State shared by the replication protocols and sync workers of one node.
#[derive(Clone)]
pub struct NodeContext {
    pub registry: Arc<PeerRegistry>,
    pub store: Arc<dyn LocalStore>,
    pub connector: Arc<dyn PeerConnector>,
    pub evictions: Arc<EvictionTracker>,
    pub replication: ReplicationSettings,
    pub sync: SyncSettings,
}

impl NodeContext {
    pub fn new(
        self_uri: &str,
        store: Arc<dyn LocalStore>,
        connector: Arc<dyn PeerConnector>,
        replication: ReplicationSettings,
        sync: SyncSettings,
    ) -> Self {
        let registry = Arc::new(PeerRegistry::new(self_uri));
        let evictions = Arc::new(EvictionTracker::new(
            registry.clone(),
            replication.evict_after_failures,
        ));
        Self {
            registry,
            store,
            connector,
            evictions,
            replication,
            sync,
        }
    }

    pub fn self_uri(&self) -> &str {
        self.registry.self_uri()
    }

    /// Failure handler for quorum fan-outs: errors count towards eviction,
    /// cancellations never do.
    pub fn failure_handler(&self) -> impl Fn(&str, Option<&Error>) + Send + Sync + 'static {
        let evictions = self.evictions.clone();
        move |peer, cause| match cause {
            Some(err) => {
                evictions.record_failure(peer, err);
            }
            None => evictions.record_cancelled(peer),
        }
    }
}
