use crate::error::Error;
use crate::peers::PeerRegistry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Counts consecutive transport failures per peer and evicts a peer from the
/// registry once it reaches the threshold. A threshold of 1 evicts on the
/// first error.
pub struct EvictionTracker {
    registry: Arc<PeerRegistry>,
    threshold: u32,
    failures: RwLock<HashMap<String, u32>>,
}

impl EvictionTracker {
    pub fn new(registry: Arc<PeerRegistry>, threshold: u32) -> Self {
        Self {
            registry,
            threshold: threshold.max(1),
            failures: RwLock::new(HashMap::new()),
        }
    }

    /// Returns true when the peer was evicted.
    pub fn record_failure(&self, peer: &str, cause: &Error) -> bool {
        let count = {
            let mut failures = self.failures.write().unwrap();
            let count = failures.entry(peer.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        if count < self.threshold {
            warn!(
                "Peer {} failed ({}/{} before eviction): {}",
                peer, count, self.threshold, cause
            );
            return false;
        }

        warn!("Evicting peer {} after {} failure(s): {}", peer, count, cause);
        self.failures.write().unwrap().remove(peer);
        !self.registry.remove([peer]).is_empty()
    }

    pub fn record_success(&self, peer: &str) {
        if self.failures.write().unwrap().remove(peer).is_some() {
            debug!("Peer {} recovered, failure count reset", peer);
        }
    }

    pub fn record_cancelled(&self, peer: &str) {
        debug!("Request to peer {} cancelled", peer);
    }

    pub fn failure_count(&self, peer: &str) -> u32 {
        self.failures
            .read()
            .unwrap()
            .get(peer)
            .copied()
            .unwrap_or(0)
    }
}
