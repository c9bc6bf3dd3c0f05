use crate::types::{normalize_uri, PeerUri};
use arc_swap::ArcSwap;
use rand::seq::SliceRandom;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Observer of peer set changes.
///
/// Called on the mutating caller's task, so implementations should hand
/// heavy work off (e.g. push onto a channel) instead of doing it inline.
pub trait PeerListener: Send + Sync {
    fn peer_added(&self, peer: &str);
    fn peer_removed(&self, peer: &str);
}

pub type ListenerId = u64;

type ListenerList = Vec<(ListenerId, Arc<dyn PeerListener>)>;

/// Copy-on-write set of peer URIs.
///
/// Reads are a single atomic load; mutations build the next set and publish
/// it with compare-and-swap, retrying from scratch when they lose a race.
pub struct PeerRegistry {
    self_uri: PeerUri,
    peers: ArcSwap<BTreeSet<PeerUri>>,
    listeners: ArcSwap<ListenerList>,
    next_listener_id: AtomicU64,
}

impl PeerRegistry {
    pub fn new(self_uri: &str) -> Self {
        Self {
            self_uri: normalize_uri(self_uri),
            peers: ArcSwap::from_pointee(BTreeSet::new()),
            listeners: ArcSwap::from_pointee(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    pub fn self_uri(&self) -> &str {
        &self.self_uri
    }

    pub fn snapshot(&self) -> Arc<BTreeSet<PeerUri>> {
        self.peers.load_full()
    }

    pub fn shuffled(&self) -> Vec<PeerUri> {
        let mut peers: Vec<PeerUri> = self.snapshot().iter().cloned().collect();
        peers.shuffle(&mut rand::thread_rng());
        peers
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.peers.load().contains(&normalize_uri(uri))
    }

    pub fn len(&self) -> usize {
        self.peers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.load().is_empty()
    }

    /// Inserts every URI not yet known and not equal to our own, then
    /// notifies listeners for each newly inserted one.
    pub fn add<I, S>(&self, uris: I) -> Vec<PeerUri>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let candidates: Vec<PeerUri> = uris
            .into_iter()
            .map(|u| normalize_uri(u.as_ref()))
            .filter(|u| !u.is_empty() && *u != self.self_uri)
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let added = loop {
            let current = self.peers.load_full();
            let mut next = (*current).clone();
            let added: Vec<PeerUri> = candidates
                .iter()
                .filter(|u| next.insert((*u).clone()))
                .cloned()
                .collect();
            if added.is_empty() {
                return added;
            }
            let prev = self.peers.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&*prev, &current) {
                break added;
            }
        };

        let listeners = self.listeners.load_full();
        for peer in &added {
            info!("Added peer {}", peer);
            for (_, listener) in listeners.iter() {
                listener.peer_added(peer);
            }
        }
        added
    }

    pub fn remove<I, S>(&self, uris: I) -> Vec<PeerUri>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let candidates: Vec<PeerUri> = uris
            .into_iter()
            .map(|u| normalize_uri(u.as_ref()))
            .collect();

        let removed = loop {
            let current = self.peers.load_full();
            let mut next = (*current).clone();
            let removed: Vec<PeerUri> = candidates
                .iter()
                .filter(|u| next.remove(*u))
                .cloned()
                .collect();
            if removed.is_empty() {
                return removed;
            }
            let prev = self.peers.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&*prev, &current) {
                break removed;
            }
        };

        let listeners = self.listeners.load_full();
        for peer in &removed {
            info!("Removed peer {}", peer);
            for (_, listener) in listeners.iter() {
                listener.peer_removed(peer);
            }
        }
        removed
    }

    pub fn subscribe(&self, listener: Arc<dyn PeerListener>) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.rcu(|current| {
            let mut next = (**current).clone();
            next.push((id, listener.clone()));
            next
        });
        debug!("Subscribed peer listener {}", id);
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.listeners.rcu(|current| {
            current
                .iter()
                .filter(|(lid, _)| *lid != id)
                .cloned()
                .collect::<ListenerList>()
        });
        debug!("Unsubscribed peer listener {}", id);
    }
}
