//! UDP broadcast discovery.
//!
//! Every node periodically broadcasts `MESHKV|<version>|<node_id>|<uri>` on
//! the discovery port and listens on the same socket. A node that hears an
//! unknown URI asks it for its friends (announcing itself in the same call)
//! and adds both the sender and its friends to the registry. Befriending runs
//! on its own task so a slow peer never holds up the socket loop.

use crate::anti_entropy::AntiEntropy;
use crate::config::DiscoverySettings;
use crate::types::{normalize_uri, PeerUri};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DISCOVERY_PREFIX: &str = "MESHKV";
const DISCOVERY_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub node_id: String,
    pub uri: PeerUri,
}

pub fn format_message(node_id: &str, uri: &str) -> String {
    format!(
        "{}|{}|{}|{}",
        DISCOVERY_PREFIX, DISCOVERY_VERSION, node_id, uri
    )
}

pub fn parse_message(message: &str) -> Option<Announcement> {
    let parts: Vec<&str> = message.trim().splitn(4, '|').collect();
    if parts.len() < 4 || parts[0] != DISCOVERY_PREFIX {
        return None;
    }

    let version: u8 = parts[1].parse().ok()?;
    if version != DISCOVERY_VERSION {
        return None;
    }

    let uri = normalize_uri(parts[3]);
    if parts[2].is_empty() || uri.is_empty() {
        return None;
    }

    Some(Announcement {
        node_id: parts[2].to_string(),
        uri,
    })
}

pub struct Discovery {
    node_id: String,
    settings: DiscoverySettings,
    engine: AntiEntropy,
    befriending: Arc<RwLock<HashSet<PeerUri>>>,
}

impl Discovery {
    pub fn new(node_id: String, settings: DiscoverySettings, engine: AntiEntropy) -> Self {
        Self {
            node_id,
            settings,
            engine,
            befriending: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Binds the discovery socket and spawns the broadcast/listen loop.
    pub async fn start(
        self,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<JoinHandle<()>> {
        let socket = UdpSocket::bind(("0.0.0.0", self.settings.port)).await?;
        socket.set_broadcast(true)?;
        let socket = Arc::new(socket);

        let broadcast_addr = SocketAddr::from(([255, 255, 255, 255], self.settings.port));
        let message = format_message(&self.node_id, self.engine.context().self_uri());
        info!("Discovery started on UDP port {}", self.settings.port);

        Ok(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.settings.interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut buf = [0u8; 1024];

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match socket.send_to(message.as_bytes(), broadcast_addr).await {
                            Ok(_) => debug!("Discovery broadcast sent: {}", message),
                            Err(e) => debug!("Discovery broadcast failed: {}", e),
                        }
                    }
                    received = socket.recv_from(&mut buf) => {
                        match received {
                            Ok((len, from)) => {
                                let text = String::from_utf8_lossy(&buf[..len]).to_string();
                                self.handle(&text, from);
                            }
                            Err(e) => warn!("Discovery receive failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        break;
                    }
                }
            }
            info!("Discovery stopped");
        }))
    }

    /// Filters an announcement and, for an unknown sender, starts befriending
    /// it on a separate task. At most one task runs per sender.
    pub fn handle(&self, message: &str, from: SocketAddr) -> Option<JoinHandle<()>> {
        let Some(announcement) = parse_message(message) else {
            debug!("Ignoring malformed discovery message from {}", from);
            return None;
        };

        let ctx = self.engine.context();
        if announcement.node_id == self.node_id || announcement.uri == ctx.self_uri() {
            return None;
        }
        if ctx.registry.contains(&announcement.uri) {
            return None;
        }
        if !self.befriending.write().unwrap().insert(announcement.uri.clone()) {
            debug!("Already befriending {}", announcement.uri);
            return None;
        }

        debug!(
            "Discovered node {} at {} from {}",
            announcement.node_id, announcement.uri, from
        );
        let engine = self.engine.clone();
        let befriending = self.befriending.clone();
        Some(tokio::spawn(async move {
            match engine.exchange_friends(&announcement.uri).await {
                Ok(_) => {
                    engine.context().registry.add([announcement.uri.as_str()]);
                }
                Err(e) => warn!("Could not befriend {}: {}", announcement.uri, e),
            }
            befriending.write().unwrap().remove(&announcement.uri);
        }))
    }
}
