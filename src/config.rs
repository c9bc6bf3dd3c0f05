use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: Option<String>,

    pub bind_addr: String,
    pub bind_port: u16,
    pub advertise_url: Option<String>,

    pub data_dir: PathBuf,
    pub in_memory: bool,

    pub peers: Vec<String>,

    /// Origins allowed by CORS. `"*"` allows any origin.
    pub cors_origins: Vec<String>,

    pub replication: ReplicationSettings,
    pub sync: SyncSettings,
    pub discovery: DiscoverySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationSettings {
    pub read_degree: usize,
    pub write_degree: usize,
    pub fanout_degree: usize,
    pub write_retry_rounds: usize,
    pub quorum_timeout_ms: u64,
    pub evict_after_failures: u32,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub initial_sync_peers: usize,
    pub background: bool,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub enabled: bool,
    pub port: u16,
    pub interval_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            bind_addr: "0.0.0.0".to_string(),
            bind_port: 8086,
            advertise_url: None,
            data_dir: PathBuf::from("/var/lib/meshkv"),
            in_memory: false,
            peers: Vec::new(),
            cors_origins: vec!["*".to_string()],
            replication: ReplicationSettings::default(),
            sync: SyncSettings::default(),
            discovery: DiscoverySettings::default(),
        }
    }
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            read_degree: 3,
            write_degree: 3,
            fanout_degree: 2,
            write_retry_rounds: 3,
            quorum_timeout_ms: 1000,
            evict_after_failures: 1,
            connect_timeout_ms: 500,
            request_timeout_ms: 5000,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            initial_sync_peers: 2,
            background: true,
            timeout_ms: 10_000,
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 3571,
            interval_secs: 30,
        }
    }
}

impl ReplicationSettings {
    pub fn quorum_timeout(&self) -> Duration {
        Duration::from_millis(self.quorum_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// `(fan-out size, quorum)` for a read against `available` peers.
    pub fn read_plan(&self, available: usize) -> (usize, usize) {
        let n = self.read_degree.min(available);
        (n, self.fanout_degree.min(n))
    }

    /// `(fan-out size, quorum)` for one write round against `available` peers.
    pub fn write_plan(&self, available: usize) -> (usize, usize) {
        let n = self.write_degree.min(available);
        (n, self.fanout_degree.min(n))
    }
}

impl SyncSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl DiscoverySettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl NodeConfig {
    pub fn load(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &PathBuf) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn effective_node_id(&self) -> String {
        self.node_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.bind_port)
    }

    /// The base URL peers use to reach this node; doubles as its identity
    /// in every peer set.
    pub fn effective_advertise_url(&self) -> String {
        self.advertise_url.clone().unwrap_or_else(|| {
            let host = if self.bind_addr == "0.0.0.0" {
                hostname::get()
                    .map(|h| h.to_string_lossy().to_string())
                    .unwrap_or_else(|_| "localhost".to_string())
            } else {
                self.bind_addr.clone()
            };
            format!("http://{}:{}", host, self.bind_port)
        })
    }
}
