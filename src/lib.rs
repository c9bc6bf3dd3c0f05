pub mod anti_entropy;
pub mod api;
pub mod config;
pub mod connector;
pub mod context;
pub mod daemon;
pub mod discovery;
pub mod error;
pub mod node;
pub mod peers;
pub mod quorum;
pub mod replication;
pub mod store;
pub mod types;

pub use anti_entropy::{AntiEntropy, SyncHandle, SyncMode, SyncState};
pub use api::create_router;
pub use config::NodeConfig;
pub use connector::{HttpConnector, PeerConnector};
pub use context::NodeContext;
pub use daemon::KvDaemon;
pub use error::{Error, Result};
pub use node::KvNode;
pub use peers::{EvictionTracker, PeerListener, PeerRegistry};
pub use quorum::{PendingOp, QuorumOp};
pub use store::{LocalStore, MemoryStore, SledStore};
pub use types::*;
