mod http;

pub use http::*;

use crate::error::Result;
use crate::types::{NamespaceEntries, PutAck, Timestamp, VersionedValue};
use async_trait::async_trait;

/// Client side of the peer protocol. Dropping a returned future abandons
/// the request.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Reads the peer's local value. With `since`, the peer answers `None`
    /// unless it holds something strictly newer.
    async fn get(
        &self,
        peer: &str,
        namespace: &str,
        key: &str,
        since: Option<Timestamp>,
    ) -> Result<Option<VersionedValue>>;

    async fn put(
        &self,
        peer: &str,
        namespace: &str,
        key: &str,
        value: &str,
        timestamp: Timestamp,
    ) -> Result<PutAck>;

    /// Fetches the peer's friend list, announcing `me` as a new friend.
    async fn friends(&self, peer: &str, me: Option<&str>) -> Result<Vec<String>>;

    async fn bulk_data(&self, peer: &str, since: Timestamp) -> Result<Vec<NamespaceEntries>>;
}
