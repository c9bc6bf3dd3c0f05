use crate::context::NodeContext;
use crate::error::{Error, Result};
use crate::replication::{replicated_read, replicated_write};
use crate::types::{
    normalize_uri, NamespaceEntries, PeerUri, PutAck, PutOutcome, Timestamp, VersionedValue,
    WriteReceipt,
};
use tracing::debug;

/// Operations exposed to the transport layer. Client-facing calls replicate,
/// peer-facing `local_*` calls never do.
#[derive(Clone)]
pub struct KvNode {
    ctx: NodeContext,
}

impl KvNode {
    pub fn new(ctx: NodeContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &NodeContext {
        &self.ctx
    }

    pub fn self_uri(&self) -> &str {
        self.ctx.self_uri()
    }

    pub async fn read(&self, namespace: &str, key: &str) -> Result<Option<VersionedValue>> {
        replicated_read(&self.ctx, namespace, key).await
    }

    pub async fn write(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
        timestamp: Option<Timestamp>,
    ) -> Result<WriteReceipt> {
        replicated_write(&self.ctx, namespace, key, value, timestamp).await
    }

    pub fn list_peers(&self) -> Vec<PeerUri> {
        self.ctx.registry.snapshot().iter().cloned().collect()
    }

    /// Returns whether the peer was not known before.
    pub fn add_peer(&self, uri: &str) -> Result<bool> {
        let uri = validate_peer_uri(uri)?;
        Ok(!self.ctx.registry.add([uri]).is_empty())
    }

    /// Every entry accepted at or after `since`, grouped by namespace.
    pub fn bulk_export(&self, since: Timestamp) -> Result<Vec<NamespaceEntries>> {
        let mut batches = Vec::new();
        for namespace in self.ctx.store.namespaces_since(since)? {
            let entries = self
                .ctx
                .store
                .entries_since(&namespace, since)?
                .collect::<Result<Vec<_>>>()?;
            if !entries.is_empty() {
                batches.push(NamespaceEntries { namespace, entries });
            }
        }
        debug!("Exported {} namespace(s) since {}", batches.len(), since);
        Ok(batches)
    }

    /// With `since`, answers `None` unless the stored value is strictly newer.
    pub fn local_get(
        &self,
        namespace: &str,
        key: &str,
        since: Option<Timestamp>,
    ) -> Result<Option<VersionedValue>> {
        let value = self.ctx.store.get(namespace, key)?;
        Ok(match (value, since) {
            (Some(v), Some(hint)) if v.timestamp <= hint => None,
            (value, _) => value,
        })
    }

    pub fn local_put(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
        timestamp: Timestamp,
    ) -> Result<PutAck> {
        match self
            .ctx
            .store
            .put_if_newer(namespace, key, value, Some(timestamp))?
        {
            PutOutcome::Accepted(timestamp) => Ok(PutAck::Accepted { timestamp }),
            PutOutcome::Rejected { stored } => {
                debug!(
                    "Rejected peer put of {}/{}@{}, stored {}",
                    namespace, key, timestamp, stored
                );
                Ok(PutAck::Stale)
            }
        }
    }

    /// Returns the current friends and then adds the caller, so the caller
    /// never sees itself in the answer.
    pub fn friends(&self, caller: Option<&str>) -> Result<Vec<PeerUri>> {
        let friends = self.list_peers();
        if let Some(caller) = caller {
            let caller = validate_peer_uri(caller)?;
            self.ctx.registry.add([caller]);
        }
        Ok(friends)
    }
}

pub fn validate_peer_uri(uri: &str) -> Result<PeerUri> {
    let normalized = normalize_uri(uri);
    let parsed = reqwest::Url::parse(&normalized).map_err(|e| Error::InvalidPeerUri {
        uri: uri.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::InvalidPeerUri {
            uri: uri.to_string(),
            reason: format!("unsupported scheme {}", parsed.scheme()),
        });
    }
    Ok(normalized)
}
