mod worker;

pub use worker::*;

use crate::context::NodeContext;
use crate::error::{Error, Result};
use crate::types::{NamespaceEntries, PutOutcome, Timestamp};
use std::future::Future;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub since: Timestamp,
    pub namespaces: usize,
    pub applied: usize,
    pub stale: usize,
}

/// Catch-up pulls shared by the initial and continuous sync workers.
#[derive(Clone)]
pub struct AntiEntropy {
    ctx: NodeContext,
}

impl AntiEntropy {
    pub fn new(ctx: NodeContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &NodeContext {
        &self.ctx
    }

    /// Announces this node to `peer` and adds the peer's friends to the
    /// registry. Returns the newly learned peers.
    pub async fn exchange_friends(&self, peer: &str) -> Result<Vec<String>> {
        let friends = self
            .bounded(peer, self.ctx.connector.friends(peer, Some(self.ctx.self_uri())))
            .await?;
        debug!("Peer {} reported {} friend(s)", peer, friends.len());
        Ok(self.ctx.registry.add(friends))
    }

    pub async fn fetch(&self, peer: &str, since: Timestamp) -> Result<Vec<NamespaceEntries>> {
        self.bounded(peer, self.ctx.connector.bulk_data(peer, since))
            .await
    }

    /// Stale entries are counted, never treated as errors.
    pub fn apply(&self, since: Timestamp, batches: &[NamespaceEntries]) -> Result<SyncReport> {
        let mut report = SyncReport {
            since,
            namespaces: batches.len(),
            ..Default::default()
        };
        for batch in batches {
            for entry in &batch.entries {
                match self.ctx.store.put_if_newer(
                    &batch.namespace,
                    &entry.key,
                    &entry.value,
                    Some(entry.timestamp),
                )? {
                    PutOutcome::Accepted(_) => report.applied += 1,
                    PutOutcome::Rejected { .. } => report.stale += 1,
                }
            }
        }
        Ok(report)
    }

    async fn bounded<T, F>(&self, peer: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = self.ctx.sync.timeout();
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::unreachable(
                peer,
                format!("timed out after {:?}", timeout),
            )),
        }
    }
}
