use crate::context::NodeContext;
use crate::error::{Error, Result};
use crate::quorum::{PendingOp, QuorumOp};
use crate::types::{lww_merge, VersionedValue};
use std::sync::Arc;
use tracing::{debug, warn};

/// Quorum GET seeded with the local value.
///
/// Peers are queried in random order with the local timestamp as a hint;
/// a peer result only replaces the seed when it is strictly fresher. When
/// the quorum is missed the local value is returned as is.
pub async fn replicated_read(
    ctx: &NodeContext,
    namespace: &str,
    key: &str,
) -> Result<Option<VersionedValue>> {
    let local = ctx.store.get(namespace, key)?;
    let peers = ctx.registry.shuffled();
    if peers.is_empty() {
        return Ok(local);
    }

    let (fanout, quorum) = ctx.replication.read_plan(peers.len());
    let hint = local.as_ref().map(|v| v.timestamp);

    let op = Arc::new(
        QuorumOp::new(quorum, fanout, local.clone(), lww_merge)?
            .on_peer_failure(ctx.failure_handler()),
    );

    let ops = peers
        .into_iter()
        .take(fanout)
        .map(|peer| {
            let connector = ctx.connector.clone();
            let evictions = ctx.evictions.clone();
            let namespace = namespace.to_string();
            let key = key.to_string();
            PendingOp::new(peer.clone(), async move {
                let result = connector.get(&peer, &namespace, &key, hint).await;
                if result.is_ok() {
                    evictions.record_success(&peer);
                }
                result
            })
        })
        .collect();
    op.attach(ops)?;

    let outcome = op.wait_timeout(ctx.replication.quorum_timeout()).await;
    op.cancel();

    match outcome {
        Ok(merged) => {
            debug!(
                "Read {}/{} reached quorum {}/{}",
                namespace, key, quorum, fanout
            );
            Ok(merged)
        }
        Err(Error::QuorumNotReached { reached, required }) => {
            warn!(
                "Read quorum not reached for {}/{} ({}/{}), using local value",
                namespace, key, reached, required
            );
            Ok(local)
        }
        Err(e) => Err(e),
    }
}
