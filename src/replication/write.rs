use crate::context::NodeContext;
use crate::error::{Error, Result};
use crate::quorum::{PendingOp, QuorumOp};
use crate::types::{now_millis, PutAck, PutOutcome, Timestamp, WriteReceipt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Local put-if-newer followed by best-effort quorum replication.
///
/// A stale local write fails with [`Error::StaleWrite`] and is never
/// replicated. Once accepted locally the write stands even if every
/// replication round misses its quorum.
pub async fn replicated_write(
    ctx: &NodeContext,
    namespace: &str,
    key: &str,
    value: &str,
    timestamp: Option<Timestamp>,
) -> Result<WriteReceipt> {
    let attempted = timestamp.unwrap_or_else(now_millis);
    let timestamp = match ctx
        .store
        .put_if_newer(namespace, key, value, Some(attempted))?
    {
        PutOutcome::Accepted(ts) => ts,
        PutOutcome::Rejected { stored } => {
            info!(
                "Ignoring put of {}/{}: timestamp {} is not newer than {}",
                namespace, key, attempted, stored
            );
            return Err(Error::StaleWrite { stored, attempted });
        }
    };

    let replicated = replicate(ctx, namespace, key, value, timestamp).await;
    Ok(WriteReceipt {
        timestamp,
        replicated,
    })
}

/// Runs up to `write_retry_rounds` fan-out rounds, reshuffling peers each
/// round. Returns whether any round reached its quorum.
pub async fn replicate(
    ctx: &NodeContext,
    namespace: &str,
    key: &str,
    value: &str,
    timestamp: Timestamp,
) -> bool {
    let rounds = ctx.replication.write_retry_rounds.max(1);

    for round in 1..=rounds {
        let peers = ctx.registry.shuffled();
        if peers.is_empty() {
            debug!("No peers to replicate {}/{} to", namespace, key);
            return false;
        }

        let (fanout, quorum) = ctx.replication.write_plan(peers.len());
        match replicate_round(ctx, &peers[..fanout], quorum, namespace, key, value, timestamp)
            .await
        {
            Ok(acks) => {
                info!(
                    "Replicated {}/{}@{} to {} peer(s) in round {}",
                    namespace, key, timestamp, acks, round
                );
                return true;
            }
            Err(e) => {
                warn!(
                    "Replication round {}/{} for {}/{} failed: {}",
                    round, rounds, namespace, key, e
                );
            }
        }
    }

    warn!(
        "Replication of {}/{} incomplete after {} round(s), keeping local write",
        namespace, key, rounds
    );
    false
}

async fn replicate_round(
    ctx: &NodeContext,
    peers: &[String],
    quorum: usize,
    namespace: &str,
    key: &str,
    value: &str,
    timestamp: Timestamp,
) -> Result<usize> {
    let op = Arc::new(
        QuorumOp::new(quorum, peers.len(), 0usize, |acks: &usize, _: &PutAck| acks + 1)?
            .on_peer_failure(ctx.failure_handler()),
    );

    let ops = peers
        .iter()
        .map(|peer| {
            let connector = ctx.connector.clone();
            let evictions = ctx.evictions.clone();
            let peer = peer.clone();
            let namespace = namespace.to_string();
            let key = key.to_string();
            let value = value.to_string();
            PendingOp::new(peer.clone(), async move {
                let result = connector
                    .put(&peer, &namespace, &key, &value, timestamp)
                    .await;
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
    outcome
}
