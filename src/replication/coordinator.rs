//! Replication Coordinator
//!
//! Drives one client request through `INIT -> FANNED_OUT -> {QUORUM_MET | QUORUM_FAILED}`:
//! 1. **Init**: validate `ack`/`from`, compute the replica set and, for writes,
//!    wrap the body in a timestamped `StoredEnvelope`.
//! 2. **Fan-out**: remote replicas are called concurrently through the proxy
//!    (or short-circuited when their circuit is open); the local replica is
//!    served straight from the storage engine.
//! 3. **Decide**: outcomes are folded as they arrive and the handler returns
//!    the moment the quorum is decided. Remaining calls keep running in the
//!    background so the breaker stays accurate.

use bytes::Bytes;
use reqwest::Method;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::error::CoordinatorError;
use super::proxy::{RemoteProxy, ReplicaRequest};
use super::quorum::{
    QuorumContext, QuorumMerge, QuorumParams, ReadQuorum, ReplicaOutcome, Verdict, WriteQuorum,
};
use crate::cluster::breaker::CircuitBreaker;
use crate::cluster::sharder::JumpHashSharder;
use crate::cluster::types::Topology;
use crate::storage::engine::StorageEngine;
use crate::storage::envelope::{StoredEnvelope, Timestamper};
use crate::storage::replica::{apply_envelope, read_envelope};

/// A client-facing single-key operation.
#[derive(Debug, Clone)]
pub enum ClientOp {
    Get,
    Put(Bytes),
    Delete,
}

/// Successful end states of a coordinated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorReply {
    Found(Bytes),
    NotFound,
    Created,
    Accepted,
}

/// The local half of a replicated operation.
enum LocalOp {
    Read,
    Write(StoredEnvelope),
}

pub struct ReplicationCoordinator {
    topology: Arc<Topology>,
    sharder: JumpHashSharder,
    breaker: Arc<CircuitBreaker>,
    proxy: Arc<RemoteProxy>,
    store: Arc<dyn StorageEngine>,
    clock: Timestamper,
}

impl ReplicationCoordinator {
    pub fn new(
        topology: Arc<Topology>,
        breaker: Arc<CircuitBreaker>,
        proxy: Arc<RemoteProxy>,
        store: Arc<dyn StorageEngine>,
    ) -> Self {
        let sharder = JumpHashSharder::new(topology.size());
        Self {
            topology,
            sharder,
            breaker,
            proxy,
            store,
            clock: Timestamper::new(),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn store(&self) -> &Arc<dyn StorageEngine> {
        &self.store
    }

    /// Executes `op` on the replica set of `id`.
    ///
    /// Parameter and serialization errors are returned before any replica is
    /// contacted.
    pub async fn execute(
        &self,
        op: ClientOp,
        id: Option<&str>,
        ack: Option<&str>,
        from: Option<&str>,
    ) -> Result<CoordinatorReply, CoordinatorError> {
        let key = match id {
            Some(key) if !key.is_empty() => key,
            _ => return Err(CoordinatorError::MissingId),
        };
        let params = QuorumParams::resolve(ack, from, self.topology.size())?;
        let shards = self.sharder.shard_list(key, params.from);

        match op {
            ClientOp::Get => {
                let request = ReplicaRequest::read(key);
                let latest = self
                    .fan_out(key, &shards, request, LocalOp::Read, ReadQuorum::new(params))
                    .await?;
                Ok(match latest.and_then(|envelope| envelope.value) {
                    Some(value) => CoordinatorReply::Found(Bytes::from(value)),
                    None => CoordinatorReply::NotFound,
                })
            }
            ClientOp::Put(body) => {
                let envelope = StoredEnvelope::value(self.clock.next(), body.to_vec());
                self.write(key, &shards, Method::PUT, envelope, params).await?;
                Ok(CoordinatorReply::Created)
            }
            ClientOp::Delete => {
                let envelope = StoredEnvelope::tombstone(self.clock.next());
                self.write(key, &shards, Method::DELETE, envelope, params).await?;
                Ok(CoordinatorReply::Accepted)
            }
        }
    }

    async fn write(
        &self,
        key: &str,
        shards: &[usize],
        method: Method,
        envelope: StoredEnvelope,
        params: QuorumParams,
    ) -> Result<(), CoordinatorError> {
        let encoded = Bytes::from(envelope.encode()?);
        let request = ReplicaRequest::write(method, key, encoded);
        self.fan_out(key, shards, request, LocalOp::Write(envelope), WriteQuorum::new(params))
            .await
    }

    async fn fan_out<M: QuorumMerge>(
        &self,
        key: &str,
        shards: &[usize],
        request: ReplicaRequest,
        local_op: LocalOp,
        merge: M,
    ) -> Result<M::Output, CoordinatorError> {
        let mut context = QuorumContext::new(merge);
        let (reply_tx, mut reply_rx) = mpsc::channel(shards.len().max(1));
        let mut local_shard = false;

        for &shard in shards {
            if self.topology.is_local(shard) {
                local_shard = true;
                continue;
            }
            if !self.breaker.is_working(shard) {
                tracing::debug!("Skipping shard {} for {}: circuit open", shard, key);
                if let Some(verdict) = context.offer(ReplicaOutcome::Failed) {
                    return self.conclude(key, verdict);
                }
                continue;
            }
            self.proxy.forward_detached(shard, request.clone(), reply_tx.clone());
        }
        drop(reply_tx);

        if local_shard {
            let outcome = self.local(key, &local_op);
            if let Some(verdict) = context.offer(outcome) {
                return self.conclude(key, verdict);
            }
        }

        while let Some((shard, outcome)) = reply_rx.recv().await {
            let outcome = context.interpret(outcome);
            tracing::trace!("Shard {} answered {:?} for {}", shard, outcome, key);
            if let Some(verdict) = context.offer(outcome) {
                return self.conclude(key, verdict);
            }
        }

        // Every replica reports exactly once, so the merge always decides
        // before the channel closes.
        tracing::error!(
            "Quorum for {} undecided after {} responses",
            key,
            context.responses()
        );
        Err(CoordinatorError::QuorumUnreachable {
            ack: context.required(),
            usable: 0,
        })
    }

    fn local(&self, key: &str, op: &LocalOp) -> ReplicaOutcome {
        let store = self.store.as_ref();
        match op {
            LocalOp::Read => match read_envelope(store, key) {
                Ok(Some(envelope)) => ReplicaOutcome::Found(envelope),
                Ok(None) => ReplicaOutcome::Missing,
                Err(e) => {
                    tracing::error!("Local read of {} failed: {:#}", key, e);
                    ReplicaOutcome::Failed
                }
            },
            LocalOp::Write(envelope) => match apply_envelope(store, key, envelope) {
                Ok(_) => ReplicaOutcome::Stored,
                Err(e) => {
                    tracing::error!("Local write of {} failed: {:#}", key, e);
                    ReplicaOutcome::Failed
                }
            },
        }
    }

    fn conclude<T>(&self, key: &str, verdict: Verdict<T>) -> Result<T, CoordinatorError> {
        match verdict {
            Verdict::Met(output) => Ok(output),
            Verdict::Unreachable { usable, required } => {
                tracing::warn!(
                    "Quorum unreachable for {}: {} of {} required replicas usable",
                    key,
                    usable,
                    required
                );
                Err(CoordinatorError::QuorumUnreachable {
                    ack: required,
                    usable,
                })
            }
        }
    }
}
