//! Remote Proxy Client
//!
//! Forwards a replica operation to a peer's node-internal endpoint and turns
//! every result into a definite `ProxyOutcome`. Network errors never escape:
//! they are logged, recorded against the peer's circuit and reported as
//! `Unavailable`.

use anyhow::Result;
use bytes::Bytes;
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::background::BackgroundTasks;
use super::protocol::ENDPOINT_REPLICA;
use crate::cluster::breaker::CircuitBreaker;
use crate::cluster::types::Topology;

/// An operation against a peer's local store.
#[derive(Debug, Clone)]
pub struct ReplicaRequest {
    pub method: Method,
    pub key: String,
    /// Encoded envelope for writes, empty for reads.
    pub body: Bytes,
}

impl ReplicaRequest {
    pub fn read(key: &str) -> Self {
        Self {
            method: Method::GET,
            key: key.to_string(),
            body: Bytes::new(),
        }
    }

    pub fn write(method: Method, key: &str, envelope: Bytes) -> Self {
        Self {
            method,
            key: key.to_string(),
            body: envelope,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyOutcome {
    /// The peer answered with something other than "overloaded".
    Response { status: StatusCode, body: Bytes },
    /// Network failure or an overloaded peer.
    Unavailable,
}

pub struct RemoteProxy {
    client: reqwest::Client,
    topology: Arc<Topology>,
    breaker: Arc<CircuitBreaker>,
    background: Arc<BackgroundTasks>,
}

impl RemoteProxy {
    pub fn new(
        topology: Arc<Topology>,
        breaker: Arc<CircuitBreaker>,
        background: Arc<BackgroundTasks>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            topology,
            breaker,
            background,
        })
    }

    /// Sends `request` to shard `node` and waits for the outcome.
    pub async fn forward(&self, node: usize, request: &ReplicaRequest) -> ProxyOutcome {
        let url = format!("{}{}", self.topology.node(node), ENDPOINT_REPLICA);

        let response = self
            .client
            .request(request.method.clone(), &url)
            .query(&[("id", request.key.as_str())])
            .body(request.body.clone())
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Failed to request to shard {}: {}", url, e);
                return self.fail(node);
            }
        };

        let status = response.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            tracing::warn!("Shard {} is overloaded", url);
            return self.fail(node);
        }

        match response.bytes().await {
            Ok(body) => {
                self.breaker.success(node);
                ProxyOutcome::Response { status, body }
            }
            Err(e) => {
                tracing::error!("Failed to read response from shard {}: {}", url, e);
                self.fail(node)
            }
        }
    }

    /// Starts `request` on the background pool; the outcome is delivered on
    /// `reply` tagged with the shard index.
    ///
    /// The call runs to completion even if the receiver is dropped, so the
    /// breaker still learns the result.
    pub fn forward_detached(
        self: &Arc<Self>,
        node: usize,
        request: ReplicaRequest,
        reply: mpsc::Sender<(usize, ProxyOutcome)>,
    ) {
        let proxy = self.clone();
        self.background.spawn(async move {
            let outcome = proxy.forward(node, &request).await;
            if reply.send((node, outcome)).await.is_err() {
                tracing::trace!("Late outcome from shard {} discarded", node);
            }
        });
    }

    fn fail(&self, node: usize) -> ProxyOutcome {
        self.breaker.fail(node);
        ProxyOutcome::Unavailable
    }
}
