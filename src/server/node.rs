use anyhow::{Context, Result};
use axum::{Router, extract::Extension, middleware, routing::any};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::dispatcher::Dispatcher;
use super::handlers::{admit, handle_default, handle_entity, handle_range, handle_replica};
use crate::cluster::breaker::CircuitBreaker;
use crate::cluster::types::Topology;
use crate::config::ServiceConfig;
use crate::range::streamer::RangeStreamer;
use crate::replication::background::BackgroundTasks;
use crate::replication::coordinator::ReplicationCoordinator;
use crate::replication::protocol::{ENDPOINT_ENTITY, ENDPOINT_RANGE, ENDPOINT_REPLICA};
use crate::replication::proxy::RemoteProxy;
use crate::storage::engine::StorageEngine;

/// Builds the HTTP surface of a node. Every route, the fallback included,
/// is admitted through `dispatcher`.
pub fn router(
    coordinator: Arc<ReplicationCoordinator>,
    streamer: Arc<RangeStreamer>,
    dispatcher: Dispatcher,
) -> Router {
    Router::new()
        .route(ENDPOINT_ENTITY, any(handle_entity))
        .route(ENDPOINT_REPLICA, any(handle_replica))
        .route(ENDPOINT_RANGE, any(handle_range))
        .fallback(handle_default)
        .layer(Extension(coordinator))
        .layer(Extension(streamer))
        .layer(Extension(dispatcher.clone()))
        .layer(middleware::from_fn_with_state(dispatcher, admit))
}

/// A running cluster node.
pub struct Server {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    serve_task: JoinHandle<std::io::Result<()>>,
    coordinator: Arc<ReplicationCoordinator>,
    dispatcher: Dispatcher,
    background: Arc<BackgroundTasks>,
    grace: Duration,
}

impl Server {
    /// Binds `config.bind_addr` and starts serving.
    pub async fn start(config: ServiceConfig, store: Arc<dyn StorageEngine>) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
        Self::start_with_listener(config, store, listener)
    }

    /// Starts serving on an already bound listener.
    pub fn start_with_listener(
        config: ServiceConfig,
        store: Arc<dyn StorageEngine>,
        listener: TcpListener,
    ) -> Result<Self> {
        let topology = Arc::new(Topology::new(config.cluster_urls.clone(), &config.self_url)?);
        let breaker = Arc::new(CircuitBreaker::new(
            topology.size(),
            config.max_fails,
            config.probe_interval,
        ));
        let background = Arc::new(BackgroundTasks::new());
        let proxy = Arc::new(RemoteProxy::new(
            topology.clone(),
            breaker.clone(),
            background.clone(),
            config.proxy_timeout,
        )?);
        let coordinator = Arc::new(ReplicationCoordinator::new(
            topology.clone(),
            breaker,
            proxy,
            store.clone(),
        ));
        let streamer = Arc::new(RangeStreamer::new(store, config.chunk_size));
        let dispatcher = Dispatcher::new(config.dispatcher.clone());

        let app = router(coordinator.clone(), streamer, dispatcher.clone());
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let serve_task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        tracing::info!(
            "Node {} (shard {} of {}) listening on {}",
            config.self_url,
            topology.local_index(),
            topology.size(),
            local_addr
        );

        Ok(Self {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            serve_task,
            coordinator,
            dispatcher,
            background,
            grace: config.shutdown_grace,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn coordinator(&self) -> &Arc<ReplicationCoordinator> {
        &self.coordinator
    }

    /// Stops accepting connections, waits up to the shutdown grace for
    /// in-flight requests and then tears down the worker pool and any
    /// detached replica calls.
    pub async fn stop(mut self) {
        tracing::info!("Stopping node on {}", self.local_addr);
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        match tokio::time::timeout(self.grace, &mut self.serve_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::error!("HTTP server failed: {}", e),
            Ok(Err(e)) => tracing::error!("HTTP server task failed: {}", e),
            Err(_) => {
                tracing::warn!("Connections still open after {:?}, closing", self.grace);
                self.serve_task.abort();
            }
        }

        self.dispatcher.shutdown(self.grace).await;
        self.background.drain(self.grace).await;
        tracing::info!("Node on {} stopped", self.local_addr);
    }
}
