//! Node Configuration
//!
//! Tuning constants and the `ServiceConfig` handed to `Server::start` by the
//! bootstrap. Membership is static: the list of node URLs is fixed at startup
//! and its order defines the canonical shard indices.

use std::net::SocketAddr;
use std::time::Duration;

use crate::cluster::types::NodeAddress;

/// Consecutive failures after which a peer's circuit opens.
pub const MAX_FAILS: u32 = 100;
/// Byte bound of a single range-scan chunk.
pub const CHUNK_SIZE: usize = 1000;
/// Separator between key and value (and between records) in range scans.
pub const SEPARATOR: &[u8] = b"\n";
/// Chunks a range scan may run ahead of the client.
pub const STREAM_BUFFER_CHUNKS: usize = 4;

pub const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(1);
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Sizing of the request worker pool.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Workers that live for the whole process.
    pub core_workers: usize,
    /// Upper bound on workers, surge workers included.
    pub max_workers: usize,
    /// Capacity of the LIFO work buffer.
    pub queue_capacity: usize,
    /// Idle time after which a surge worker exits.
    pub keep_alive: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            core_workers: (cpus / 2).max(1),
            max_workers: cpus,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    /// URL under which the other members reach this node.
    pub self_url: NodeAddress,
    /// Every member of the cluster, this node included, in shard order.
    pub cluster_urls: Vec<NodeAddress>,
    pub max_fails: u32,
    pub probe_interval: Duration,
    pub proxy_timeout: Duration,
    pub chunk_size: usize,
    pub dispatcher: DispatcherConfig,
    pub shutdown_grace: Duration,
}

impl ServiceConfig {
    pub fn new(bind_addr: SocketAddr, self_url: NodeAddress, cluster_urls: Vec<NodeAddress>) -> Self {
        Self {
            bind_addr,
            self_url,
            cluster_urls,
            max_fails: MAX_FAILS,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            proxy_timeout: DEFAULT_PROXY_TIMEOUT,
            chunk_size: CHUNK_SIZE,
            dispatcher: DispatcherConfig::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}
