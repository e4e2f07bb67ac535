//! Per-node Circuit Breaker
//!
//! Each node has an independent failure counter. Once it reaches `max_fails`
//! the circuit is open and callers skip the node. After `probe_interval` a
//! single caller is let through as a half-open probe: its success closes the
//! circuit, its failure re-opens it for another interval.
//!
//! State is a pair of atomics per node, so handlers on any worker can report
//! outcomes without a shared lock.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct NodeHealth {
    failures: AtomicU32,
    /// Milliseconds since `epoch` before which no probe is admitted.
    retry_at_ms: AtomicU64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    nodes: Vec<NodeHealth>,
    max_fails: u32,
    probe_interval: Duration,
    epoch: Instant,
}

impl CircuitBreaker {
    /// # Arguments
    /// * `cluster_size`: one counter is allocated per shard index.
    /// * `max_fails`: consecutive failures that open the circuit (at least 1).
    /// * `probe_interval`: how long an open circuit waits before admitting a probe.
    pub fn new(cluster_size: usize, max_fails: u32, probe_interval: Duration) -> Self {
        Self {
            nodes: (0..cluster_size).map(|_| NodeHealth::default()).collect(),
            max_fails: max_fails.max(1),
            probe_interval,
            epoch: Instant::now(),
        }
    }

    /// Whether a call to `node` should be attempted.
    ///
    /// For an open circuit whose probe interval has elapsed, exactly one
    /// caller receives `true`; concurrent callers keep seeing `false` until
    /// that probe reports back or another interval passes.
    pub fn is_working(&self, node: usize) -> bool {
        let health = &self.nodes[node];
        if health.failures.load(Ordering::Acquire) < self.max_fails {
            return true;
        }

        let now = self.now_ms();
        let retry_at = health.retry_at_ms.load(Ordering::Acquire);
        if now < retry_at {
            return false;
        }

        let admitted = health
            .retry_at_ms
            .compare_exchange(retry_at, now + self.probe_ms(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if admitted {
            tracing::info!("Circuit half-open for shard {}, sending probe", node);
        }
        admitted
    }

    pub fn fail(&self, node: usize) {
        let health = &self.nodes[node];
        let previous = health
            .failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_add(1))
            })
            .unwrap_or(u32::MAX);
        let failures = previous.saturating_add(1);

        if failures >= self.max_fails {
            health
                .retry_at_ms
                .store(self.now_ms() + self.probe_ms(), Ordering::Release);
            if failures == self.max_fails {
                tracing::warn!("Circuit opened for shard {} after {} failures", node, failures);
            }
        }
    }

    pub fn success(&self, node: usize) {
        let previous = self.nodes[node].failures.swap(0, Ordering::AcqRel);
        if previous >= self.max_fails {
            tracing::info!("Circuit closed for shard {}", node);
        }
    }

    pub fn failure_count(&self, node: usize) -> u32 {
        self.nodes[node].failures.load(Ordering::Acquire)
    }

    pub fn max_fails(&self) -> u32 {
        self.max_fails
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn probe_ms(&self) -> u64 {
        self.probe_interval.as_millis() as u64
    }
}
