//! Replication Module
//!
//! Turns a client request into a quorum decision across the key's replica set.
//!
//! ## Core Concepts
//! - **Proxying**: `RemoteProxy` forwards replica operations to peers and reports every outcome to the circuit breaker.
//! - **Quorum**: `QuorumParams` validates `ack`/`from`; `WriteQuorum` and `ReadQuorum` fold outcomes in arrival order.
//! - **Conflict Resolution**: reads resolve by last-writer-wins over envelope timestamps.
//! - **Detached Work**: calls that finish after the decision run on `BackgroundTasks`.

pub mod background;
pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod proxy;
pub mod quorum;

#[cfg(test)]
mod tests;
