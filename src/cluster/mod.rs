//! Cluster Topology Module
//!
//! Static membership, key placement and peer health.
//!
//! ## Core Concepts
//! - **Topology**: the member list fixed at startup; a member's position is its shard index.
//! - **Sharding**: `JumpHashSharder` maps a key to its primary shard and to an ordered replica set.
//! - **Fault Isolation**: `CircuitBreaker` counts consecutive failures per node and fails fast once a peer is deemed down.

pub mod breaker;
pub mod sharder;
pub mod types;
