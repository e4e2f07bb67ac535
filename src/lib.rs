//! Replicated Key-Value Cluster Library
//!
//! This library crate defines the coordination layer of a sharded, replicated
//! key-value service. It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! - **`cluster`**: Static topology, jump consistent hash sharding and the per-peer
//!   circuit breaker.
//! - **`config`**: Tuning constants and the `ServiceConfig` a node is started from.
//! - **`range`**: Chunked streaming of key ranges from the local store.
//! - **`replication`**: The inter-node proxy and the quorum coordinator that resolves
//!   conflicts by last-writer-wins.
//! - **`server`**: HTTP routing, the bounded LIFO request dispatcher and the node lifecycle.
//! - **`storage`**: The storage engine seam, the bundled ordered in-memory engine and the
//!   timestamped envelope replicas exchange.

pub mod cluster;
pub mod config;
pub mod range;
pub mod replication;
pub mod server;
pub mod storage;
