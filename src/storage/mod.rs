//! Local Storage Module
//!
//! The seam to the node's persistent key-value store and the replicated value format.
//!
//! ## Core Concepts
//! - **Engine**: `StorageEngine` is the external store (`get`, `upsert`, `range`); `MemoryStore` is the bundled ordered implementation.
//! - **Envelope**: `StoredEnvelope` is what replicas actually store: value bytes or a tombstone plus the ingress timestamp.
//! - **Replica Ops**: `read_envelope` / `apply_envelope` are the local half of every replicated operation.

pub mod engine;
pub mod envelope;
pub mod replica;
