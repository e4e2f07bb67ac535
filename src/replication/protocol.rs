//! Replication Network Protocol
//!
//! Endpoint paths and query parameter DTOs shared by the client-facing
//! handlers and the inter-node proxy.
//!
//! Inter-node PUT/DELETE bodies are always an encoded `StoredEnvelope`,
//! never the raw client value.

use serde::Deserialize;

// --- API Endpoints ---

/// Public single-key endpoint; requests are routed and replicated.
pub const ENDPOINT_ENTITY: &str = "/v0/entity";
/// Node-internal endpoint operating on the local store only.
pub const ENDPOINT_REPLICA: &str = "/v1/entity";
/// Node-internal streaming range scan over the local store.
pub const ENDPOINT_RANGE: &str = "/v0/entities";

// --- Query Parameters ---

/// `?id=<key>[&ack=<int>&from=<int>]`
///
/// Kept as raw strings so malformed numbers surface as our own client
/// errors rather than extractor rejections.
#[derive(Debug, Default, Deserialize)]
pub struct EntityQuery {
    pub id: Option<String>,
    pub ack: Option<String>,
    pub from: Option<String>,
}

/// `?id=<key>`
#[derive(Debug, Default, Deserialize)]
pub struct ReplicaQuery {
    pub id: Option<String>,
}
