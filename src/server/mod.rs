//! Node Server Module
//!
//! The HTTP surface of a cluster node and its request execution model.
//!
//! ## Architecture Overview
//! 1. **Admission**: the `admit` middleware hands every request to the `Dispatcher`.
//!    A saturated pool rejects with 503 instead of queueing without bound.
//! 2. **Routing**:
//!    - `/v0/entity` is replicated client access through the `ReplicationCoordinator`.
//!    - `/v1/entity` is the local replica, used by peers.
//!    - `/v0/entities` is the streaming range scan.
//!    - Anything else is answered with 400.
//! 3. **Lifecycle**: `Server::start` wires the node from a `ServiceConfig`; `Server::stop`
//!    shuts down the listener, the worker pool and detached replica calls in that order.
//!
//! ## Submodules
//! - **`dispatcher`**: Bounded LIFO worker pool with surge workers.
//! - **`handlers`**: Axum handlers and the admission middleware.
//! - **`node`**: Router construction and the `Server` lifecycle.

pub mod dispatcher;
pub mod handlers;
pub mod node;
