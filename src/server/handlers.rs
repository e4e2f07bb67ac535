use axum::{
    extract::{Extension, Query, Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use std::sync::Arc;

use super::dispatcher::{DispatchError, Dispatcher};
use crate::config::STREAM_BUFFER_CHUNKS;
use crate::range::streamer::{RangeQuery, RangeStreamer, chunked_response, forward_chunks};
use crate::replication::coordinator::{ClientOp, CoordinatorReply, ReplicationCoordinator};
use crate::replication::error::CoordinatorError;
use crate::replication::protocol::{EntityQuery, ReplicaQuery};
use crate::storage::envelope::StoredEnvelope;
use crate::storage::replica::{apply_envelope, read_envelope};

fn method_not_allowed(method: &Method) -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        format!("Method {} is not supported", method),
    )
        .into_response()
}

fn dispatch_failed(e: DispatchError) -> Response {
    let status = match e {
        DispatchError::Overloaded | DispatchError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::Abandoned => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string()).into_response()
}

/// Admission middleware: every request runs on the dispatcher's workers.
pub async fn admit(State(dispatcher): State<Dispatcher>, request: Request, next: Next) -> Response {
    match dispatcher.execute(next.run(request)).await {
        Ok(response) => response,
        Err(e) => dispatch_failed(e),
    }
}

/// `/v0/entity`: replicated single-key access.
pub async fn handle_entity(
    Extension(coordinator): Extension<Arc<ReplicationCoordinator>>,
    method: Method,
    Query(query): Query<EntityQuery>,
    body: Bytes,
) -> Response {
    let op = match method {
        Method::GET => ClientOp::Get,
        Method::PUT => ClientOp::Put(body),
        Method::DELETE => ClientOp::Delete,
        other => return method_not_allowed(&other),
    };

    let result = coordinator
        .execute(
            op,
            query.id.as_deref(),
            query.ack.as_deref(),
            query.from.as_deref(),
        )
        .await;

    match result {
        Ok(CoordinatorReply::Found(value)) => (StatusCode::OK, value).into_response(),
        Ok(CoordinatorReply::NotFound) => (
            StatusCode::NOT_FOUND,
            format!("Can't find any value for id {}", query.id.unwrap_or_default()),
        )
            .into_response(),
        Ok(CoordinatorReply::Created) => StatusCode::CREATED.into_response(),
        Ok(CoordinatorReply::Accepted) => StatusCode::ACCEPTED.into_response(),
        Err(e) => {
            tracing::debug!("{} {:?} failed: {}", method, query.id, e);
            e.into_response()
        }
    }
}

/// `/v1/entity`: the local replica, addressed by peers only.
///
/// GET answers with the stored envelope (tombstones included) so the
/// coordinator can resolve conflicts; PUT and DELETE apply an envelope
/// under the last-writer-wins rule.
pub async fn handle_replica(
    Extension(coordinator): Extension<Arc<ReplicationCoordinator>>,
    method: Method,
    Query(query): Query<ReplicaQuery>,
    body: Bytes,
) -> Response {
    let Some(key) = query.id.filter(|id| !id.is_empty()) else {
        return CoordinatorError::MissingId.into_response();
    };
    let store = coordinator.store();

    match method {
        Method::GET => match read_envelope(store.as_ref(), &key) {
            Ok(Some(envelope)) => match envelope.encode() {
                Ok(encoded) => (StatusCode::OK, encoded).into_response(),
                Err(e) => {
                    tracing::error!("Failed to encode envelope for {}: {}", key, e);
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            },
            Ok(None) => StatusCode::NOT_FOUND.into_response(),
            Err(e) => {
                tracing::error!("Failed to read replica {}: {:#}", key, e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
            }
        },
        Method::PUT | Method::DELETE => {
            let envelope = match StoredEnvelope::decode(&body) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!("Rejected replica {} {}: {}", method, key, e);
                    return CoordinatorError::from(e).into_response();
                }
            };
            match apply_envelope(store.as_ref(), &key, &envelope) {
                Ok(_) if method == Method::PUT => StatusCode::CREATED.into_response(),
                Ok(_) => StatusCode::ACCEPTED.into_response(),
                Err(e) => {
                    tracing::error!("Failed to apply replica {}: {:#}", key, e);
                    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
                }
            }
        }
        other => method_not_allowed(&other),
    }
}

/// `/v0/entities?start=<key>[&end=<key>]`
///
/// The scan itself is a second dispatcher job that holds its worker until
/// the body is fully produced, so streaming counts against the pool.
pub async fn handle_range(
    Extension(streamer): Extension<Arc<RangeStreamer>>,
    Extension(dispatcher): Extension<Dispatcher>,
    method: Method,
    Query(query): Query<RangeQuery>,
) -> Response {
    if method != Method::GET {
        return method_not_allowed(&method);
    }

    let chunks = match streamer.scan(&query) {
        Ok(chunks) => chunks,
        Err(e) => {
            tracing::debug!("Rejected range scan {:?}: {}", query, e);
            return e.into_response();
        }
    };

    let (tx, response) = chunked_response(STREAM_BUFFER_CHUNKS);
    if let Err(e) = dispatcher.submit(forward_chunks(chunks, tx)) {
        return dispatch_failed(e);
    }
    response
}

pub async fn handle_default() -> (StatusCode, &'static str) {
    (StatusCode::BAD_REQUEST, "Incorrect request path")
}
