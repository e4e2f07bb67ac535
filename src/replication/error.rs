use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::storage::envelope::EnvelopeError;

/// Failures a coordinated request can surface to the client.
///
/// Individual peer failures never appear here; they are folded into quorum
/// accounting and only show up as `QuorumUnreachable`.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Id can not be null or empty!")]
    MissingId,
    #[error("Parameter {name} must be a positive integer, got {value:?}")]
    MalformedParam { name: &'static str, value: String },
    #[error("Expected 1 <= ack <= from <= {cluster_size}, got ack={ack} from={from}")]
    InvalidQuorum {
        ack: usize,
        from: usize,
        cluster_size: usize,
    },
    #[error(transparent)]
    MalformedEnvelope(#[from] EnvelopeError),
    #[error("Not enough replicas: {usable} of {ack} required answered")]
    QuorumUnreachable { ack: usize, usable: usize },
}

impl CoordinatorError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingId
            | Self::MalformedParam { .. }
            | Self::InvalidQuorum { .. }
            | Self::MalformedEnvelope(_) => StatusCode::BAD_REQUEST,
            Self::QuorumUnreachable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
