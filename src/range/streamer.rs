use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::SEPARATOR;
use crate::storage::engine::{Entry, EntryIter, StorageEngine};
use crate::storage::envelope::StoredEnvelope;

/// `?start=<key>[&end=<key>]`
#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RangeError {
    #[error("Start is required")]
    MissingStart,
    #[error("Start must be less than end")]
    EmptyRange,
    #[error("Failed to open range scan: {0}")]
    Storage(#[from] anyhow::Error),
}

impl IntoResponse for RangeError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::MissingStart | Self::EmptyRange => StatusCode::BAD_REQUEST,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Streams `[start, end)` of the local store as chunked records.
pub struct RangeStreamer {
    store: Arc<dyn StorageEngine>,
    chunk_size: usize,
}

impl RangeStreamer {
    pub fn new(store: Arc<dyn StorageEngine>, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Validates the bounds and opens a fresh scan.
    pub fn scan(&self, query: &RangeQuery) -> Result<RecordChunker<EntryIter>, RangeError> {
        let start = query.start.as_deref().ok_or(RangeError::MissingStart)?;
        let end = query.end.as_deref();
        if let Some(end) = end
            && start >= end
        {
            return Err(RangeError::EmptyRange);
        }

        let entries = self.store.range(start.as_bytes(), end.map(str::as_bytes))?;
        Ok(RecordChunker::new(entries, self.chunk_size))
    }
}

/// Sending half of a streamed range body.
pub type ChunkSender = mpsc::Sender<Result<Bytes, std::io::Error>>;

/// A 200 response whose chunked body is fed through the returned sender,
/// buffering at most `buffer` chunks ahead of the client.
pub fn chunked_response(buffer: usize) -> (ChunkSender, Response) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let chunks = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    });
    let response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(chunks),
    )
        .into_response();
    (tx, response)
}

/// Drives the scan into the response body. Returns once the range is
/// exhausted or the client has gone away.
pub async fn forward_chunks(chunks: RecordChunker<EntryIter>, tx: ChunkSender) {
    let mut sent = 0usize;
    for chunk in chunks {
        if tx.send(Ok(chunk)).await.is_err() {
            tracing::debug!("Range client went away after {} chunks", sent);
            return;
        }
        sent += 1;
    }
}

/// Packs live entries as `key SEPARATOR value SEPARATOR` records into chunks
/// of about `limit` bytes.
///
/// A chunk is emitted before a record that would push it past `limit`; a
/// single record larger than `limit` travels alone. Tombstones are skipped.
/// An entry that fails to decode ends the stream after the records already
/// buffered.
pub struct RecordChunker<I> {
    entries: I,
    limit: usize,
    buffer: BytesMut,
    done: bool,
}

impl<I: Iterator<Item = Entry>> RecordChunker<I> {
    pub fn new(entries: I, limit: usize) -> Self {
        Self {
            entries,
            limit,
            buffer: BytesMut::with_capacity(limit),
            done: false,
        }
    }

    fn take_buffer(&mut self) -> Option<Bytes> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer.split().freeze())
        }
    }

    fn append(&mut self, key: &[u8], value: &[u8]) {
        self.buffer.extend_from_slice(key);
        self.buffer.extend_from_slice(SEPARATOR);
        self.buffer.extend_from_slice(value);
        self.buffer.extend_from_slice(SEPARATOR);
    }
}

impl<I: Iterator<Item = Entry>> Iterator for RecordChunker<I> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.done {
            return None;
        }

        while let Some(entry) = self.entries.next() {
            let Some(raw) = entry.value else {
                continue;
            };
            let envelope = match StoredEnvelope::decode(&raw) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::error!(
                        "Truncating range scan at {:?}: {}",
                        String::from_utf8_lossy(&entry.key),
                        e
                    );
                    self.done = true;
                    return self.take_buffer();
                }
            };
            let Some(value) = envelope.value else {
                continue;
            };

            let record_len = entry.key.len() + value.len() + 2 * SEPARATOR.len();
            if !self.buffer.is_empty() && self.buffer.len() + record_len > self.limit {
                let chunk = self.take_buffer();
                self.append(&entry.key, &value);
                return chunk;
            }
            self.append(&entry.key, &value);
            if self.buffer.len() >= self.limit {
                return self.take_buffer();
            }
        }

        self.done = true;
        self.take_buffer()
    }
}
