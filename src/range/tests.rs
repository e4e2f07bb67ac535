//! Range Module Tests
//!
//! ## Test Scopes
//! - **Validation**: missing start and empty ranges.
//! - **Chunking**: byte bounds, record framing, tombstone skipping and truncation.
//! - **Streaming**: chunks forwarded into a response body through a bounded channel.

#[cfg(test)]
mod tests {
    use crate::range::streamer::{
        RangeError, RangeQuery, RangeStreamer, RecordChunker, chunked_response, forward_chunks,
    };
    use crate::storage::engine::{Entry, EntryIter, MemoryStore, StorageEngine};
    use axum::http::StatusCode;
    use crate::storage::envelope::StoredEnvelope;
    use crate::storage::replica::apply_envelope;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    fn query(start: Option<&str>, end: Option<&str>) -> RangeQuery {
        RangeQuery {
            start: start.map(String::from),
            end: end.map(String::from),
        }
    }

    fn seeded_store(keys: &[&str]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for (i, key) in keys.iter().enumerate() {
            let envelope = StoredEnvelope::value(i as u64 + 1, format!("v-{}", key).into_bytes());
            apply_envelope(store.as_ref(), key, &envelope).unwrap();
        }
        store
    }

    fn joined(chunks: impl Iterator<Item = Bytes>) -> String {
        let mut all = Vec::new();
        for chunk in chunks {
            all.extend_from_slice(&chunk);
        }
        String::from_utf8(all).unwrap()
    }

    // ============================================================
    // VALIDATION TESTS
    // ============================================================

    #[test]
    fn test_missing_start_is_rejected() {
        let streamer = RangeStreamer::new(seeded_store(&[]), 100);

        assert!(matches!(
            streamer.scan(&query(None, Some("z"))),
            Err(RangeError::MissingStart)
        ));
    }

    #[test]
    fn test_start_not_before_end_is_rejected() {
        let streamer = RangeStreamer::new(seeded_store(&[]), 100);

        assert!(matches!(streamer.scan(&query(Some("b"), Some("b"))), Err(RangeError::EmptyRange)));
        assert!(matches!(streamer.scan(&query(Some("c"), Some("b"))), Err(RangeError::EmptyRange)));
    }

    // ============================================================
    // CHUNKING TESTS
    // ============================================================

    #[test]
    fn test_records_are_framed_in_key_order() {
        let streamer = RangeStreamer::new(seeded_store(&["c", "a", "b", "d"]), 1_000);

        let output = joined(streamer.scan(&query(Some("a"), Some("d"))).unwrap());

        assert_eq!(output, "a\nv-a\nb\nv-b\nc\nv-c\n");
    }

    #[test]
    fn test_open_ended_range_reaches_last_key() {
        let streamer = RangeStreamer::new(seeded_store(&["a", "b", "c"]), 1_000);

        let output = joined(streamer.scan(&query(Some("b"), None)).unwrap());

        assert_eq!(output, "b\nv-b\nc\nv-c\n");
    }

    #[test]
    fn test_chunks_respect_byte_limit() {
        let keys: Vec<String> = (0..100).map(|i| format!("key-{:03}", i)).collect();
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let streamer = RangeStreamer::new(seeded_store(&key_refs), 64);

        let chunks: Vec<Bytes> = streamer.scan(&query(Some("key-"), None)).unwrap().collect();

        // Each record is 7 + 1 + 9 + 1 = 18 bytes, so three fit in 64
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|chunk| !chunk.is_empty() && chunk.len() <= 64));
        assert_eq!(chunks.iter().map(Bytes::len).sum::<usize>(), 100 * 18);
    }

    #[test]
    fn test_oversized_record_travels_alone() {
        let store = Arc::new(MemoryStore::new());
        apply_envelope(store.as_ref(), "a", &StoredEnvelope::value(1, b"1".to_vec())).unwrap();
        apply_envelope(store.as_ref(), "b", &StoredEnvelope::value(1, vec![b'x'; 50])).unwrap();
        apply_envelope(store.as_ref(), "c", &StoredEnvelope::value(1, b"3".to_vec())).unwrap();
        let streamer = RangeStreamer::new(store, 10);

        let chunks: Vec<Bytes> = streamer.scan(&query(Some("a"), None)).unwrap().collect();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], Bytes::from_static(b"a\n1\n"));
        assert_eq!(chunks[1].len(), 53);
        assert_eq!(chunks[2], Bytes::from_static(b"c\n3\n"));
    }

    #[test]
    fn test_tombstones_are_skipped() {
        let store = seeded_store(&["a", "b", "c"]);
        apply_envelope(store.as_ref(), "b", &StoredEnvelope::tombstone(100)).unwrap();
        let streamer = RangeStreamer::new(store, 1_000);

        let output = joined(streamer.scan(&query(Some("a"), None)).unwrap());

        assert_eq!(output, "a\nv-a\nc\nv-c\n");
    }

    #[test]
    fn test_empty_range_yields_no_chunks() {
        let streamer = RangeStreamer::new(seeded_store(&["a"]), 1_000);

        assert_eq!(streamer.scan(&query(Some("m"), Some("z"))).unwrap().count(), 0);
    }

    #[test]
    fn test_undecodable_entry_truncates_stream() {
        let store = seeded_store(&["a", "c"]);
        store
            .upsert(Entry {
                key: Bytes::from_static(b"b"),
                value: Some(Bytes::from_static(b"\x01")),
            })
            .unwrap();
        let streamer = RangeStreamer::new(store, 1_000);

        let output = joined(streamer.scan(&query(Some("a"), None)).unwrap());

        assert_eq!(output, "a\nv-a\n", "Records after the bad entry are dropped");
    }

    #[test]
    fn test_chunker_is_lazy() {
        let entries = (0..).map(|i: u64| Entry {
            key: Bytes::from(format!("{:08}", i)),
            value: Some(Bytes::from(StoredEnvelope::value(i, b"v".to_vec()).encode().unwrap())),
        });

        // An unbounded source still yields chunks on demand
        let first: Vec<Bytes> = RecordChunker::new(entries, 32).take(2).collect();

        assert_eq!(first.len(), 2);
    }

    fn endless_entries() -> EntryIter {
        Box::new((0..).map(|i: u64| Entry {
            key: Bytes::from(format!("{:08}", i)),
            value: Some(Bytes::from(StoredEnvelope::value(i, b"v".to_vec()).encode().unwrap())),
        }))
    }

    // ============================================================
    // STREAMING TESTS
    // ============================================================

    #[tokio::test]
    async fn test_forwarded_chunks_form_response_body() {
        // ARRANGE: A chunk limit small enough to split every record
        let streamer = RangeStreamer::new(seeded_store(&["a", "b", "c"]), 6);
        let chunks = streamer.scan(&query(Some("a"), None)).unwrap();
        let (tx, response) = chunked_response(1);

        // ACT
        let producer = tokio::spawn(forward_chunks(chunks, tx));
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        producer.await.unwrap();

        // ASSERT
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Bytes::from_static(b"a\nv-a\nb\nv-b\nc\nv-c\n"));
    }

    #[tokio::test]
    async fn test_forwarding_stops_when_client_goes_away() {
        let (tx, response) = chunked_response(1);
        drop(response);

        // An endless scan still returns once nobody reads the body
        let finished = tokio::time::timeout(
            Duration::from_secs(1),
            forward_chunks(RecordChunker::new(endless_entries(), 16), tx),
        )
        .await;

        assert!(finished.is_ok());
    }

    #[tokio::test]
    async fn test_forwarding_waits_for_slow_reader() {
        // ARRANGE
        let (tx, mut rx) = tokio::sync::mpsc::channel(2);
        let producer = tokio::spawn(forward_chunks(RecordChunker::new(endless_entries(), 16), tx));

        // ACT: Read nothing for a while, then a single chunk
        tokio::time::sleep(Duration::from_millis(50)).await;
        let first = rx.recv().await.unwrap().unwrap();

        // ASSERT: The producer is parked on the full channel, not finished
        assert!(!first.is_empty());
        assert!(!producer.is_finished());
        drop(rx);
        producer.await.unwrap();
    }
}
