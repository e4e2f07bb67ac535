//! Replication Module Tests
//!
//! ## Test Scopes
//! - **Parameters**: defaults and validation of `ack`/`from`.
//! - **Merge Strategies**: write counting, read resolution, early failure and order independence.
//! - **Coordinator**: local-only clusters and clusters whose peers are unreachable.
//!
//! *Note: Multi-node scenarios with live peers are covered in the server tests.*

#[cfg(test)]
mod tests {
    use crate::cluster::breaker::CircuitBreaker;
    use crate::cluster::types::{NodeAddress, Topology};
    use crate::replication::background::BackgroundTasks;
    use crate::replication::coordinator::{ClientOp, CoordinatorReply, ReplicationCoordinator};
    use crate::replication::error::CoordinatorError;
    use crate::replication::proxy::{ProxyOutcome, RemoteProxy};
    use crate::replication::quorum::{
        QuorumContext, QuorumMerge, QuorumParams, ReadQuorum, ReplicaOutcome, Verdict, WriteQuorum,
    };
    use crate::storage::engine::MemoryStore;
    use crate::storage::envelope::StoredEnvelope;
    use axum::http::StatusCode;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    fn params(ack: usize, from: usize) -> QuorumParams {
        QuorumParams { ack, from }
    }

    /// Address of a port nothing listens on.
    fn dead_node() -> NodeAddress {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        NodeAddress::from(format!("http://{}", addr))
    }

    fn coordinator(
        nodes: Vec<NodeAddress>,
        local: usize,
        max_fails: u32,
    ) -> (ReplicationCoordinator, Arc<BackgroundTasks>) {
        let local = nodes[local].clone();
        let topology = Arc::new(Topology::new(nodes, &local).unwrap());
        let breaker = Arc::new(CircuitBreaker::new(
            topology.size(),
            max_fails,
            Duration::from_secs(60),
        ));
        let background = Arc::new(BackgroundTasks::new());
        let proxy = Arc::new(
            RemoteProxy::new(
                topology.clone(),
                breaker.clone(),
                background.clone(),
                Duration::from_millis(500),
            )
            .unwrap(),
        );
        let coordinator =
            ReplicationCoordinator::new(topology, breaker, proxy, Arc::new(MemoryStore::new()));
        (coordinator, background)
    }

    // ============================================================
    // PARAMETER TESTS
    // ============================================================

    #[test]
    fn test_params_default_to_majority_of_cluster() {
        assert_eq!(QuorumParams::resolve(None, None, 3).unwrap(), params(2, 3));
        assert_eq!(QuorumParams::resolve(None, None, 4).unwrap(), params(3, 4));
        assert_eq!(QuorumParams::resolve(None, None, 1).unwrap(), params(1, 1));
        assert_eq!(QuorumParams::resolve(None, Some("2"), 5).unwrap(), params(2, 2));
    }

    #[test]
    fn test_params_accept_explicit_values() {
        assert_eq!(QuorumParams::resolve(Some("1"), Some("3"), 3).unwrap(), params(1, 3));
    }

    #[test]
    fn test_params_reject_contract_violations() {
        for (ack, from) in [("0", "3"), ("3", "2"), ("2", "4"), ("1", "0")] {
            let result = QuorumParams::resolve(Some(ack), Some(from), 3);
            assert!(
                matches!(result, Err(CoordinatorError::InvalidQuorum { .. })),
                "ack={} from={} should be rejected",
                ack,
                from
            );
        }
    }

    #[test]
    fn test_params_reject_non_numbers() {
        let result = QuorumParams::resolve(Some("two"), None, 3);

        assert!(matches!(
            result,
            Err(CoordinatorError::MalformedParam { name: "ack", .. })
        ));
        assert_eq!(result.unwrap_err().status(), StatusCode::BAD_REQUEST);
    }

    // ============================================================
    // WRITE QUORUM TESTS
    // ============================================================

    #[test]
    fn test_write_quorum_met_on_ack_successes() {
        let mut context = QuorumContext::new(WriteQuorum::new(params(2, 3)));

        assert_eq!(context.offer(ReplicaOutcome::Failed), None);
        assert_eq!(context.offer(ReplicaOutcome::Stored), None);
        assert_eq!(context.offer(ReplicaOutcome::Stored), Some(Verdict::Met(())));
        assert!(context.is_decided());
    }

    #[test]
    fn test_write_quorum_fails_once_unreachable() {
        let mut context = QuorumContext::new(WriteQuorum::new(params(2, 3)));

        assert_eq!(context.offer(ReplicaOutcome::Failed), None);
        assert_eq!(
            context.offer(ReplicaOutcome::Failed),
            Some(Verdict::Unreachable {
                usable: 0,
                required: 2
            })
        );
    }

    #[test]
    fn test_decided_context_ignores_late_outcomes() {
        let mut context = QuorumContext::new(WriteQuorum::new(params(1, 3)));

        assert!(context.offer(ReplicaOutcome::Stored).is_some());
        assert_eq!(context.offer(ReplicaOutcome::Failed), None);
        assert_eq!(context.offer(ReplicaOutcome::Stored), None);
        assert_eq!(context.responses(), 1);
    }

    #[test]
    fn test_write_interprets_created_and_accepted() {
        let quorum = WriteQuorum::new(params(1, 1));
        let created = ProxyOutcome::Response {
            status: StatusCode::CREATED,
            body: Bytes::new(),
        };
        let accepted = ProxyOutcome::Response {
            status: StatusCode::ACCEPTED,
            body: Bytes::new(),
        };
        let rejected = ProxyOutcome::Response {
            status: StatusCode::BAD_REQUEST,
            body: Bytes::new(),
        };

        assert_eq!(quorum.interpret(created), ReplicaOutcome::Stored);
        assert_eq!(quorum.interpret(accepted), ReplicaOutcome::Stored);
        assert_eq!(quorum.interpret(rejected), ReplicaOutcome::Failed);
        assert_eq!(quorum.interpret(ProxyOutcome::Unavailable), ReplicaOutcome::Failed);
    }

    // ============================================================
    // READ QUORUM TESTS
    // ============================================================

    #[test]
    fn test_read_picks_latest_timestamp_in_any_order() {
        let older = StoredEnvelope::value(1, b"v1".to_vec());
        let newer = StoredEnvelope::value(2, b"v2".to_vec());

        for order in [[older.clone(), newer.clone()], [newer.clone(), older.clone()]] {
            let mut context = QuorumContext::new(ReadQuorum::new(params(2, 3)));
            let [first, second] = order;

            assert_eq!(context.offer(ReplicaOutcome::Found(first)), None);
            assert_eq!(
                context.offer(ReplicaOutcome::Found(second)),
                Some(Verdict::Met(Some(newer.clone())))
            );
        }
    }

    #[test]
    fn test_read_newer_tombstone_wins() {
        let mut context = QuorumContext::new(ReadQuorum::new(params(2, 2)));

        context.offer(ReplicaOutcome::Found(StoredEnvelope::value(5, b"v".to_vec())));
        let verdict = context.offer(ReplicaOutcome::Found(StoredEnvelope::tombstone(6)));

        assert_eq!(verdict, Some(Verdict::Met(Some(StoredEnvelope::tombstone(6)))));
    }

    #[test]
    fn test_read_missing_loses_to_returned_envelope() {
        let value = StoredEnvelope::value(5, b"v".to_vec());
        let mut context = QuorumContext::new(ReadQuorum::new(params(2, 3)));

        assert_eq!(context.offer(ReplicaOutcome::Missing), None);
        assert_eq!(
            context.offer(ReplicaOutcome::Found(value.clone())),
            Some(Verdict::Met(Some(value)))
        );
    }

    #[test]
    fn test_read_all_missing_resolves_to_none() {
        let mut context = QuorumContext::new(ReadQuorum::new(params(2, 3)));

        context.offer(ReplicaOutcome::Missing);
        assert_eq!(context.offer(ReplicaOutcome::Missing), Some(Verdict::Met(None)));
    }

    #[test]
    fn test_read_fails_when_too_few_usable() {
        let mut context = QuorumContext::new(ReadQuorum::new(params(2, 3)));

        assert_eq!(context.offer(ReplicaOutcome::Missing), None);
        assert_eq!(context.offer(ReplicaOutcome::Failed), None);
        assert_eq!(
            context.offer(ReplicaOutcome::Failed),
            Some(Verdict::Unreachable {
                usable: 1,
                required: 2
            })
        );
    }

    #[test]
    fn test_read_interprets_replica_answers() {
        let quorum = ReadQuorum::new(params(1, 1));
        let envelope = StoredEnvelope::value(9, b"v".to_vec());
        let found = ProxyOutcome::Response {
            status: StatusCode::OK,
            body: Bytes::from(envelope.encode().unwrap()),
        };
        let garbage = ProxyOutcome::Response {
            status: StatusCode::OK,
            body: Bytes::from_static(b"\x00"),
        };
        let missing = ProxyOutcome::Response {
            status: StatusCode::NOT_FOUND,
            body: Bytes::new(),
        };

        assert_eq!(quorum.interpret(found), ReplicaOutcome::Found(envelope));
        assert_eq!(quorum.interpret(garbage), ReplicaOutcome::Failed);
        assert_eq!(quorum.interpret(missing), ReplicaOutcome::Missing);
    }

    // ============================================================
    // COORDINATOR TESTS
    // ============================================================

    #[tokio::test]
    async fn test_single_node_put_get_delete() {
        let node = NodeAddress::from("http://127.0.0.1:1");
        let (coordinator, _) = coordinator(vec![node], 0, 10);

        let put = coordinator
            .execute(ClientOp::Put(Bytes::from_static(b"v1")), Some("x"), None, None)
            .await
            .unwrap();
        assert_eq!(put, CoordinatorReply::Created);

        let get = coordinator.execute(ClientOp::Get, Some("x"), None, None).await.unwrap();
        assert_eq!(get, CoordinatorReply::Found(Bytes::from_static(b"v1")));

        let delete = coordinator.execute(ClientOp::Delete, Some("x"), None, None).await.unwrap();
        assert_eq!(delete, CoordinatorReply::Accepted);

        let get = coordinator.execute(ClientOp::Get, Some("x"), None, None).await.unwrap();
        assert_eq!(get, CoordinatorReply::NotFound);
    }

    #[tokio::test]
    async fn test_later_put_overwrites_earlier() {
        let node = NodeAddress::from("http://127.0.0.1:1");
        let (coordinator, _) = coordinator(vec![node], 0, 10);

        for value in ["a", "b", "c"] {
            coordinator
                .execute(ClientOp::Put(Bytes::from(value)), Some("k"), None, None)
                .await
                .unwrap();
        }

        let get = coordinator.execute(ClientOp::Get, Some("k"), None, None).await.unwrap();
        assert_eq!(get, CoordinatorReply::Found(Bytes::from_static(b"c")));
    }

    #[tokio::test]
    async fn test_missing_id_is_rejected_without_fan_out() {
        let (coordinator, background) = coordinator(vec![dead_node(), dead_node()], 0, 10);

        let empty = coordinator.execute(ClientOp::Get, Some(""), None, None).await;
        let absent = coordinator.execute(ClientOp::Get, None, None, None).await;

        assert!(matches!(empty, Err(CoordinatorError::MissingId)));
        assert!(matches!(absent, Err(CoordinatorError::MissingId)));
        assert!(background.is_empty());
        assert_eq!(coordinator.breaker().failure_count(1), 0);
    }

    #[tokio::test]
    async fn test_from_larger_than_cluster_is_rejected() {
        let node = NodeAddress::from("http://127.0.0.1:1");
        let (coordinator, _) = coordinator(vec![node], 0, 10);

        let result = coordinator
            .execute(ClientOp::Get, Some("x"), Some("1"), Some("2"))
            .await;

        assert!(matches!(result, Err(CoordinatorError::InvalidQuorum { .. })));
    }

    #[tokio::test]
    async fn test_write_with_dead_peers_meets_ack_one_locally() {
        let (coordinator, background) =
            coordinator(vec![NodeAddress::from("http://local"), dead_node(), dead_node()], 0, 10);

        let reply = coordinator
            .execute(ClientOp::Put(Bytes::from_static(b"v")), Some("x"), Some("1"), Some("3"))
            .await
            .unwrap();
        assert_eq!(reply, CoordinatorReply::Created);

        // The detached peer calls still report their failures
        background.drain(Duration::from_secs(5)).await;
        assert_eq!(coordinator.breaker().failure_count(1), 1);
        assert_eq!(coordinator.breaker().failure_count(2), 1);
    }

    #[tokio::test]
    async fn test_quorum_unreachable_with_dead_peers() {
        let (coordinator, _) =
            coordinator(vec![NodeAddress::from("http://local"), dead_node(), dead_node()], 0, 10);

        let result = coordinator
            .execute(ClientOp::Get, Some("x"), Some("2"), Some("3"))
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, CoordinatorError::QuorumUnreachable { ack: 2, .. }));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_open_circuits_short_circuit_without_counting() {
        let (coordinator, background) =
            coordinator(vec![NodeAddress::from("http://local"), dead_node(), dead_node()], 0, 2);

        // Trip both peers
        for _ in 0..2 {
            let _ = coordinator
                .execute(ClientOp::Get, Some("x"), Some("2"), Some("3"))
                .await;
            background.drain(Duration::from_secs(5)).await;
        }
        assert!(!coordinator.breaker().is_working(1));
        assert!(!coordinator.breaker().is_working(2));

        let result = coordinator
            .execute(ClientOp::Get, Some("x"), Some("2"), Some("3"))
            .await;

        assert!(matches!(result, Err(CoordinatorError::QuorumUnreachable { .. })));
        assert!(background.is_empty(), "No call is made to an open circuit");
        assert_eq!(coordinator.breaker().failure_count(1), 2);
    }
}
