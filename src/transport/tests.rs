#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncWriteExt;
    use tokio::sync::{mpsc, oneshot};

    use crate::kvstore::KvError;
    use crate::transport::tagged::{self, Endpoint, LinkEvent, ReceivedMessage, TagWorker};
    use crate::transport::{TransportConfig, TransportManager, parse_host_port};

    /// Endpoint handle whose writer is a dangling channel; good enough as a
    /// message source in matching tests.
    fn detached_endpoint() -> Endpoint {
        let (tx, _rx) = mpsc::unbounded_channel();
        Endpoint {
            peer: "127.0.0.1:9".parse().unwrap(),
            tx,
        }
    }

    fn message(tag: u64, payload: &[u8]) -> ReceivedMessage {
        ReceivedMessage {
            tag,
            payload: payload.to_vec(),
            source: detached_endpoint(),
        }
    }

    // ============================================================
    // TAG MATCHING
    // ============================================================

    #[tokio::test]
    async fn test_posted_receive_matches_delivery() {
        let worker = TagWorker::new(64 * 1024);

        let receive = worker.post_receive(0x1001, 0xF000);
        worker.deliver(message(0x1001, b"ack"));

        let received = receive.message().await.expect("receive should match");
        assert_eq!(received.tag, 0x1001);
        assert_eq!(received.payload, b"ack");
        assert_eq!(worker.posted_count(), 0);
    }

    #[tokio::test]
    async fn test_delivery_before_post_queues_as_unexpected() {
        let worker = TagWorker::new(64 * 1024);

        worker.deliver(message(0x2001, b"early"));
        assert_eq!(worker.unexpected_count(), 1);

        let receive = worker.post_receive(0x2001, 0xF000);
        let received = receive.message().await.expect("queued message matches");
        assert_eq!(received.payload, b"early");
        assert_eq!(worker.unexpected_count(), 0);
    }

    #[tokio::test]
    async fn test_mask_matches_by_upper_nibble() {
        let worker = TagWorker::new(64 * 1024);

        // 0x2000 and 0x2001 share the 0x2000 family under the mask.
        let receive = worker.post_receive(0x2001, 0xF000);
        worker.deliver(message(0x2000, b"same family"));

        let received = receive.message().await.expect("family should match");
        assert_eq!(received.tag, 0x2000);
    }

    #[tokio::test]
    async fn test_mask_rejects_other_family() {
        let worker = TagWorker::new(64 * 1024);

        let receive = worker.post_receive(0x2001, 0xF000);
        worker.deliver(message(0x1001, b"write family"));

        // The write-family message must not satisfy the read-family receive.
        assert_eq!(worker.posted_count(), 1);
        assert_eq!(worker.unexpected_count(), 1);

        worker.deliver(message(0x2001, b"read family"));
        let received = receive.message().await.expect("read family matches");
        assert_eq!(received.payload, b"read family");
    }

    #[tokio::test]
    async fn test_wildcard_receive_matches_any_tag() {
        let worker = TagWorker::new(64 * 1024);

        let receive = worker.post_receive(0, 0);
        worker.deliver(message(0xABCD, b"anything"));

        let received = receive.message().await.expect("wildcard matches");
        assert_eq!(received.tag, 0xABCD);
    }

    #[tokio::test]
    async fn test_matching_is_first_posted_first_served() {
        let worker = TagWorker::new(64 * 1024);

        let first = worker.post_receive(0x1001, 0xF000);
        let second = worker.post_receive(0x1001, 0xF000);

        worker.deliver(message(0x1001, b"one"));
        worker.deliver(message(0x1001, b"two"));

        assert_eq!(first.message().await.expect("first").payload, b"one");
        assert_eq!(second.message().await.expect("second").payload, b"two");
    }

    #[tokio::test]
    async fn test_cancel_all_resolves_receives_as_cancelled() {
        let worker = TagWorker::new(64 * 1024);

        let receive = worker.post_receive(0, 0);
        worker.deliver(message(0x1, b"queued"));
        worker.deliver(message(0x2, b"queued"));
        worker.cancel_all();

        assert!(receive.message().await.is_none());
        assert_eq!(worker.posted_count(), 0);
        assert_eq!(worker.unexpected_count(), 0);
    }

    // ============================================================
    // ADDRESS PARSING
    // ============================================================

    #[test]
    fn test_parse_host_port_accepts_valid_addresses() {
        assert_eq!(
            parse_host_port("127.0.0.1:12345").unwrap(),
            "127.0.0.1:12345".parse().unwrap()
        );
        assert_eq!(
            parse_host_port("0.0.0.0:80").unwrap(),
            "0.0.0.0:80".parse().unwrap()
        );
        assert_eq!(
            parse_host_port("localhost:9000").unwrap(),
            "127.0.0.1:9000".parse().unwrap()
        );
        assert_eq!(
            parse_host_port("10.1.2.3:65535").unwrap(),
            "10.1.2.3:65535".parse().unwrap()
        );
    }

    #[test]
    fn test_parse_host_port_rejects_malformed_input() {
        for addr in [
            "nocolon",
            "127.0.0.1:",
            "127.0.0.1:abc",
            "127.0.0.1:0",
            "127.0.0.1:70000",
            "not-a-host:80",
            ":80",
        ] {
            match parse_host_port(addr) {
                Err(KvError::InvalidArgument(_)) => {}
                other => panic!("expected InvalidArgument for '{}', got {:?}", addr, other),
            }
        }
    }

    // ============================================================
    // MANAGER: REQUEST IDS AND PENDING TABLES
    // ============================================================

    #[tokio::test]
    async fn test_request_ids_start_at_one_and_increase() {
        let manager = TransportManager::new(TransportConfig::default());

        assert_eq!(manager.next_request_id(), 1);
        assert_eq!(manager.next_request_id(), 2);
        assert_eq!(manager.next_request_id(), 3);
    }

    #[tokio::test]
    async fn test_register_and_complete_write() {
        let manager = TransportManager::new(TransportConfig::default());

        let (promise, ack) = oneshot::channel();
        manager.register_write(7, promise);
        manager.complete_write(7, Ok(()));

        assert_eq!(ack.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_completion_for_unknown_id_is_ignored() {
        let manager = TransportManager::new(TransportConfig::default());

        manager.complete_write(999, Ok(()));
        manager.complete_read(999, crate::kvstore::ReadResult::missing());

        // The manager is still healthy afterwards.
        let (promise, ack) = oneshot::channel();
        manager.register_write(1, promise);
        manager.complete_write(1, Ok(()));
        assert_eq!(ack.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_completion_is_delivered_once() {
        let manager = TransportManager::new(TransportConfig::default());

        let (promise, ack) = oneshot::channel();
        manager.register_write(5, promise);
        manager.complete_write(5, Ok(()));
        // The second resolution finds no entry and is ignored.
        manager.complete_write(5, Err(KvError::Internal("late duplicate".to_string())));

        assert_eq!(ack.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_completion_queue_resolves_promises() {
        use crate::transport::Completion;

        let manager = TransportManager::new(TransportConfig::default());

        let (promise, ack) = oneshot::channel();
        manager.register_write(11, promise);

        let completions = manager.completion_sender();
        completions
            .send(Completion::WriteAck {
                request_id: 11,
                status: Ok(0),
            })
            .unwrap();

        assert_eq!(ack.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_nonzero_write_status_resolves_as_internal_error() {
        use crate::transport::Completion;

        let manager = TransportManager::new(TransportConfig::default());

        let (promise, ack) = oneshot::channel();
        manager.register_write(12, promise);

        manager
            .completion_sender()
            .send(Completion::WriteAck {
                request_id: 12,
                status: Ok(3),
            })
            .unwrap();

        match ack.await.unwrap() {
            Err(KvError::Internal(_)) => {}
            other => panic!("expected Internal, got {:?}", other),
        }
    }

    // ============================================================
    // MANAGER: SHUTDOWN
    // ============================================================

    #[tokio::test]
    async fn test_shutdown_cancels_pending_operations() {
        let manager = TransportManager::new(TransportConfig::default());

        let (write_promise, write_ack) = oneshot::channel();
        manager.register_write(1, write_promise);
        let (read_promise, read_outcome) = oneshot::channel();
        manager.register_read(2, read_promise);

        manager.shutdown().await;

        match write_ack.await.unwrap() {
            Err(KvError::Cancelled(_)) => {}
            other => panic!("expected Cancelled, got {:?}", other),
        }
        assert!(read_outcome.await.unwrap().is_missing());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let manager = TransportManager::new(TransportConfig::default());

        manager.shutdown().await;
        manager.shutdown().await;

        assert!(manager.is_shutting_down());
    }

    #[tokio::test]
    async fn test_operations_after_shutdown_fail_precondition() {
        let manager = TransportManager::new(TransportConfig::default());
        manager.shutdown().await;

        match manager.create_listener("127.0.0.1:12399").await {
            Err(KvError::FailedPrecondition(_)) => {}
            other => panic!("expected FailedPrecondition, got {:?}", other),
        }
        match manager.connect("127.0.0.1:12399").await {
            Err(KvError::FailedPrecondition(_)) => {}
            other => panic!("expected FailedPrecondition, got {:?}", other),
        }
    }

    // ============================================================
    // LINKS OVER LOOPBACK
    // ============================================================

    #[tokio::test]
    async fn test_loopback_link_delivers_tagged_messages() {
        let worker = TagWorker::new(64 * 1024);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let listener = tagged::bind_listener(
            "127.0.0.1:0".parse().unwrap(),
            worker.clone(),
            events_tx.clone(),
        )
        .await
        .expect("bind on an ephemeral port");

        let receive = worker.post_receive(0x42, u64::MAX);

        let endpoint = tagged::connect_endpoint(listener.local_addr(), worker.clone(), events_tx)
            .await
            .expect("connect to loopback listener");

        let send = endpoint.send_tagged(0x42, b"ping".to_vec());
        send.completed().await.expect("send should complete");

        let received = receive.message().await.expect("message should arrive");
        assert_eq!(received.tag, 0x42);
        assert_eq!(received.payload, b"ping");

        // The accept side reported the new link.
        match events_rx.recv().await {
            Some(LinkEvent::Connected(accepted)) => {
                assert_eq!(accepted.peer().ip(), endpoint.peer().ip());
            }
            _ => panic!("expected Connected event"),
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_link() {
        let worker = TagWorker::new(1024);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let listener = tagged::bind_listener(
            "127.0.0.1:0".parse().unwrap(),
            worker.clone(),
            events_tx,
        )
        .await
        .expect("bind on an ephemeral port");

        let mut raw = tokio::net::TcpStream::connect(listener.local_addr())
            .await
            .expect("raw connect");
        raw.write_u64_le(0x1000).await.unwrap();
        raw.write_u32_le(4096).await.unwrap();
        raw.flush().await.unwrap();

        loop {
            match tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
                .await
                .expect("link event before timeout")
            {
                Some(LinkEvent::Connected(_)) => continue,
                Some(LinkEvent::Disconnected { reason, .. }) => {
                    assert!(reason.contains("oversized"));
                    break;
                }
                None => panic!("event channel closed unexpectedly"),
            }
        }
    }

    #[tokio::test]
    async fn test_send_on_closed_endpoint_fails_immediately() {
        let endpoint = detached_endpoint();

        let send = endpoint.send_tagged(0x1, b"never".to_vec());
        assert!(send.completed().await.is_err());
    }

    // ============================================================
    // MANAGER: LISTENER AND CONNECT ERRORS
    // ============================================================

    #[tokio::test]
    async fn test_listener_port_in_use_is_resource_exhausted() {
        let first = TransportManager::new(TransportConfig::default());
        let second = TransportManager::new(TransportConfig::default());

        first
            .create_listener("127.0.0.1:12390")
            .await
            .expect("first bind succeeds");

        match second.create_listener("127.0.0.1:12390").await {
            Err(KvError::ResourceExhausted(_)) => {}
            other => panic!("expected ResourceExhausted, got {:?}", other),
        }

        first.shutdown().await;
        second.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_listener_on_same_manager_fails() {
        let manager = TransportManager::new(TransportConfig::default());

        manager
            .create_listener("127.0.0.1:12391")
            .await
            .expect("first bind succeeds");

        match manager.create_listener("127.0.0.1:12392").await {
            Err(KvError::FailedPrecondition(_)) => {}
            other => panic!("expected FailedPrecondition, got {:?}", other),
        }

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_listener_bad_address_is_invalid_argument() {
        let manager = TransportManager::new(TransportConfig::default());

        for addr in ["nonsense", "127.0.0.1:0", "example.com:80"] {
            match manager.create_listener(addr).await {
                Err(KvError::InvalidArgument(_)) => {}
                other => panic!("expected InvalidArgument for '{}', got {:?}", addr, other),
            }
        }

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_to_dead_port_is_internal_error() {
        let manager = TransportManager::new(TransportConfig::default());

        match manager.connect("127.0.0.1:12393").await {
            Err(KvError::Internal(_)) => {}
            other => panic!("expected Internal, got {:?}", other),
        }

        manager.shutdown().await;
    }
}
