//! # Request/Reply Scenarios
//!
//! Correlation over a real TCP channel: replies resolve the right futures,
//! ids go out in order and mismatches fail only their own request.

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use xt_transport::{
        ChannelRole, ChannelState, RequestId, SystemClock, TcpChannelManager, TransportApi,
        TransportConfig, TransportConfigBuilder, TransportError, XTablesTransport,
    };

    use crate::init_test_tracing;
    use crate::support::{FakeXTablesServer, ServerAction};

    // =========================================================================
    // FIXTURES
    // =========================================================================

    fn connect(server: &FakeXTablesServer, config: TransportConfig) -> XTablesTransport {
        init_test_tracing();
        let manager = TcpChannelManager::new(server.endpoints()).unwrap();
        let transport =
            XTablesTransport::start(config, Arc::new(manager), Arc::new(SystemClock::new()))
                .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while transport.channel_state(ChannelRole::Request) != ChannelState::Connected {
            assert!(Instant::now() < deadline, "request channel never connected");
            thread::sleep(Duration::from_millis(2));
        }
        transport
    }

    // =========================================================================
    // TESTS
    // =========================================================================

    #[test]
    fn test_put_resolves_with_server_reply() {
        let server = FakeXTablesServer::start().unwrap();
        server.script([ServerAction::reply(b"OK", Duration::from_millis(20))]);
        let transport = connect(&server, TransportConfig::default());

        let started = Instant::now();
        let reply = transport.submit(b"PUT a 1".to_vec()).wait().unwrap();

        assert_eq!(reply, Bytes::from_static(b"OK"));
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(
            server.requests(),
            vec![(RequestId::new(1), Bytes::from_static(b"PUT a 1"))]
        );
    }

    #[test]
    fn test_requests_leave_in_submission_order() {
        let server = FakeXTablesServer::start().unwrap();
        let transport = connect(&server, TransportConfig::default());

        let futures: Vec<_> = (0..50)
            .map(|i| transport.submit(format!("GET key{i}").into_bytes()))
            .collect();
        for (i, future) in futures.into_iter().enumerate() {
            assert_eq!(future.wait().unwrap(), Bytes::from(format!("GET key{i}")));
        }

        let ids: Vec<u64> = server.requests().iter().map(|(id, _)| id.value()).collect();
        assert_eq!(ids, (1..=50).collect::<Vec<_>>());
    }

    #[test]
    fn test_concurrent_submitters_get_their_own_replies() {
        let server = FakeXTablesServer::start().unwrap();
        let transport = Arc::new(connect(&server, TransportConfig::default()));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let transport = Arc::clone(&transport);
                thread::spawn(move || {
                    for i in 0..25 {
                        let payload = format!("PUT t{t}.k{i} {i}");
                        let reply = transport.submit(payload.clone().into_bytes()).wait().unwrap();
                        assert_eq!(reply, Bytes::from(payload));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let metrics = transport.metrics();
        assert_eq!(metrics.requests_completed, 200);
        assert_eq!(metrics.requests_failed, 0);
        assert_eq!(server.request_connections(), 1);
    }

    #[test]
    fn test_wrong_id_fails_only_that_request() {
        let server = FakeXTablesServer::start().unwrap();
        server.script([ServerAction::WrongId]);
        let transport = connect(&server, TransportConfig::default());

        let err = transport.submit(b"GET a".to_vec()).wait().unwrap_err();
        match err {
            TransportError::ProtocolMismatch { expected, received } => {
                assert_eq!(expected, RequestId::new(1));
                assert_eq!(received, RequestId::new(1_001));
            }
            other => panic!("expected ProtocolMismatch, got {other}"),
        }

        assert_eq!(
            transport.submit(b"GET b".to_vec()).wait().unwrap(),
            Bytes::from_static(b"GET b")
        );
        assert_eq!(server.request_connections(), 1);
    }

    #[test]
    fn test_overflow_fails_evicted_requests_only() {
        let server = FakeXTablesServer::start().unwrap();
        server.script((0..10).map(|_| ServerAction::reply(b"OK", Duration::from_millis(100))));
        let transport = connect(
            &server,
            TransportConfigBuilder::new()
                .request_buffer_capacity(4)
                .build()
                .unwrap(),
        );

        let futures: Vec<_> = (0..10)
            .map(|i| transport.submit(vec![i as u8]))
            .collect();
        let results: Vec<_> = futures.into_iter().map(|f| f.wait()).collect();

        let dropped = results
            .iter()
            .filter(|r| matches!(r, Err(TransportError::BufferOverflowDrop { .. })))
            .count();
        let ok = results.iter().filter(|r| r.is_ok()).count();
        assert!(dropped >= 5, "dropped {dropped}");
        assert_eq!(dropped + ok, 10);
        // The newest request always survives.
        assert!(results[9].is_ok());
        assert_eq!(transport.metrics().requests_dropped, dropped as u64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_futures_await_from_async_callers() {
        let server = FakeXTablesServer::start().unwrap();
        let transport = connect(&server, TransportConfig::default());

        let first = transport.submit(b"GET x".to_vec());
        let second = transport.submit(b"GET y".to_vec());
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first.unwrap(), Bytes::from_static(b"GET x"));
        assert_eq!(second.unwrap(), Bytes::from_static(b"GET y"));
    }
}
