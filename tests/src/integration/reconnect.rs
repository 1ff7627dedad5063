//! # Reconnect Scenarios
//!
//! Request channel replacement against a real socket: timeouts and dropped
//! connections trigger a fresh connection after a linear backoff.

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use xt_transport::testing::ManualClock;
    use xt_transport::{
        ChannelRole, ChannelState, Clock, SystemClock, TcpChannelManager, TransportApi,
        TransportConfigBuilder, TransportError, XTablesTransport,
    };

    use crate::init_test_tracing;
    use crate::support::{FakeXTablesServer, ServerAction};

    fn start(server: &FakeXTablesServer, clock: Arc<dyn Clock>) -> XTablesTransport {
        init_test_tracing();
        let config = TransportConfigBuilder::new()
            .reply_timeout_ms(100)
            .build()
            .unwrap();
        let manager = TcpChannelManager::new(server.endpoints()).unwrap();
        XTablesTransport::start(config, Arc::new(manager), clock).unwrap()
    }

    #[test]
    fn test_timeouts_open_new_connections_with_growing_delays() {
        let server = FakeXTablesServer::start().unwrap();
        server.script([ServerAction::Silent, ServerAction::Silent]);
        let clock = Arc::new(ManualClock::new());
        let transport = start(&server, clock.clone());

        let first = transport.submit(b"GET a".to_vec());
        let second = transport.submit(b"GET b".to_vec());
        let third = transport.submit(b"GET c".to_vec());

        assert!(matches!(
            first.wait(),
            Err(TransportError::ReplyTimeout { timeout_ms: 100, .. })
        ));
        assert!(matches!(
            second.wait(),
            Err(TransportError::ReplyTimeout { .. })
        ));
        assert_eq!(third.wait().unwrap(), Bytes::from_static(b"GET c"));

        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(200), Duration::from_millis(400)]
        );
        assert_eq!(server.request_connections(), 3);

        let metrics = transport.metrics();
        assert_eq!(metrics.reply_timeouts, 2);
        assert_eq!(metrics.reconnects, 2);
        assert_eq!(transport.channel_state(ChannelRole::Request), ChannelState::Connected);
    }

    #[test]
    fn test_backoff_delays_are_real_with_system_clock() {
        let server = FakeXTablesServer::start().unwrap();
        server.script([ServerAction::Silent, ServerAction::Silent]);
        let transport = start(&server, Arc::new(SystemClock::new()));

        let started = Instant::now();
        let futures: Vec<_> = [&b"a"[..], &b"b"[..], &b"c"[..]]
            .into_iter()
            .map(|payload| transport.submit(payload.to_vec()))
            .collect();
        let mut finished = Vec::new();
        for future in futures {
            let result = future.wait();
            finished.push((started.elapsed(), result));
        }

        // timeout(100) + sleep(200) + timeout(100)
        assert!(finished[1].0 >= Duration::from_millis(380), "{:?}", finished[1].0);
        // ... + sleep(400)
        assert!(finished[2].0 >= Duration::from_millis(780), "{:?}", finished[2].0);
        assert_eq!(finished[2].1.as_ref().unwrap(), &Bytes::from_static(b"c"));
    }

    #[test]
    fn test_server_closing_connection_triggers_reconnect() {
        let server = FakeXTablesServer::start().unwrap();
        server.script([ServerAction::Close]);
        let clock = Arc::new(ManualClock::new());
        let transport = start(&server, clock.clone());

        let err = transport.submit(b"GET a".to_vec()).wait().unwrap_err();
        assert!(matches!(err, TransportError::ChannelIo(_)), "{err}");

        assert_eq!(
            transport.submit(b"GET b".to_vec()).wait().unwrap(),
            Bytes::from_static(b"GET b")
        );
        assert_eq!(server.request_connections(), 2);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(200)]);

        let metrics = transport.metrics();
        assert_eq!(metrics.channel_errors, 1);
        assert_eq!(metrics.reconnects, 1);
    }

    #[test]
    fn test_unreachable_server_fails_requests_without_hanging() {
        let server = FakeXTablesServer::start().unwrap();
        let endpoints = server.endpoints();
        drop(server);
        // Nothing listens once the acceptors exit; give them a moment.
        std::thread::sleep(Duration::from_millis(50));

        init_test_tracing();
        let manager = TcpChannelManager::new(endpoints).unwrap();
        let clock = Arc::new(ManualClock::new());
        let transport = XTablesTransport::start(
            TransportConfigBuilder::new().build().unwrap(),
            Arc::new(manager),
            clock.clone(),
        )
        .unwrap();

        let err = transport.submit(b"GET a".to_vec()).wait().unwrap_err();
        assert!(matches!(err, TransportError::ChannelUnavailable { .. }), "{err}");
        assert!(transport.metrics().channel_errors >= 2);
    }
}
