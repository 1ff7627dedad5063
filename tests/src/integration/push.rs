//! # Push Scenarios

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    use xt_transport::{
        ChannelRole, ChannelState, SystemClock, TcpChannelManager, TransportApi, TransportConfig,
        XTablesTransport,
    };

    use crate::init_test_tracing;
    use crate::support::FakeXTablesServer;

    fn start(server: &FakeXTablesServer) -> XTablesTransport {
        init_test_tracing();
        let manager = TcpChannelManager::new(server.endpoints()).unwrap();
        XTablesTransport::start(
            TransportConfig::default(),
            Arc::new(manager),
            Arc::new(SystemClock::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_frames_arrive_in_enqueue_order() {
        let server = FakeXTablesServer::start().unwrap();
        let transport = start(&server);

        let frames: Vec<Bytes> = (0..100)
            .map(|i| Bytes::from(format!("PUB sensors.gyro {i}")))
            .collect();
        for frame in &frames {
            transport.enqueue_push(frame.to_vec());
        }

        assert!(server.wait_for(Duration::from_secs(5), |s| s.pushed().len() == 100));
        assert_eq!(server.pushed(), frames);
        assert_eq!(server.push_connections(), 1);

        let metrics = transport.metrics();
        assert_eq!(metrics.push_enqueued, 100);
        assert_eq!(metrics.push_sent, 100);
        assert_eq!(metrics.push_dropped, 0);
        assert_eq!(transport.channel_state(ChannelRole::Push), ChannelState::Connected);
    }

    #[test]
    fn test_push_and_requests_share_no_channel() {
        let server = FakeXTablesServer::start().unwrap();
        let transport = start(&server);

        transport.enqueue_push(b"PUB a 1".to_vec());
        let reply = transport.submit(b"GET a".to_vec()).wait().unwrap();
        assert_eq!(reply, Bytes::from_static(b"GET a"));

        assert!(server.wait_for(Duration::from_secs(5), |s| s.pushed().len() == 1));
        assert_eq!(server.pushed(), vec![Bytes::from_static(b"PUB a 1")]);
        assert_eq!(server.requests().len(), 1);
        assert_eq!(server.request_connections(), 1);
        assert_eq!(server.push_connections(), 1);
    }

    #[test]
    fn test_shutdown_stops_push_worker() {
        let server = FakeXTablesServer::start().unwrap();
        let transport = start(&server);
        transport.enqueue_push(b"PUB a 1".to_vec());
        assert!(server.wait_for(Duration::from_secs(5), |s| !s.pushed().is_empty()));

        transport.shutdown().unwrap();
        assert!(!transport.is_running());
        assert_eq!(
            transport.channel_state(ChannelRole::Push),
            ChannelState::Disconnected
        );
    }
}
