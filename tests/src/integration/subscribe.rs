//! # Subscription Scenarios
//!
//! Updates published by the server over the subscribe port reach the
//! callbacks registered on the transport.

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    use xt_transport::{
        ChannelRole, ChannelState, SystemClock, TcpChannelManager, TransportApi, TransportConfig,
        Update, XTablesTransport, WILDCARD_KEY,
    };

    use crate::init_test_tracing;
    use crate::support::FakeXTablesServer;

    type Seen = Arc<Mutex<Vec<(String, Bytes)>>>;

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

    fn subscribe(transport: &XTablesTransport, key: &str) -> Seen {
        let seen: Seen = Arc::default();
        let sink = Arc::clone(&seen);
        transport.subscribe(
            key,
            Arc::new(move |update: &Update| {
                sink.lock().push((update.key.clone(), update.payload.clone()));
            }),
        );
        seen
    }

    #[test]
    fn test_no_subscribe_connection_until_subscribed() {
        let server = FakeXTablesServer::start().unwrap();
        let transport = start(&server);

        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(server.subscribe_connections(), 0);

        let _seen = subscribe(&transport, "drivetrain.speed");
        assert!(server.wait_for(Duration::from_secs(5), |s| s.subscribe_connections() == 1));
    }

    #[test]
    fn test_updates_routed_by_key_and_wildcard() {
        let server = FakeXTablesServer::start().unwrap();
        let transport = start(&server);
        let speed = subscribe(&transport, "drivetrain.speed");
        let everything = subscribe(&transport, WILDCARD_KEY);
        assert!(server.wait_for(Duration::from_secs(5), |s| s.subscribe_connections() == 1));
        assert_eq!(server.publish("warmup", b"0"), 1);
        assert!(server.wait_for(Duration::from_secs(5), |_| !everything.lock().is_empty()));

        server.publish("arm.angle", b"90");
        assert!(server.wait_for(Duration::from_secs(5), |_| everything.lock().len() == 2));
        server.publish("drivetrain.speed", b"4.2");
        assert!(server.wait_for(Duration::from_secs(5), |_| everything.lock().len() == 3));

        assert_eq!(
            *speed.lock(),
            vec![("drivetrain.speed".to_string(), Bytes::from_static(b"4.2"))]
        );
        let keys: Vec<String> = everything.lock().iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec!["warmup", "arm.angle", "drivetrain.speed"]);
        assert_eq!(transport.metrics().updates_received, 3);
    }

    #[test]
    fn test_server_dropping_subscribers_triggers_reconnect() {
        let server = FakeXTablesServer::start().unwrap();
        let transport = start(&server);
        let seen = subscribe(&transport, WILDCARD_KEY);
        assert!(server.wait_for(Duration::from_secs(5), |s| s.subscribe_connections() == 1));

        server.drop_subscribers();
        assert!(server.wait_for(Duration::from_secs(5), |s| s.subscribe_connections() == 2));
        assert!(server.wait_for(Duration::from_secs(5), |s| s.publish("after", b"1") == 1));
        assert!(server.wait_for(Duration::from_secs(5), |_| !seen.lock().is_empty()));

        assert_eq!(seen.lock()[0].0, "after");
        let metrics = transport.metrics();
        assert_eq!(metrics.reconnects, 1);
        assert_eq!(
            transport.channel_state(ChannelRole::Subscribe),
            ChannelState::Connected
        );
    }
}
