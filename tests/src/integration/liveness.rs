//! # Liveness Flows
//!
//! Heartbeat monitoring against a running kernel, and PING/PONG on the
//! kernel's shell socket.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    use mj_kernel::{KernelClient, KernelConfig, KernelService};
    use mj_patterns::{HeartbeatMonitor, HeartbeatPublisher, LivenessEvent, Pinger};
    use mj_transport::InMemoryTransport;

    #[tokio::test(start_paused = true)]
    async fn test_running_kernel_keeps_monitor_quiet() {
        let transport = InMemoryTransport::new();
        let config = KernelConfig::default();
        let kernel = Arc::new(KernelService::start(&transport, &config).await.unwrap());
        let runner = Arc::clone(&kernel);
        tokio::spawn(async move { runner.run().await });

        let monitor = HeartbeatMonitor::connect(
            &transport,
            &config.endpoints.heartbeat,
            config.heartbeat.timeout,
        )
        .await
        .unwrap();
        let mut liveness = monitor.spawn();

        // Ten timeout windows of healthy beats.
        let quiet = timeout(config.heartbeat.timeout * 10, liveness.next()).await;
        assert!(quiet.is_err(), "unexpected event {quiet:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_timeout_per_silence_then_recovery() {
        let transport = InMemoryTransport::new();
        let interval = Duration::from_millis(100);
        let publisher = Arc::new(
            HeartbeatPublisher::bind(&transport, "inproc://hb", interval)
                .await
                .unwrap(),
        );
        let monitor = HeartbeatMonitor::connect(&transport, "inproc://hb", Duration::from_millis(300))
            .await
            .unwrap();
        let mut liveness = monitor.spawn();

        // Nothing published yet: one timeout, however long the silence.
        let first = timeout(Duration::from_secs(1), liveness.next()).await.unwrap();
        assert!(matches!(first, Some(LivenessEvent::Timeout { .. })));
        assert!(timeout(Duration::from_secs(5), liveness.next()).await.is_err());

        let beats = {
            let publisher = Arc::clone(&publisher);
            tokio::spawn(async move { publisher.run().await })
        };
        let recovered = timeout(Duration::from_secs(1), liveness.next()).await.unwrap();
        assert_eq!(recovered, Some(LivenessEvent::Recovered));

        beats.abort();
        let lost = timeout(Duration::from_secs(1), liveness.next()).await.unwrap();
        assert!(matches!(lost, Some(LivenessEvent::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_ping_on_kernel_shell() {
        let transport = InMemoryTransport::new();
        let config = KernelConfig::default();
        let kernel = Arc::new(KernelService::start(&transport, &config).await.unwrap());
        let runner = Arc::clone(&kernel);
        tokio::spawn(async move { runner.run().await });

        let pinger = Pinger::connect(&transport, &config.endpoints.shell).await.unwrap();
        let rtt = timeout(Duration::from_secs(1), pinger.ping()).await.unwrap().unwrap();
        assert!(rtt < Duration::from_secs(1));

        let client = KernelClient::connect(&transport, &config.endpoints, "alice")
            .await
            .unwrap();
        timeout(Duration::from_secs(1), client.ping()).await.unwrap().unwrap();

        // PING alone does not count as a shell peer.
        let info = timeout(Duration::from_secs(1), client.core_info()).await.unwrap().unwrap();
        assert_eq!(info.active_connections, 1);
    }
}
