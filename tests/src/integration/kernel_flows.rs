//! # Kernel Flows
//!
//! A client session against a running kernel:
//!
//! 1. **Shell**: `execute_request` → `execute_reply` linked by parent header
//! 2. **IOPub**: `stream` then `execute_result`, each linked to the request
//! 3. **Bridge**: the same broadcasts reach every registered bridge client
//! 4. **Rejection**: malformed envelopes come back as `ProtocolError`

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    use bytes::Bytes;
    use mj_kernel::{ClientRegistry, IopubBridge, KernelClient, KernelConfig, KernelService};
    use mj_patterns::{DealerNode, SubscriberNode};
    use mj_protocol::errors::codes;
    use mj_protocol::{
        parse_message, Content, ExecuteRequestContent, MsgType, ProtocolError, Status,
    };
    use mj_transport::InMemoryTransport;

    const WAIT: Duration = Duration::from_secs(1);

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    async fn start_kernel(transport: &InMemoryTransport) -> (Arc<KernelService>, KernelConfig) {
        let config = KernelConfig::default();
        let kernel = Arc::new(KernelService::start(transport, &config).await.unwrap());
        let runner = Arc::clone(&kernel);
        tokio::spawn(async move { runner.run().await });
        (kernel, config)
    }

    fn command(id: &str) -> ExecuteRequestContent {
        let mut params = serde_json::Map::new();
        params.insert("x".into(), serde_json::json!(2));
        ExecuteRequestContent {
            command_id: id.into(),
            service: "calc".into(),
            method: "square".into(),
            params,
            ..Default::default()
        }
    }

    // =============================================================================
    // SHELL + IOPUB
    // =============================================================================

    #[tokio::test]
    async fn test_execute_reply_and_broadcast_share_parent() {
        let transport = InMemoryTransport::new();
        let (kernel, config) = start_kernel(&transport).await;

        let iopub = SubscriberNode::connect(&transport, &config.endpoints.iopub)
            .await
            .unwrap();
        iopub.subscribe("").unwrap();
        let client = KernelClient::connect(&transport, &config.endpoints, "alice")
            .await
            .unwrap();

        let reply = timeout(WAIT, client.execute(command("cmd-1")))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.msg_type(), MsgType::ExecuteReply);
        assert!(matches!(
            reply.content,
            Content::ExecuteReply(ref r) if r.status == Status::Ok
        ));
        let parent_id = reply.parent_header.as_ref().unwrap().msg_id.clone();

        let (_, stream) = timeout(WAIT, iopub.receive_message()).await.unwrap().unwrap();
        let (_, result) = timeout(WAIT, iopub.receive_message()).await.unwrap().unwrap();
        assert_eq!(stream.msg_type(), MsgType::Stream);
        assert_eq!(result.msg_type(), MsgType::ExecuteResult);
        assert!(stream.is_reply_to(&parent_id));
        assert!(result.is_reply_to(&parent_id));

        match result.content {
            Content::ExecuteResult(r) => {
                assert_eq!(r.result["command_id"], "cmd-1");
                assert_eq!(r.result["params"]["x"], 2);
            }
            other => panic!("unexpected content {other:?}"),
        }
        assert_eq!(kernel.execution_count(), 1);
    }

    #[tokio::test]
    async fn test_reply_trace_records_kernel_hop() {
        let transport = InMemoryTransport::new();
        let (_kernel, config) = start_kernel(&transport).await;
        let client = KernelClient::connect(&transport, &config.endpoints, "alice")
            .await
            .unwrap();

        let reply = timeout(WAIT, client.execute(command("traced")))
            .await
            .unwrap()
            .unwrap();
        let trace = reply.trace.expect("reply carries a trace");
        let hop = trace.hops.last().unwrap();
        assert_eq!(hop.service_id, config.service.service_id);
        assert_eq!(hop.service_name, config.service.service_name);
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_answered_and_kernel_keeps_serving() {
        let transport = InMemoryTransport::new();
        let (_kernel, config) = start_kernel(&transport).await;
        let raw = DealerNode::connect(&transport, &config.endpoints.shell)
            .await
            .unwrap();

        // Valid JSON, unknown message type.
        let bogus = serde_json::json!({
            "header": {
                "msg_id": "m1",
                "session_id": "s",
                "user_id": "u",
                "timestamp": "2024-01-01T00:00:00Z",
                "msg_type": "shutdown_request",
                "transport": "zmq",
                "version": "0.4"
            },
            "content": {}
        });
        raw.send_to_server(serde_json::to_vec(&bogus).unwrap())
            .await
            .unwrap();
        let payload = timeout(WAIT, raw.receive_from_server()).await.unwrap().unwrap();
        let err: ProtocolError = serde_json::from_slice(&payload).unwrap();
        assert_eq!(err.code, codes::INVALID_MESSAGE_TYPE);
        assert!(parse_message(&payload).is_err());

        let client = KernelClient::connect(&transport, &config.endpoints, "alice")
            .await
            .unwrap();
        let info = timeout(WAIT, client.core_info()).await.unwrap().unwrap();
        assert_eq!(info.core_status, "running");
    }

    // =============================================================================
    // BRIDGE
    // =============================================================================

    #[tokio::test]
    async fn test_bridge_clients_receive_kernel_output() {
        let transport = InMemoryTransport::new();
        let (_kernel, config) = start_kernel(&transport).await;

        let registry = Arc::new(ClientRegistry::new());
        let (_a, mut rx_a) = registry.register();
        let (b, mut rx_b) = registry.register();
        let bridge = IopubBridge::connect(&transport, &config.endpoints.iopub, Arc::clone(&registry))
            .await
            .unwrap();
        tokio::spawn(async move { bridge.run().await });

        let client = KernelClient::connect(&transport, &config.endpoints, "alice")
            .await
            .unwrap();
        timeout(WAIT, client.execute(command("bridged")))
            .await
            .unwrap()
            .unwrap();

        for rx in [&mut rx_a, &mut rx_b] {
            let first: Bytes = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
            let msg = parse_message(&first).unwrap();
            assert_eq!(msg.msg_type(), MsgType::Stream);
        }

        // A client that leaves stops receiving; the rest are unaffected.
        assert!(registry.unregister(b));
        timeout(WAIT, client.execute(command("again")))
            .await
            .unwrap()
            .unwrap();
        let _result = timeout(WAIT, rx_a.recv()).await.unwrap().unwrap();
        let next = timeout(WAIT, rx_a.recv()).await.unwrap().unwrap();
        assert_eq!(parse_message(&next).unwrap().msg_type(), MsgType::Stream);
        assert_eq!(registry.len(), 1);
    }
}
