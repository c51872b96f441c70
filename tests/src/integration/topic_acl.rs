//! # Topic ACL Flows
//!
//! The kernel's permission-checked channel, driven through real executions:
//!
//! - configured permissions gate who can subscribe
//! - runtime changes apply to later subscriptions only
//! - rejected subscribers never see a frame
//! - a prefix covering a restricted topic is rejected as a whole

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    use mj_kernel::{KernelClient, KernelConfig, KernelService, TopicPermissionConfig};
    use mj_patterns::XSubscriberNode;
    use mj_protocol::{parse_message, ExecuteRequestContent, MsgType};
    use mj_transport::InMemoryTransport;

    const WAIT: Duration = Duration::from_millis(200);
    const TOPIC: &str = "execute_result";

    async fn start_kernel(transport: &InMemoryTransport) -> (Arc<KernelService>, KernelConfig) {
        let mut config = KernelConfig::default();
        config.permissions = vec![TopicPermissionConfig {
            topic: TOPIC.into(),
            allowed_users: vec!["alice".into()],
        }];
        let kernel = Arc::new(KernelService::start(transport, &config).await.unwrap());
        let runner = Arc::clone(&kernel);
        tokio::spawn(async move { runner.run().await });
        (kernel, config)
    }

    fn command() -> ExecuteRequestContent {
        ExecuteRequestContent {
            command_id: "acl".into(),
            service: "svc".into(),
            method: "run".into(),
            ..Default::default()
        }
    }

    /// Execute until `subscriber` sees an `execute_result`; the subscription
    /// is applied asynchronously by the kernel's topic loop.
    async fn execute_until_delivered(client: &KernelClient, subscriber: &XSubscriberNode) {
        timeout(Duration::from_secs(2), async {
            loop {
                client.execute(command()).await.unwrap();
                if let Ok(Ok((topic, payload))) =
                    timeout(Duration::from_millis(20), subscriber.receive()).await
                {
                    assert_eq!(topic, TOPIC);
                    let msg = parse_message(&payload).unwrap();
                    assert_eq!(msg.msg_type(), MsgType::ExecuteResult);
                    return;
                }
            }
        })
        .await
        .expect("subscription never took effect");
    }

    #[tokio::test]
    async fn test_configured_permission_filters_subscribers() {
        let transport = InMemoryTransport::new();
        let (kernel, config) = start_kernel(&transport).await;
        assert!(kernel.topics().has_permission(TOPIC, "alice"));
        assert!(!kernel.topics().has_permission(TOPIC, "eve"));

        let eve = XSubscriberNode::connect(&transport, &config.endpoints.topics, "eve")
            .await
            .unwrap();
        let alice = XSubscriberNode::connect(&transport, &config.endpoints.topics, "alice")
            .await
            .unwrap();
        eve.subscribe(TOPIC).await.unwrap();
        alice.subscribe(TOPIC).await.unwrap();

        let client = KernelClient::connect(&transport, &config.endpoints, "alice")
            .await
            .unwrap();
        execute_until_delivered(&client, &alice).await;

        assert!(timeout(WAIT, eve.receive()).await.is_err());
        // Tracking on the subscriber side never learns of the rejection.
        assert_eq!(eve.topics(), [TOPIC]);
    }

    #[tokio::test]
    async fn test_catch_all_prefix_is_rejected_for_unlisted_user() {
        let transport = InMemoryTransport::new();
        let (_kernel, config) = start_kernel(&transport).await;

        let eve = XSubscriberNode::connect(&transport, &config.endpoints.topics, "eve")
            .await
            .unwrap();
        let alice = XSubscriberNode::connect(&transport, &config.endpoints.topics, "alice")
            .await
            .unwrap();
        eve.subscribe("").await.unwrap();
        eve.subscribe("exec").await.unwrap();
        alice.subscribe(TOPIC).await.unwrap();

        let client = KernelClient::connect(&transport, &config.endpoints, "alice")
            .await
            .unwrap();
        execute_until_delivered(&client, &alice).await;

        assert!(timeout(WAIT, eve.receive()).await.is_err());
    }

    #[tokio::test]
    async fn test_unrestricted_topic_is_open_to_everyone() {
        let transport = InMemoryTransport::new();
        let (_kernel, config) = start_kernel(&transport).await;

        let eve = XSubscriberNode::connect(&transport, &config.endpoints.topics, "eve")
            .await
            .unwrap();
        eve.subscribe("stream").await.unwrap();

        let client = KernelClient::connect(&transport, &config.endpoints, "eve")
            .await
            .unwrap();
        let received = timeout(Duration::from_secs(2), async {
            loop {
                client.execute(command()).await.unwrap();
                if let Ok(Ok(msg)) = timeout(Duration::from_millis(20), eve.receive()).await {
                    return msg;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(received.0, "stream");
    }

    #[tokio::test]
    async fn test_runtime_permission_change_applies_to_new_subscriptions() {
        let transport = InMemoryTransport::new();
        let (kernel, config) = start_kernel(&transport).await;
        let client = KernelClient::connect(&transport, &config.endpoints, "alice")
            .await
            .unwrap();

        let alice = XSubscriberNode::connect(&transport, &config.endpoints.topics, "alice")
            .await
            .unwrap();
        alice.subscribe(TOPIC).await.unwrap();
        execute_until_delivered(&client, &alice).await;

        // Revoking alice does not cut her existing subscription.
        kernel.topics().set_topic_permission(TOPIC, ["bob"]);
        client.execute(command()).await.unwrap();
        assert!(timeout(WAIT, alice.receive()).await.unwrap().is_ok());

        // Lifting the restriction admits a newcomer.
        kernel.topics().remove_topic_permission(TOPIC);
        let eve = XSubscriberNode::connect(&transport, &config.endpoints.topics, "eve")
            .await
            .unwrap();
        eve.subscribe(TOPIC).await.unwrap();
        execute_until_delivered(&client, &eve).await;
    }
}
