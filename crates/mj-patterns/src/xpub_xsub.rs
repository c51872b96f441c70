//! # XPub / XSub
//!
//! Topic broadcast with a per-topic allow-list checked at subscribe time.
//!
//! ## Control frame
//!
//! ```text
//! ┌──────┬─────────────────────┐
//! │ flag │ user_id "|" topic   │   flag: 1 = subscribe, 0 = unsubscribe
//! └──────┴─────────────────────┘
//! ```
//!
//! The XPUB side decodes each control frame, checks the permission table
//! for subscribes, and only then hands the subscription to the transport
//! for the peer that sent the frame. Subscriptions are prefixes, so a
//! subscribe is denied when any restricted topic it would match does not
//! list the user. Topics with no entry are open to everyone. Permission
//! changes affect later subscribe attempts only; existing subscriptions are
//! not revoked.
//!
//! Neither `user_id` nor `topic` may contain the `|` separator.

use crate::error::PatternError;
use crate::pub_sub::split_topic;
use crate::wire::encode_envelope;
use bytes::{BufMut, Bytes, BytesMut};
use mj_protocol::{Message, ProtocolError};
use mj_telemetry::SUBSCRIPTIONS;
use mj_transport::{PeerId, Socket, SocketType, Transport};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

const SEPARATOR: char = '|';

/// A decoded subscribe/unsubscribe control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub subscribe: bool,
    pub user_id: String,
    pub topic: String,
}

impl SubscriptionRequest {
    #[must_use]
    pub fn subscribe(user_id: &str, topic: &str) -> Self {
        Self {
            subscribe: true,
            user_id: user_id.to_string(),
            topic: topic.to_string(),
        }
    }

    #[must_use]
    pub fn unsubscribe(user_id: &str, topic: &str) -> Self {
        Self {
            subscribe: false,
            ..Self::subscribe(user_id, topic)
        }
    }

    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.user_id.len() + self.topic.len());
        buf.put_u8(u8::from(self.subscribe));
        buf.put_slice(self.user_id.as_bytes());
        buf.put_u8(SEPARATOR as u8);
        buf.put_slice(self.topic.as_bytes());
        buf.freeze()
    }

    /// Decode a control frame.
    ///
    /// Fails with INVALID_FORMAT for frames shorter than two bytes, a flag
    /// other than 0 or 1, a non UTF-8 payload, or a payload without exactly
    /// one separator.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtocolError> {
        let [flag, payload @ ..] = frame else {
            return Err(malformed("empty frame"));
        };
        if payload.is_empty() {
            return Err(malformed("frame too short"));
        }
        let subscribe = match *flag {
            1 => true,
            0 => false,
            _ => return Err(malformed("unknown subscription flag")),
        };
        let payload =
            std::str::from_utf8(payload).map_err(|_| malformed("payload is not UTF-8"))?;

        let mut parts = payload.split(SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(user_id), Some(topic), None) => Ok(Self {
                subscribe,
                user_id: user_id.to_string(),
                topic: topic.to_string(),
            }),
            _ => Err(malformed("expected user_id|topic")),
        }
    }
}

fn malformed(reason: &str) -> ProtocolError {
    ProtocolError::invalid_format().with_details(json!({ "reason": reason }))
}

/// Reject values that would not survive the control frame encoding.
fn check_field(field: &str, value: &str) -> Result<(), ProtocolError> {
    if value.contains(SEPARATOR) {
        return Err(ProtocolError::invalid_params().with_details(json!({
            "field": field,
            "reason": "must not contain '|'",
        })));
    }
    Ok(())
}

/// Topic allow-lists. Reads are shared, writes exclusive.
#[derive(Debug, Default)]
pub struct TopicPermissions {
    topics: RwLock<HashMap<String, HashSet<String>>>,
}

impl TopicPermissions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the allow-list for `topic`. An empty list admits nobody.
    pub fn set<I, S>(&self, topic: &str, allowed_users: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let users = allowed_users.into_iter().map(Into::into).collect();
        self.topics.write().insert(topic.to_string(), users);
    }

    /// Drop the allow-list; the topic becomes open again.
    pub fn remove(&self, topic: &str) {
        self.topics.write().remove(topic);
    }

    #[must_use]
    pub fn has_permission(&self, topic: &str, user_id: &str) -> bool {
        self.topics
            .read()
            .get(topic)
            .map_or(true, |users| users.contains(user_id))
    }

    /// Restricted topics that a subscription to `prefix` would match but
    /// `user_id` is not listed on, sorted.
    #[must_use]
    pub fn denied_topics(&self, prefix: &str, user_id: &str) -> Vec<String> {
        let mut denied: Vec<_> = self
            .topics
            .read()
            .iter()
            .filter(|(topic, users)| topic.starts_with(prefix) && !users.contains(user_id))
            .map(|(topic, _)| topic.clone())
            .collect();
        denied.sort();
        denied
    }

    /// Whether `user_id` may subscribe to the prefix `prefix`.
    #[must_use]
    pub fn may_subscribe(&self, prefix: &str, user_id: &str) -> bool {
        self.denied_topics(prefix, user_id).is_empty()
    }

    /// Sorted allow-list for `topic`, or `None` when the topic is open.
    #[must_use]
    pub fn allowed_users(&self, topic: &str) -> Option<Vec<String>> {
        self.topics.read().get(topic).map(|users| {
            let mut users: Vec<_> = users.iter().cloned().collect();
            users.sort();
            users
        })
    }
}

/// Server side: binds an XPUB socket and gates subscriptions.
pub struct XPublisherNode {
    socket: Box<dyn Socket>,
    permissions: TopicPermissions,
}

impl XPublisherNode {
    pub async fn bind(transport: &dyn Transport, address: &str) -> Result<Self, PatternError> {
        let socket = transport.bind(SocketType::XPub, address).await?;
        info!(address, "XPublisher bound");
        Ok(Self {
            socket,
            permissions: TopicPermissions::new(),
        })
    }

    pub fn set_topic_permission<I, S>(&self, topic: &str, allowed_users: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions.set(topic, allowed_users);
        debug!(topic, "Topic permission set");
    }

    pub fn remove_topic_permission(&self, topic: &str) {
        self.permissions.remove(topic);
        debug!(topic, "Topic permission removed");
    }

    #[must_use]
    pub fn has_permission(&self, topic: &str, user_id: &str) -> bool {
        self.permissions.has_permission(topic, user_id)
    }

    #[must_use]
    pub fn permissions(&self) -> &TopicPermissions {
        &self.permissions
    }

    /// Send `[topic, payload]` to the peers subscribed to `topic`.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes> + Send,
    ) -> Result<(), PatternError> {
        self.socket
            .send(vec![Bytes::copy_from_slice(topic.as_bytes()), payload.into()])
            .await?;
        Ok(())
    }

    pub async fn publish_message(&self, topic: &str, msg: &Message) -> Result<(), PatternError> {
        let payload = encode_envelope(msg)?;
        self.publish(topic, payload).await
    }

    /// Next control frame and the peer that sent it.
    pub async fn receive_subscription(&self) -> Result<(PeerId, Bytes), PatternError> {
        let (peer, frames) = self.socket.recv_control().await?;
        let frame = frames
            .into_iter()
            .next()
            .ok_or_else(|| PatternError::invalid_format("empty control message"))?;
        Ok((peer, frame))
    }

    /// Decode, authorize and apply one control frame sent by `peer`.
    ///
    /// A denied subscribe fails with INSUFFICIENT_PERMISSIONS and leaves the
    /// transport untouched. Unsubscribes are always applied.
    pub fn handle_subscription(
        &self,
        peer: PeerId,
        frame: &[u8],
    ) -> Result<SubscriptionRequest, PatternError> {
        let request = SubscriptionRequest::decode(frame).inspect_err(|_| {
            SUBSCRIPTIONS.with_label_values(&["malformed"]).inc();
        })?;

        if request.subscribe {
            let denied = self
                .permissions
                .denied_topics(&request.topic, &request.user_id);
            if !denied.is_empty() {
                SUBSCRIPTIONS.with_label_values(&["rejected"]).inc();
                return Err(ProtocolError::insufficient_permissions()
                    .with_details(json!({
                        "user_id": request.user_id,
                        "topic": request.topic,
                        "denied_topics": denied,
                    }))
                    .into());
            }
        }

        self.socket
            .apply_subscription(peer, request.subscribe, request.topic.as_bytes())?;

        let outcome = if request.subscribe {
            "accepted"
        } else {
            "unsubscribed"
        };
        SUBSCRIPTIONS.with_label_values(&[outcome]).inc();
        debug!(
            peer,
            user_id = %request.user_id,
            topic = %request.topic,
            subscribe = request.subscribe,
            "Subscription applied"
        );
        Ok(request)
    }

    /// Process control frames until the socket closes. Rejections are
    /// logged and the loop continues.
    pub async fn run(&self) -> Result<(), PatternError> {
        loop {
            let (peer, frame) = match self.receive_subscription().await {
                Ok(received) => received,
                Err(e) if e.is_closed() => return Ok(()),
                Err(e) => {
                    warn!(code = e.code(), error = %e, "Bad control message");
                    continue;
                }
            };
            if let Err(e) = self.handle_subscription(peer, &frame) {
                warn!(code = e.code(), error = %e, "Subscription rejected");
            }
        }
    }
}

/// Client side: connects an XSUB socket on behalf of one user.
///
/// `user_id` and topics are checked for the `|` separator before anything
/// is sent. The topic list is tracked locally when a control frame is sent. The
/// publisher never acknowledges, so a rejected subscribe still shows up
/// in [`XSubscriberNode::topics`].
pub struct XSubscriberNode {
    socket: Box<dyn Socket>,
    user_id: String,
    topics: Mutex<Vec<String>>,
}

impl XSubscriberNode {
    pub async fn connect(
        transport: &dyn Transport,
        address: &str,
        user_id: &str,
    ) -> Result<Self, PatternError> {
        check_field("user_id", user_id)?;
        let socket = transport.connect(SocketType::XSub, address).await?;
        debug!(address, user_id, "XSubscriber connected");
        Ok(Self {
            socket,
            user_id: user_id.to_string(),
            topics: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub async fn subscribe(&self, topic: &str) -> Result<(), PatternError> {
        check_field("topic", topic)?;
        let frame = SubscriptionRequest::subscribe(&self.user_id, topic).encode();
        self.socket.send(vec![frame]).await?;
        self.topics.lock().push(topic.to_string());
        Ok(())
    }

    pub async fn unsubscribe(&self, topic: &str) -> Result<(), PatternError> {
        check_field("topic", topic)?;
        let frame = SubscriptionRequest::unsubscribe(&self.user_id, topic).encode();
        self.socket.send(vec![frame]).await?;
        let mut topics = self.topics.lock();
        if let Some(pos) = topics.iter().position(|t| t == topic) {
            topics.remove(pos);
        }
        Ok(())
    }

    /// Topics this node has asked for.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().clone()
    }

    /// Next `(topic, payload)`.
    pub async fn receive(&self) -> Result<(String, Bytes), PatternError> {
        let frames = self.socket.recv().await?;
        split_topic(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mj_protocol::errors::codes;
    use mj_transport::InMemoryTransport;
    use proptest::prelude::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_millis(200);

    #[test]
    fn test_decode_subscribe() {
        let req = SubscriptionRequest::decode(b"\x01alice|news").unwrap();
        assert_eq!(req, SubscriptionRequest::subscribe("alice", "news"));
    }

    #[test]
    fn test_decode_rejects_malformed_frames() {
        let frames: [&[u8]; 6] = [
            b"",
            b"\x01",
            b"\x02alice|news",
            b"\x01alice-news",
            b"\x01a|b|c",
            b"\x01\xff|news",
        ];
        for frame in frames {
            let err = SubscriptionRequest::decode(frame).unwrap_err();
            assert_eq!(err.code, codes::INVALID_FORMAT, "frame {frame:?}");
        }
    }

    #[test]
    fn test_permissions_default_allow() {
        let perms = TopicPermissions::new();
        assert!(perms.has_permission("news", "anyone"));
        assert_eq!(perms.allowed_users("news"), None);
    }

    #[test]
    fn test_permissions_set_and_remove() {
        let perms = TopicPermissions::new();
        perms.set("secret", ["bob", "alice"]);
        assert!(perms.has_permission("secret", "alice"));
        assert!(!perms.has_permission("secret", "eve"));
        assert_eq!(
            perms.allowed_users("secret"),
            Some(vec!["alice".to_string(), "bob".to_string()])
        );

        perms.set("secret", Vec::<String>::new());
        assert!(!perms.has_permission("secret", "alice"));

        perms.remove("secret");
        assert!(perms.has_permission("secret", "eve"));
    }

    #[test]
    fn test_prefix_covering_restricted_topic_is_denied() {
        let perms = TopicPermissions::new();
        perms.set("secret", ["alice"]);
        perms.set("security", Vec::<String>::new());

        assert_eq!(perms.denied_topics("", "eve"), ["secret", "security"]);
        assert_eq!(perms.denied_topics("sec", "alice"), ["security"]);
        assert!(!perms.may_subscribe("secr", "eve"));
        assert!(perms.may_subscribe("secr", "alice"));
        assert!(perms.may_subscribe("secrets", "eve"));
        assert!(perms.may_subscribe("news", "eve"));
    }

    proptest! {
        #[test]
        fn prop_encode_decode(subscribe: bool, user in "[a-z0-9_]{0,12}", topic in "[a-z0-9./]{0,24}") {
            let req = SubscriptionRequest { subscribe, user_id: user, topic };
            prop_assert_eq!(SubscriptionRequest::decode(&req.encode()).unwrap(), req);
        }
    }

    async fn setup(transport: &InMemoryTransport) -> XPublisherNode {
        let xpub = XPublisherNode::bind(transport, "inproc://xpub").await.unwrap();
        xpub.set_topic_permission("secret", ["alice"]);
        xpub
    }

    #[tokio::test]
    async fn test_denied_subscribe_is_not_forwarded() {
        let transport = InMemoryTransport::new();
        let xpub = setup(&transport).await;
        let eve = XSubscriberNode::connect(&transport, "inproc://xpub", "eve")
            .await
            .unwrap();

        eve.subscribe("secret").await.unwrap();
        let (peer, frame) = xpub.receive_subscription().await.unwrap();
        let err = xpub.handle_subscription(peer, &frame).unwrap_err();
        assert_eq!(err.code(), codes::INSUFFICIENT_PERMISSIONS);

        // Local tracking is optimistic.
        assert_eq!(eve.topics(), ["secret"]);

        xpub.publish("secret", "classified").await.unwrap();
        assert!(timeout(WAIT, eve.receive()).await.is_err());
    }

    #[tokio::test]
    async fn test_allowed_subscribe_receives() {
        let transport = InMemoryTransport::new();
        let xpub = setup(&transport).await;
        let alice = XSubscriberNode::connect(&transport, "inproc://xpub", "alice")
            .await
            .unwrap();

        alice.subscribe("secret").await.unwrap();
        let (peer, frame) = xpub.receive_subscription().await.unwrap();
        let req = xpub.handle_subscription(peer, &frame).unwrap();
        assert!(req.subscribe);

        xpub.publish("secret", "classified").await.unwrap();
        let (topic, payload) = timeout(WAIT, alice.receive()).await.unwrap().unwrap();
        assert_eq!(topic, "secret");
        assert_eq!(payload, Bytes::from_static(b"classified"));

        alice.unsubscribe("secret").await.unwrap();
        let (peer, frame) = xpub.receive_subscription().await.unwrap();
        assert!(!xpub.handle_subscription(peer, &frame).unwrap().subscribe);
        assert!(alice.topics().is_empty());

        xpub.publish("secret", "again").await.unwrap();
        assert!(timeout(WAIT, alice.receive()).await.is_err());
    }

    #[tokio::test]
    async fn test_permission_change_is_not_retroactive() {
        let transport = InMemoryTransport::new();
        let xpub = setup(&transport).await;
        let alice = XSubscriberNode::connect(&transport, "inproc://xpub", "alice")
            .await
            .unwrap();

        alice.subscribe("secret").await.unwrap();
        let (peer, frame) = xpub.receive_subscription().await.unwrap();
        xpub.handle_subscription(peer, &frame).unwrap();

        xpub.set_topic_permission("secret", ["bob"]);
        xpub.publish("secret", "still delivered").await.unwrap();
        assert!(timeout(WAIT, alice.receive()).await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_run_loop_continues_after_rejection() {
        let transport = InMemoryTransport::new();
        let xpub = std::sync::Arc::new(setup(&transport).await);
        let eve = XSubscriberNode::connect(&transport, "inproc://xpub", "eve")
            .await
            .unwrap();
        let alice = XSubscriberNode::connect(&transport, "inproc://xpub", "alice")
            .await
            .unwrap();

        let runner = {
            let xpub = xpub.clone();
            tokio::spawn(async move { xpub.run().await })
        };

        eve.subscribe("secret").await.unwrap();
        alice.subscribe("secret").await.unwrap();

        // Wait until the run loop has applied alice's subscription.
        let delivered = timeout(Duration::from_secs(1), async {
            loop {
                xpub.publish("secret", "hi").await.unwrap();
                if let Ok(Ok(msg)) = timeout(Duration::from_millis(10), alice.receive()).await {
                    break msg;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(delivered.0, "secret");
        assert!(timeout(WAIT, eve.receive()).await.is_err());
        runner.abort();
    }

    #[tokio::test]
    async fn test_prefix_subscribe_cannot_bypass_restriction() {
        let transport = InMemoryTransport::new();
        let xpub = setup(&transport).await;
        let eve = XSubscriberNode::connect(&transport, "inproc://xpub", "eve")
            .await
            .unwrap();

        for prefix in ["", "sec"] {
            eve.subscribe(prefix).await.unwrap();
            let (peer, frame) = xpub.receive_subscription().await.unwrap();
            let err = xpub.handle_subscription(peer, &frame).unwrap_err();
            assert_eq!(err.code(), codes::INSUFFICIENT_PERMISSIONS, "prefix {prefix:?}");
        }

        xpub.publish("secret", "classified").await.unwrap();
        assert!(timeout(WAIT, eve.receive()).await.is_err());
    }

    #[tokio::test]
    async fn test_subscription_applies_to_its_sender() {
        let transport = InMemoryTransport::new();
        let xpub = setup(&transport).await;
        let eve = XSubscriberNode::connect(&transport, "inproc://xpub", "eve")
            .await
            .unwrap();
        let alice = XSubscriberNode::connect(&transport, "inproc://xpub", "alice")
            .await
            .unwrap();

        eve.subscribe("news").await.unwrap();
        alice.subscribe("other").await.unwrap();
        let (eve_peer, eve_frame) = xpub.receive_subscription().await.unwrap();
        let (alice_peer, alice_frame) = xpub.receive_subscription().await.unwrap();

        // Handled out of arrival order.
        xpub.handle_subscription(alice_peer, &alice_frame).unwrap();
        xpub.handle_subscription(eve_peer, &eve_frame).unwrap();

        xpub.publish("news", "headline").await.unwrap();
        let (topic, _) = timeout(WAIT, eve.receive()).await.unwrap().unwrap();
        assert_eq!(topic, "news");
        assert!(timeout(WAIT, alice.receive()).await.is_err());
    }

    #[tokio::test]
    async fn test_separator_rejected_before_sending() {
        let transport = InMemoryTransport::new();
        let xpub = setup(&transport).await;

        let err = XSubscriberNode::connect(&transport, "inproc://xpub", "eve|secret")
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), codes::INVALID_PARAMS);

        let eve = XSubscriberNode::connect(&transport, "inproc://xpub", "eve")
            .await
            .unwrap();
        let err = eve.subscribe("news|x").await.unwrap_err();
        assert_eq!(err.code(), codes::INVALID_PARAMS);
        assert!(eve.unsubscribe("a|b").await.is_err());
        assert!(eve.topics().is_empty());

        // Nothing reached the publisher.
        assert!(timeout(WAIT, xpub.receive_subscription()).await.is_err());
    }
}
