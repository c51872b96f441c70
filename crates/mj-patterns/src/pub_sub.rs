//! # Pub / Sub
//!
//! Topic broadcast without access control. Messages are `[topic, payload]`;
//! a single-frame message is a bare topic with an empty payload (the
//! heartbeat uses this form).

use crate::error::PatternError;
use crate::wire::{decode_envelope, encode_envelope};
use bytes::Bytes;
use mj_protocol::Message;
use mj_transport::{Multipart, Socket, SocketType, Transport};
use tracing::{debug, info, trace};

pub struct PublisherNode {
    socket: Box<dyn Socket>,
}

impl PublisherNode {
    pub async fn bind(transport: &dyn Transport, address: &str) -> Result<Self, PatternError> {
        let socket = transport.bind(SocketType::Pub, address).await?;
        info!(address, "Publisher bound");
        Ok(Self { socket })
    }

    /// Send `[topic, payload]` to every subscriber whose prefix matches.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes> + Send,
    ) -> Result<(), PatternError> {
        trace!(topic, "Publishing");
        self.socket
            .send(vec![Bytes::copy_from_slice(topic.as_bytes()), payload.into()])
            .await?;
        Ok(())
    }

    /// Send a single frame holding only `topic`.
    pub async fn publish_topic(&self, topic: &str) -> Result<(), PatternError> {
        self.socket
            .send(vec![Bytes::copy_from_slice(topic.as_bytes())])
            .await?;
        Ok(())
    }

    pub async fn publish_message(&self, topic: &str, msg: &Message) -> Result<(), PatternError> {
        let payload = encode_envelope(msg)?;
        self.publish(topic, payload).await
    }
}

pub struct SubscriberNode {
    socket: Box<dyn Socket>,
}

impl SubscriberNode {
    pub async fn connect(transport: &dyn Transport, address: &str) -> Result<Self, PatternError> {
        let socket = transport.connect(SocketType::Sub, address).await?;
        debug!(address, "Subscriber connected");
        Ok(Self { socket })
    }

    /// Receive messages whose topic starts with `topic`.
    pub fn subscribe(&self, topic: &str) -> Result<(), PatternError> {
        self.socket.subscribe(topic.as_bytes())?;
        debug!(topic, "Subscribed");
        Ok(())
    }

    pub fn unsubscribe(&self, topic: &str) -> Result<(), PatternError> {
        self.socket.unsubscribe(topic.as_bytes())?;
        debug!(topic, "Unsubscribed");
        Ok(())
    }

    /// Next `(topic, payload)`.
    pub async fn receive(&self) -> Result<(String, Bytes), PatternError> {
        let frames = self.socket.recv().await?;
        split_topic(frames)
    }

    pub async fn receive_message(&self) -> Result<(String, Message), PatternError> {
        let (topic, payload) = self.receive().await?;
        let msg = decode_envelope(&payload)?;
        Ok((topic, msg))
    }
}

/// Split a published message into its UTF-8 topic and payload.
pub(crate) fn split_topic(frames: Multipart) -> Result<(String, Bytes), PatternError> {
    let mut frames = frames.into_iter();
    let Some(topic) = frames.next() else {
        return Err(PatternError::invalid_format("empty message"));
    };
    let topic = String::from_utf8(topic.to_vec())
        .map_err(|_| PatternError::invalid_format("topic is not UTF-8"))?;
    let payload = frames.next().unwrap_or_default();
    Ok((topic, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mj_protocol::errors::codes;
    use mj_protocol::{MessageBuilder, MsgType, StreamContent, StreamType, Transport as Channel};
    use mj_transport::InMemoryTransport;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_millis(200);

    #[tokio::test]
    async fn test_topic_filtering() {
        let transport = InMemoryTransport::new();
        let publisher = PublisherNode::bind(&transport, "inproc://iopub").await.unwrap();
        let subscriber = SubscriberNode::connect(&transport, "inproc://iopub")
            .await
            .unwrap();
        subscriber.subscribe("Topic1").unwrap();

        publisher.publish("Topic2", "skipped").await.unwrap();
        publisher.publish("Topic1", "Message 0").await.unwrap();

        let (topic, payload) = timeout(WAIT, subscriber.receive()).await.unwrap().unwrap();
        assert_eq!(topic, "Topic1");
        assert_eq!(payload, Bytes::from_static(b"Message 0"));
    }

    #[tokio::test]
    async fn test_bare_topic_has_empty_payload() {
        let transport = InMemoryTransport::new();
        let publisher = PublisherNode::bind(&transport, "inproc://hb").await.unwrap();
        let subscriber = SubscriberNode::connect(&transport, "inproc://hb").await.unwrap();
        subscriber.subscribe("heartbeat").unwrap();

        publisher.publish_topic("heartbeat").await.unwrap();
        let (topic, payload) = subscriber.receive().await.unwrap();
        assert_eq!(topic, "heartbeat");
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn test_envelope_broadcast() {
        let transport = InMemoryTransport::new();
        let publisher = PublisherNode::bind(&transport, "inproc://iopub").await.unwrap();
        let subscriber = SubscriberNode::connect(&transport, "inproc://iopub")
            .await
            .unwrap();
        subscriber.subscribe("").unwrap();

        let msg = MessageBuilder::new()
            .with_type(MsgType::Stream)
            .with_session("s")
            .with_user("kernel")
            .with_transport(Channel::Zmq)
            .with_content(StreamContent {
                stream_type: StreamType::Stdout,
                text: "hello\n".into(),
            })
            .build()
            .unwrap();
        publisher.publish_message("stream", &msg).await.unwrap();

        let (topic, received) = subscriber.receive_message().await.unwrap();
        assert_eq!(topic, "stream");
        assert_eq!(received.msg_id(), msg.msg_id());
    }

    #[test]
    fn test_split_topic_rejects_non_utf8() {
        let err = split_topic(vec![Bytes::from_static(&[0xff, 0xfe])]).unwrap_err();
        assert_eq!(err.code(), codes::INVALID_FORMAT);
    }
}
