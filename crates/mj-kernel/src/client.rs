//! # Kernel Client
//!
//! Shell-side counterpart of [`KernelService`](crate::KernelService): builds
//! request envelopes for one session and waits for the matching reply.

use crate::config::EndpointConfig;
use crate::error::KernelError;
use crate::kernel::PARENT_MSG_ID;
use mj_patterns::{decode_envelope, encode_envelope, DealerNode, Pinger};
use mj_protocol::{
    generate_id, Content, CoreInfoReplyContent, ExecuteRequestContent, Message, MessageBuilder,
    ProtocolError, Transport as Channel,
};
use mj_transport::Transport;
use serde_json::Map;
use std::time::Duration;
use tracing::debug;

pub struct KernelClient {
    shell: DealerNode,
    pinger: Pinger,
    session_id: String,
    user_id: String,
}

impl KernelClient {
    /// Connect to the kernel's shell socket as `user_id`, in a fresh session.
    pub async fn connect(
        transport: &dyn Transport,
        endpoints: &EndpointConfig,
        user_id: &str,
    ) -> Result<Self, KernelError> {
        let shell = DealerNode::connect(transport, &endpoints.shell).await?;
        let pinger = Pinger::connect(transport, &endpoints.shell).await?;
        Ok(Self {
            shell,
            pinger,
            session_id: generate_id(),
            user_id: user_id.to_string(),
        })
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Submit an execute request and wait for its `execute_reply`.
    pub async fn execute(&self, content: ExecuteRequestContent) -> Result<Message, KernelError> {
        self.request(content).await
    }

    pub async fn core_info(&self) -> Result<CoreInfoReplyContent, KernelError> {
        let reply = self.request(Content::CoreInfoRequest(Map::new())).await?;
        match reply.content {
            Content::CoreInfoReply(info) => Ok(info),
            other => Err(ProtocolError::invalid_message_type()
                .with_details(serde_json::json!({ "msg_type": other.msg_type().as_str() }))
                .into()),
        }
    }

    /// Send a one-way message (comms). The kernel never answers these.
    pub async fn send(&self, content: impl Into<Content>) -> Result<Message, KernelError> {
        let msg = self.envelope(content)?;
        self.shell.send_message(&msg).await?;
        Ok(msg)
    }

    /// Round trip of a `PING` on the shell socket.
    pub async fn ping(&self) -> Result<Duration, KernelError> {
        Ok(self.pinger.ping().await?)
    }

    fn envelope(&self, content: impl Into<Content>) -> Result<Message, ProtocolError> {
        let content = content.into();
        MessageBuilder::new()
            .with_type(content.msg_type())
            .with_session(self.session_id.as_str())
            .with_user(self.user_id.as_str())
            .with_transport(Channel::Zmq)
            .with_content(content)
            .build()
    }

    /// The kernel answers with either an envelope or a bare serialized
    /// `ProtocolError`; the latter rejects the outstanding request unless it
    /// names a different one. Rejections of undecodable requests name none.
    async fn request(&self, content: impl Into<Content>) -> Result<Message, KernelError> {
        let msg = self.envelope(content)?;
        self.shell.send_to_server(encode_envelope(&msg)?).await?;
        loop {
            let payload = self.shell.receive_from_server().await?;
            if let Ok(rejected) = serde_json::from_slice::<ProtocolError>(&payload) {
                match rejection_parent(&rejected) {
                    Some(parent) if parent != msg.msg_id() => {
                        debug!(parent, "Discarding rejection of an earlier request");
                        continue;
                    }
                    _ => return Err(KernelError::Rejected(rejected)),
                }
            }
            let reply = decode_envelope(&payload)?;
            if reply.is_reply_to(msg.msg_id()) {
                return Ok(reply);
            }
            debug!(msg_id = %reply.msg_id(), "Discarding unrelated reply");
        }
    }
}

fn rejection_parent(err: &ProtocolError) -> Option<&str> {
    err.details.as_ref()?.get(PARENT_MSG_ID)?.as_str()
}
