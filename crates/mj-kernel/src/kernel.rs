//! # Kernel Service
//!
//! Owns four endpoints and one shared handler.
//!
//! ```text
//!              ┌──────────────── KernelService ────────────────┐
//!  DEALER ───▶ │ shell (ROUTER) ──▶ handle() ──▶ execute_reply │
//!              │                        │                      │
//!              │                        ├──▶ iopub  (PUB)      │ ───▶ SUB / bridge
//!              │                        └──▶ topics (XPUB+ACL) │ ───▶ XSUB
//!              │ heartbeat (PUB) ── every interval ──▶         │ ───▶ HeartbeatMonitor
//!              └───────────────────────────────────────────────┘
//! ```
//!
//! ## Shell dispatch
//!
//! | Request | Effect | Reply |
//! |---------|--------|-------|
//! | `PING` | | `PONG` |
//! | `execute_request` | `stream` + `execute_result` broadcast | `execute_reply` |
//! | `core_info_request` | | `core_info_reply` |
//! | `comm_open` / `comm_msg` / `comm_close` | forwarded on iopub | none |
//! | anything else | | serialized `ProtocolError` |
//!
//! Undecodable envelopes are answered with the serialized `ProtocolError`
//! and the loop keeps serving. A rejection of a decoded request carries the
//! request's `msg_id` under `details.parent_msg_id`.

use crate::config::{KernelConfig, ServiceConfig};
use crate::error::KernelError;
use async_trait::async_trait;
use bytes::Bytes;
use mj_patterns::{
    answer_ping, decode_envelope, encode_envelope, HeartbeatPublisher, PatternError,
    PublisherNode, RequestHandler, RouterNode, XPublisherNode, PING,
};
use mj_protocol::{
    CommMsgContent, CommOpenContent, Content, CoreInfoReplyContent, ExecuteReplyContent,
    ExecuteRequestContent, ExecuteResultContent, Message, MessageBuilder, MsgType,
    ProtocolError, Status, StreamContent, StreamType, Transport as Channel,
};
use mj_transport::{Frame, Transport};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

pub struct KernelService {
    service: ServiceConfig,
    shell: RouterNode,
    iopub: PublisherNode,
    topics: XPublisherNode,
    heartbeat: HeartbeatPublisher,
    execution_count: AtomicU64,
    /// Shell identities that have sent at least one request.
    peers: Mutex<HashSet<Frame>>,
    /// Open comms: comm_id -> target_name
    comms: Mutex<HashMap<String, String>>,
}

impl KernelService {
    /// Validate `config` and bind every endpoint.
    pub async fn start(
        transport: &dyn Transport,
        config: &KernelConfig,
    ) -> Result<Self, KernelError> {
        config.validate()?;
        let endpoints = &config.endpoints;

        let shell = RouterNode::bind(transport, &endpoints.shell).await?;
        let iopub = PublisherNode::bind(transport, &endpoints.iopub).await?;
        let topics = XPublisherNode::bind(transport, &endpoints.topics).await?;
        for perm in &config.permissions {
            topics.set_topic_permission(&perm.topic, perm.allowed_users.iter().cloned());
        }
        let heartbeat =
            HeartbeatPublisher::bind(transport, &endpoints.heartbeat, config.heartbeat.interval)
                .await?;

        info!(
            service_id = %config.service.service_id,
            shell = %endpoints.shell,
            iopub = %endpoints.iopub,
            topics = %endpoints.topics,
            heartbeat = %endpoints.heartbeat,
            permissions = config.permissions.len(),
            "Kernel started"
        );

        Ok(Self {
            service: config.service.clone(),
            shell,
            iopub,
            topics,
            heartbeat,
            execution_count: AtomicU64::new(0),
            peers: Mutex::new(HashSet::new()),
            comms: Mutex::new(HashMap::new()),
        })
    }

    /// Serve shell requests, topic subscriptions and heartbeats.
    ///
    /// Returns when any endpoint fails fatally or the shell socket closes.
    pub async fn run(&self) -> Result<(), KernelError> {
        tokio::select! {
            res = self.shell.serve(self) => res?,
            res = self.topics.run() => res?,
            res = self.heartbeat.run() => res?,
        }
        info!(service_id = %self.service.service_id, "Kernel stopped");
        Ok(())
    }

    #[must_use]
    pub fn topics(&self) -> &XPublisherNode {
        &self.topics
    }

    #[must_use]
    pub fn execution_count(&self) -> u64 {
        self.execution_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn open_comms(&self) -> usize {
        self.comms.lock().len()
    }

    async fn dispatch(&self, request: &Message) -> Result<Option<Message>, PatternError> {
        match &request.content {
            Content::ExecuteRequest(exec) => self.execute(request, exec).await.map(Some),
            Content::CoreInfoRequest(_) => Ok(Some(self.core_info(request)?)),
            Content::CommOpen(open) => {
                self.comm_open(request, open).await?;
                Ok(None)
            }
            Content::CommMsg(msg) => {
                self.comm_msg(request, msg, false).await?;
                Ok(None)
            }
            Content::CommClose(msg) => {
                self.comm_msg(request, msg, true).await?;
                Ok(None)
            }
            _ => Err(ProtocolError::method_not_found()
                .with_details(json!({ "msg_type": request.msg_type().as_str() }))
                .into()),
        }
    }

    async fn execute(
        &self,
        request: &Message,
        exec: &ExecuteRequestContent,
    ) -> Result<Message, PatternError> {
        let user_id = &request.header.user_id;
        if !exec.allowed_users.is_empty() && !exec.allowed_users.contains(user_id) {
            return Err(ProtocolError::insufficient_permissions()
                .with_details(json!({ "user_id": user_id, "command_id": exec.command_id }))
                .into());
        }

        let count = self.execution_count.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            msg_id = %request.msg_id(),
            command_id = %exec.command_id,
            service = %exec.service,
            method = %exec.method,
            execution_count = count,
            "Executing"
        );

        let stream = self.reply(
            request,
            StreamContent {
                stream_type: StreamType::Stdout,
                text: format!("Executed: {}.{}\n", exec.service, exec.method),
            },
        )?;
        self.broadcast(&stream).await?;

        let result = self.reply(
            request,
            ExecuteResultContent {
                status: Status::Success,
                result: json!({
                    "command_id": exec.command_id,
                    "service": exec.service,
                    "method": exec.method,
                    "params": exec.params,
                    "execution_count": count,
                }),
            },
        )?;
        self.broadcast(&result).await?;

        Ok(self.reply(request, ExecuteReplyContent { status: Status::Ok })?)
    }

    fn core_info(&self, request: &Message) -> Result<Message, ProtocolError> {
        let active_connections = self.peers.lock().len() as i64;
        self.reply(
            request,
            CoreInfoReplyContent {
                status: Status::Ok,
                core_status: "running".to_string(),
                core_version: env!("CARGO_PKG_VERSION").to_string(),
                cpu_usage: String::new(),
                memory_usage: String::new(),
                disk_usage: String::new(),
                network_io: String::new(),
                active_connections,
                running_tasks: 0,
                task_queue_size: 0,
            },
        )
    }

    async fn comm_open(&self, request: &Message, open: &CommOpenContent) -> Result<(), PatternError> {
        let previous = self
            .comms
            .lock()
            .insert(open.comm_id.clone(), open.target_name.clone());
        if previous.is_some() {
            debug!(comm_id = %open.comm_id, "Comm reopened");
        }
        info!(comm_id = %open.comm_id, target = %open.target_name, "Comm opened");
        self.iopub
            .publish_message(request.msg_type().as_str(), request)
            .await
    }

    async fn comm_msg(
        &self,
        request: &Message,
        msg: &CommMsgContent,
        close: bool,
    ) -> Result<(), PatternError> {
        let known = {
            let mut comms = self.comms.lock();
            if close {
                comms.remove(&msg.comm_id).is_some()
            } else {
                comms.contains_key(&msg.comm_id)
            }
        };
        if !known {
            return Err(ProtocolError::comm_failed()
                .with_details(json!({ "comm_id": msg.comm_id, "reason": "unknown comm" }))
                .into());
        }
        if close {
            info!(comm_id = %msg.comm_id, "Comm closed");
        }
        self.iopub
            .publish_message(request.msg_type().as_str(), request)
            .await
    }

    /// Publish on both the open and the permission-checked channel, keyed by
    /// message type.
    async fn broadcast(&self, msg: &Message) -> Result<(), PatternError> {
        let topic = msg.msg_type().as_str();
        self.iopub.publish_message(topic, msg).await?;
        self.topics.publish_message(topic, msg).await
    }

    fn reply(&self, parent: &Message, content: impl Into<Content>) -> Result<Message, ProtocolError> {
        let content = content.into();
        MessageBuilder::new()
            .with_type(content.msg_type())
            .with_user(self.service.user_id.as_str())
            .with_transport(Channel::Zmq)
            .with_content(content)
            .with_parent(parent)
            .with_hop(
                self.service.service_id.as_str(),
                self.service.service_name.as_str(),
                self.service.host_name.as_str(),
            )
            .build()
    }
}

/// Key in a rejection's details naming the request it answers.
pub(crate) const PARENT_MSG_ID: &str = "parent_msg_id";

/// Attach `msg_id` to the rejection's details, keeping existing fields.
fn for_request(err: &ProtocolError, msg_id: &str) -> ProtocolError {
    let mut details = match &err.details {
        Some(serde_json::Value::Object(fields)) => fields.clone(),
        Some(other) => {
            let mut fields = serde_json::Map::new();
            fields.insert("details".into(), other.clone());
            fields
        }
        None => serde_json::Map::new(),
    };
    details.insert(PARENT_MSG_ID.into(), json!(msg_id));
    err.with_details(serde_json::Value::Object(details))
}

fn error_reply(err: &ProtocolError) -> Result<Bytes, PatternError> {
    serde_json::to_vec(err).map(Bytes::from).map_err(|e| {
        ProtocolError::serialize_failed()
            .with_details(json!({ "reason": e.to_string() }))
            .into()
    })
}

#[async_trait]
impl RequestHandler for KernelService {
    async fn handle(&self, identity: &Frame, payload: Bytes) -> Result<Option<Bytes>, PatternError> {
        if payload.as_ref() == PING {
            return Ok(answer_ping(identity, payload).await);
        }
        self.peers.lock().insert(identity.clone());

        let request = match decode_envelope(&payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(code = e.code, error = %e, "Rejecting undecodable request");
                return error_reply(&e).map(Some);
            }
        };

        match self.dispatch(&request).await {
            Ok(Some(reply)) => Ok(Some(encode_envelope(&reply)?)),
            Ok(None) => Ok(None),
            // Comms are one-way; their failures are only logged.
            Err(PatternError::Protocol(e)) if !request.msg_type().is_request_reply() => {
                warn!(msg_id = %request.msg_id(), code = e.code, error = %e, "Comm message dropped");
                Ok(None)
            }
            Err(PatternError::Protocol(e)) => {
                warn!(msg_id = %request.msg_id(), code = e.code, error = %e, "Request rejected");
                error_reply(&for_request(&e, request.msg_id())).map(Some)
            }
            Err(e) => Err(e),
        }
    }
}
