//! # Messaging Patterns
//!
//! Endpoints built on a [`mj_transport::Transport`], exchanging raw frames
//! or protocol envelopes.
//!
//! ## Patterns
//!
//! ```text
//!  DealerNode ──["", payload]──▶ RouterNode     identity-addressed
//!             ◀──["", payload]──                request/reply
//!
//!  PublisherNode ──[topic, payload]──▶ SubscriberNode
//!
//!  XSubscriberNode ──[flag|user|topic]──▶ XPublisherNode   permission-checked
//!                  ◀──[topic, payload]──                   subscriptions
//!
//!  HeartbeatPublisher ──"heartbeat"──▶ HeartbeatMonitor ──▶ LivenessEvent
//!  Pinger ──"PING"──▶ PingResponder ──"PONG"──▶ Pinger
//! ```
//!
//! Every node owns exactly one socket. Processing loops (`serve`, `run`)
//! end only when the socket closes; per-message failures are logged and
//! skipped.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod error;
pub mod heartbeat;
pub mod pub_sub;
pub mod router_dealer;
pub mod wire;
pub mod xpub_xsub;

pub use error::PatternError;
pub use heartbeat::{
    answer_ping, HeartbeatMonitor, HeartbeatPublisher, LivenessEvent, LivenessWatch,
    PingResponder, Pinger,
};
pub use pub_sub::{PublisherNode, SubscriberNode};
pub use router_dealer::{DealerNode, RequestHandler, RouterNode};
pub use wire::{decode_envelope, encode_envelope};
pub use xpub_xsub::{SubscriptionRequest, TopicPermissions, XPublisherNode, XSubscriberNode};

/// Topic (and payload) of heartbeat beats.
pub const HEARTBEAT_TOPIC: &str = "heartbeat";

/// Liveness probe request.
pub const PING: &[u8] = b"PING";

/// Liveness probe response.
pub const PONG: &[u8] = b"PONG";
