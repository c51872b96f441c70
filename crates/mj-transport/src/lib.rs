//! # Transport
//!
//! The message-passing primitive the messaging patterns are written against.
//!
//! ## Socket roles
//!
//! ```text
//!  DEALER ──connect──▶ ROUTER      frames arrive prefixed with the
//!                                  dealer's identity
//!  SUB    ──connect──▶ PUB         prefix-filtered fan-out
//!  XSUB   ──connect──▶ XPUB        subscriptions travel upstream as
//!                                  control frames and are applied by
//!                                  the XPUB owner
//! ```
//!
//! Any transport implements [`Transport`]; [`InMemoryTransport`] is the
//! in-process implementation used by tests and single-process deployments.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod error;
pub mod memory;
pub mod socket;

pub use error::TransportError;
pub use memory::InMemoryTransport;
pub use socket::{frames, Frame, Multipart, PeerId, Socket, SocketType, Transport};

/// Maximum messages buffered per pipe before senders wait (or PUB drops).
pub const DEFAULT_HIGH_WATER_MARK: usize = 1000;
