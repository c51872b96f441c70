//! # Mini-Jupyter Kernel
//!
//! A demo kernel wired from the messaging patterns, plus the pieces a
//! deployment puts around it.
//!
//! ## Modules
//!
//! - `config` - TOML configuration with `MJ_*` environment overrides
//! - `kernel` - [`KernelService`]: shell, iopub, topics and heartbeat endpoints
//! - `client` - [`KernelClient`]: session-scoped shell requests
//! - `bridge` - [`ClientRegistry`] and [`IopubBridge`] for fanning output to
//!   external clients
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (file, then env), validate
//! 2. Initialize telemetry
//! 3. Bind kernel endpoints, apply topic permissions
//! 4. Start bridge and heartbeat monitor
//! 5. Serve until ctrl-c

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod bridge;
pub mod client;
pub mod config;
pub mod error;
pub mod kernel;

pub use bridge::{ClientId, ClientRegistry, IopubBridge};
pub use client::KernelClient;
pub use config::{
    ConfigError, EndpointConfig, HeartbeatConfig, KernelConfig, ServiceConfig,
    TopicPermissionConfig,
};
pub use error::KernelError;
pub use kernel::KernelService;
