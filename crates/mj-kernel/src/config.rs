//! # Kernel Configuration
//!
//! Loaded from TOML, then overridden from `MJ_*` environment variables.
//!
//! ```toml
//! [service]
//! service_id = "kernel-1"
//! service_name = "kernel"
//! host_name = "localhost"
//! user_id = "kernel"
//!
//! [endpoints]
//! shell = "inproc://shell"
//! iopub = "inproc://iopub"
//! topics = "inproc://topics"
//! heartbeat = "inproc://heartbeat"
//!
//! [heartbeat]
//! interval = "1s"
//! timeout = "3s"
//!
//! [[permissions]]
//! topic = "execute_result"
//! allowed_users = ["alice", "bob"]
//!
//! [telemetry]
//! log_level = "info"
//! json_logs = false
//! ```

use humantime_serde::re::humantime;
use mj_telemetry::TelemetryConfig;
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct KernelConfig {
    pub service: ServiceConfig,
    pub endpoints: EndpointConfig,
    pub heartbeat: HeartbeatConfig,
    pub permissions: Vec<TopicPermissionConfig>,
    pub telemetry: TelemetryConfig,
}

/// Identity the kernel stamps on replies and trace hops.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceConfig {
    pub service_id: String,
    pub service_name: String,
    pub host_name: String,
    pub user_id: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_id: "kernel-1".to_string(),
            service_name: "kernel".to_string(),
            host_name: "localhost".to_string(),
            user_id: "kernel".to_string(),
        }
    }
}

/// Socket addresses. Each must be unique.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EndpointConfig {
    /// ROUTER: requests and PING
    pub shell: String,
    /// PUB: unrestricted output broadcast
    pub iopub: String,
    /// XPUB: permission-checked output broadcast
    pub topics: String,
    /// PUB: heartbeat beats
    pub heartbeat: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            shell: "inproc://shell".to_string(),
            iopub: "inproc://iopub".to_string(),
            topics: "inproc://topics".to_string(),
            heartbeat: "inproc://heartbeat".to_string(),
        }
    }
}

impl EndpointConfig {
    fn all(&self) -> [(&'static str, &str); 4] {
        [
            ("shell", self.shell.as_str()),
            ("iopub", self.iopub.as_str()),
            ("topics", self.topics.as_str()),
            ("heartbeat", self.heartbeat.as_str()),
        ]
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HeartbeatConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Silence longer than this counts as a lost peer.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TopicPermissionConfig {
    pub topic: String,
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {error}")]
    Io { path: String, error: String },

    #[error("invalid TOML: {0}")]
    Parse(String),

    #[error("invalid heartbeat timing: {0}")]
    InvalidInterval(String),

    #[error("address {address} used by both {first} and {second}")]
    DuplicateAddress {
        address: String,
        first: &'static str,
        second: &'static str,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl KernelConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string. Missing sections take their
    /// defaults.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `MJ_*` environment variables.
    ///
    /// - `MJ_SHELL_ADDR`, `MJ_IOPUB_ADDR`, `MJ_TOPICS_ADDR`, `MJ_HEARTBEAT_ADDR`
    /// - `MJ_HEARTBEAT_INTERVAL`, `MJ_HEARTBEAT_TIMEOUT` (humantime, e.g. `500ms`)
    /// - `MJ_SERVICE_ID`
    /// - telemetry variables, see [`TelemetryConfig::from_env`]
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        let addresses = [
            ("MJ_SHELL_ADDR", &mut self.endpoints.shell),
            ("MJ_IOPUB_ADDR", &mut self.endpoints.iopub),
            ("MJ_TOPICS_ADDR", &mut self.endpoints.topics),
            ("MJ_HEARTBEAT_ADDR", &mut self.endpoints.heartbeat),
        ];
        for (var, slot) in addresses {
            if let Ok(addr) = env::var(var) {
                *slot = addr;
            }
        }

        if let Some(interval) = duration_var("MJ_HEARTBEAT_INTERVAL")? {
            self.heartbeat.interval = interval;
        }
        if let Some(timeout) = duration_var("MJ_HEARTBEAT_TIMEOUT")? {
            self.heartbeat.timeout = timeout;
        }
        if let Ok(id) = env::var("MJ_SERVICE_ID") {
            self.service.service_id = id;
        }

        self.telemetry = self.telemetry.with_env_overrides();
        Ok(self)
    }

    /// Reject configurations the kernel cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let hb = &self.heartbeat;
        if hb.interval.is_zero() {
            return Err(ConfigError::InvalidInterval(
                "interval cannot be 0".into(),
            ));
        }
        if hb.timeout.is_zero() {
            return Err(ConfigError::InvalidInterval("timeout cannot be 0".into()));
        }
        if hb.timeout <= hb.interval {
            return Err(ConfigError::InvalidInterval(format!(
                "timeout ({:?}) must exceed interval ({:?})",
                hb.timeout, hb.interval
            )));
        }

        let mut seen: Vec<(&'static str, &str)> = Vec::with_capacity(4);
        for (name, address) in self.endpoints.all() {
            if address.is_empty() {
                return Err(ConfigError::Invalid(format!("{name} address is empty")));
            }
            if let Some((first, _)) = seen.iter().find(|(_, a)| *a == address) {
                return Err(ConfigError::DuplicateAddress {
                    address: address.to_string(),
                    first: *first,
                    second: name,
                });
            }
            seen.push((name, address));
        }

        if self.service.user_id.is_empty() {
            return Err(ConfigError::Invalid("service.user_id is empty".into()));
        }

        let mut topics = HashSet::new();
        for perm in &self.permissions {
            if !topics.insert(perm.topic.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "permission for topic {:?} declared twice",
                    perm.topic
                )));
            }
        }
        Ok(())
    }
}

fn duration_var(var: &str) -> Result<Option<Duration>, ConfigError> {
    match env::var(var) {
        Ok(raw) => humantime::parse_duration(&raw)
            .map(Some)
            .map_err(|e| ConfigError::Invalid(format!("{var}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = KernelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.heartbeat.interval, Duration::from_secs(1));
    }

    #[test]
    fn test_parse_partial_file() {
        let config = KernelConfig::parse(
            r#"
            [heartbeat]
            interval = "200ms"
            timeout = "1s"

            [[permissions]]
            topic = "secret"
            allowed_users = ["alice"]
            "#,
        )
        .unwrap();
        assert_eq!(config.heartbeat.interval, Duration::from_millis(200));
        assert_eq!(config.permissions[0].allowed_users, ["alice"]);
        assert_eq!(config.endpoints, EndpointConfig::default());
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            KernelConfig::parse("[heartbeat\ninterval = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[service]\nservice_id = \"k-9\"").unwrap();
        let config = KernelConfig::load(file.path()).unwrap();
        assert_eq!(config.service.service_id, "k-9");
        assert_eq!(config.service.service_name, "kernel");
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            KernelConfig::load("/nonexistent/kernel.toml"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_timeout_must_exceed_interval() {
        let mut config = KernelConfig::default();
        config.heartbeat.timeout = config.heartbeat.interval;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidInterval(_))
        ));

        config.heartbeat.interval = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_duplicate_addresses_rejected() {
        let mut config = KernelConfig::default();
        config.endpoints.heartbeat = config.endpoints.iopub.clone();
        match config.validate() {
            Err(ConfigError::DuplicateAddress { first, second, .. }) => {
                assert_eq!(first, "iopub");
                assert_eq!(second, "heartbeat");
            }
            other => panic!("expected duplicate address, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_permission_topic_rejected() {
        let mut config = KernelConfig::default();
        let perm = TopicPermissionConfig {
            topic: "t".into(),
            allowed_users: vec![],
        };
        config.permissions = vec![perm.clone(), perm];
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
