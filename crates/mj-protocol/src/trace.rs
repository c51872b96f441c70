//! # Message Trace
//!
//! Per-hop timing as a message crosses service boundaries.
//!
//! A hop is opened when a service starts processing the message and must be
//! completed before the message leaves that service. The trace is owned by
//! one in-flight traversal at a time; `&mut` access makes that explicit.

use crate::generate_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One service's processing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHop {
    pub service_id: String,
    pub service_name: String,
    pub host_name: String,
    pub entry_time: DateTime<Utc>,
    #[serde(default)]
    pub exit_time: Option<DateTime<Utc>>,
    #[serde(default, with = "humantime_serde")]
    pub duration: Duration,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageHop {
    fn open(service_id: &str, service_name: &str, host_name: &str) -> Self {
        Self {
            service_id: service_id.to_string(),
            service_name: service_name.to_string(),
            host_name: host_name.to_string(),
            entry_time: Utc::now(),
            exit_time: None,
            duration: Duration::ZERO,
            status: String::new(),
            error: None,
        }
    }

    /// Close the hop: stamps the exit time, duration and status.
    pub fn complete(&mut self, status: impl Into<String>, error: Option<&dyn std::error::Error>) {
        let exit = Utc::now();
        self.duration = span(self.entry_time, exit);
        self.exit_time = Some(exit);
        self.status = status.into();
        if let Some(e) = error {
            self.error = Some(e.to_string());
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.exit_time.is_some()
    }
}

/// Ordered hop record for one originating message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageTrace {
    pub trace_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub hops: Vec<MessageHop>,
    #[serde(default, with = "humantime_serde")]
    pub total_time: Duration,
}

impl MessageTrace {
    #[must_use]
    pub fn new() -> Self {
        Self {
            trace_id: generate_id(),
            start_time: Utc::now(),
            hops: Vec::new(),
            total_time: Duration::ZERO,
        }
    }

    /// Append a hop with `entry_time = now` and hand it back for completion.
    pub fn add_hop(
        &mut self,
        service_id: &str,
        service_name: &str,
        host_name: &str,
    ) -> &mut MessageHop {
        self.hops
            .push(MessageHop::open(service_id, service_name, host_name));
        let last = self.hops.len() - 1;
        &mut self.hops[last]
    }

    /// Recompute `total_time` from the first hop's entry to the last hop's exit.
    ///
    /// Zero hops yield zero. An unfinished last hop counts up to its entry.
    pub fn calculate_total_time(&mut self) -> Duration {
        self.total_time = match (self.hops.first(), self.hops.last()) {
            (Some(first), Some(last)) => {
                span(first.entry_time, last.exit_time.unwrap_or(last.entry_time))
            }
            _ => Duration::ZERO,
        };
        self.total_time
    }

    /// First hop recorded for `service_name`.
    #[must_use]
    pub fn hop_by_service(&self, service_name: &str) -> Option<&MessageHop> {
        self.hops.iter().find(|h| h.service_name == service_name)
    }

    #[must_use]
    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }
}

impl Default for MessageTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string_pretty(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => write!(f, "MessageTrace({})", self.trace_id),
        }
    }
}

fn span(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or(Duration::ZERO)
}
