//! Integration flows spanning protocol, patterns and kernel.

pub mod kernel_flows;
pub mod liveness;
pub mod topic_acl;
