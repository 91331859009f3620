//! Host-stack packet classifier.
//!
//! A graph node for an in-process packet pipeline: each invocation takes a
//! vector of buffer indices, extracts the 5-tuple per buffer, evaluates the
//! ACL, tracks sessions, and dispatches every buffer to one of the four
//! downstream nodes (error-drop, ip4-lookup, ip6-lookup, ethernet-input).
//!
//! When the pinned maps created by the XDP fast path are available, the node
//! runs in dual-protection mode: ACL lookups hit the shared `vpp_acl_v4`
//! table and session rows are mirrored into `vpp_sessions`, so both data
//! planes agree on verdicts. Without them it classifies from local state
//! only.
#![cfg(target_os = "linux")]

pub mod acl;
pub mod admin;
pub mod buffer;
pub mod dual;
pub mod node;
pub mod session;
pub mod stats;

pub use acl::AclTable;
pub use admin::{format_show, IfaceState};
pub use buffer::{BufferPool, PacketBuffer};
pub use dual::DualTables;
pub use node::{ClassifyNode, Next, TraceRecord};
pub use session::SessionTable;
pub use stats::{ClassifyStats, StatsSnapshot};
