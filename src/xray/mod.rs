//! Xray / xkeen integration
//!
//! Outbound document synthesis, daemon process control and endpoint probes.

pub mod control;
pub mod latency;
pub mod outbound;

pub use control::{ProcessController, RestartCallback, RestartOutcome};
pub use latency::{check_all, check_latency, stream_latencies, PROBE_TIMEOUT};
pub use outbound::{current_outbound, write_outbound, OutboundTarget, VlessParams};
