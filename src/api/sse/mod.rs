//! Server-Sent Events streams
//!
//! EventSource clients cannot send headers, so both streams authenticate via
//! the `?token=` fallback of the auth extractor.

pub mod events;
pub mod latency;

/// Extra header that stops reverse proxies from buffering the stream
pub const NO_BUFFERING: (&str, &str) = ("x-accel-buffering", "no");
