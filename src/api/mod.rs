//! HTTP API
//!
//! REST endpoints and Server-Sent Events streams for the dashboard.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod sse;

pub use server::{ApiServer, AppState};
