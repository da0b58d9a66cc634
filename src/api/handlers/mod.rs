//! API request handlers

pub mod auth;
pub mod health;
pub mod logs;
pub mod servers;
pub mod subscription;
pub mod watchdog;
pub mod xkeen;
