//! Background services

pub mod watchdog;

pub use watchdog::{ConnectivityProbe, HttpProbe, Watchdog, WatchdogHandle};
