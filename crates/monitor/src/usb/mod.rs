//! USB subsystem
//!
//! Device enumeration and the poll loop that turns successive snapshots
//! into connect/remove events.
//!
//! Enumeration is blocking hardware I/O, so the poll loop runs in a
//! dedicated thread (worker) and talks to the Tokio runtime through the
//! channel bridge from `common`.

pub mod provider;
pub mod worker;

pub use provider::{DeviceProvider, RusbProvider};
pub use worker::{MonitorWorkerThread, PollOptions, spawn_monitor_worker};
