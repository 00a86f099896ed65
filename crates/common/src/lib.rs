//! Common utilities for usb-monitor
//!
//! This crate provides the parts of the monitor that do not touch USB
//! hardware or the terminal: device identity types, the snapshot differ,
//! error handling, logging setup, and the async channel bridge to the
//! monitor thread.

pub mod channel;
pub mod diff;
pub mod error;
pub mod logging;
pub mod test_utils;
pub mod usb_types;

pub use channel::{
    DeviceListReceiver, MonitorBridge, MonitorCommand, MonitorEvent, MonitorWorker, StopReason,
    create_monitor_bridge,
};
pub use diff::{DeviceDiff, diff_snapshots};
pub use error::{Error, Result};
pub use logging::{setup_logging, setup_logging_to};
pub use usb_types::{
    DeviceEvent, DeviceIdentity, DeviceSnapshot, EventKind, IdentityKey, IdentityPolicy,
};
