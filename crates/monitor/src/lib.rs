//! usb-monitor library
//!
//! The pieces behind the `usb-monitor` binary: configuration, the poll
//! worker and its enumeration provider, event sinks and the terminal UI.

pub mod config;
pub mod sink;
pub mod tui;
pub mod usb;
