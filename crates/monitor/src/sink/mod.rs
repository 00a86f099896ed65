//! Event sinks
//!
//! Consumers of classified device events. The poll loop never calls these
//! directly: events cross the channel bridge first and are dispatched on
//! the Tokio side.

pub mod event_log;

pub use event_log::{EventLogger, format_timestamp};

use common::DeviceEvent;
use tracing::info;

/// Consumer of device events
///
/// Called once per event; implementations should not block significantly.
pub trait EventSink: Send {
    fn on_event(&mut self, event: &DeviceEvent);
}

/// Emits each event as a tracing record
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_event(&mut self, event: &DeviceEvent) {
        info!(
            kind = ?event.kind,
            bus = event.identity.bus_number,
            address = event.identity.device_address,
            "{}",
            event
        );
    }
}

/// Prints each event to stdout with a timestamp prefix
pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn on_event(&mut self, event: &DeviceEvent) {
        println!("{} - {}", format_timestamp(event.timestamp), event);
    }
}

/// Fans an event out to several sinks
#[derive(Default)]
pub struct SinkSet {
    sinks: Vec<Box<dyn EventSink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: impl EventSink + 'static) {
        self.sinks.push(Box::new(sink));
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }
}

impl EventSink for SinkSet {
    fn on_event(&mut self, event: &DeviceEvent) {
        for sink in &mut self.sinks {
            sink.on_event(event);
        }
    }
}
