//! Monitor Integration Tests
//!
//! End-to-end checks of the monitor worker: a scripted enumeration provider
//! stands in for libusb, the real poll loop diffs its snapshots, and the
//! events are consumed across the bridge on the Tokio side.
//!
//! Run with: `cargo test -p usb-monitor --test integration_tests`

use common::test_utils::{DEFAULT_TEST_TIMEOUT, identity, identity_without_serial};
use common::{
    DeviceEvent, DeviceIdentity, EventKind, IdentityPolicy, MonitorBridge, MonitorCommand,
    MonitorEvent, StopReason, create_monitor_bridge,
};
use std::collections::VecDeque;
use std::thread::JoinHandle;
use std::time::Duration;
use usb_monitor::config::{ErrorPolicy, EventLogConfig, LogFormat};
use usb_monitor::sink::{EventLogger, EventSink};
use usb_monitor::usb::{DeviceProvider, MonitorWorkerThread, PollOptions};

/// Provider returning one scripted enumeration per call, then the last one forever
struct Script {
    snapshots: VecDeque<Vec<DeviceIdentity>>,
    last: Vec<DeviceIdentity>,
}

impl Script {
    fn new(snapshots: Vec<Vec<DeviceIdentity>>) -> Self {
        Self {
            snapshots: snapshots.into(),
            last: Vec::new(),
        }
    }
}

impl DeviceProvider for Script {
    fn list_devices(&mut self) -> common::Result<Vec<DeviceIdentity>> {
        if let Some(next) = self.snapshots.pop_front() {
            self.last = next;
        }
        Ok(self.last.clone())
    }
}

fn start_worker(
    script: Script,
    identity: IdentityPolicy,
) -> (MonitorBridge, JoinHandle<common::Result<()>>) {
    let (bridge, worker) = create_monitor_bridge();
    let options = PollOptions {
        delay: Duration::from_millis(10),
        on_error: ErrorPolicy::Skip,
        identity,
    };
    let handle =
        std::thread::spawn(move || MonitorWorkerThread::new(script, worker, options).run());
    (bridge, handle)
}

async fn next_event(bridge: &MonitorBridge) -> MonitorEvent {
    tokio::time::timeout(DEFAULT_TEST_TIMEOUT, bridge.recv_event())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Collect `count` device events after Started, then stop and shut down
async fn run_cycles(
    bridge: &MonitorBridge,
    handle: JoinHandle<common::Result<()>>,
    count: usize,
) -> Vec<DeviceEvent> {
    bridge.send_command(MonitorCommand::Start).await.unwrap();
    assert!(matches!(next_event(bridge).await, MonitorEvent::Started));

    let mut seen = Vec::new();
    while seen.len() < count {
        match next_event(bridge).await {
            MonitorEvent::Device(event) => seen.push(event),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    bridge.send_command(MonitorCommand::Stop).await.unwrap();
    assert!(matches!(
        next_event(bridge).await,
        MonitorEvent::Stopped {
            reason: StopReason::Requested
        }
    ));
    bridge.send_command(MonitorCommand::Shutdown).await.unwrap();
    handle.join().unwrap().unwrap();
    seen
}

fn summary(events: &[DeviceEvent]) -> Vec<(EventKind, String)> {
    events
        .iter()
        .map(|e| (e.kind, e.identity.serial().to_string()))
        .collect()
}

#[tokio::test]
async fn test_plug_and_unplug_sequence() {
    let a = identity("A", 0x1234, 0x5678);
    let b = identity("B", 0x1234, 0x5679);

    // Two enumerations per cycle
    let script = Script::new(vec![
        vec![],
        vec![a.clone()],
        vec![a.clone()],
        vec![a.clone(), b.clone()],
        vec![a.clone(), b.clone()],
        vec![b.clone()],
        vec![b],
        vec![],
    ]);
    let (bridge, handle) = start_worker(script, IdentityPolicy::default());
    let seen = run_cycles(&bridge, handle, 4).await;

    assert_eq!(
        summary(&seen),
        vec![
            (EventKind::Connected, "A".to_string()),
            (EventKind::Connected, "B".to_string()),
            (EventKind::Removed, "A".to_string()),
            (EventKind::Removed, "B".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_device_moved_between_cycles_is_not_reported() {
    // Same serial, new bus address: only the change inside a cycle counts
    let before = identity("A", 0x1234, 0x5678);
    let mut after = before.clone();
    after.device_address = 9;
    let marker = identity("M", 0xABCD, 0x0001);

    let script = Script::new(vec![
        vec![before.clone()],
        vec![after.clone()],
        vec![after.clone()],
        vec![after, marker],
    ]);
    let (bridge, handle) = start_worker(script, IdentityPolicy::default());
    let seen = run_cycles(&bridge, handle, 1).await;

    assert_eq!(summary(&seen), vec![(EventKind::Connected, "M".to_string())]);
}

#[tokio::test]
async fn test_serialless_devices_tracked_by_location() {
    let port_one = identity_without_serial(0x046d, 0xc52b, 1, 4);
    let port_two = identity_without_serial(0x046d, 0xc52b, 1, 9);

    let script = Script::new(vec![
        vec![port_one.clone()],
        vec![port_one, port_two.clone()],
    ]);
    let (bridge, handle) = start_worker(script, IdentityPolicy::SerialOrLocation);
    let seen = run_cycles(&bridge, handle, 1).await;

    assert_eq!(seen[0].kind, EventKind::Connected);
    assert_eq!(seen[0].identity, port_two);
}

#[tokio::test]
async fn test_serial_policy_merges_serialless_devices() {
    let port_one = identity_without_serial(0x046d, 0xc52b, 1, 4);
    let port_two = identity_without_serial(0x046d, 0xc52b, 1, 9);
    let marker = identity("M", 0xABCD, 0x0001);

    // Both serial-less devices share one key, so only the marker is new
    let script = Script::new(vec![
        vec![port_one.clone()],
        vec![port_one, port_two, marker],
    ]);
    let (bridge, handle) = start_worker(script, IdentityPolicy::Serial);
    let seen = run_cycles(&bridge, handle, 1).await;

    assert_eq!(summary(&seen), vec![(EventKind::Connected, "M".to_string())]);
}

#[tokio::test]
async fn test_list_devices_while_idle() {
    let devices = vec![identity("A", 0x1234, 0x5678), identity("B", 0xABCD, 0x0001)];
    let (bridge, handle) =
        start_worker(Script::new(vec![devices.clone()]), IdentityPolicy::default());

    let listed = bridge.list_devices().await.unwrap();
    assert_eq!(listed, devices);

    bridge.send_command(MonitorCommand::Shutdown).await.unwrap();
    handle.join().unwrap().unwrap();
}

#[tokio::test]
async fn test_events_reach_event_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.log");
    let logger = EventLogger::new(EventLogConfig {
        enabled: true,
        path: path.clone(),
        format: LogFormat::Text,
        max_size_mb: None,
        max_files: None,
    })
    .unwrap();
    let mut sink = logger.handle();

    let a = identity("A", 0x1234, 0x5678);
    let script = Script::new(vec![vec![], vec![a.clone()], vec![a], vec![]]);
    let (bridge, handle) = start_worker(script, IdentityPolicy::default());
    for event in run_cycles(&bridge, handle, 2).await {
        sink.on_event(&event);
    }
    logger.close().await;

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with(" - Device Connected - Vendor ID: 4660, Product ID: 22136, Serial Number: A"));
    assert!(lines[1].ends_with(" - Device Removed - Vendor ID: 4660, Product ID: 22136, Serial Number: A"));
}
