//! Device-set differ
//!
//! Compares two successive snapshots and classifies the difference as
//! connect and remove events. Pure: no I/O, no clock reads, no logging.

use crate::usb_types::{DeviceEvent, DeviceIdentity, DeviceSnapshot, EventKind, IdentityKey};
use std::collections::HashSet;
use std::time::SystemTime;

/// Result of diffing two snapshots
///
/// `appeared` is resolved from the current snapshot, `disappeared` from the
/// previous one (the last-known record of a device that is gone).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDiff {
    pub appeared: Vec<DeviceIdentity>,
    pub disappeared: Vec<DeviceIdentity>,
}

impl DeviceDiff {
    pub fn is_empty(&self) -> bool {
        self.appeared.is_empty() && self.disappeared.is_empty()
    }

    /// Number of events this diff will produce
    pub fn len(&self) -> usize {
        self.appeared.len() + self.disappeared.len()
    }

    /// Classify the diff into events stamped with `timestamp`
    ///
    /// Connected events come first, then Removed. Order within each group
    /// follows set iteration and is unspecified.
    pub fn into_events(self, timestamp: SystemTime) -> Vec<DeviceEvent> {
        let connected = self
            .appeared
            .into_iter()
            .map(|identity| DeviceEvent::new(EventKind::Connected, identity, timestamp));
        let removed = self
            .disappeared
            .into_iter()
            .map(|identity| DeviceEvent::new(EventKind::Removed, identity, timestamp));

        connected.chain(removed).collect()
    }
}

/// Compute appeared (`current - previous`) and disappeared
/// (`previous - current`) devices by key
pub fn diff_snapshots(previous: &DeviceSnapshot, current: &DeviceSnapshot) -> DeviceDiff {
    let previous_keys: HashSet<&IdentityKey> = previous.keys().collect();
    let current_keys: HashSet<&IdentityKey> = current.keys().collect();

    let appeared = current_keys
        .difference(&previous_keys)
        .filter_map(|key| current.get(key))
        .cloned()
        .collect();

    let disappeared = previous_keys
        .difference(&current_keys)
        .filter_map(|key| previous.get(key))
        .cloned()
        .collect();

    DeviceDiff {
        appeared,
        disappeared,
    }
}
