//! USB device identity, snapshot and event types
//!
//! These are the values exchanged between the enumeration provider, the
//! differ and the event sinks. None of them depend on a USB library, so
//! they can be built freely in tests.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::Values;
use std::fmt;
use std::time::SystemTime;
use tracing::debug;

/// Identity of one enumerated USB device
///
/// Vendor/product ids and the strings are descriptive payload. Which fields
/// make up the diffing key is decided by [`IdentityPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub bus_number: u8,
    pub device_address: u8,
}

impl DeviceIdentity {
    /// Serial number with absent and empty treated alike
    pub fn serial(&self) -> &str {
        self.serial_number.as_deref().unwrap_or("")
    }

    /// Key of this device under the given policy
    pub fn key(&self, policy: IdentityPolicy) -> IdentityKey {
        match policy {
            IdentityPolicy::Serial => IdentityKey::Serial(self.serial().to_string()),
            IdentityPolicy::SerialOrLocation => {
                if self.serial().is_empty() {
                    IdentityKey::Location {
                        vendor_id: self.vendor_id,
                        product_id: self.product_id,
                        bus_number: self.bus_number,
                        device_address: self.device_address,
                    }
                } else {
                    IdentityKey::Serial(self.serial().to_string())
                }
            }
        }
    }
}

/// Key used to match a device across two snapshots
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdentityKey {
    /// Serial number string (possibly empty)
    Serial(String),
    /// Vendor, product and bus position of a device without a serial
    Location {
        vendor_id: u16,
        product_id: u16,
        bus_number: u8,
        device_address: u8,
    },
}

/// How devices are keyed when diffing snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityPolicy {
    /// Key by serial number only.
    ///
    /// Every device without a serial shares the empty key, so such devices
    /// cannot be told apart and may produce spurious connect/remove pairs.
    Serial,
    /// Key by serial number, falling back to vendor, product and bus
    /// position when the serial is empty or absent
    #[default]
    SerialOrLocation,
}

/// Set of device identities valid at one instant, keyed by [`IdentityKey`]
#[derive(Debug, Clone, Default)]
pub struct DeviceSnapshot {
    policy: IdentityPolicy,
    devices: HashMap<IdentityKey, DeviceIdentity>,
}

impl DeviceSnapshot {
    /// Create an empty snapshot
    pub fn new(policy: IdentityPolicy) -> Self {
        Self {
            policy,
            devices: HashMap::new(),
        }
    }

    /// Build a snapshot from enumerated devices
    ///
    /// When two devices share a key, the one enumerated last is kept.
    pub fn from_devices<I>(devices: I, policy: IdentityPolicy) -> Self
    where
        I: IntoIterator<Item = DeviceIdentity>,
    {
        let mut snapshot = Self::new(policy);
        for device in devices {
            snapshot.insert(device);
        }
        snapshot
    }

    /// Insert a device, replacing any previous device with the same key
    pub fn insert(&mut self, device: DeviceIdentity) {
        let key = device.key(self.policy);
        if let Some(previous) = self.devices.insert(key.clone(), device) {
            debug!(
                "Duplicate device key {:?}, replacing {:04x}:{:04x} on bus {:03} address {:03}",
                key,
                previous.vendor_id,
                previous.product_id,
                previous.bus_number,
                previous.device_address
            );
        }
    }

    /// Policy the snapshot was keyed with
    pub fn policy(&self) -> IdentityPolicy {
        self.policy
    }

    /// Look up a device by key
    pub fn get(&self, key: &IdentityKey) -> Option<&DeviceIdentity> {
        self.devices.get(key)
    }

    /// Check whether a key is present
    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.devices.contains_key(key)
    }

    /// Iterate over the keys
    pub fn keys(&self) -> impl Iterator<Item = &IdentityKey> {
        self.devices.keys()
    }

    /// Iterate over the devices
    pub fn devices(&self) -> Values<'_, IdentityKey, DeviceIdentity> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Kind of a classified device event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Connected,
    Removed,
}

impl EventKind {
    /// Label used in the event log
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::Connected => "Device Connected",
            EventKind::Removed => "Device Removed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A connect or remove event produced by the differ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub kind: EventKind,
    pub identity: DeviceIdentity,
    pub timestamp: SystemTime,
}

impl DeviceEvent {
    pub fn new(kind: EventKind, identity: DeviceIdentity, timestamp: SystemTime) -> Self {
        Self {
            kind,
            identity,
            timestamp,
        }
    }
}

/// Log record without timestamp:
/// `Device Connected - Vendor ID: 4660, Product ID: 22136, Serial Number: X1`
impl fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - Vendor ID: {}, Product ID: {}, Serial Number: {}",
            self.kind,
            self.identity.vendor_id,
            self.identity.product_id,
            self.identity.serial_number.as_deref().unwrap_or("None")
        )
    }
}
