//! Test utilities for usb-monitor
//!
//! Builders for device identities and snapshots used across crates.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{identity, snapshot};
//!
//! let snap = snapshot(vec![identity("SN1", 0x1234, 0x5678)]);
//! assert_eq!(snap.len(), 1);
//! ```

use crate::usb_types::{DeviceIdentity, DeviceSnapshot, IdentityPolicy};
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a device identity with a serial number
pub fn identity(serial: &str, vendor_id: u16, product_id: u16) -> DeviceIdentity {
    DeviceIdentity {
        vendor_id,
        product_id,
        serial_number: Some(serial.to_string()),
        manufacturer: Some(format!("Test Manufacturer {:04x}", vendor_id)),
        product: Some(format!("Test Product {:04x}", product_id)),
        bus_number: 1,
        device_address: 1,
    }
}

/// Create a device identity that reports no serial number
pub fn identity_without_serial(
    vendor_id: u16,
    product_id: u16,
    bus_number: u8,
    device_address: u8,
) -> DeviceIdentity {
    DeviceIdentity {
        vendor_id,
        product_id,
        serial_number: None,
        manufacturer: None,
        product: None,
        bus_number,
        device_address,
    }
}

/// Build a snapshot under the default identity policy
pub fn snapshot(devices: Vec<DeviceIdentity>) -> DeviceSnapshot {
    DeviceSnapshot::from_devices(devices, IdentityPolicy::default())
}
