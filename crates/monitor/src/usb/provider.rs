//! USB enumeration provider
//!
//! Lists attached devices through libusb and converts them into
//! [`DeviceIdentity`] values. Reading string descriptors is best-effort:
//! a device that cannot be opened still appears, with its strings unset.
//! The serial number is part of the identity key, so a transient failure to
//! read it falls back to the serial last read at the same bus position.

use common::{DeviceIdentity, Error};
use rusb::{Context, Device, DeviceDescriptor, DeviceHandle, UsbContext};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};

/// Linux Foundation vendor ID used by root hubs
const ROOT_HUB_VENDOR_ID: u16 = 0x1d6b;
/// USB hub device class
const HUB_CLASS: u8 = 9;
/// Timeout for reading the language table and string descriptors
const STRING_TIMEOUT: Duration = Duration::from_millis(200);
/// Consecutive failed serial reads before a never-read device is reported without one
const MAX_SERIAL_MISSES: u32 = 3;

/// Source of device snapshots
///
/// Called from the monitor thread only; implementations may block on
/// hardware I/O.
pub trait DeviceProvider {
    /// Enumerate the devices currently attached
    fn list_devices(&mut self) -> common::Result<Vec<DeviceIdentity>>;
}

/// Provider backed by a libusb context
pub struct RusbProvider {
    context: Context,
    /// Device filters (VID:PID patterns)
    filters: Vec<String>,
    include_root_hubs: bool,
    serials: SerialCache,
}

impl RusbProvider {
    /// Create a provider with its own libusb context
    pub fn new(filters: Vec<String>, include_root_hubs: bool) -> common::Result<Self> {
        let context = Context::new().map_err(map_rusb_error)?;

        Ok(Self {
            context,
            filters,
            include_root_hubs,
            serials: SerialCache::default(),
        })
    }

    /// Build an identity for one device, serial left unresolved
    ///
    /// Returns `Ok(None)` for devices excluded by filters or the root hub
    /// setting.
    fn read_device(
        &self,
        device: &Device<Context>,
    ) -> Result<Option<(DeviceIdentity, SerialRead)>, rusb::Error> {
        let descriptor = device.device_descriptor()?;
        let vendor_id = descriptor.vendor_id();
        let product_id = descriptor.product_id();

        if !check_filter(vendor_id, product_id, &self.filters) {
            debug!(
                "Device ignored by filter: bus={}, addr={}, vid={:#06x}, pid={:#06x}",
                device.bus_number(),
                device.address(),
                vendor_id,
                product_id
            );
            return Ok(None);
        }

        if !self.include_root_hubs && is_root_hub(&descriptor) {
            debug!(
                "Skipping root hub: bus={}, addr={}",
                device.bus_number(),
                device.address()
            );
            return Ok(None);
        }

        let (manufacturer, product, serial) = match device.open() {
            Ok(handle) => read_string_descriptors(&handle, &descriptor),
            Err(e) => {
                debug!(
                    "Cannot open device {:04x}:{:04x} for strings: {}",
                    vendor_id, product_id, e
                );
                // Lack of permission is stable across polls; anything else may not be
                let serial = match (e, descriptor.serial_number_string_index()) {
                    (rusb::Error::Access, _) | (_, None) => SerialRead::Absent,
                    _ => SerialRead::Failed,
                };
                (None, None, serial)
            }
        };

        let identity = DeviceIdentity {
            vendor_id,
            product_id,
            serial_number: None,
            manufacturer,
            product,
            bus_number: device.bus_number(),
            device_address: device.address(),
        };

        Ok(Some((identity, serial)))
    }
}

impl DeviceProvider for RusbProvider {
    fn list_devices(&mut self) -> common::Result<Vec<DeviceIdentity>> {
        let devices = self.context.devices().map_err(map_rusb_error)?;

        let mut identities = Vec::with_capacity(devices.len());
        let mut present = HashSet::new();
        for device in devices.iter() {
            match self.read_device(&device) {
                Ok(Some((mut identity, serial))) => {
                    let location = Location::of(&identity);
                    present.insert(location);
                    match self.serials.resolve(location, serial) {
                        Some(serial_number) => {
                            identity.serial_number = serial_number;
                            identities.push(identity);
                        }
                        None => debug!(
                            "Serial of {:04x}:{:04x} unreadable, leaving it out of this snapshot",
                            identity.vendor_id, identity.product_id
                        ),
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "Skipping device on bus {:03} address {:03}: {}",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                }
            }
        }
        self.serials.retain(&present);

        debug!("Enumerated {} devices", identities.len());
        Ok(identities)
    }
}

/// Outcome of reading a device's serial number string
#[derive(Debug, Clone, PartialEq, Eq)]
enum SerialRead {
    /// No serial string declared, or the device cannot be opened at all
    Absent,
    Read(String),
    /// A serial string is declared but could not be read this time
    Failed,
}

/// Position and ids of an attached device; fixed until it is unplugged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Location {
    bus_number: u8,
    device_address: u8,
    vendor_id: u16,
    product_id: u16,
}

impl Location {
    fn of(identity: &DeviceIdentity) -> Self {
        Self {
            bus_number: identity.bus_number,
            device_address: identity.device_address,
            vendor_id: identity.vendor_id,
            product_id: identity.product_id,
        }
    }
}

/// Last serial read at each location
///
/// A failed read reuses the serial last read at the same location so the
/// device keeps its identity key. A device whose serial has never been read
/// is left out until a read succeeds or [`MAX_SERIAL_MISSES`] reads in a row
/// have failed, after which it is reported without a serial.
#[derive(Debug, Default)]
struct SerialCache {
    known: HashMap<Location, Option<String>>,
    misses: HashMap<Location, u32>,
}

impl SerialCache {
    /// Serial to report, or `None` to leave the device out of this snapshot
    fn resolve(&mut self, location: Location, read: SerialRead) -> Option<Option<String>> {
        match read {
            SerialRead::Absent => {
                self.misses.remove(&location);
                self.known.insert(location, None);
                Some(None)
            }
            SerialRead::Read(serial) => {
                self.misses.remove(&location);
                self.known.insert(location, Some(serial.clone()));
                Some(Some(serial))
            }
            SerialRead::Failed => {
                if let Some(known) = self.known.get(&location) {
                    return Some(known.clone());
                }

                let misses = self.misses.entry(location).or_insert(0);
                *misses += 1;
                if *misses < MAX_SERIAL_MISSES {
                    return None;
                }

                warn!(
                    "Serial of {:04x}:{:04x} on bus {:03} address {:03} unreadable, reporting without it",
                    location.vendor_id,
                    location.product_id,
                    location.bus_number,
                    location.device_address
                );
                self.misses.remove(&location);
                self.known.insert(location, None);
                Some(None)
            }
        }
    }

    /// Forget devices missing from the latest enumeration
    fn retain(&mut self, present: &HashSet<Location>) {
        self.known.retain(|location, _| present.contains(location));
        self.misses.retain(|location, _| present.contains(location));
    }
}

/// Read manufacturer, product and serial strings
///
/// Each string is resolved independently. Manufacturer and product degrade
/// to `None` on failure.
fn read_string_descriptors(
    handle: &DeviceHandle<Context>,
    descriptor: &DeviceDescriptor,
) -> (Option<String>, Option<String>, SerialRead) {
    let language = match handle.read_languages(STRING_TIMEOUT) {
        Ok(languages) => languages.first().copied(),
        Err(e) => {
            debug!("Failed to read language table: {}", e);
            None
        }
    };

    let read = |index: u8| -> Result<String, rusb::Error> {
        let result = match language {
            Some(language) => handle.read_string_descriptor(language, index, STRING_TIMEOUT),
            None => handle.read_string_descriptor_ascii(index),
        };
        result.map_err(|e| {
            debug!("Failed to read string descriptor {}: {}", index, e);
            e
        })
    };

    let serial = match descriptor.serial_number_string_index() {
        None => SerialRead::Absent,
        Some(index) => match read(index) {
            Ok(serial) => SerialRead::Read(serial),
            Err(_) => SerialRead::Failed,
        },
    };

    (
        descriptor
            .manufacturer_string_index()
            .and_then(|index| read(index).ok()),
        descriptor
            .product_string_index()
            .and_then(|index| read(index).ok()),
        serial,
    )
}

fn is_root_hub(descriptor: &DeviceDescriptor) -> bool {
    descriptor.vendor_id() == ROOT_HUB_VENDOR_ID && descriptor.class_code() == HUB_CLASS
}

/// Map a libusb error into the common error type
pub fn map_rusb_error(e: rusb::Error) -> Error {
    Error::Usb(e.to_string())
}

/// Check if a VID/PID pair is allowed by the filters
///
/// Filter format: "0xVID:0xPID", "0xVID:*", "*:0xPID" or "*:*". Filters are
/// validated by the config loader; malformed entries never match.
pub fn check_filter(vid: u16, pid: u16, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }

    filters.iter().any(|filter| {
        let Some((filter_vid, filter_pid)) = filter.split_once(':') else {
            return false;
        };
        matches_id(filter_vid, vid) && matches_id(filter_pid, pid)
    })
}

fn matches_id(pattern: &str, id: u16) -> bool {
    if pattern == "*" {
        return true;
    }

    let hex = pattern
        .strip_prefix("0x")
        .or_else(|| pattern.strip_prefix("0X"))
        .unwrap_or(pattern);

    u16::from_str_radix(hex, 16)
        .map(|v| v == id)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{DeviceSnapshot, IdentityPolicy, diff_snapshots};

    #[test]
    fn test_filter_logic() {
        let filters = vec![
            "0x1234:0x5678".to_string(), // Exact match
            "0xABCD:*".to_string(),      // Wildcard PID
        ];

        assert!(check_filter(0x1234, 0x5678, &filters));

        assert!(check_filter(0xABCD, 0x1111, &filters));
        assert!(check_filter(0xABCD, 0x9999, &filters));

        assert!(!check_filter(0x1234, 0x9999, &filters));
        assert!(!check_filter(0x9999, 0x5678, &filters));
        assert!(!check_filter(0x0000, 0x0000, &filters));

        // Empty filters = allow all
        assert!(check_filter(0x1234, 0x5678, &[]));
    }

    #[test]
    fn test_filter_wildcard_vendor() {
        let filters = vec!["*:0x0001".to_string()];
        assert!(check_filter(0xFFFF, 0x0001, &filters));
        assert!(!check_filter(0xFFFF, 0x0002, &filters));

        let all = vec!["*:*".to_string()];
        assert!(check_filter(0x0000, 0x0000, &all));
    }

    #[test]
    fn test_malformed_filter_never_matches() {
        let filters = vec!["0x1234".to_string(), "zz:yy".to_string()];
        assert!(!check_filter(0x1234, 0x0000, &filters));
    }

    fn located(serial: Option<&str>) -> DeviceIdentity {
        DeviceIdentity {
            vendor_id: 0x0781,
            product_id: 0x5567,
            serial_number: serial.map(str::to_string),
            manufacturer: None,
            product: None,
            bus_number: 2,
            device_address: 5,
        }
    }

    /// Resolve one enumeration of the same device, as `list_devices` does
    fn enumerate(cache: &mut SerialCache, read: SerialRead) -> Vec<DeviceIdentity> {
        let mut device = located(None);
        let location = Location::of(&device);
        let present = HashSet::from([location]);
        let resolved = cache.resolve(location, read);
        cache.retain(&present);
        match resolved {
            Some(serial_number) => {
                device.serial_number = serial_number;
                vec![device]
            }
            None => vec![],
        }
    }

    #[test]
    fn test_failed_serial_read_keeps_identity() {
        let mut cache = SerialCache::default();

        for policy in [IdentityPolicy::Serial, IdentityPolicy::SerialOrLocation] {
            let before = DeviceSnapshot::from_devices(
                enumerate(&mut cache, SerialRead::Read("ABC".to_string())),
                policy,
            );
            let after = DeviceSnapshot::from_devices(enumerate(&mut cache, SerialRead::Failed), policy);

            assert_eq!(after.devices().next().unwrap().serial(), "ABC");
            assert!(diff_snapshots(&before, &after).is_empty());
        }
    }

    #[test]
    fn test_unread_serial_held_back_until_read() {
        let mut cache = SerialCache::default();

        assert!(enumerate(&mut cache, SerialRead::Failed).is_empty());

        let devices = enumerate(&mut cache, SerialRead::Read("ABC".to_string()));
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].serial(), "ABC");
    }

    #[test]
    fn test_persistent_serial_failure_reports_device() {
        let mut cache = SerialCache::default();

        for _ in 1..MAX_SERIAL_MISSES {
            assert!(enumerate(&mut cache, SerialRead::Failed).is_empty());
        }
        let devices = enumerate(&mut cache, SerialRead::Failed);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].serial_number, None);

        // Stays reported without a serial
        assert_eq!(enumerate(&mut cache, SerialRead::Failed).len(), 1);
    }

    #[test]
    fn test_unplugged_device_forgotten() {
        let mut cache = SerialCache::default();
        let location = Location::of(&located(None));
        cache.resolve(location, SerialRead::Read("ABC".to_string()));

        cache.retain(&HashSet::new());

        assert_eq!(cache.resolve(location, SerialRead::Failed), None);
    }

    #[test]
    fn test_map_rusb_error() {
        let err = map_rusb_error(rusb::Error::Access);
        assert!(matches!(err, Error::Usb(_)));
    }

    #[test]
    fn test_provider_creation() {
        // May fail without libusb access; just verify the attempt
        match RusbProvider::new(vec![], true) {
            Ok(mut provider) => {
                let _ = provider.list_devices();
            }
            Err(e) => {
                eprintln!(
                    "USB provider creation failed (expected without permissions): {}",
                    e
                );
            }
        }
    }
}
