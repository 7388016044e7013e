//! Matches a recorded `{vendorID, deviceID, driverVersion}` tuple against the physical devices
//! actually available on the replay machine (component M).

use ash::vk;

/// The identifying tuple the Spy records after `vkEnumeratePhysicalDevices` (component K).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedPhysicalDevice {
    pub device_id: u32,
    pub vendor_id: u32,
    pub driver_version: u32,
}

impl From<vk::PhysicalDeviceProperties> for RecordedPhysicalDevice {
    fn from(props: vk::PhysicalDeviceProperties) -> Self {
        Self { device_id: props.device_id, vendor_id: props.vendor_id, driver_version: props.driver_version }
    }
}

/// Greedily matches `recorded` against `candidates` (each paired with its live handle), in three
/// passes: exact match, then version-tolerant (device + vendor, driver version ignored), then
/// vendor-only. Returns `None` if nothing matches even with the vendor-only fallback, which the
/// caller treats as [`crate::error::Error::NoMatchingPhysicalDevice`] and drops the device.
pub fn match_physical_device(recorded: RecordedPhysicalDevice, candidates: &[(u64, vk::PhysicalDeviceProperties)]) -> Option<u64> {
    let exact = candidates.iter().find(|(_, p)| {
        p.device_id == recorded.device_id && p.vendor_id == recorded.vendor_id && p.driver_version == recorded.driver_version
    });
    let version_tolerant = || candidates.iter().find(|(_, p)| p.device_id == recorded.device_id && p.vendor_id == recorded.vendor_id);
    let vendor_only = || candidates.iter().find(|(_, p)| p.vendor_id == recorded.vendor_id);
    exact.or_else(version_tolerant).or_else(vendor_only).map(|(handle, _)| *handle)
}
