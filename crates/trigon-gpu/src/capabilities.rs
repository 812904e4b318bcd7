//! Physical device identification and the `--verbose` report.

use std::fmt;

use ash::vk;

const NVIDIA_VENDOR_ID: u32 = 0x10DE;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub const fn from_vendor_id(id: u32) -> Self {
        match id {
            NVIDIA_VENDOR_ID => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Properties of a physical device, as printed by `--verbose`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceReport {
    pub name: String,
    pub vendor: GpuVendor,
    pub vendor_id: u32,
    pub device_id: u32,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub driver_version: u32,
}

impl DeviceReport {
    /// Build a report from the properties returned by the driver.
    pub fn from_properties(properties: &vk::PhysicalDeviceProperties) -> Self {
        let name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            name,
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            vendor_id: properties.vendor_id,
            device_id: properties.device_id,
            device_type: properties.device_type,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
        }
    }

    /// API version as `major.minor.patch`.
    pub fn api_version_string(&self) -> String {
        format!(
            "{}.{}.{}",
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
        )
    }

    /// Driver version in the vendor's own scheme. Empty when the driver reports zero.
    pub fn driver_version_string(&self) -> String {
        let v = self.driver_version;
        if v == 0 {
            return String::new();
        }
        // NVIDIA packs 10.8.8.6 bits
        if self.vendor_id == NVIDIA_VENDOR_ID {
            format!(
                "{}.{}.{}.{}",
                (v >> 22) & 0x3ff,
                (v >> 14) & 0xff,
                (v >> 6) & 0xff,
                v & 0x3f
            )
        } else {
            format!(
                "{}.{}.{}",
                vk::api_version_major(v),
                vk::api_version_minor(v),
                vk::api_version_patch(v),
            )
        }
    }

    /// Human-readable device type.
    pub const fn device_type_name(&self) -> &'static str {
        match self.device_type {
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// One-line summary for the startup log.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}, {}) - Vulkan {}",
            self.name,
            self.vendor,
            self.device_type_name(),
            self.api_version_string(),
        )
    }
}

impl fmt::Display for DeviceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Device properties:")?;
        writeln!(f, "  - Api Version: {}", self.api_version_string())?;
        writeln!(f, "  - Driver Version: {}", self.driver_version_string())?;
        writeln!(f, "  - Vendor Id: {:#06x} ({:?})", self.vendor_id, self.vendor)?;
        writeln!(f, "  - Device Id: {:#06x}", self.device_id)?;
        writeln!(f, "  - Device Type: {}", self.device_type_name())?;
        write!(f, "  - Device Name: {}", self.name)
    }
}
