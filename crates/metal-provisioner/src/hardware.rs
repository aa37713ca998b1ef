//! Hardware profiles describing known machine families.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::options::OptionValue;
use crate::provisioner::ProvisionerError;

/// Hints used by the backend to pick the root disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootDeviceHints {
    /// Linux device name, e.g. `/dev/vda`.
    #[serde(default)]
    pub device_name: Option<String>,
    /// SCSI host:channel:target:lun address.
    #[serde(default)]
    pub hctl: Option<String>,
    /// Vendor-provided model string.
    #[serde(default)]
    pub model: Option<String>,
    /// Vendor name.
    #[serde(default)]
    pub vendor: Option<String>,
    /// Disk serial number.
    #[serde(default)]
    pub serial_number: Option<String>,
    /// Minimum disk size in GB.
    #[serde(default)]
    pub min_size_gigabytes: Option<u32>,
    /// World wide name.
    #[serde(default)]
    pub wwn: Option<String>,
    /// Rotational (spinning) disk.
    #[serde(default)]
    pub rotational: Option<bool>,
}

impl RootDeviceHints {
    /// Render the hints as the backend's `root_device` property.
    ///
    /// Returns `None` when no hint is set so the property gets removed.
    #[must_use]
    pub fn to_option_value(&self) -> Option<OptionValue> {
        let mut hints = BTreeMap::new();
        let strings = [
            ("name", &self.device_name),
            ("hctl", &self.hctl),
            ("model", &self.model),
            ("vendor", &self.vendor),
            ("serial", &self.serial_number),
            ("wwn", &self.wwn),
        ];
        for (key, value) in strings {
            if let Some(value) = value {
                hints.insert(key.to_string(), OptionValue::from(value.as_str()));
            }
        }
        if let Some(size) = self.min_size_gigabytes {
            hints.insert("size".to_string(), OptionValue::from(format!(">= {size}")));
        }
        if let Some(rotational) = self.rotational {
            hints.insert("rotational".to_string(), OptionValue::from(rotational));
        }

        if hints.is_empty() {
            None
        } else {
            Some(OptionValue::Mapping(hints))
        }
    }
}

/// Hardware characteristics of a machine family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareProfile {
    /// Profile name.
    pub name: String,
    /// Default root device hints.
    pub root_device_hints: RootDeviceHints,
    /// Size of the root partition in GB.
    pub root_gb: u32,
    /// Size of the local disk in GB.
    pub local_gb: u32,
    /// CPU architecture.
    pub cpu_arch: String,
}

impl HardwareProfile {
    fn with_hints(name: &str, hints: RootDeviceHints) -> Self {
        Self {
            name: name.to_string(),
            root_device_hints: hints,
            root_gb: 10,
            local_gb: 50,
            cpu_arch: "x86_64".to_string(),
        }
    }
}

/// Names of the built-in profiles.
pub const PROFILE_NAMES: &[&str] = &["unknown", "libvirt", "dell", "dell-raid", "openstack"];

/// Look up a built-in hardware profile by name.
///
/// # Errors
/// Returns [`ProvisionerError::HardwareProfile`] for unknown names.
pub fn get_profile(name: &str) -> Result<HardwareProfile, ProvisionerError> {
    let device = |d: &str| RootDeviceHints {
        device_name: Some(d.to_string()),
        ..RootDeviceHints::default()
    };
    let hctl = |h: &str| RootDeviceHints {
        hctl: Some(h.to_string()),
        ..RootDeviceHints::default()
    };

    let profile = match name {
        "unknown" => HardwareProfile::with_hints(name, device("/dev/sda")),
        "libvirt" => HardwareProfile::with_hints(name, device("/dev/vda")),
        "dell" => HardwareProfile::with_hints(name, hctl("0:0:0:0")),
        "dell-raid" => HardwareProfile::with_hints(name, hctl("0:2:0:0")),
        "openstack" => HardwareProfile::with_hints(name, device("/dev/vdb")),
        _ => return Err(ProvisionerError::HardwareProfile(name.to_string())),
    };
    Ok(profile)
}
