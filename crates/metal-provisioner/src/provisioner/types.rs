//! Host data and per-call request payloads.

use serde::{Deserialize, Serialize};

use crate::hardware::{HardwareProfile, RootDeviceHints};

// ============================================================================
// Host identity
// ============================================================================

/// Provisioning state of a host, owned by the outer controller.
///
/// Provisioners may remap the value before delegating but never produce a
/// state outside this set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisioningState {
    /// No state recorded yet.
    #[default]
    None,
    /// Host is not managed.
    Unmanaged,
    /// Host is being registered with the backend.
    Registering,
    /// Host is being matched against hardware profiles.
    Matching,
    /// Host is being assigned a hardware profile.
    MatchProfile,
    /// Hardware inventory is being collected.
    Inspecting,
    /// Host is ready to be provisioned.
    Ready,
    /// Out-of-band configuration is being applied.
    Preparing,
    /// Host is prepared and available.
    Available,
    /// Image is being written.
    Provisioning,
    /// Image has been written.
    Provisioned,
    /// Image is being removed.
    Deprovisioning,
    /// Host is being removed from the backend.
    Deleting,
    /// Host is being adopted.
    Adopting,
    /// Host has been adopted.
    Adopted,
    /// Host was provisioned outside this system.
    ExternallyProvisioned,
    /// Host is being powered off before removal.
    PoweringOffBeforeDelete,
}

/// BMC connection details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmcDetails {
    /// BMC address, e.g. `ipmi://192.168.1.10:623` or `redfish://bmc/redfish/v1/Systems/1`.
    pub address: String,
    /// Skip TLS verification when talking to the BMC.
    #[serde(default)]
    pub disable_certificate_verification: bool,
}

/// BMC credentials.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// BMC user name.
    pub username: String,
    /// BMC password.
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Identity and access data of the host a provisioner is bound to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostData {
    /// Host object name.
    pub name: String,
    /// Host object namespace.
    pub namespace: String,
    /// Identifier previously assigned by the backend, empty if unknown.
    #[serde(default)]
    pub provisioner_id: String,
    /// BMC connection details.
    pub bmc: BmcDetails,
    /// BMC credentials.
    pub credentials: Credentials,
    /// MAC address of the NIC used for network boot.
    #[serde(default)]
    pub boot_mac_address: Option<String>,
}

impl HostData {
    /// Name used for the host's node in the backend.
    #[must_use]
    pub fn node_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}~{}", self.namespace, self.name)
        }
    }
}

// ============================================================================
// Request payloads
// ============================================================================

/// Firmware boot mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BootMode {
    /// UEFI boot.
    #[default]
    Uefi,
    /// UEFI with secure boot.
    UefiSecureBoot,
    /// Legacy BIOS boot.
    Legacy,
}

impl std::fmt::Display for BootMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uefi | Self::UefiSecureBoot => write!(f, "uefi"),
            Self::Legacy => write!(f, "bios"),
        }
    }
}

/// Whether the backend cleans disks automatically on deprovision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomatedCleaningMode {
    /// Clean disk metadata on deprovision.
    #[default]
    Metadata,
    /// Never clean automatically.
    Disabled,
}

/// Input to `validate_management_access`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagementAccessData {
    /// Current provisioning state of the host.
    pub state: ProvisioningState,
    /// Boot mode to configure on the node.
    #[serde(default)]
    pub boot_mode: BootMode,
    /// Automated cleaning mode to configure on the node.
    #[serde(default)]
    pub automated_cleaning_mode: AutomatedCleaningMode,
}

/// Input to `adopt`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdoptData {
    /// Current provisioning state of the host.
    pub state: ProvisioningState,
}

/// Input to `inspect_hardware`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectData {
    /// Boot mode used to boot the inspection ramdisk.
    #[serde(default)]
    pub boot_mode: BootMode,
}

/// A hardware RAID volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareRaidVolume {
    /// Volume name.
    #[serde(default)]
    pub name: String,
    /// RAID level, e.g. "0", "1", "5", "1+0".
    pub level: String,
    /// Size in GiB, `None` for the maximum available.
    #[serde(default)]
    pub size_gibibytes: Option<u64>,
    /// Controller to create the volume on.
    #[serde(default)]
    pub controller: Option<String>,
    /// Physical disks backing the volume.
    #[serde(default)]
    pub physical_disks: Vec<String>,
    /// Number of physical disks to use.
    #[serde(default)]
    pub number_of_physical_disks: Option<u32>,
    /// Prefer rotational (true) or solid state (false) disks.
    #[serde(default)]
    pub rotational: Option<bool>,
}

/// A software RAID volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftwareRaidVolume {
    /// RAID level, "0", "1" or "1+0".
    pub level: String,
    /// Size in GiB, `None` for the maximum available.
    #[serde(default)]
    pub size_gibibytes: Option<u64>,
}

/// Requested RAID layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidConfig {
    /// Hardware RAID volumes; the first one is the root volume.
    #[serde(default)]
    pub hardware_raid_volumes: Vec<HardwareRaidVolume>,
    /// Software RAID volumes; the first one is the root volume.
    #[serde(default)]
    pub software_raid_volumes: Vec<SoftwareRaidVolume>,
}

impl RaidConfig {
    /// True when no volume of either kind is requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hardware_raid_volumes.is_empty() && self.software_raid_volumes.is_empty()
    }
}

/// Input to `prepare`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareData {
    /// RAID configuration to apply, `None` when no preparation is needed.
    #[serde(default)]
    pub raid_config: Option<RaidConfig>,
}

/// Image to write to the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Image location.
    pub url: String,
    /// Image checksum or checksum URL.
    #[serde(default)]
    pub checksum: Option<String>,
    /// Checksum algorithm, e.g. "sha256".
    #[serde(default)]
    pub checksum_type: Option<String>,
    /// Disk format, e.g. "raw", "qcow2" or "live-iso".
    #[serde(default)]
    pub disk_format: Option<String>,
}

impl Image {
    /// Live ISOs are booted directly instead of being written to disk.
    #[must_use]
    pub fn is_live_iso(&self) -> bool {
        self.disk_format.as_deref() == Some("live-iso")
    }
}

/// Input to `provision`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionData {
    /// Image to write.
    pub image: Image,
    /// Firmware boot mode.
    #[serde(default)]
    pub boot_mode: BootMode,
    /// Hardware profile of the host.
    pub hardware_profile: HardwareProfile,
    /// Root device hints overriding the profile's.
    #[serde(default)]
    pub root_device_hints: Option<RootDeviceHints>,
}

/// Power-off behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebootMode {
    /// Cut power immediately.
    Hard,
    /// Ask the operating system to shut down.
    #[default]
    Soft,
}

// ============================================================================
// Results
// ============================================================================

/// Hardware inventory collected by inspection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareDetails {
    /// CPU architecture, e.g. `x86_64`.
    pub cpu_arch: Option<String>,
    /// Number of CPUs.
    pub cpu_count: Option<u32>,
    /// Memory in MiB.
    pub ram_mebibytes: Option<u64>,
    /// Size of the root disk in GB.
    pub storage_gb: Option<u64>,
    /// Hostname reported by the host.
    pub hostname: Option<String>,
}

/// Cheaply observable hardware state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareState {
    /// Power state, `None` when unknown.
    pub powered_on: Option<bool>,
}
