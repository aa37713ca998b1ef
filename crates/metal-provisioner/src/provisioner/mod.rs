//! Provisioner contract shared by every provisioning strategy.

mod traits;
mod types;

pub use traits::{
    ProvisionResult, Provisioner, ProvisionerError, ProvisionerFactory, REQUEUE_DELAY,
};
pub use types::{
    AdoptData, AutomatedCleaningMode, BmcDetails, BootMode, Credentials, HardwareDetails,
    HardwareRaidVolume, HardwareState, HostData, Image, InspectData, ManagementAccessData,
    PrepareData, ProvisionData, ProvisioningState, RaidConfig, RebootMode, SoftwareRaidVolume,
};
