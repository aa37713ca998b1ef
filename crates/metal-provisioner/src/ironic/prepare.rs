//! Out-of-band preparation through manual cleaning.
//!
//! RAID volumes are applied by setting the node's target RAID configuration
//! and running a manual clean with the RAID steps. Cleaning can only start
//! from `manageable`, and a failed clean must go back to `manageable` before
//! anything else is attempted.

use serde_json::{json, Map, Value};
use tracing::info;

use super::IronicProvisioner;
use crate::backend::{
    CleanStep, ProvisionState, ProvisionStateRequest, TargetProvisionState,
};
use crate::bmc::BmcAccess;
use crate::provisioner::{
    PrepareData, ProvisionResult, ProvisionerError, RaidConfig, REQUEUE_DELAY,
};

fn clean_step(interface: &str, step: &str) -> CleanStep {
    CleanStep {
        interface: interface.to_string(),
        step: step.to_string(),
        args: Map::new(),
    }
}

/// Manual cleaning steps that apply `raid`.
///
/// Software RAID also wipes disk metadata between deleting and creating
/// volumes, since stale partition tables block the new arrays.
#[must_use]
pub fn build_raid_clean_steps(raid: &RaidConfig) -> Vec<CleanStep> {
    if raid.is_empty() {
        return Vec::new();
    }
    let mut steps = vec![clean_step("raid", "delete_configuration")];
    if !raid.software_raid_volumes.is_empty() {
        steps.push(clean_step("deploy", "erase_devices_metadata"));
    }
    steps.push(clean_step("raid", "create_configuration"));
    steps
}

/// The backend's `target_raid_config` document for `raid`.
///
/// The first volume becomes the root volume. Volumes without a size take
/// all remaining space.
#[must_use]
pub fn target_raid_config(raid: &RaidConfig) -> Value {
    let size = |gib: Option<u64>| gib.map_or_else(|| json!("MAX"), |g| json!(g));

    let disks: Vec<Value> = if raid.hardware_raid_volumes.is_empty() {
        raid.software_raid_volumes
            .iter()
            .enumerate()
            .map(|(i, volume)| {
                json!({
                    "size_gb": size(volume.size_gibibytes),
                    "raid_level": volume.level,
                    "controller": "software",
                    "is_root_volume": i == 0,
                })
            })
            .collect()
    } else {
        raid.hardware_raid_volumes
            .iter()
            .enumerate()
            .map(|(i, volume)| {
                let mut disk = Map::new();
                disk.insert("size_gb".into(), size(volume.size_gibibytes));
                disk.insert("raid_level".into(), json!(volume.level));
                disk.insert("is_root_volume".into(), json!(i == 0));
                if !volume.name.is_empty() {
                    disk.insert("volume_name".into(), json!(volume.name));
                }
                if let Some(controller) = &volume.controller {
                    disk.insert("controller".into(), json!(controller));
                }
                if !volume.physical_disks.is_empty() {
                    disk.insert("physical_disks".into(), json!(volume.physical_disks));
                }
                if let Some(count) = volume.number_of_physical_disks {
                    disk.insert("number_of_physical_disks".into(), json!(count));
                }
                if let Some(rotational) = volume.rotational {
                    disk.insert(
                        "disk_type".into(),
                        json!(if rotational { "hdd" } else { "ssd" }),
                    );
                }
                Value::Object(disk)
            })
            .collect()
    };

    json!({ "logical_disks": disks })
}

impl IronicProvisioner {
    /// Reject RAID requests this host can never satisfy.
    fn check_raid_support(&self, raid: &RaidConfig) -> Result<(), ProvisionerError> {
        if !raid.hardware_raid_volumes.is_empty() && !raid.software_raid_volumes.is_empty() {
            return Err(ProvisionerError::Unsupported(
                "hardware and software RAID cannot be configured together".into(),
            ));
        }
        if !raid.hardware_raid_volumes.is_empty() {
            let bmc = BmcAccess::parse(&self.host.bmc.address)?;
            if !bmc.supports_hardware_raid() {
                return Err(ProvisionerError::Unsupported(format!(
                    "BMC driver {} does not support hardware RAID",
                    bmc.driver().name()
                )));
            }
        }
        Ok(())
    }

    pub(super) async fn prepare_node(
        &self,
        data: PrepareData,
        unprepared: bool,
    ) -> Result<(ProvisionResult, bool), ProvisionerError> {
        let Some(raid) = data.raid_config.filter(|r| !r.is_empty()) else {
            return Ok((ProvisionResult::complete(), false));
        };
        self.check_raid_support(&raid)?;

        let node = self.require_node().await?;
        let waiting = ProvisionResult::continuing(REQUEUE_DELAY);

        match node.provision_state {
            ProvisionState::CleanFail => {
                info!(
                    host = %self.host.node_name(),
                    error = node.error().unwrap_or_default(),
                    "cleaning failed, returning node to manageable"
                );
                self.recover_from_clean_failure(&node).await?;
                Ok((waiting, false))
            }
            ProvisionState::Manageable if unprepared => {
                let raid_set = self.unless_locked(
                    self.backend
                        .set_raid_config(&node.uuid, &target_raid_config(&raid))
                        .await,
                )?;
                if raid_set.is_none() {
                    return Ok((waiting, false));
                }
                let req = ProvisionStateRequest {
                    target: TargetProvisionState::Clean,
                    clean_steps: build_raid_clean_steps(&raid),
                };
                let started = self.try_change_provision_state(&node, req).await?;
                if started {
                    self.publisher
                        .publish("PreparingStarted", "Applying RAID configuration");
                }
                Ok((waiting, started))
            }
            ProvisionState::Available if unprepared => {
                let result = self
                    .change_provision_state(&node, ProvisionStateRequest::new(TargetProvisionState::Manage))
                    .await?;
                Ok((result, false))
            }
            ProvisionState::Manageable | ProvisionState::Available => {
                Ok((ProvisionResult::complete(), false))
            }
            // Another operation owns the node; it settles in a state handled above.
            ProvisionState::Cleaning
            | ProvisionState::CleanWait
            | ProvisionState::Enroll
            | ProvisionState::Verifying
            | ProvisionState::Inspecting
            | ProvisionState::InspectWait
            | ProvisionState::Deploying
            | ProvisionState::DeployWait
            | ProvisionState::Deleting
            | ProvisionState::Adopting => Ok((waiting, false)),
            other if unprepared => Ok((
                ProvisionResult::failed(format!(
                    "RAID configuration cannot be applied in state {other}"
                )),
                false,
            )),
            _ => Ok((ProvisionResult::complete(), false)),
        }
    }
}
