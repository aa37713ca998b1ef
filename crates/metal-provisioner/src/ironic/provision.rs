//! Image deployment and tear-down.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::info;

use super::access::boot_mode_capabilities;
use super::IronicProvisioner;
use crate::backend::{Node, ProvisionState, ProvisionStateRequest, TargetProvisionState};
use crate::options::{OptionValue, OptionsData, UpdateOperation, UpdateOptsBuilder};
use crate::provisioner::{ProvisionData, ProvisionResult, ProvisionerError, REQUEUE_DELAY};

/// Desired `instance_info` for deploying `data`.
fn instance_info(data: &ProvisionData) -> OptionsData {
    let image = &data.image;
    let mut info = OptionsData::new();
    let boot_option = if image.is_live_iso() {
        info.insert("boot_iso".into(), Some(image.url.clone().into()));
        info.insert("image_source".into(), None);
        info.insert("image_os_hash_algo".into(), None);
        info.insert("image_os_hash_value".into(), None);
        info.insert("image_disk_format".into(), None);
        info.insert("root_gb".into(), None);
        "ramdisk"
    } else {
        info.insert("boot_iso".into(), None);
        info.insert("image_source".into(), Some(image.url.clone().into()));
        info.insert(
            "image_os_hash_algo".into(),
            image.checksum_type.clone().map(OptionValue::from),
        );
        info.insert(
            "image_os_hash_value".into(),
            image.checksum.clone().map(OptionValue::from),
        );
        info.insert(
            "image_disk_format".into(),
            image.disk_format.clone().map(OptionValue::from),
        );
        info.insert(
            "root_gb".into(),
            Some(data.hardware_profile.root_gb.into()),
        );
        "local"
    };

    let capabilities =
        BTreeMap::from([("boot_option".to_string(), OptionValue::from(boot_option))]);
    info.insert("capabilities".into(), Some(OptionValue::from(capabilities)));
    info
}

/// Desired `properties` for deploying `data`.
fn properties(data: &ProvisionData) -> OptionsData {
    let profile = &data.hardware_profile;
    let hints = data
        .root_device_hints
        .as_ref()
        .unwrap_or(&profile.root_device_hints);

    let mut props = OptionsData::new();
    props.insert("root_device".into(), hints.to_option_value());
    props.insert("cpu_arch".into(), Some(profile.cpu_arch.clone().into()));
    props.insert("local_gb".into(), Some(profile.local_gb.into()));
    props.insert("capabilities".into(), Some(boot_mode_capabilities(data.boot_mode)));
    props
}

/// Whether the node already runs `data`'s image.
fn image_deployed(node: &Node, data: &ProvisionData) -> bool {
    let key = if data.image.is_live_iso() {
        "boot_iso"
    } else {
        "image_source"
    };
    node.instance_info.get(key).and_then(Value::as_str) == Some(data.image.url.as_str())
}

impl IronicProvisioner {
    fn provision_updates(&self, data: &ProvisionData, node: &Node) -> Vec<UpdateOperation> {
        let mut updater = self.updater();
        updater
            .set_instance_info_opts(&instance_info(data), node)
            .set_properties_opts(&properties(data), node);
        updater.into_updates()
    }

    /// Push the deployment settings and trigger `target`.
    async fn deploy(
        &self,
        node: &Node,
        data: &ProvisionData,
        target: TargetProvisionState,
    ) -> Result<ProvisionResult, ProvisionerError> {
        let waiting = ProvisionResult::continuing(REQUEUE_DELAY);
        let Some(node) = self
            .update_node(node, self.provision_updates(data, node))
            .await?
        else {
            return Ok(waiting);
        };
        if self
            .try_change_provision_state(&node, ProvisionStateRequest::new(target))
            .await?
        {
            self.publisher.publish(
                "ProvisioningStarted",
                &format!("Image provisioning started for {}", data.image.url),
            );
        }
        Ok(waiting)
    }

    pub(super) async fn provision_node(
        &self,
        data: ProvisionData,
    ) -> Result<ProvisionResult, ProvisionerError> {
        let node = self.require_node().await?;

        match node.provision_state {
            ProvisionState::Manageable => {
                self.change_provision_state(&node, ProvisionStateRequest::new(TargetProvisionState::Provide))
                    .await
            }
            ProvisionState::Available => {
                self.deploy(&node, &data, TargetProvisionState::Active).await
            }
            ProvisionState::Active if image_deployed(&node, &data) => {
                info!(host = %self.host.node_name(), image = %data.image.url, "image provisioned");
                Ok(ProvisionResult::complete())
            }
            ProvisionState::Active => {
                info!(host = %self.host.node_name(), image = %data.image.url, "image changed, rebuilding");
                self.deploy(&node, &data, TargetProvisionState::Rebuild).await
            }
            ProvisionState::DeployFail | ProvisionState::Error => Ok(ProvisionResult::failed(
                format!(
                    "Image provisioning failed: {}",
                    node.error().unwrap_or("unknown error")
                ),
            )),
            _ => Ok(ProvisionResult::continuing(REQUEUE_DELAY)),
        }
    }

    pub(super) async fn deprovision_node(
        &self,
        force: bool,
    ) -> Result<ProvisionResult, ProvisionerError> {
        let Some(node) = self.find_node().await? else {
            return Ok(ProvisionResult::complete());
        };
        let waiting = ProvisionResult::continuing(REQUEUE_DELAY);

        match node.provision_state {
            ProvisionState::Active | ProvisionState::DeployFail | ProvisionState::Error => {
                let mut node = node;
                if force {
                    let current = node.automated_clean.map(Value::Bool);
                    let mut updater = self.updater();
                    updater.set_top_level_opt("automated_clean", Some(false.into()), current.as_ref());
                    match self.update_node(&node, updater.into_updates()).await? {
                        Some(updated) => node = updated,
                        None => return Ok(waiting),
                    }
                }
                if self
                    .try_change_provision_state(&node, ProvisionStateRequest::new(TargetProvisionState::Deleted))
                    .await?
                {
                    self.publisher
                        .publish("DeprovisioningStarted", "Image deprovisioning started");
                }
                Ok(waiting)
            }
            ProvisionState::CleanFail => {
                let error = format!(
                    "Cleaning failed: {}",
                    node.error().unwrap_or("unknown error")
                );
                self.recover_from_clean_failure(&node).await?;
                if force {
                    Ok(waiting)
                } else {
                    Ok(ProvisionResult::failed(error))
                }
            }
            ProvisionState::Available
            | ProvisionState::Manageable
            | ProvisionState::Enroll
            | ProvisionState::Verifying
            | ProvisionState::InspectFail
            | ProvisionState::AdoptFail => {
                info!(host = %self.host.node_name(), state = %node.provision_state, "deprovisioned");
                Ok(ProvisionResult::complete())
            }
            _ => Ok(waiting),
        }
    }
}
