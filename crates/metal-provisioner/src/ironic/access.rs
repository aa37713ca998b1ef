//! Registration, credential verification, adoption and removal.

use serde_json::{Map, Value};
use tracing::info;

use super::IronicProvisioner;
use crate::backend::{NewNode, Node, ProvisionState, ProvisionStateRequest, TargetProvisionState};
use crate::bmc::BmcAccess;
use crate::options::{options_document, OptionValue, OptionsData, UpdateOptsBuilder};
use crate::provisioner::{
    AdoptData, AutomatedCleaningMode, BootMode, ManagementAccessData, ProvisionResult,
    ProvisionerError, REQUEUE_DELAY,
};

/// States from which the backend accepts node deletion outside maintenance.
const DELETABLE_STATES: &[ProvisionState] = &[
    ProvisionState::Enroll,
    ProvisionState::Verifying,
    ProvisionState::Manageable,
    ProvisionState::Available,
    ProvisionState::InspectFail,
    ProvisionState::CleanFail,
    ProvisionState::AdoptFail,
];

pub(super) fn boot_mode_capabilities(mode: BootMode) -> OptionValue {
    OptionValue::from(format!("boot_mode:{mode}"))
}

impl IronicProvisioner {
    /// Desired `driver_info` including the deploy ramdisk.
    fn driver_info(&self, bmc: &BmcAccess) -> OptionsData {
        let mut info = bmc.driver_info(
            &self.host.credentials,
            self.host.bmc.disable_certificate_verification,
        );
        info.insert(
            "deploy_kernel".into(),
            self.config.deploy_kernel_url.clone().map(OptionValue::from),
        );
        info.insert(
            "deploy_ramdisk".into(),
            self.config.deploy_ramdisk_url.clone().map(OptionValue::from),
        );
        info
    }

    async fn enroll(
        &self,
        bmc: &BmcAccess,
        data: &ManagementAccessData,
    ) -> Result<Node, ProvisionerError> {
        let mut properties = Map::new();
        properties.insert(
            "capabilities".into(),
            Value::from(&boot_mode_capabilities(data.boot_mode)),
        );

        let req = NewNode {
            name: self.host.node_name(),
            driver: bmc.driver().name().to_string(),
            driver_info: options_document(&self.driver_info(bmc)),
            properties,
            boot_interface: None,
            automated_clean: Some(data.automated_cleaning_mode != AutomatedCleaningMode::Disabled),
        };
        let node = self.backend.create_node(req).await?;

        info!(host = %self.host.node_name(), node = %node.uuid, driver = %node.driver, "registered node");
        self.publisher.publish(
            "Registered",
            &format!("Registered new host with BMC {}", self.host.bmc.address),
        );
        Ok(node)
    }

    pub(super) async fn validate_access(
        &self,
        data: ManagementAccessData,
        credentials_changed: bool,
        force: bool,
    ) -> Result<(ProvisionResult, String), ProvisionerError> {
        let bmc = BmcAccess::parse(&self.host.bmc.address)?;

        let Some(node) = self.find_node().await? else {
            let node = self.enroll(&bmc, &data).await?;
            return Ok((ProvisionResult::continuing(REQUEUE_DELAY), node.uuid));
        };
        let id = node.uuid.clone();

        let current_clean = node.automated_clean.map(Value::Bool);
        let mut updater = self.updater();
        if credentials_changed {
            updater.set_driver_info_opts(&self.driver_info(&bmc), &node);
        }
        updater.set_top_level_opt(
            "automated_clean",
            Some((data.automated_cleaning_mode != AutomatedCleaningMode::Disabled).into()),
            current_clean.as_ref(),
        );
        let Some(node) = self.update_node(&node, updater.into_updates()).await? else {
            return Ok((ProvisionResult::continuing(REQUEUE_DELAY), id));
        };

        let result = match node.provision_state {
            ProvisionState::Enroll => match node.error() {
                Some(err) if !force => ProvisionResult::failed(err),
                _ => {
                    self.change_provision_state(
                        &node,
                        ProvisionStateRequest::new(TargetProvisionState::Manage),
                    )
                    .await?
                }
            },
            ProvisionState::Verifying => ProvisionResult::continuing(REQUEUE_DELAY),
            _ => ProvisionResult::complete(),
        };
        Ok((result, id))
    }

    pub(super) async fn adopt_node(
        &self,
        _data: AdoptData,
        force: bool,
    ) -> Result<ProvisionResult, ProvisionerError> {
        let node = self.require_node().await?;

        match node.provision_state {
            ProvisionState::Manageable => {
                self.publisher.publish("AdoptionStarted", "Host adoption started");
                self.change_provision_state(&node, ProvisionStateRequest::new(TargetProvisionState::Adopt))
                    .await
            }
            ProvisionState::Adopting => Ok(ProvisionResult::continuing(REQUEUE_DELAY)),
            ProvisionState::AdoptFail if force => {
                self.change_provision_state(&node, ProvisionStateRequest::new(TargetProvisionState::Adopt))
                    .await
            }
            ProvisionState::AdoptFail => Ok(ProvisionResult::failed(format!(
                "Host adoption failed: {}",
                node.error().unwrap_or("unknown error")
            ))),
            ProvisionState::Active => Ok(ProvisionResult::complete()),
            other => Ok(ProvisionResult::failed(format!(
                "Host adoption not possible in state {other}"
            ))),
        }
    }

    pub(super) async fn delete_node(&self) -> Result<ProvisionResult, ProvisionerError> {
        let Some(node) = self.find_node().await? else {
            info!(host = %self.host.node_name(), "node already removed");
            return Ok(ProvisionResult::complete());
        };

        if !node.maintenance && !DELETABLE_STATES.contains(&node.provision_state) {
            info!(
                host = %self.host.node_name(),
                state = %node.provision_state,
                "setting maintenance before removal"
            );
            self.unless_locked(
                self.backend
                    .set_maintenance(&node.uuid, true, Some("host is being deleted"))
                    .await,
            )?;
            return Ok(ProvisionResult::continuing(REQUEUE_DELAY));
        }

        if self
            .unless_locked(self.backend.delete_node(&node.uuid).await)?
            .is_some()
        {
            self.publisher.publish("Deleted", "Host removed from the provisioning backend");
        }
        Ok(ProvisionResult::continuing(REQUEUE_DELAY))
    }
}
