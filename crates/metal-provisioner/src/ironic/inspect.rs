//! Hardware inspection.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::access::boot_mode_capabilities;
use super::IronicProvisioner;
use crate::backend::{Node, ProvisionState, ProvisionStateRequest, TargetProvisionState};
use crate::options::{OptionsData, Section, UpdateOptsBuilder};
use crate::provisioner::{
    HardwareDetails, InspectData, ProvisionResult, ProvisionerError, REQUEUE_DELAY,
};

/// Read the inventory recorded by inspection from the node's properties.
pub(super) fn hardware_details(node: &Node) -> HardwareDetails {
    let number = |key: &str| node.properties.get(key).and_then(Value::as_u64);
    HardwareDetails {
        cpu_arch: node
            .properties
            .get("cpu_arch")
            .and_then(Value::as_str)
            .map(str::to_string),
        cpu_count: number("cpus").and_then(|n| u32::try_from(n).ok()),
        ram_mebibytes: number("memory_mb"),
        storage_gb: number("local_gb"),
        hostname: node
            .extra
            .get("hostname")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

/// Extra key recording when a forced re-inspection was requested.
const FORCED_INSPECTION_KEY: &str = "forced_inspection_at";

/// True when an inspection finished after the last forced request.
fn forced_inspection_done(node: &Node) -> bool {
    let requested = node
        .extra
        .get(FORCED_INSPECTION_KEY)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));
    match (requested, node.inspection_finished_at) {
        (Some(requested), Some(finished)) => finished >= requested,
        _ => false,
    }
}

type InspectOutcome = (ProvisionResult, Option<HardwareDetails>);

impl IronicProvisioner {
    async fn start_inspection(
        &self,
        node: &Node,
        data: &InspectData,
        force: bool,
    ) -> Result<InspectOutcome, ProvisionerError> {
        let mut settings = OptionsData::new();
        settings.insert("capabilities".into(), Some(boot_mode_capabilities(data.boot_mode)));
        let mut updater = self.updater();
        updater.set_properties_opts(&settings, node);
        if force {
            updater.set_opt(
                Section::Extra,
                FORCED_INSPECTION_KEY,
                Utc::now().to_rfc3339(),
                Some(&node.extra),
            );
        }

        let waiting = (ProvisionResult::continuing(REQUEUE_DELAY), None);
        let Some(node) = self.update_node(node, updater.into_updates()).await? else {
            return Ok(waiting);
        };
        if self
            .try_change_provision_state(&node, ProvisionStateRequest::new(TargetProvisionState::Inspect))
            .await?
        {
            self.publisher
                .publish("InspectionStarted", "Hardware inspection started");
        }
        Ok(waiting)
    }

    pub(super) async fn inspect_node(
        &self,
        data: InspectData,
        force: bool,
    ) -> Result<InspectOutcome, ProvisionerError> {
        let node = self.require_node().await?;
        let inspected = node.inspection_finished_at.is_some();
        let needed = (force && !forced_inspection_done(&node)) || !inspected;
        let waiting = (ProvisionResult::continuing(REQUEUE_DELAY), None);

        match node.provision_state {
            ProvisionState::Inspecting | ProvisionState::InspectWait => Ok(waiting),
            ProvisionState::InspectFail if !force => Ok((
                ProvisionResult::failed(format!(
                    "Hardware inspection failed: {}",
                    node.error().unwrap_or("unknown error")
                )),
                None,
            )),
            ProvisionState::InspectFail => self.start_inspection(&node, &data, force).await,
            ProvisionState::Manageable if needed => {
                self.start_inspection(&node, &data, force).await
            }
            ProvisionState::Available if needed => {
                let result = self
                    .change_provision_state(&node, ProvisionStateRequest::new(TargetProvisionState::Manage))
                    .await?;
                Ok((result, None))
            }
            ProvisionState::Enroll
            | ProvisionState::Verifying
            | ProvisionState::Cleaning
            | ProvisionState::CleanWait
            | ProvisionState::Deploying
            | ProvisionState::DeployWait
            | ProvisionState::Deleting
            | ProvisionState::Adopting
                if needed =>
            {
                Ok(waiting)
            }
            _ if inspected => Ok((ProvisionResult::complete(), Some(hardware_details(&node)))),
            // Inspection only starts from manageable; no inventory exists yet.
            _ => Ok(waiting),
        }
    }
}
