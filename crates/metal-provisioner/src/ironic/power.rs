//! Power control, hardware state and provisioning capacity.

use tracing::{debug, info};

use super::IronicProvisioner;
use crate::backend::{BackendError, PowerState, TargetPowerState};
use crate::provisioner::{
    HardwareState, ProvisionResult, ProvisionerError, RebootMode, REQUEUE_DELAY,
};

impl IronicProvisioner {
    pub(super) async fn ensure_power(
        &self,
        on: bool,
        mode: RebootMode,
    ) -> Result<ProvisionResult, ProvisionerError> {
        let node = self.require_node().await?;

        if let Some(pending) = node.target_power_state {
            debug!(host = %self.host.node_name(), ?pending, "power change in progress");
            return Ok(ProvisionResult::continuing(REQUEUE_DELAY));
        }

        let (wanted, target) = match (on, mode) {
            (true, _) => (PowerState::PowerOn, TargetPowerState::PowerOn),
            (false, RebootMode::Soft) => (PowerState::PowerOff, TargetPowerState::SoftPowerOff),
            (false, RebootMode::Hard) => (PowerState::PowerOff, TargetPowerState::PowerOff),
        };
        if node.power_state == Some(wanted) {
            return Ok(ProvisionResult::complete());
        }

        info!(host = %self.host.node_name(), ?target, "changing power state");
        match self.backend.set_power_state(&node.uuid, target).await {
            Ok(()) | Err(BackendError::Conflict(_)) => {
                Ok(ProvisionResult::continuing(REQUEUE_DELAY))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub(super) async fn hardware_state(&self) -> Result<HardwareState, ProvisionerError> {
        let Some(node) = self.find_node().await? else {
            return Ok(HardwareState::default());
        };
        let powered_on = match node.power_state {
            Some(PowerState::PowerOn) => Some(true),
            Some(PowerState::PowerOff) => Some(false),
            _ => None,
        };
        Ok(HardwareState { powered_on })
    }

    /// A host already holding a busy slot always keeps it.
    pub(super) async fn has_capacity(&self) -> Result<bool, ProvisionerError> {
        let nodes = self.backend.list_nodes().await?;
        let own_name = self.host.node_name();

        let mut busy = 0;
        for node in &nodes {
            if !node.provision_state.is_busy() {
                continue;
            }
            if node.uuid == self.host.provisioner_id || node.name.as_deref() == Some(&own_name) {
                return Ok(true);
            }
            busy += 1;
        }

        debug!(host = %own_name, busy, max = self.config.max_busy_hosts, "provisioning capacity");
        Ok(busy < self.config.max_busy_hosts)
    }
}
