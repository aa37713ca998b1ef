//! State machine driving hosts through an Ironic-style node backend.
//!
//! Each operation reads the node fresh from the backend, decides the next
//! legal action from its provision state and the requested intent, triggers
//! at most one transition, and returns. Waiting is always expressed as a
//! dirty result with [`REQUEUE_DELAY`].

mod access;
mod inspect;
mod power;
mod prepare;
mod provision;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

pub use prepare::{build_raid_clean_steps, target_raid_config};

use crate::backend::{BackendError, Node, NodeBackend, ProvisionStateRequest};
use crate::config::ProvisionerConfig;
use crate::events::EventPublisher;
use crate::options::{NodeUpdater, UpdateOperation};
use crate::provisioner::{
    AdoptData, HardwareDetails, HardwareState, HostData, InspectData, ManagementAccessData,
    PrepareData, ProvisionData, ProvisionResult, Provisioner, ProvisionerError,
    ProvisionerFactory, RebootMode, REQUEUE_DELAY,
};

/// Provisioner backed by a [`NodeBackend`].
pub struct IronicProvisioner {
    /// Node API.
    backend: Arc<dyn NodeBackend>,
    /// Static configuration.
    config: Arc<ProvisionerConfig>,
    /// Host this provisioner is bound to.
    host: HostData,
    /// Lifecycle event sink.
    publisher: Arc<dyn EventPublisher>,
}

impl IronicProvisioner {
    /// Create a provisioner for `host`.
    #[must_use]
    pub fn new(
        host: HostData,
        backend: Arc<dyn NodeBackend>,
        config: Arc<ProvisionerConfig>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            backend,
            config,
            host,
            publisher,
        }
    }

    fn updater(&self) -> NodeUpdater {
        NodeUpdater::with_log(tracing::info_span!("node_update", host = %self.host.node_name()))
    }

    /// Look the node up by backend id, falling back to its name.
    async fn find_node(&self) -> Result<Option<Node>, ProvisionerError> {
        if !self.host.provisioner_id.is_empty() {
            match self.backend.get_node(&self.host.provisioner_id).await {
                Ok(node) => return Ok(Some(node)),
                Err(BackendError::NotFound(_)) => {
                    debug!(
                        host = %self.host.node_name(),
                        id = %self.host.provisioner_id,
                        "node id not found, looking up by name"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.backend.find_node_by_name(&self.host.node_name()).await?)
    }

    async fn require_node(&self) -> Result<Node, ProvisionerError> {
        self.find_node()
            .await?
            .ok_or_else(|| ProvisionerError::HostNotRegistered(self.host.node_name()))
    }

    /// Request a transition. Returns false when the node is locked.
    async fn try_change_provision_state(
        &self,
        node: &Node,
        req: ProvisionStateRequest,
    ) -> Result<bool, ProvisionerError> {
        info!(
            host = %self.host.node_name(),
            node = %node.uuid,
            current = %node.provision_state,
            target = %req.target,
            "changing provisioning state"
        );
        let accepted = self.unless_locked(self.backend.change_provision_state(&node.uuid, req).await)?;
        Ok(accepted.is_some())
    }

    /// Map a locked node to `None` so the caller requeues instead of failing.
    fn unless_locked<T>(&self, result: Result<T, BackendError>) -> Result<Option<T>, ProvisionerError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(BackendError::Conflict(reason)) => {
                info!(host = %self.host.node_name(), %reason, "node busy, will retry");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn change_provision_state(
        &self,
        node: &Node,
        req: ProvisionStateRequest,
    ) -> Result<ProvisionResult, ProvisionerError> {
        self.try_change_provision_state(node, req).await?;
        Ok(ProvisionResult::continuing(REQUEUE_DELAY))
    }

    /// Apply a patch. Returns `None` when the node is locked.
    async fn update_node(
        &self,
        node: &Node,
        ops: Vec<UpdateOperation>,
    ) -> Result<Option<Node>, ProvisionerError> {
        if ops.is_empty() {
            return Ok(Some(node.clone()));
        }
        self.unless_locked(self.backend.update_node(&node.uuid, &ops).await)
    }

    /// Clear maintenance and return the node to manageable after a failed
    /// cleaning. Returns false when the node is locked.
    async fn recover_from_clean_failure(&self, node: &Node) -> Result<bool, ProvisionerError> {
        if node.maintenance {
            let cleared = self.unless_locked(self.backend.set_maintenance(&node.uuid, false, None).await)?;
            if cleared.is_none() {
                return Ok(false);
            }
        }
        self.try_change_provision_state(
            node,
            ProvisionStateRequest::new(crate::backend::TargetProvisionState::Manage),
        )
        .await
    }
}

#[async_trait]
impl Provisioner for IronicProvisioner {
    async fn validate_management_access(
        &self,
        data: ManagementAccessData,
        credentials_changed: bool,
        force: bool,
    ) -> Result<(ProvisionResult, String), ProvisionerError> {
        self.validate_access(data, credentials_changed, force).await
    }

    async fn adopt(&self, data: AdoptData, force: bool) -> Result<ProvisionResult, ProvisionerError> {
        self.adopt_node(data, force).await
    }

    async fn inspect_hardware(
        &self,
        data: InspectData,
        force: bool,
    ) -> Result<(ProvisionResult, Option<HardwareDetails>), ProvisionerError> {
        self.inspect_node(data, force).await
    }

    async fn prepare(
        &self,
        data: PrepareData,
        unprepared: bool,
    ) -> Result<(ProvisionResult, bool), ProvisionerError> {
        self.prepare_node(data, unprepared).await
    }

    async fn provision(&self, data: ProvisionData) -> Result<ProvisionResult, ProvisionerError> {
        self.provision_node(data).await
    }

    async fn deprovision(&self, force: bool) -> Result<ProvisionResult, ProvisionerError> {
        self.deprovision_node(force).await
    }

    async fn delete(&self) -> Result<ProvisionResult, ProvisionerError> {
        self.delete_node().await
    }

    async fn power_on(&self) -> Result<ProvisionResult, ProvisionerError> {
        self.ensure_power(true, RebootMode::Hard).await
    }

    async fn power_off(&self, mode: RebootMode) -> Result<ProvisionResult, ProvisionerError> {
        self.ensure_power(false, mode).await
    }

    async fn is_ready(&self) -> Result<bool, ProvisionerError> {
        Ok(self.backend.is_ready().await?)
    }

    async fn has_provisioning_capacity(&self) -> Result<bool, ProvisionerError> {
        self.has_capacity().await
    }

    async fn update_hardware_state(&self) -> Result<HardwareState, ProvisionerError> {
        self.hardware_state().await
    }
}

/// Builds [`IronicProvisioner`]s sharing one backend and configuration.
#[derive(Clone)]
pub struct IronicFactory {
    backend: Arc<dyn NodeBackend>,
    config: Arc<ProvisionerConfig>,
}

impl IronicFactory {
    /// Create a factory.
    #[must_use]
    pub fn new(backend: Arc<dyn NodeBackend>, config: ProvisionerConfig) -> Self {
        Self {
            backend,
            config: Arc::new(config),
        }
    }
}

impl ProvisionerFactory for IronicFactory {
    fn create(
        &self,
        host: HostData,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Box<dyn Provisioner>, ProvisionerError> {
        if host.name.is_empty() {
            return Err(ProvisionerError::InvalidHost("host has no name".into()));
        }
        Ok(Box::new(IronicProvisioner::new(
            host,
            Arc::clone(&self.backend),
            Arc::clone(&self.config),
            publisher,
        )))
    }
}
