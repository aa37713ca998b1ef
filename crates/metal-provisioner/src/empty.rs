//! Provisioner that does nothing.
//!
//! Every operation completes immediately. Used when no backend is configured
//! and as a stand-in delegate.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::events::EventPublisher;
use crate::provisioner::{
    AdoptData, HardwareDetails, HardwareState, HostData, InspectData, ManagementAccessData,
    PrepareData, ProvisionData, ProvisionResult, Provisioner, ProvisionerError,
    ProvisionerFactory, RebootMode,
};

/// A provisioner whose operations always succeed without side effects.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyProvisioner;

#[async_trait]
impl Provisioner for EmptyProvisioner {
    async fn validate_management_access(
        &self,
        _data: ManagementAccessData,
        _credentials_changed: bool,
        _force: bool,
    ) -> Result<(ProvisionResult, String), ProvisionerError> {
        Ok((ProvisionResult::complete(), String::new()))
    }

    async fn adopt(&self, _data: AdoptData, _force: bool) -> Result<ProvisionResult, ProvisionerError> {
        Ok(ProvisionResult::complete())
    }

    async fn inspect_hardware(
        &self,
        _data: InspectData,
        _force: bool,
    ) -> Result<(ProvisionResult, Option<HardwareDetails>), ProvisionerError> {
        Ok((ProvisionResult::complete(), None))
    }

    async fn prepare(
        &self,
        _data: PrepareData,
        _unprepared: bool,
    ) -> Result<(ProvisionResult, bool), ProvisionerError> {
        Ok((ProvisionResult::complete(), false))
    }

    async fn provision(&self, _data: ProvisionData) -> Result<ProvisionResult, ProvisionerError> {
        Ok(ProvisionResult::complete())
    }

    async fn deprovision(&self, _force: bool) -> Result<ProvisionResult, ProvisionerError> {
        Ok(ProvisionResult::complete())
    }

    async fn delete(&self) -> Result<ProvisionResult, ProvisionerError> {
        Ok(ProvisionResult::complete())
    }

    async fn power_on(&self) -> Result<ProvisionResult, ProvisionerError> {
        Ok(ProvisionResult::complete())
    }

    async fn power_off(&self, _mode: RebootMode) -> Result<ProvisionResult, ProvisionerError> {
        Ok(ProvisionResult::complete())
    }

    async fn is_ready(&self) -> Result<bool, ProvisionerError> {
        Ok(true)
    }

    async fn has_provisioning_capacity(&self) -> Result<bool, ProvisionerError> {
        Ok(true)
    }

    async fn update_hardware_state(&self) -> Result<HardwareState, ProvisionerError> {
        Ok(HardwareState::default())
    }
}

/// Factory for [`EmptyProvisioner`].
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyFactory;

impl ProvisionerFactory for EmptyFactory {
    fn create(
        &self,
        host: HostData,
        _publisher: Arc<dyn EventPublisher>,
    ) -> Result<Box<dyn Provisioner>, ProvisionerError> {
        debug!(host = %host.node_name(), "using empty provisioner");
        Ok(Box::new(EmptyProvisioner))
    }
}
