//! Agent-based provisioning on top of another provisioner.
//!
//! The wrapped provisioner only ever boots a live ISO carrying a helper
//! agent. Inspection, image deployment and clean-up are then performed by
//! talking to that agent directly.

mod http;
mod wrapper;

use std::sync::Arc;

use async_trait::async_trait;

pub use http::{AgentRegistration, HttpAgent, HttpAgentLocator};
pub use wrapper::AgentProvisioner;

use crate::events::EventPublisher;
use crate::provisioner::{
    HardwareDetails, HostData, Provisioner, ProvisionerError, ProvisionerFactory,
};

/// Helper runtime running on a booted host.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Inventory collected by the agent.
    ///
    /// # Errors
    /// Returns [`ProvisionerError::Agent`] if the agent cannot be queried.
    async fn hardware_details(&self) -> Result<HardwareDetails, ProvisionerError>;

    /// Whether an image has been written by this agent.
    ///
    /// # Errors
    /// Returns [`ProvisionerError::Agent`] if the agent cannot be queried.
    async fn is_deployed(&self) -> Result<bool, ProvisionerError>;

    /// Write the image at `url`. Returns true once the write is complete.
    ///
    /// # Errors
    /// Returns [`ProvisionerError::Agent`] if the deployment fails.
    async fn deploy(&self, url: &str) -> Result<bool, ProvisionerError>;

    /// Remove what the agent deployed.
    ///
    /// # Errors
    /// Returns [`ProvisionerError::Agent`] if clean-up fails.
    async fn clean_up(&self) -> Result<(), ProvisionerError>;
}

/// Discovers the agent running on a host.
#[async_trait]
pub trait AgentLocator: Send + Sync {
    /// The host's agent, or `None` if it has not checked in yet.
    ///
    /// # Errors
    /// Returns an error if the lookup itself fails.
    async fn find_agent(&self, host: &HostData) -> Result<Option<Arc<dyn Agent>>, ProvisionerError>;
}

/// Builds [`AgentProvisioner`]s around a delegate factory.
pub struct AgentFactory {
    delegate: Arc<dyn ProvisionerFactory>,
    locator: Arc<dyn AgentLocator>,
    service_url: String,
}

impl AgentFactory {
    /// Create a factory booting the agent ISO served at `service_url`.
    #[must_use]
    pub fn new(
        delegate: Arc<dyn ProvisionerFactory>,
        locator: Arc<dyn AgentLocator>,
        service_url: impl Into<String>,
    ) -> Self {
        Self {
            delegate,
            locator,
            service_url: service_url.into(),
        }
    }
}

impl ProvisionerFactory for AgentFactory {
    fn create(
        &self,
        host: HostData,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Box<dyn Provisioner>, ProvisionerError> {
        if self.service_url.is_empty() {
            return Err(ProvisionerError::Config("agent service URL is not set".into()));
        }
        let inner = self.delegate.create(host.clone(), publisher)?;
        Ok(Box::new(AgentProvisioner::new(
            inner,
            host,
            Arc::clone(&self.locator),
            self.service_url.clone(),
        )))
    }
}
