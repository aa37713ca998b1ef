//! Provisioner trait and the result contract shared by every strategy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use super::types::{
    AdoptData, HardwareDetails, HardwareState, HostData, InspectData, ManagementAccessData,
    PrepareData, ProvisionData, RebootMode,
};
use crate::backend::BackendError;
use crate::events::EventPublisher;

/// Delay applied to every "wait for the backend" transition.
///
/// This is the only backoff knob: there is no exponential backoff at this
/// layer, the outer controller decides whether to add jitter.
pub const REQUEUE_DELAY: Duration = Duration::from_secs(10);

/// Errors returned by provisioner operations.
#[derive(Error, Debug)]
pub enum ProvisionerError {
    /// The request cannot be expressed by this provisioner or its BMC.
    #[error("Unsupported request: {0}")]
    Unsupported(String),

    /// Backend call failed.
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// The host has no node registered in the backend yet.
    #[error("Host {0} is not registered with the provisioning backend")]
    HostNotRegistered(String),

    /// Host data is malformed (bad BMC address, missing identity).
    #[error("Invalid host data: {0}")]
    InvalidHost(String),

    /// Helper agent operation failed.
    #[error("Agent error: {0}")]
    Agent(String),

    /// Unknown hardware profile name.
    #[error("Unknown hardware profile: {0}")]
    HardwareProfile(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ProvisionerError {
    /// Whether re-invoking with the same input can produce a different outcome.
    ///
    /// Structural errors are detected without contacting the backend and
    /// never resolve on their own.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend(e) => e.is_retryable(),
            Self::HostNotRegistered(_) | Self::Agent(_) => true,
            Self::Unsupported(_)
            | Self::InvalidHost(_)
            | Self::HardwareProfile(_)
            | Self::Config(_) => false,
        }
    }
}

/// Outcome of a single provisioner invocation.
///
/// `dirty` asks the caller to invoke the operation again, after at least
/// `requeue_after`. A non-empty `error_message` is a recorded failure that
/// is shown to the user but not retried by this layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProvisionResult {
    /// Another invocation is required before the operation is complete.
    pub dirty: bool,
    /// Minimum delay before the next invocation. Zero means immediately.
    pub requeue_after: Duration,
    /// User-visible failure description.
    pub error_message: String,
}

impl ProvisionResult {
    /// The operation has converged.
    #[must_use]
    pub fn complete() -> Self {
        Self::default()
    }

    /// The operation is in progress; poll again after `delay`.
    #[must_use]
    pub fn continuing(delay: Duration) -> Self {
        Self {
            dirty: true,
            requeue_after: delay,
            error_message: String::new(),
        }
    }

    /// The backend reported a failure that needs user attention.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            dirty: false,
            requeue_after: Duration::ZERO,
            error_message: message.into(),
        }
    }

    /// True when the result asks for another invocation or carries a failure.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        self.dirty || !self.error_message.is_empty()
    }
}

/// Capability contract driven by the outer reconcile loop.
///
/// Every call is level-triggered: the caller does not distinguish the first
/// call from a retry, so all state comes from the arguments or is read fresh
/// from the backend.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Verify the BMC location and credentials, registering the host with
    /// the backend if needed. Returns the backend identifier of the host.
    async fn validate_management_access(
        &self,
        data: ManagementAccessData,
        credentials_changed: bool,
        force: bool,
    ) -> Result<(ProvisionResult, String), ProvisionerError>;

    /// Take over a host that was provisioned outside of this system.
    async fn adopt(&self, data: AdoptData, force: bool) -> Result<ProvisionResult, ProvisionerError>;

    /// Discover hardware inventory. Details are returned only once
    /// inspection has finished.
    async fn inspect_hardware(
        &self,
        data: InspectData,
        force: bool,
    ) -> Result<(ProvisionResult, Option<HardwareDetails>), ProvisionerError>;

    /// Apply out-of-band configuration such as RAID. The boolean is true
    /// when a backend action was started by this call.
    async fn prepare(
        &self,
        data: PrepareData,
        unprepared: bool,
    ) -> Result<(ProvisionResult, bool), ProvisionerError>;

    /// Write the requested image to the host.
    async fn provision(&self, data: ProvisionData) -> Result<ProvisionResult, ProvisionerError>;

    /// Remove the image from the host. `force` skips graceful teardown.
    async fn deprovision(&self, force: bool) -> Result<ProvisionResult, ProvisionerError>;

    /// Remove the host from the backend.
    async fn delete(&self) -> Result<ProvisionResult, ProvisionerError>;

    /// Ensure the host is powered on.
    async fn power_on(&self) -> Result<ProvisionResult, ProvisionerError>;

    /// Ensure the host is powered off.
    async fn power_off(&self, mode: RebootMode) -> Result<ProvisionResult, ProvisionerError>;

    /// Whether the backend is able to accept requests.
    async fn is_ready(&self) -> Result<bool, ProvisionerError>;

    /// Whether another host may start a capacity-limited operation.
    async fn has_provisioning_capacity(&self) -> Result<bool, ProvisionerError>;

    /// Cheap read of the current hardware state.
    async fn update_hardware_state(&self) -> Result<HardwareState, ProvisionerError>;
}

/// Builds a provisioner bound to one host.
pub trait ProvisionerFactory: Send + Sync {
    /// Create a provisioner for `host`.
    ///
    /// # Errors
    /// Returns an error if the strategy cannot be set up for this host.
    fn create(
        &self,
        host: HostData,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Box<dyn Provisioner>, ProvisionerError>;
}
