//! Bare metal host provisioning for reconcile-driven controllers.
//!
//! This crate provides the provisioner contract an outer reconcile loop
//! drives once per tick, an Ironic-style state machine implementing it over
//! a node backend, an agent-based wrapper that delegates image deployment to
//! a helper running on the host, and the diff engine that keeps node
//! configuration in sync with minimal patches.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use metal_provisioner::{
//!     HttpBackend, IronicFactory, PrepareData, ProvisionerConfig, ProvisionerFactory,
//!     TracingEventPublisher,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ProvisionerConfig::from_env()?;
//!     let backend = Arc::new(HttpBackend::new(&config.ironic_endpoint)?);
//!     let factory = IronicFactory::new(backend, config);
//!
//!     let prov = factory.create(host, Arc::new(TracingEventPublisher::new("worker-0")))?;
//!     let (result, started) = prov.prepare(PrepareData::default(), true).await?;
//!     if result.dirty {
//!         // call again after result.requeue_after
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod agent;
pub mod backend;
pub mod bmc;
pub mod config;
pub mod empty;
pub mod events;
pub mod hardware;
pub mod ironic;
pub mod options;
pub mod provisioner;

pub use agent::{Agent, AgentFactory, AgentLocator, AgentProvisioner, HttpAgentLocator};
pub use backend::{BackendError, HttpBackend, InMemoryBackend, NodeBackend};
pub use config::ProvisionerConfig;
pub use empty::{EmptyFactory, EmptyProvisioner};
pub use events::{EventPublisher, EventRecorder, NullEventPublisher, TracingEventPublisher};
pub use ironic::{IronicFactory, IronicProvisioner};
pub use options::{NodeUpdater, OptionValue, UpdateOperation, UpdateOptsBuilder};
pub use provisioner::{
    HostData, PrepareData, ProvisionResult, Provisioner, ProvisionerError, ProvisionerFactory,
    ProvisioningState, REQUEUE_DELAY,
};
