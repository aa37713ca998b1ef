//! Outbound interface to the provisioning backend.
//!
//! The state machines only talk to the backend through [`NodeBackend`]. Every
//! call is a single request/response; waiting for progress is left to the
//! caller's requeue.

mod http;
pub mod memory;
mod node;

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpBackend;
pub use memory::InMemoryBackend;
pub use node::{
    CleanStep, NewNode, Node, PowerState, ProvisionState, ProvisionStateRequest,
    TargetPowerState, TargetProvisionState,
};

use crate::options::UpdateOperation;

/// Errors that can occur during backend calls.
#[derive(Error, Debug)]
pub enum BackendError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Node not found.
    #[error("Node not found: {0}")]
    NotFound(String),

    /// Node is locked by another operation.
    #[error("Node is busy: {0}")]
    Conflict(String),

    /// Patch path does not exist on the node.
    #[error("Invalid patch path: {0}")]
    InvalidPatch(String),

    /// Invalid endpoint URL.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackendError {
    /// Whether the same call may succeed later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Conflict(_) | Self::NotFound(_) => true,
            Self::Api { status, .. } => *status >= 500,
            Self::InvalidPatch(_) | Self::Url(_) | Self::Serialization(_) => false,
        }
    }
}

/// Node API of the provisioning backend.
#[async_trait]
pub trait NodeBackend: Send + Sync {
    /// Get a node by backend identifier.
    async fn get_node(&self, id: &str) -> Result<Node, BackendError>;

    /// Find a node by its unique name.
    async fn find_node_by_name(&self, name: &str) -> Result<Option<Node>, BackendError>;

    /// Enroll a new node.
    async fn create_node(&self, req: NewNode) -> Result<Node, BackendError>;

    /// Apply a JSON patch to a node.
    async fn update_node(&self, id: &str, ops: &[UpdateOperation]) -> Result<Node, BackendError>;

    /// Request a provision state transition.
    async fn change_provision_state(
        &self,
        id: &str,
        req: ProvisionStateRequest,
    ) -> Result<(), BackendError>;

    /// Set the RAID configuration applied by the next cleaning.
    async fn set_raid_config(
        &self,
        id: &str,
        config: &serde_json::Value,
    ) -> Result<(), BackendError>;

    /// Request a power state change.
    async fn set_power_state(&self, id: &str, target: TargetPowerState)
        -> Result<(), BackendError>;

    /// Enter or leave maintenance mode.
    async fn set_maintenance(
        &self,
        id: &str,
        maintenance: bool,
        reason: Option<&str>,
    ) -> Result<(), BackendError>;

    /// Remove a node.
    async fn delete_node(&self, id: &str) -> Result<(), BackendError>;

    /// List all nodes.
    async fn list_nodes(&self) -> Result<Vec<Node>, BackendError>;

    /// Whether the backend is up and accepting requests.
    async fn is_ready(&self) -> Result<bool, BackendError>;
}
