//! In-memory backend.
//!
//! Holds nodes in a map and moves them into the "in progress" state of every
//! requested transition. Tests advance nodes to the final state by hand with
//! [`InMemoryBackend::set_provision_state`]. Mutating calls are recorded so
//! callers can assert on what a provisioner asked for.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use super::node::{
    NewNode, Node, PowerState, ProvisionState, ProvisionStateRequest, TargetPowerState,
    TargetProvisionState,
};
use super::{BackendError, NodeBackend};
use crate::options::UpdateOperation;

/// A mutating call received by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    /// A node was enrolled under this name.
    CreateNode(String),
    /// A patch was applied.
    UpdateNode {
        id: String,
        ops: Vec<UpdateOperation>,
    },
    /// A provision state transition was requested.
    ChangeProvisionState {
        id: String,
        req: ProvisionStateRequest,
    },
    /// A RAID configuration was set.
    SetRaidConfig { id: String, config: Value },
    /// A power change was requested.
    SetPowerState {
        id: String,
        target: TargetPowerState,
    },
    /// Maintenance mode was toggled.
    SetMaintenance { id: String, maintenance: bool },
    /// A node was deleted.
    DeleteNode(String),
}

/// Backend keeping nodes in process memory.
#[derive(Debug)]
pub struct InMemoryBackend {
    nodes: Mutex<BTreeMap<String, Node>>,
    calls: Mutex<Vec<BackendCall>>,
    reads: AtomicUsize,
    ready: AtomicBool,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// Create an empty, ready backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
            ready: AtomicBool::new(true),
        }
    }

    /// Add a node before the backend is shared.
    #[must_use]
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.get_mut().insert(node.uuid.clone(), node);
        self
    }

    /// Add or replace a node.
    pub async fn insert(&self, node: Node) {
        self.nodes.lock().await.insert(node.uuid.clone(), node);
    }

    /// Current copy of a node.
    pub async fn node(&self, id: &str) -> Option<Node> {
        self.nodes.lock().await.get(id).cloned()
    }

    /// Move a node to `state`, as the backend would when an operation ends.
    pub async fn set_provision_state(&self, id: &str, state: ProvisionState) {
        if let Some(node) = self.nodes.lock().await.get_mut(id) {
            node.provision_state = state;
        }
    }

    /// Mutating calls received so far.
    pub async fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().await.clone()
    }

    /// Number of read calls received so far.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Change the readiness reported by [`NodeBackend::is_ready`].
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    async fn record(&self, call: BackendCall) {
        debug!(?call, "in-memory backend call");
        self.calls.lock().await.push(call);
    }

    fn count_read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }
}

fn in_progress_state(target: TargetProvisionState) -> ProvisionState {
    match target {
        TargetProvisionState::Manage => ProvisionState::Manageable,
        TargetProvisionState::Provide => ProvisionState::Available,
        TargetProvisionState::Inspect => ProvisionState::Inspecting,
        TargetProvisionState::Clean => ProvisionState::Cleaning,
        TargetProvisionState::Active | TargetProvisionState::Rebuild => ProvisionState::Deploying,
        TargetProvisionState::Deleted => ProvisionState::Deleting,
        TargetProvisionState::Adopt => ProvisionState::Adopting,
    }
}

#[async_trait]
impl NodeBackend for InMemoryBackend {
    async fn get_node(&self, id: &str) -> Result<Node, BackendError> {
        self.count_read();
        self.node(id)
            .await
            .ok_or_else(|| BackendError::NotFound(id.to_string()))
    }

    async fn find_node_by_name(&self, name: &str) -> Result<Option<Node>, BackendError> {
        self.count_read();
        let nodes = self.nodes.lock().await;
        Ok(nodes
            .values()
            .find(|n| n.name.as_deref() == Some(name))
            .cloned())
    }

    async fn create_node(&self, req: NewNode) -> Result<Node, BackendError> {
        let mut nodes = self.nodes.lock().await;
        if nodes.values().any(|n| n.name.as_deref() == Some(req.name.as_str())) {
            return Err(BackendError::Conflict(req.name));
        }

        let node = Node {
            uuid: uuid::Uuid::new_v4().to_string(),
            name: Some(req.name.clone()),
            driver: req.driver,
            provision_state: ProvisionState::Enroll,
            automated_clean: req.automated_clean,
            driver_info: req.driver_info,
            properties: req.properties,
            ..Node::default()
        };
        nodes.insert(node.uuid.clone(), node.clone());
        drop(nodes);

        self.record(BackendCall::CreateNode(req.name)).await;
        Ok(node)
    }

    async fn update_node(&self, id: &str, ops: &[UpdateOperation]) -> Result<Node, BackendError> {
        let mut nodes = self.nodes.lock().await;
        let node = nodes
            .get_mut(id)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        node.apply_updates(ops)?;
        let updated = node.clone();
        drop(nodes);

        self.record(BackendCall::UpdateNode {
            id: id.to_string(),
            ops: ops.to_vec(),
        })
        .await;
        Ok(updated)
    }

    async fn change_provision_state(
        &self,
        id: &str,
        req: ProvisionStateRequest,
    ) -> Result<(), BackendError> {
        let mut nodes = self.nodes.lock().await;
        let node = nodes
            .get_mut(id)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        if let Some(owner) = &node.reservation {
            return Err(BackendError::Conflict(format!("node {id} locked by {owner}")));
        }
        node.provision_state = in_progress_state(req.target);
        drop(nodes);

        self.record(BackendCall::ChangeProvisionState {
            id: id.to_string(),
            req,
        })
        .await;
        Ok(())
    }

    async fn set_raid_config(&self, id: &str, config: &Value) -> Result<(), BackendError> {
        let mut nodes = self.nodes.lock().await;
        let node = nodes
            .get_mut(id)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        node.target_raid_config = config.as_object().cloned().unwrap_or_default();
        drop(nodes);

        self.record(BackendCall::SetRaidConfig {
            id: id.to_string(),
            config: config.clone(),
        })
        .await;
        Ok(())
    }

    async fn set_power_state(
        &self,
        id: &str,
        target: TargetPowerState,
    ) -> Result<(), BackendError> {
        let mut nodes = self.nodes.lock().await;
        let node = nodes
            .get_mut(id)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        node.power_state = Some(match target {
            TargetPowerState::PowerOn => PowerState::PowerOn,
            TargetPowerState::PowerOff | TargetPowerState::SoftPowerOff => PowerState::PowerOff,
        });
        drop(nodes);

        self.record(BackendCall::SetPowerState {
            id: id.to_string(),
            target,
        })
        .await;
        Ok(())
    }

    async fn set_maintenance(
        &self,
        id: &str,
        maintenance: bool,
        reason: Option<&str>,
    ) -> Result<(), BackendError> {
        let mut nodes = self.nodes.lock().await;
        let node = nodes
            .get_mut(id)
            .ok_or_else(|| BackendError::NotFound(id.to_string()))?;
        node.maintenance = maintenance;
        node.maintenance_reason = reason.map(str::to_string);
        drop(nodes);

        self.record(BackendCall::SetMaintenance {
            id: id.to_string(),
            maintenance,
        })
        .await;
        Ok(())
    }

    async fn delete_node(&self, id: &str) -> Result<(), BackendError> {
        if self.nodes.lock().await.remove(id).is_some() {
            self.record(BackendCall::DeleteNode(id.to_string())).await;
        }
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, BackendError> {
        self.count_read();
        Ok(self.nodes.lock().await.values().cloned().collect())
    }

    async fn is_ready(&self) -> Result<bool, BackendError> {
        Ok(self.ready.load(Ordering::SeqCst))
    }
}
