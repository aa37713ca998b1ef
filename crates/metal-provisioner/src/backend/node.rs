//! Node documents as exposed by the provisioning backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::BackendError;
use crate::options::{UpdateOp, UpdateOperation};

// ============================================================================
// States
// ============================================================================

/// Provision state reported by the backend for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProvisionState {
    /// Node is registered but not verified.
    #[default]
    #[serde(rename = "enroll")]
    Enroll,
    /// BMC credentials are being verified.
    #[serde(rename = "verifying")]
    Verifying,
    /// Node is idle and may be cleaned, inspected or adopted.
    #[serde(rename = "manageable")]
    Manageable,
    /// Inspection is running.
    #[serde(rename = "inspecting")]
    Inspecting,
    /// Waiting for the inspection ramdisk.
    #[serde(rename = "inspect wait")]
    InspectWait,
    /// Inspection failed.
    #[serde(rename = "inspect failed")]
    InspectFail,
    /// Cleaning is running.
    #[serde(rename = "cleaning")]
    Cleaning,
    /// Waiting for the cleaning ramdisk.
    #[serde(rename = "clean wait")]
    CleanWait,
    /// Cleaning failed; the node must return to manageable before retrying.
    #[serde(rename = "clean failed")]
    CleanFail,
    /// Node is ready for deployment.
    #[serde(rename = "available")]
    Available,
    /// Image is being deployed.
    #[serde(rename = "deploying")]
    Deploying,
    /// Waiting for the deploy ramdisk.
    #[serde(rename = "wait call-back")]
    DeployWait,
    /// Deployment failed.
    #[serde(rename = "deploy failed")]
    DeployFail,
    /// Image is deployed.
    #[serde(rename = "active")]
    Active,
    /// Instance is being torn down.
    #[serde(rename = "deleting")]
    Deleting,
    /// Tear-down failed.
    #[serde(rename = "error")]
    Error,
    /// Adoption is running.
    #[serde(rename = "adopting")]
    Adopting,
    /// Adoption failed.
    #[serde(rename = "adopt failed")]
    AdoptFail,
    /// State not known to this client.
    #[serde(other)]
    Unknown,
}

impl ProvisionState {
    /// States in which the node consumes a provisioning slot.
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            Self::Inspecting
                | Self::InspectWait
                | Self::Cleaning
                | Self::CleanWait
                | Self::Deploying
                | Self::DeployWait
        )
    }
}

impl std::fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Enroll => "enroll",
            Self::Verifying => "verifying",
            Self::Manageable => "manageable",
            Self::Inspecting => "inspecting",
            Self::InspectWait => "inspect wait",
            Self::InspectFail => "inspect failed",
            Self::Cleaning => "cleaning",
            Self::CleanWait => "clean wait",
            Self::CleanFail => "clean failed",
            Self::Available => "available",
            Self::Deploying => "deploying",
            Self::DeployWait => "wait call-back",
            Self::DeployFail => "deploy failed",
            Self::Active => "active",
            Self::Deleting => "deleting",
            Self::Error => "error",
            Self::Adopting => "adopting",
            Self::AdoptFail => "adopt failed",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Provision state transition requested from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetProvisionState {
    /// Move to manageable.
    Manage,
    /// Move from manageable to available.
    Provide,
    /// Start inspection.
    Inspect,
    /// Start manual cleaning.
    Clean,
    /// Deploy the configured image.
    Active,
    /// Redeploy an active node.
    Rebuild,
    /// Tear the instance down.
    Deleted,
    /// Adopt an already deployed node.
    Adopt,
}

impl std::fmt::Display for TargetProvisionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Manage => "manage",
            Self::Provide => "provide",
            Self::Inspect => "inspect",
            Self::Clean => "clean",
            Self::Active => "active",
            Self::Rebuild => "rebuild",
            Self::Deleted => "deleted",
            Self::Adopt => "adopt",
        };
        write!(f, "{s}")
    }
}

/// Power state reported for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    /// Powered on.
    #[serde(rename = "power on")]
    PowerOn,
    /// Powered off.
    #[serde(rename = "power off")]
    PowerOff,
    /// Rebooting.
    #[serde(rename = "rebooting")]
    Rebooting,
    /// Unknown or unreported.
    #[serde(other)]
    Unknown,
}

/// Requested power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetPowerState {
    /// Power on.
    #[serde(rename = "power on")]
    PowerOn,
    /// Hard power off.
    #[serde(rename = "power off")]
    PowerOff,
    /// Graceful shutdown.
    #[serde(rename = "soft power off")]
    SoftPowerOff,
}

// ============================================================================
// Node
// ============================================================================

/// A node as last reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Backend identifier.
    pub uuid: String,
    /// Unique node name.
    #[serde(default)]
    pub name: Option<String>,
    /// Hardware driver.
    #[serde(default)]
    pub driver: String,
    /// Current provision state.
    pub provision_state: ProvisionState,
    /// Provision state being transitioned to.
    #[serde(default)]
    pub target_provision_state: Option<String>,
    /// Current power state.
    #[serde(default)]
    pub power_state: Option<PowerState>,
    /// Power state being transitioned to.
    #[serde(default)]
    pub target_power_state: Option<TargetPowerState>,
    /// Node is in maintenance mode.
    #[serde(default)]
    pub maintenance: bool,
    /// Reason for maintenance mode.
    #[serde(default)]
    pub maintenance_reason: Option<String>,
    /// Last error reported by the backend.
    #[serde(default)]
    pub last_error: Option<String>,
    /// Conductor currently holding the node lock.
    #[serde(default)]
    pub reservation: Option<String>,
    /// Automated cleaning on tear-down.
    #[serde(default)]
    pub automated_clean: Option<bool>,
    /// Hardware properties.
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Deployment parameters.
    #[serde(default)]
    pub instance_info: Map<String, Value>,
    /// Driver and BMC access parameters.
    #[serde(default)]
    pub driver_info: Map<String, Value>,
    /// Free-form metadata.
    #[serde(default)]
    pub extra: Map<String, Value>,
    /// RAID configuration to apply on the next cleaning.
    #[serde(default)]
    pub target_raid_config: Map<String, Value>,
    /// When inspection last completed.
    #[serde(default)]
    pub inspection_finished_at: Option<DateTime<Utc>>,
}

impl Node {
    /// Last error, if a non-empty one was reported.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.last_error.as_deref().filter(|e| !e.is_empty())
    }

    /// Apply a JSON patch to this node.
    ///
    /// # Errors
    /// Returns [`BackendError::InvalidPatch`] if a path does not exist.
    pub fn apply_updates(&mut self, ops: &[UpdateOperation]) -> Result<(), BackendError> {
        let mut doc = serde_json::to_value(&*self)?;

        for op in ops {
            let invalid = || BackendError::InvalidPatch(op.path.clone());
            let segments: Vec<&str> = op.path.trim_start_matches('/').split('/').collect();
            let (last, parents) = segments.split_last().ok_or_else(invalid)?;

            let mut target = &mut doc;
            for segment in parents {
                target = target.get_mut(*segment).ok_or_else(invalid)?;
            }
            let fields = target.as_object_mut().ok_or_else(invalid)?;

            match op.op {
                UpdateOp::Add => {
                    let value = op.value.as_ref().map_or(Value::Null, Value::from);
                    fields.insert((*last).to_string(), value);
                }
                UpdateOp::Remove => {
                    fields.remove(*last).ok_or_else(invalid)?;
                }
            }
        }

        *self = serde_json::from_value(doc)?;
        Ok(())
    }
}

/// A single cleaning step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanStep {
    /// Driver interface that runs the step.
    pub interface: String,
    /// Step name.
    pub step: String,
    /// Step arguments.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
}

/// Body of a provision state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvisionStateRequest {
    /// Requested transition.
    pub target: TargetProvisionState,
    /// Steps for manual cleaning.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub clean_steps: Vec<CleanStep>,
}

impl ProvisionStateRequest {
    /// A transition without cleaning steps.
    #[must_use]
    pub fn new(target: TargetProvisionState) -> Self {
        Self {
            target,
            clean_steps: Vec::new(),
        }
    }
}

/// Request to enroll a new node.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewNode {
    /// Unique node name.
    pub name: String,
    /// Hardware driver.
    pub driver: String,
    /// Driver and BMC access parameters.
    pub driver_info: Map<String, Value>,
    /// Hardware properties.
    pub properties: Map<String, Value>,
    /// Boot interface override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_interface: Option<String>,
    /// Automated cleaning on tear-down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automated_clean: Option<bool>,
}
