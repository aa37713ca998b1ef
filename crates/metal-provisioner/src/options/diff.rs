//! Minimal patch computation between desired options and a node document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, Span};

use super::value::OptionValue;
use crate::backend::Node;

/// Desired options of one section. `None` means "ensure absent".
pub type OptionsData = BTreeMap<String, Option<OptionValue>>;

/// Patch operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateOp {
    /// Create the path, replacing any existing value.
    Add,
    /// Delete the path.
    Remove,
}

/// One JSON-patch step against a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateOperation {
    /// Operation kind.
    pub op: UpdateOp,
    /// Target path, `/<name>` or `/<section>/<name>`.
    pub path: String,
    /// Payload for [`UpdateOp::Add`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<OptionValue>,
}

/// Named partition of a node document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    /// Top-level node fields.
    TopLevel,
    /// Hardware properties.
    Properties,
    /// Deployment parameters.
    InstanceInfo,
    /// Driver and BMC access parameters.
    DriverInfo,
    /// Free-form metadata.
    Extra,
}

impl Section {
    /// Section key in the node document, `None` for top-level fields.
    #[must_use]
    pub fn key(self) -> Option<&'static str> {
        match self {
            Self::TopLevel => None,
            Self::Properties => Some("properties"),
            Self::InstanceInfo => Some("instance_info"),
            Self::DriverInfo => Some("driver_info"),
            Self::Extra => Some("extra"),
        }
    }

    /// Patch path of option `name` in this section.
    #[must_use]
    pub fn path(self, name: &str) -> String {
        match self.key() {
            Some(section) => format!("/{section}/{name}"),
            None => format!("/{name}"),
        }
    }

    /// The section's current contents on `node`.
    #[must_use]
    pub fn current(self, node: &Node) -> Option<&Map<String, Value>> {
        match self {
            Self::TopLevel => None,
            Self::Properties => Some(&node.properties),
            Self::InstanceInfo => Some(&node.instance_info),
            Self::DriverInfo => Some(&node.driver_info),
            Self::Extra => Some(&node.extra),
        }
    }
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key().unwrap_or("root"))
    }
}

/// Compute the operation, if any, that reconciles one option.
fn update_operation(
    section: Section,
    name: &str,
    current: Option<&Value>,
    desired: Option<&OptionValue>,
    log: Option<&Span>,
) -> Option<UpdateOperation> {
    let desired = desired.filter(|v| !v.is_null());
    let current = current.filter(|v| !v.is_null());

    let op = match (desired, current) {
        (Some(want), Some(have)) if want.matches(have) => return None,
        (Some(want), _) => UpdateOperation {
            op: UpdateOp::Add,
            path: section.path(name),
            value: Some(want.clone()),
        },
        (None, Some(_)) => UpdateOperation {
            op: UpdateOp::Remove,
            path: section.path(name),
            value: None,
        },
        (None, None) => return None,
    };

    if let Some(span) = log {
        let _entered = span.enter();
        match (op.op, current.is_some()) {
            (UpdateOp::Add, true) => {
                info!(option = name, %section, value = ?op.value, "updating option data");
            }
            (UpdateOp::Add, false) => {
                info!(option = name, %section, value = ?op.value, "adding option data");
            }
            (UpdateOp::Remove, _) => info!(option = name, %section, "removing option data"),
        }
    }

    Some(op)
}

/// Compute every operation needed to bring `current` in line with `settings`.
///
/// Options are visited in name order, so the output is deterministic.
#[must_use]
pub fn section_update_opts(
    current: &Map<String, Value>,
    settings: &OptionsData,
    section: Section,
    log: Option<&Span>,
) -> Vec<UpdateOperation> {
    settings
        .iter()
        .filter_map(|(name, desired)| {
            update_operation(section, name, current.get(name), desired.as_ref(), log)
        })
        .collect()
}

/// Render desired options as a plain document, dropping absent values.
///
/// Used when a section is sent whole, e.g. on node creation.
#[must_use]
pub fn options_document(settings: &OptionsData) -> Map<String, Value> {
    settings
        .iter()
        .filter_map(|(name, value)| {
            value
                .as_ref()
                .filter(|v| !v.is_null())
                .map(|v| (name.clone(), Value::from(v)))
        })
        .collect()
}

/// Incremental accumulation of node updates, one section at a time.
pub trait UpdateOptsBuilder {
    /// Reconcile a single top-level field against its current value.
    fn set_top_level_opt(
        &mut self,
        name: &str,
        desired: Option<OptionValue>,
        current: Option<&Value>,
    ) -> &mut Self;

    /// Reconcile options in the node's `properties`.
    fn set_properties_opts(&mut self, settings: &OptionsData, node: &Node) -> &mut Self;

    /// Reconcile options in the node's `instance_info`.
    fn set_instance_info_opts(&mut self, settings: &OptionsData, node: &Node) -> &mut Self;

    /// Reconcile options in the node's `driver_info`.
    fn set_driver_info_opts(&mut self, settings: &OptionsData, node: &Node) -> &mut Self;

    /// Operations accumulated so far.
    fn updates(&self) -> &[UpdateOperation];
}

/// Builder accumulating the patch for one node.
#[derive(Debug, Default)]
pub struct NodeUpdater {
    updates: Vec<UpdateOperation>,
    log: Option<Span>,
}

impl NodeUpdater {
    /// Create an updater that does not log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an updater that logs every emitted operation inside `span`.
    #[must_use]
    pub fn with_log(span: Span) -> Self {
        Self {
            updates: Vec::new(),
            log: Some(span),
        }
    }

    /// Ensure option `name` of `section` equals `desired`.
    pub fn set_opt(
        &mut self,
        section: Section,
        name: &str,
        desired: impl Into<OptionValue>,
        current: Option<&Map<String, Value>>,
    ) -> &mut Self {
        let desired = desired.into();
        let op = update_operation(
            section,
            name,
            current.and_then(|c| c.get(name)),
            Some(&desired),
            self.log.as_ref(),
        );
        self.updates.extend(op);
        self
    }

    /// Ensure option `name` of `section` is absent.
    pub fn clear_opt(
        &mut self,
        section: Section,
        name: &str,
        current: Option<&Map<String, Value>>,
    ) -> &mut Self {
        let op = update_operation(
            section,
            name,
            current.and_then(|c| c.get(name)),
            None,
            self.log.as_ref(),
        );
        self.updates.extend(op);
        self
    }

    fn set_section_opts(&mut self, section: Section, settings: &OptionsData, node: &Node) {
        if let Some(current) = section.current(node) {
            let ops = section_update_opts(current, settings, section, self.log.as_ref());
            self.updates.extend(ops);
        }
    }

    /// True when nothing needs to change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Take the accumulated operations.
    #[must_use]
    pub fn into_updates(self) -> Vec<UpdateOperation> {
        self.updates
    }
}

impl UpdateOptsBuilder for NodeUpdater {
    fn set_top_level_opt(
        &mut self,
        name: &str,
        desired: Option<OptionValue>,
        current: Option<&Value>,
    ) -> &mut Self {
        let op = update_operation(
            Section::TopLevel,
            name,
            current,
            desired.as_ref(),
            self.log.as_ref(),
        );
        self.updates.extend(op);
        self
    }

    fn set_properties_opts(&mut self, settings: &OptionsData, node: &Node) -> &mut Self {
        self.set_section_opts(Section::Properties, settings, node);
        self
    }

    fn set_instance_info_opts(&mut self, settings: &OptionsData, node: &Node) -> &mut Self {
        self.set_section_opts(Section::InstanceInfo, settings, node);
        self
    }

    fn set_driver_info_opts(&mut self, settings: &OptionsData, node: &Node) -> &mut Self {
        self.set_section_opts(Section::DriverInfo, settings, node);
        self
    }

    fn updates(&self) -> &[UpdateOperation] {
        &self.updates
    }
}
