//! Static provisioner configuration.
//!
//! Set once at construction and never mutated afterwards. Loaded from
//! environment variables or from a YAML file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::provisioner::ProvisionerError;

/// Default number of hosts allowed in busy backend states at once.
pub const DEFAULT_MAX_BUSY_HOSTS: usize = 20;

fn default_max_busy_hosts() -> usize {
    DEFAULT_MAX_BUSY_HOSTS
}

/// Provisioner configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionerConfig {
    /// Node API endpoint.
    pub ironic_endpoint: String,
    /// Deploy ramdisk kernel.
    #[serde(default)]
    pub deploy_kernel_url: Option<String>,
    /// Deploy ramdisk image.
    #[serde(default)]
    pub deploy_ramdisk_url: Option<String>,
    /// Live ISO used to boot the helper agent.
    #[serde(default)]
    pub agent_service_url: Option<String>,
    /// Directory service where booted agents register.
    #[serde(default)]
    pub agent_api_url: Option<String>,
    /// Maximum number of hosts in busy states.
    #[serde(default = "default_max_busy_hosts")]
    pub max_busy_hosts: usize,
}

impl ProvisionerConfig {
    /// Create a configuration for `ironic_endpoint` with defaults.
    #[must_use]
    pub fn new(ironic_endpoint: impl Into<String>) -> Self {
        Self {
            ironic_endpoint: ironic_endpoint.into(),
            deploy_kernel_url: None,
            deploy_ramdisk_url: None,
            agent_service_url: None,
            agent_api_url: None,
            max_busy_hosts: DEFAULT_MAX_BUSY_HOSTS,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Reads `IRONIC_ENDPOINT` (required), `DEPLOY_KERNEL_URL`,
    /// `DEPLOY_RAMDISK_URL`, `AGENT_SERVICE_URL`, `AGENT_API_URL` and
    /// `PROVISIONING_LIMIT`.
    ///
    /// # Errors
    /// Returns [`ProvisionerError::Config`] if a variable is missing or invalid.
    pub fn from_env() -> Result<Self, ProvisionerError> {
        let endpoint = std::env::var("IRONIC_ENDPOINT")
            .map_err(|_| ProvisionerError::Config("IRONIC_ENDPOINT is not set".into()))?;
        let optional = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        let max_busy_hosts = match optional("PROVISIONING_LIMIT") {
            Some(limit) => limit.parse().map_err(|_| {
                ProvisionerError::Config(format!("PROVISIONING_LIMIT is not a number: {limit}"))
            })?,
            None => DEFAULT_MAX_BUSY_HOSTS,
        };

        let config = Self {
            ironic_endpoint: endpoint,
            deploy_kernel_url: optional("DEPLOY_KERNEL_URL"),
            deploy_ramdisk_url: optional("DEPLOY_RAMDISK_URL"),
            agent_service_url: optional("AGENT_SERVICE_URL"),
            agent_api_url: optional("AGENT_API_URL"),
            max_busy_hosts,
        };
        config.validate()?;
        debug!(?config, "Loaded provisioner configuration from environment");
        Ok(config)
    }

    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns [`ProvisionerError::Config`] if the file cannot be read,
    /// parsed or validated.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ProvisionerError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProvisionerError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML document.
    ///
    /// # Errors
    /// Returns [`ProvisionerError::Config`] if the document is invalid.
    pub fn from_yaml(content: &str) -> Result<Self, ProvisionerError> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| ProvisionerError::Config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that URLs parse and limits are sane.
    ///
    /// # Errors
    /// Returns [`ProvisionerError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ProvisionerError> {
        let urls = [
            ("ironicEndpoint", Some(&self.ironic_endpoint)),
            ("deployKernelUrl", self.deploy_kernel_url.as_ref()),
            ("deployRamdiskUrl", self.deploy_ramdisk_url.as_ref()),
            ("agentServiceUrl", self.agent_service_url.as_ref()),
            ("agentApiUrl", self.agent_api_url.as_ref()),
        ];
        for (name, value) in urls {
            if let Some(value) = value {
                Url::parse(value)
                    .map_err(|e| ProvisionerError::Config(format!("{name} '{value}': {e}")))?;
            }
        }

        if self.deploy_kernel_url.is_some() != self.deploy_ramdisk_url.is_some() {
            return Err(ProvisionerError::Config(
                "deployKernelUrl and deployRamdiskUrl must be set together".into(),
            ));
        }
        if self.max_busy_hosts == 0 {
            return Err(ProvisionerError::Config(
                "maxBusyHosts must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
