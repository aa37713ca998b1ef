//! Agent discovery and control over HTTP.
//!
//! Agents register with a directory service once the live ISO has booted.
//! The locator asks that service for the host's agent on every call and
//! returns a handle that talks to the agent's own API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{Agent, AgentLocator};
use crate::provisioner::{HardwareDetails, HostData, ProvisionerError};

/// Default timeout for agent requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Agent registration as returned by the directory service.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentRegistration {
    /// Base URL of the agent API.
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct DeploymentStatus {
    deployed: bool,
}

#[derive(Debug, Serialize)]
struct DeployRequest<'a> {
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct DeployResponse {
    complete: bool,
}

fn agent_error(context: &str, e: impl std::fmt::Display) -> ProvisionerError {
    ProvisionerError::Agent(format!("{context}: {e}"))
}

async fn check(request: RequestBuilder, context: &str) -> Result<reqwest::Response, ProvisionerError> {
    let response = request.send().await.map_err(|e| agent_error(context, e))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    Err(agent_error(context, format!("{status}: {text}")))
}

async fn json<T: serde::de::DeserializeOwned>(
    request: RequestBuilder,
    context: &str,
) -> Result<T, ProvisionerError> {
    check(request, context)
        .await?
        .json()
        .await
        .map_err(|e| agent_error(context, e))
}

/// Finds agents through the directory service at `base_url`.
#[derive(Clone)]
pub struct HttpAgentLocator {
    /// HTTP client shared with the returned agents.
    client: Client,
    /// Directory service endpoint without trailing slash.
    base_url: String,
}

impl HttpAgentLocator {
    /// Create a locator for the directory service at `endpoint`.
    ///
    /// # Errors
    /// Returns [`ProvisionerError::Config`] if the endpoint is not a valid URL,
    /// or [`ProvisionerError::Agent`] if the HTTP client cannot be created.
    pub fn new(endpoint: &str) -> Result<Self, ProvisionerError> {
        let url = Url::parse(endpoint)
            .map_err(|e| ProvisionerError::Config(format!("agent API '{endpoint}': {e}")))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| agent_error("building HTTP client", e))?;

        Ok(Self {
            client,
            base_url: url.as_str().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl AgentLocator for HttpAgentLocator {
    async fn find_agent(&self, host: &HostData) -> Result<Option<Arc<dyn Agent>>, ProvisionerError> {
        let name = host.node_name();
        let url = format!("{}/v1/agents/{name}", self.base_url);
        debug!(host = %name, url = %url, "looking up agent");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| agent_error("agent lookup", e))?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(host = %name, "agent has not registered");
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(agent_error("agent lookup", format!("{status}: {text}")));
        }

        let registration: AgentRegistration = response
            .json()
            .await
            .map_err(|e| agent_error("agent lookup", e))?;
        debug!(host = %name, agent = %registration.url, "agent found");
        let agent: Arc<dyn Agent> = Arc::new(HttpAgent::new(self.client.clone(), &registration.url));
        Ok(Some(agent))
    }
}

/// Agent reached over its HTTP API.
#[derive(Clone)]
pub struct HttpAgent {
    client: Client,
    base_url: String,
}

impl HttpAgent {
    fn new(client: Client, url: &str) -> Self {
        Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
        }
    }

    fn deployment_url(&self) -> String {
        format!("{}/v1/deployment", self.base_url)
    }
}

#[async_trait]
impl Agent for HttpAgent {
    async fn hardware_details(&self) -> Result<HardwareDetails, ProvisionerError> {
        let url = format!("{}/v1/inventory", self.base_url);
        json(self.client.get(&url), "reading inventory").await
    }

    async fn is_deployed(&self) -> Result<bool, ProvisionerError> {
        let status: DeploymentStatus =
            json(self.client.get(self.deployment_url()), "reading deployment").await?;
        Ok(status.deployed)
    }

    async fn deploy(&self, url: &str) -> Result<bool, ProvisionerError> {
        debug!(agent = %self.base_url, image = %url, "deploying image");
        let response: DeployResponse = json(
            self.client
                .post(self.deployment_url())
                .json(&DeployRequest { url }),
            "deploying image",
        )
        .await?;
        Ok(response.complete)
    }

    async fn clean_up(&self) -> Result<(), ProvisionerError> {
        check(self.client.delete(self.deployment_url()), "cleaning up").await?;
        Ok(())
    }
}
