//! REST client for the node API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use super::node::{NewNode, Node, ProvisionStateRequest, TargetPowerState};
use super::{BackendError, NodeBackend};
use crate::options::UpdateOperation;

/// API microversion header.
const API_VERSION_HEADER: &str = "X-OpenStack-Ironic-API-Version";

/// Microversion requested from the backend.
const API_VERSION: &str = "1.81";

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct NodeList {
    nodes: Vec<Node>,
}

/// HTTP implementation of [`NodeBackend`].
#[derive(Clone)]
pub struct HttpBackend {
    /// HTTP client.
    client: Client,
    /// Endpoint without trailing slash.
    base_url: String,
    /// Optional bearer token.
    auth_token: Option<String>,
}

impl HttpBackend {
    /// Create a client for the backend at `endpoint`.
    ///
    /// # Errors
    /// Returns error if the endpoint is not a valid URL or the HTTP client
    /// cannot be created.
    pub fn new(endpoint: &str) -> Result<Self, BackendError> {
        Self::with_timeout(endpoint, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a client with a custom request timeout.
    ///
    /// # Errors
    /// Returns error if the endpoint is not a valid URL or the HTTP client
    /// cannot be created.
    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self, BackendError> {
        let url = Url::parse(endpoint)?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: url.as_str().trim_end_matches('/').to_string(),
            auth_token: None,
        })
    }

    /// Authenticate requests with a bearer token.
    #[must_use]
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{path}", self.base_url);
        debug!(%method, url = %url, "backend request");

        let builder = self
            .client
            .request(method, &url)
            .header(API_VERSION_HEADER, API_VERSION);
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send a request and parse the JSON body.
    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, BackendError> {
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, body = %text, "Failed to parse response");
                BackendError::Serialization(e)
            })
        } else {
            Err(Self::error_for(status, text))
        }
    }

    /// Send a request whose response body is ignored.
    async fn send_empty(&self, builder: RequestBuilder) -> Result<(), BackendError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(Self::error_for(status, text))
        }
    }

    fn error_for(status: StatusCode, message: String) -> BackendError {
        match status {
            StatusCode::NOT_FOUND => BackendError::NotFound(message),
            StatusCode::CONFLICT => BackendError::Conflict(message),
            _ => BackendError::Api {
                status: status.as_u16(),
                message,
            },
        }
    }
}

#[async_trait]
impl NodeBackend for HttpBackend {
    async fn get_node(&self, id: &str) -> Result<Node, BackendError> {
        self.send_json(self.request(Method::GET, &format!("/v1/nodes/{id}")))
            .await
    }

    async fn find_node_by_name(&self, name: &str) -> Result<Option<Node>, BackendError> {
        match self.get_node(name).await {
            Ok(node) => Ok(Some(node)),
            Err(BackendError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_node(&self, req: NewNode) -> Result<Node, BackendError> {
        self.send_json(self.request(Method::POST, "/v1/nodes").json(&req))
            .await
    }

    async fn update_node(&self, id: &str, ops: &[UpdateOperation]) -> Result<Node, BackendError> {
        self.send_json(
            self.request(Method::PATCH, &format!("/v1/nodes/{id}"))
                .json(ops),
        )
        .await
    }

    async fn change_provision_state(
        &self,
        id: &str,
        req: ProvisionStateRequest,
    ) -> Result<(), BackendError> {
        self.send_empty(
            self.request(Method::PUT, &format!("/v1/nodes/{id}/states/provision"))
                .json(&req),
        )
        .await
    }

    async fn set_raid_config(&self, id: &str, config: &Value) -> Result<(), BackendError> {
        self.send_empty(
            self.request(Method::PUT, &format!("/v1/nodes/{id}/states/raid"))
                .json(config),
        )
        .await
    }

    async fn set_power_state(
        &self,
        id: &str,
        target: TargetPowerState,
    ) -> Result<(), BackendError> {
        self.send_empty(
            self.request(Method::PUT, &format!("/v1/nodes/{id}/states/power"))
                .json(&json!({ "target": target })),
        )
        .await
    }

    async fn set_maintenance(
        &self,
        id: &str,
        maintenance: bool,
        reason: Option<&str>,
    ) -> Result<(), BackendError> {
        let path = format!("/v1/nodes/{id}/maintenance");
        let builder = if maintenance {
            self.request(Method::PUT, &path)
                .json(&json!({ "reason": reason.unwrap_or_default() }))
        } else {
            self.request(Method::DELETE, &path)
        };
        self.send_empty(builder).await
    }

    async fn delete_node(&self, id: &str) -> Result<(), BackendError> {
        match self
            .send_empty(self.request(Method::DELETE, &format!("/v1/nodes/{id}")))
            .await
        {
            Err(BackendError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, BackendError> {
        let list: NodeList = self
            .send_json(self.request(Method::GET, "/v1/nodes/detail"))
            .await?;
        Ok(list.nodes)
    }

    async fn is_ready(&self) -> Result<bool, BackendError> {
        match self.request(Method::GET, "/v1").send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) if e.is_connect() || e.is_timeout() => {
                debug!(error = %e, "backend not reachable");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
