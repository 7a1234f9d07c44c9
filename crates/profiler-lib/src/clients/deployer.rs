//! Client for the cluster deployer service
//!
//! Deployments are created asynchronously: the deployer hands back an id and
//! materialises the cluster in the background, so creation and extension both
//! poll the deployment until it becomes available.

use super::http::{endpoint, normalize_base, HttpClient};
use super::poll::{poll_until, PollConfig, PollStatus};
use super::{Deployer, ServiceAddress};
use crate::error::{ClientError, ClientResult};
use crate::models::DeploymentSpec;
use crate::runlog::RunLog;
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Deployment state reported by the deployer once the cluster is usable
const STATE_AVAILABLE: &str = "Available";
const STATE_FAILED: &str = "Failed";

/// Configuration for the deployer client
#[derive(Debug, Clone)]
pub struct DeployerConfig {
    pub base_url: String,
    /// Readiness polling after create and extend
    pub readiness: PollConfig,
}

impl DeployerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            readiness: PollConfig::from_secs(10, 60 * 60),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentRequest<'a> {
    template: &'a str,
    deployment: &'a DeploymentSpec,
    load_tester: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateDeploymentResponse {
    deployment_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentStatus {
    state: String,
    #[serde(default)]
    error: Option<String>,
}

/// One row of the service mapping table of a deployment
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMapping {
    pub name: String,
    pub node_id: String,
    pub public_url: String,
}

#[derive(Debug, Deserialize)]
struct ServiceMappingResponse {
    services: Vec<ServiceMapping>,
}

#[derive(Debug, Deserialize)]
struct ServiceUrlResponse {
    url: String,
}

/// HTTP client for the deployer
pub struct DeployerClient {
    config: DeployerConfig,
    http: HttpClient,
    /// Keyed by (deployment id, service)
    urls: DashMap<(String, String), String>,
    /// Keyed by deployment id; fetched once per lease lifetime
    mappings: DashMap<String, Arc<Vec<ServiceMapping>>>,
}

impl DeployerClient {
    pub fn new(config: DeployerConfig, http: HttpClient) -> Self {
        Self {
            config,
            http,
            urls: DashMap::new(),
            mappings: DashMap::new(),
        }
    }

    fn url(&self, path: &str) -> ClientResult<url::Url> {
        endpoint(&self.config.base_url, path)
    }

    /// Poll the deployment until the deployer reports it available
    async fn wait_until_available(&self, deployment_id: &str, log: &RunLog) -> ClientResult<()> {
        let http = &self.http;
        let url = self.url(&format!("/v1/deployments/{}", deployment_id))?;
        let what = format!("deployment {}", deployment_id);

        poll_until("deployer", &what, self.config.readiness, move || {
            let url = url.clone();
            async move {
                let status: DeploymentStatus = http.poll_json(url).await?;
                match status.state.as_str() {
                    STATE_AVAILABLE => Ok(PollStatus::Done(())),
                    STATE_FAILED => Err(ClientError::Remote(
                        status
                            .error
                            .unwrap_or_else(|| "deployment failed".to_string()),
                    )),
                    _ => Ok(PollStatus::Pending),
                }
            }
        })
        .await?;

        log.info(format!("Deployment {} is available", deployment_id));
        Ok(())
    }

    async fn service_mappings(&self, deployment_id: &str) -> ClientResult<Arc<Vec<ServiceMapping>>> {
        if let Some(cached) = self.mappings.get(deployment_id) {
            return Ok(cached.value().clone());
        }

        let url = self.url(&format!("/v1/deployments/{}/services", deployment_id))?;
        let response: ServiceMappingResponse = self.http.get_json(url).await?;
        let mappings = Arc::new(response.services);
        self.mappings
            .insert(deployment_id.to_string(), mappings.clone());
        Ok(mappings)
    }

    fn forget(&self, deployment_id: &str) {
        self.mappings.remove(deployment_id);
        self.urls.retain(|(deployment, _), _| deployment != deployment_id);
    }
}

#[async_trait]
impl Deployer for DeployerClient {
    async fn create_deployment(
        &self,
        template: &str,
        deployment: &DeploymentSpec,
        load_tester: &str,
        log: &RunLog,
    ) -> ClientResult<String> {
        let body = DeploymentRequest {
            template,
            deployment,
            load_tester,
        };
        log.info(format!("Creating deployment from template {}", template));

        let response = self
            .http
            .submit(Method::POST, self.url("/v1/deployments")?, Some(&body))
            .await?;
        let created: CreateDeploymentResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        log.info(format!(
            "Deployment {} submitted, waiting for it to become available",
            created.deployment_id
        ));
        self.wait_until_available(&created.deployment_id, log).await?;
        Ok(created.deployment_id)
    }

    async fn deploy_extensions(
        &self,
        template: &str,
        deployment_id: &str,
        deployment: &DeploymentSpec,
        load_tester: &str,
        log: &RunLog,
    ) -> ClientResult<()> {
        let body = DeploymentRequest {
            template,
            deployment,
            load_tester,
        };
        log.info(format!("Deploying extensions onto {}", deployment_id));

        let url = self.url(&format!("/v1/deployments/{}/extensions", deployment_id))?;
        self.http.submit(Method::POST, url, Some(&body)).await?;

        // The service layout changes with the extensions
        self.forget(deployment_id);
        self.wait_until_available(deployment_id, log).await
    }

    async fn delete_deployment(&self, deployment_id: &str, log: &RunLog) -> ClientResult<()> {
        let url = self.url(&format!("/v1/deployments/{}", deployment_id))?;
        let response = self.http.send(Method::DELETE, url.clone()).await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                log.warn(format!("Deployment {} was already gone", deployment_id));
            }
            _ => {
                return Err(super::http::unexpected_status(url.to_string(), response).await);
            }
        }

        self.forget(deployment_id);
        log.info(format!("Deleted deployment {}", deployment_id));
        Ok(())
    }

    async fn is_deployment_ready(&self, deployment_id: &str) -> ClientResult<bool> {
        let url = self.url(&format!("/v1/deployments/{}", deployment_id))?;
        let response = self.http.send(Method::GET, url.clone()).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            StatusCode::OK => {
                let status: DeploymentStatus = response
                    .json()
                    .await
                    .map_err(|e| ClientError::Decode(e.to_string()))?;
                Ok(status.state == STATE_AVAILABLE)
            }
            _ => Err(super::http::unexpected_status(url.to_string(), response).await),
        }
    }

    async fn get_service_url(&self, deployment_id: &str, service: &str) -> ClientResult<String> {
        let key = (deployment_id.to_string(), service.to_string());
        if let Some(url) = self.urls.get(&key) {
            return Ok(url.value().clone());
        }

        let url = self.url(&format!(
            "/v1/deployments/{}/services/{}/url",
            deployment_id, service
        ))?;
        let response: ServiceUrlResponse = self.http.get_json(url).await?;
        let service_url = normalize_base(&response.url);

        debug!(deployment_id, service, url = %service_url, "Resolved service url");
        self.urls.insert(key, service_url.clone());
        Ok(service_url)
    }

    async fn get_colocated_service_url(
        &self,
        deployment_id: &str,
        colocated_service: &str,
        service_prefix: &str,
    ) -> ClientResult<String> {
        let mappings = self.service_mappings(deployment_id).await?;
        colocated_url(&mappings, colocated_service, service_prefix)
            .map(|url| normalize_base(&url))
            .ok_or_else(|| {
                ClientError::NotFound(format!(
                    "{} service colocated with {} in deployment {}",
                    service_prefix, colocated_service, deployment_id
                ))
            })
    }

    async fn get_service_address(
        &self,
        deployment_id: &str,
        service: &str,
    ) -> ClientResult<ServiceAddress> {
        let url = self.url(&format!(
            "/v1/deployments/{}/services/{}/address",
            deployment_id, service
        ))?;
        self.http.get_json(url).await
    }
}

/// First service named `prefix*` that runs on the same node as `colocated`
pub fn colocated_url(
    mappings: &[ServiceMapping],
    colocated: &str,
    prefix: &str,
) -> Option<String> {
    let node_id = &mappings.iter().find(|m| m.name == colocated)?.node_id;
    mappings
        .iter()
        .find(|m| m.name.starts_with(prefix) && &m.node_id == node_id)
        .map(|m| m.public_url.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeHint;
    use mockito::Matcher;
    use std::time::Duration;

    fn mapping(name: &str, node: &str, url: &str) -> ServiceMapping {
        ServiceMapping {
            name: name.to_string(),
            node_id: node.to_string(),
            public_url: url.to_string(),
        }
    }

    fn client(server: &mockito::Server) -> DeployerClient {
        let mut config = DeployerConfig::new(server.url());
        config.readiness = PollConfig::new(Duration::from_millis(5), Duration::from_secs(5));
        DeployerClient::new(config, HttpClient::with_default_timeout().unwrap())
    }

    fn spec() -> DeploymentSpec {
        DeploymentSpec {
            app_name: "app".to_string(),
            nodes: vec![NodeHint {
                id: "1".to_string(),
                instance_type: "c4.xlarge".to_string(),
            }],
            tasks: vec![],
        }
    }

    #[test]
    fn test_colocated_url_matches_node() {
        let mappings = vec![
            mapping("benchmark-agent-a", "node-1", "10.0.0.1:7778"),
            mapping("web", "node-2", "10.0.0.2:80"),
            mapping("benchmark-agent-b", "node-2", "10.0.0.2:7778"),
            mapping("benchmark-agent-c", "node-2", "10.0.0.3:7778"),
        ];

        assert_eq!(
            colocated_url(&mappings, "web", "benchmark-agent"),
            Some("10.0.0.2:7778".to_string())
        );
        assert_eq!(colocated_url(&mappings, "missing", "benchmark-agent"), None);
        assert_eq!(colocated_url(&mappings, "web", "locust"), None);
    }

    #[tokio::test]
    async fn test_create_deployment_polls_until_available() {
        let mut server = mockito::Server::new_async().await;
        let create = server
            .mock("POST", "/v1/deployments")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "template": "tmpl",
                "loadTester": "slow-cooker"
            })))
            .with_status(202)
            .with_body(r#"{"deploymentId":"dep-1"}"#)
            .create_async()
            .await;
        let status = server
            .mock("GET", "/v1/deployments/dep-1")
            .with_status(200)
            .with_body(r#"{"state":"Available"}"#)
            .create_async()
            .await;

        let deployer = client(&server);
        let id = deployer
            .create_deployment("tmpl", &spec(), "slow-cooker", &RunLog::detached("run-1"))
            .await
            .unwrap();

        assert_eq!(id, "dep-1");
        create.assert_async().await;
        status.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_deployment_reports_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/deployments")
            .with_status(200)
            .with_body(r#"{"deploymentId":"dep-2"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/v1/deployments/dep-2")
            .with_status(200)
            .with_body(r#"{"state":"Failed","error":"no capacity"}"#)
            .create_async()
            .await;

        let err = client(&server)
            .create_deployment("tmpl", &spec(), "slow-cooker", &RunLog::detached("run-2"))
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Remote(msg) if msg == "no capacity"));
    }

    #[tokio::test]
    async fn test_service_url_is_cached_per_deployment() {
        let mut server = mockito::Server::new_async().await;
        let dep1 = server
            .mock("GET", "/v1/deployments/dep-1/services/web/url")
            .with_status(200)
            .with_body(r#"{"url":"10.0.0.1:80"}"#)
            .expect(1)
            .create_async()
            .await;
        let dep2 = server
            .mock("GET", "/v1/deployments/dep-2/services/web/url")
            .with_status(200)
            .with_body(r#"{"url":"http://10.0.0.9:80"}"#)
            .expect(1)
            .create_async()
            .await;

        let deployer = client(&server);
        assert_eq!(
            deployer.get_service_url("dep-1", "web").await.unwrap(),
            "http://10.0.0.1:80"
        );
        assert_eq!(
            deployer.get_service_url("dep-1", "web").await.unwrap(),
            "http://10.0.0.1:80"
        );
        assert_eq!(
            deployer.get_service_url("dep-2", "web").await.unwrap(),
            "http://10.0.0.9:80"
        );

        dep1.assert_async().await;
        dep2.assert_async().await;
    }

    #[tokio::test]
    async fn test_colocated_service_url_fetches_mapping_once() {
        let mut server = mockito::Server::new_async().await;
        let services = server
            .mock("GET", "/v1/deployments/dep-1/services")
            .with_status(200)
            .with_body(
                r#"{"services":[
                    {"name":"slow-cooker","nodeId":"n1","publicUrl":"10.0.0.1:8080"},
                    {"name":"benchmark-agent-1","nodeId":"n1","publicUrl":"10.0.0.1:7778"},
                    {"name":"web","nodeId":"n2","publicUrl":"10.0.0.2:80"},
                    {"name":"benchmark-agent-2","nodeId":"n2","publicUrl":"10.0.0.2:7778"}
                ]}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let deployer = client(&server);
        let lt = deployer
            .get_colocated_service_url("dep-1", "slow-cooker", "benchmark-agent")
            .await
            .unwrap();
        let web = deployer
            .get_colocated_service_url("dep-1", "web", "benchmark-agent")
            .await
            .unwrap();

        assert_eq!(lt, "http://10.0.0.1:7778");
        assert_eq!(web, "http://10.0.0.2:7778");
        services.assert_async().await;
    }

    #[tokio::test]
    async fn test_is_deployment_ready() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/deployments/gone")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", "/v1/deployments/live")
            .with_status(200)
            .with_body(r#"{"state":"Available"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/v1/deployments/creating")
            .with_status(200)
            .with_body(r#"{"state":"Creating"}"#)
            .create_async()
            .await;

        let deployer = client(&server);
        assert!(!deployer.is_deployment_ready("gone").await.unwrap());
        assert!(deployer.is_deployment_ready("live").await.unwrap());
        assert!(!deployer.is_deployment_ready("creating").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_deployment_tolerates_missing() {
        let mut server = mockito::Server::new_async().await;
        let delete = server
            .mock("DELETE", "/v1/deployments/dep-1")
            .with_status(404)
            .create_async()
            .await;

        client(&server)
            .delete_deployment("dep-1", &RunLog::detached("run-1"))
            .await
            .unwrap();
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_deployment_fails_on_server_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/v1/deployments/dep-1")
            .with_status(500)
            .create_async()
            .await;

        let err = client(&server)
            .delete_deployment("dep-1", &RunLog::detached("run-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::UnexpectedStatus { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_service_address() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/deployments/dep-1/services/mongo/address")
            .with_status(200)
            .with_body(r#"{"host":"10.0.0.5","port":27017}"#)
            .create_async()
            .await;

        let address = client(&server)
            .get_service_address("dep-1", "mongo")
            .await
            .unwrap();
        assert_eq!(address.host, "10.0.0.5");
        assert_eq!(address.port, 27017);
    }
}
