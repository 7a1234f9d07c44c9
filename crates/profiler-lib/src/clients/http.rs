//! Shared HTTP plumbing for the remote-collaborator clients

use crate::error::{ClientError, ClientResult};
use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use url::Url;

/// Per-request transport timeout of the underlying HTTP client
pub const DEFAULT_TRANSPORT_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Thin wrapper over `reqwest::Client` that maps statuses to `ClientError`
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> ClientResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_default_timeout() -> ClientResult<Self> {
        Self::new(DEFAULT_TRANSPORT_TIMEOUT)
    }

    /// Submit a request; any non-2xx status is fatal
    pub async fn submit<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> ClientResult<Response> {
        let endpoint = url.to_string();
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(unexpected_status(endpoint, response).await);
        }
        Ok(response)
    }

    /// Plain lookup; any non-2xx status is an error
    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> ClientResult<T> {
        let response = self
            .submit::<()>(Method::GET, url, None)
            .await?;
        decode(response).await
    }

    /// Status poll; anything but 200 aborts the poll
    pub async fn poll_json<T: DeserializeOwned>(&self, url: Url) -> ClientResult<T> {
        let endpoint = url.to_string();
        let response = self.client.get(url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(ClientError::PollStatus {
                endpoint,
                status: response.status().as_u16(),
            });
        }
        decode(response).await
    }

    /// Send a request and hand back the raw response regardless of status
    pub async fn send(&self, method: Method, url: Url) -> ClientResult<Response> {
        Ok(self.client.request(method, url).send().await?)
    }
}

pub(crate) async fn unexpected_status(endpoint: String, response: Response) -> ClientError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    ClientError::UnexpectedStatus {
        endpoint,
        status,
        body,
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()))
}

/// Join `path` onto `base` regardless of trailing slashes
pub fn endpoint(base: &str, path: &str) -> ClientResult<Url> {
    let base = normalize_base(base);
    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Ok(Url::parse(&joined)?)
}

/// Service urls handed out by the deployer may omit the scheme
pub fn normalize_base(base: &str) -> String {
    if base.starts_with("http://") || base.starts_with("https://") {
        base.to_string()
    } else {
        format!("http://{}", base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_join() {
        let url = endpoint("http://deployer:7777/", "/v1/deployments").unwrap();
        assert_eq!(url.as_str(), "http://deployer:7777/v1/deployments");

        let url = endpoint("agent.internal:7778", "benchmarks/cpu-1").unwrap();
        assert_eq!(url.as_str(), "http://agent.internal:7778/benchmarks/cpu-1");
    }

    #[tokio::test]
    async fn test_submit_maps_non_success_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/calibrate")
            .with_status(500)
            .with_body("controller exploded")
            .create_async()
            .await;

        let client = HttpClient::with_default_timeout().unwrap();
        let url = endpoint(&server.url(), "/api/calibrate").unwrap();
        let err = client
            .submit(Method::POST, url, Some(&serde_json::json!({})))
            .await
            .unwrap_err();

        mock.assert_async().await;
        match err {
            ClientError::UnexpectedStatus { status, body, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body, "controller exploded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_poll_rejects_non_200() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/calibrate/stage-1")
            .with_status(202)
            .with_body("{}")
            .create_async()
            .await;

        let client = HttpClient::with_default_timeout().unwrap();
        let url = endpoint(&server.url(), "/api/calibrate/stage-1").unwrap();
        let err = client.poll_json::<serde_json::Value>(url).await.unwrap_err();

        assert!(matches!(err, ClientError::PollStatus { status: 202, .. }));
    }
}
