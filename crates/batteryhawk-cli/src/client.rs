//! HTTP client for the batteryhawk-service REST API.

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

/// HTTP client for a running Battery Hawk service.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    client: Client,
    base_url: String,
}

/// Error type for service client operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceClientError {
    #[error("service not reachable at {url}: {source}")]
    NotReachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("{detail}")]
    ApiError { status: u16, detail: String },
}

pub type Result<T> = std::result::Result<T, ServiceClientError>;

impl ServiceClient {
    /// Create a new client talking to `base_url` (e.g. "http://localhost:8080").
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ServiceClientError::InvalidUrl(format!(
                "url must start with http:// or https://, got: {base_url}"
            )));
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn list_devices(&self) -> Result<Value> {
        self.get("/api/devices").await
    }

    pub async fn get_device(&self, mac: &str) -> Result<Value> {
        self.get(&format!("/api/devices/{mac}")).await
    }

    pub async fn get_latest_reading(&self, mac: &str) -> Result<Value> {
        self.get(&format!("/api/readings/{mac}/latest")).await
    }

    pub async fn patch_device(&self, mac: &str, body: &Value) -> Result<Value> {
        self.patch(&format!("/api/devices/{mac}"), body).await
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let response = self.client.get(&url).send().await.map_err(|e| ServiceClientError::NotReachable {
            url: url.clone(),
            source: e,
        })?;
        Self::handle_response(response).await
    }

    async fn patch<B: Serialize>(&self, path: &str, body: &B) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let response = self.client.patch(&url).json(body).send().await.map_err(|e| ServiceClientError::NotReachable {
            url: url.clone(),
            source: e,
        })?;
        Self::handle_response(response).await
    }

    async fn handle_response(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if status.is_success() {
            Ok(body)
        } else {
            let detail = body
                .get("errors")
                .and_then(|errors| errors.get(0))
                .and_then(|error| error.get("detail"))
                .and_then(Value::as_str)
                .unwrap_or("request failed")
                .to_string();
            Err(ServiceClientError::ApiError {
                status: status.as_u16(),
                detail,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_trailing_slash() {
        let client = ServiceClient::new("http://localhost:8080/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn rejects_url_without_scheme() {
        let result = ServiceClient::new("localhost:8080");
        assert!(matches!(result, Err(ServiceClientError::InvalidUrl(_))));
    }
}
