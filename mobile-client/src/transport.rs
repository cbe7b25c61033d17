//! HTTP access to the order service

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::models::HttpMethod;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{ErrorResponse, MenuCategory, TableView};

/// What the sync layer needs from the server. Tests substitute a scripted
/// implementation.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Sends one write. `endpoint` is a path such as `/api/orders`.
    async fn send(&self, method: HttpMethod, endpoint: &str, payload: &Value) -> ClientResult<Value>;

    async fn fetch_tables(&self) -> ClientResult<Vec<TableView>>;

    async fn fetch_menu(&self) -> ClientResult<Vec<MenuCategory>>;

    /// Whether the health endpoint answers.
    async fn is_reachable(&self) -> bool;
}

/// HTTP client for the order service
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> ClientResult<T> {
        let response = self.client.get(self.url(path)).send().await.map_err(connection_error)?;
        let body = Self::handle_response(response).await?;
        Ok(serde_json::from_value(body)?)
    }

    /// Maps non-2xx answers onto `ClientError`. An empty success body reads
    /// as `null`.
    async fn handle_response(response: reqwest::Response) -> ClientResult<Value> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|body| body.error)
                .unwrap_or(text);
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ClientError::Validation(message),
                StatusCode::NOT_FOUND => ClientError::NotFound(message),
                StatusCode::CONFLICT => ClientError::Conflict(message),
                _ => ClientError::Server { status: status.as_u16(), message },
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

fn connection_error(e: reqwest::Error) -> ClientError {
    if e.is_connect() || e.is_timeout() {
        ClientError::Unreachable(e.to_string())
    } else {
        ClientError::Http(e)
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn send(&self, method: HttpMethod, endpoint: &str, payload: &Value) -> ClientResult<Value> {
        let url = self.url(endpoint);
        let request = match method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Put => self.client.put(&url),
            HttpMethod::Patch => self.client.patch(&url),
            HttpMethod::Delete => self.client.delete(&url),
        };
        let request = if payload.is_null() { request } else { request.json(payload) };

        tracing::debug!(%method, %url, "Sending request");
        let response = request.send().await.map_err(connection_error)?;
        Self::handle_response(response).await
    }

    async fn fetch_tables(&self) -> ClientResult<Vec<TableView>> {
        self.get("/api/tables").await
    }

    async fn fetch_menu(&self) -> ClientResult<Vec<MenuCategory>> {
        self.get("/api/menu").await
    }

    async fn is_reachable(&self) -> bool {
        match self.client.get(self.url("/health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_join_without_doubled_slashes() {
        let transport = HttpTransport::new(&ClientConfig::new("http://pos.local:3001/")).unwrap();
        assert_eq!(transport.base_url(), "http://pos.local:3001");
        assert_eq!(transport.url("/api/orders"), "http://pos.local:3001/api/orders");
        assert_eq!(transport.url("health"), "http://pos.local:3001/health");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_retryable_error() {
        // Port 9 on loopback refuses connections.
        let transport = HttpTransport::new(&ClientConfig::new("http://127.0.0.1:9").with_timeout(2)).unwrap();
        assert!(!transport.is_reachable().await);

        let err = transport
            .send(HttpMethod::Post, "/api/orders", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Unreachable(_)));
        assert!(err.is_retryable());
    }
}
