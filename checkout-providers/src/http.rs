//! Outbound HTTP plumbing shared by every gateway adapter.

use std::time::Duration;

use checkout_types::ProviderError;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

/// Upper bound on any single provider call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// A thin wrapper over `reqwest::Client` bound to one provider's base URL.
///
/// It never retries: checkout creation is not idempotent on most gateways.
#[derive(Debug, Clone)]
pub struct ApiClient {
    provider: &'static str,
    base_url: String,
    http: Client,
}

impl ApiClient {
    pub fn new(
        provider: &'static str,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Config(format!("{provider}: HTTP client: {e}")))?;
        Ok(Self {
            provider,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, self.url(path))
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    /// Sends the request and decodes a 2xx JSON body.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
    ) -> Result<T, ProviderError> {
        let resp = self.send(req).await?;
        self.handle_response(resp).await
    }

    /// Sends the request and returns status and body without judging the
    /// status, for endpoints where a non-2xx answer is meaningful.
    pub async fn send_raw(
        &self,
        req: RequestBuilder,
    ) -> Result<(StatusCode, String), ProviderError> {
        let resp = self.send(req).await?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.transport(e))?;
        Ok((status, body))
    }

    /// Decodes a body already known to be a success response.
    pub fn decode<T: DeserializeOwned>(&self, body: &str) -> Result<T, ProviderError> {
        serde_json::from_str(body).map_err(|e| ProviderError::decode(self.provider, e))
    }

    /// Turns an unexpected status into the error the caller sees.
    pub fn status_error(&self, status: StatusCode, body: String) -> ProviderError {
        ProviderError::Http {
            provider: self.provider,
            status: status.as_u16(),
            body,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, ProviderError> {
        req.send().await.map_err(|e| self.transport(e))
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        resp: Response,
    ) -> Result<T, ProviderError> {
        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.transport(e))?;
        if status.is_success() {
            self.decode(&body)
        } else {
            tracing::warn!(
                provider = self.provider,
                status = status.as_u16(),
                "Provider returned an error response"
            );
            Err(self.status_error(status, body))
        }
    }

    fn transport(&self, err: reqwest::Error) -> ProviderError {
        let message = if err.is_timeout() {
            format!("request timed out: {err}")
        } else {
            err.to_string()
        };
        ProviderError::Transport {
            provider: self.provider,
            message,
        }
    }
}
