//! HTTP client for communicating with the Portguard server.

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Envelope of successful POST and list responses.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

/// Body the server sends with a non-2xx status.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorInfo {
    code: String,
    message: String,
}

/// Turn an error response into a readable message.
fn describe_failure(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => format!("{} ({}, {})", parsed.error.message, parsed.error.code, status),
        Err(_) if body.trim().is_empty() => format!("API error ({})", status),
        Err(_) => format!("API error ({}): {}", status, body.trim()),
    }
}

/// HTTP client for the Portguard API.
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client pointing at the given base URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(resp: Response) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!(describe_failure(status, &body))
    }

    fn unwrap_envelope<T>(api_resp: ApiResponse<T>) -> Result<(T, Option<String>)> {
        if !api_resp.success {
            anyhow::bail!(
                "API error: {}",
                api_resp.message.unwrap_or_else(|| "Unknown error".into())
            );
        }
        let data = api_resp
            .data
            .ok_or_else(|| anyhow::anyhow!("API returned success but no data"))?;
        Ok((data, api_resp.message))
    }

    /// GET a bare JSON document (`/health`, `/api/status`).
    pub async fn get_raw<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        Self::check(resp)
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }

    /// GET an enveloped response and return its data.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let envelope: ApiResponse<T> = self.get_raw(path).await?;
        Self::unwrap_envelope(envelope).map(|(data, _)| data)
    }

    /// POST a JSON body; returns the data and the server's message, if any.
    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(T, Option<String>)> {
        let url = self.url(path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {} failed", url))?;

        let envelope: ApiResponse<T> = Self::check(resp)
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))?;
        Self::unwrap_envelope(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_structured_error() {
        let body = r#"{"success":false,"error":{"code":"SESSION_CONFLICT","numericCode":1200,"message":"Recovery already in progress","timestamp":"2024-01-01T00:00:00Z"}}"#;
        let msg = describe_failure(reqwest::StatusCode::CONFLICT, body);
        assert!(msg.starts_with("Recovery already in progress (SESSION_CONFLICT"));
    }

    #[test]
    fn test_describe_plain_error() {
        let msg = describe_failure(reqwest::StatusCode::BAD_GATEWAY, "upstream down\n");
        assert_eq!(msg, "API error (502 Bad Gateway): upstream down");
    }

    #[test]
    fn test_envelope_without_data_is_an_error() {
        let envelope: ApiResponse<u32> = ApiResponse {
            success: true,
            data: None,
            message: None,
        };
        assert!(ApiClient::unwrap_envelope(envelope).is_err());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = ApiClient::new("http://localhost:7070/").unwrap();
        assert_eq!(client.url("/health"), "http://localhost:7070/health");
    }
}
