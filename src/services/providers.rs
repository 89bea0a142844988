// Judge Provider Service
// HTTP client for the local language-model service used by the semantic judge

use crate::services::config_store::JudgeConfig;
use crate::services::forensics::semantic::JudgeTransport;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

const GENERATE_SUFFIX: &str = "/api/generate";
const TAGS_SUFFIX: &str = "/api/tags";

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Missing content in response")]
    MissingContent,
    #[error("JSON parse error: {0}")]
    JsonError(String),
    #[error("Request timed out after {0} ms")]
    Timeout(u64),
}

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

pub struct JudgeClient {
    client: Client,
    url: String,
    model: String,
    health_timeout: Duration,
}

impl JudgeClient {
    /// The per-request timeout is enforced by the judge expert, so the
    /// client timeout here is only a backstop.
    pub fn new(config: &JudgeConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.saturating_mul(2)))
            .build()
            .unwrap_or_default();

        Self {
            client,
            url: config.url.clone(),
            model: config.model.clone(),
            health_timeout: Duration::from_millis(config.health_timeout_ms),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Tag listing endpoint next to the generate endpoint.
    pub fn tags_url(&self) -> String {
        tags_url_for(&self.url)
    }

    /// Whether the service answers at all. Never errors.
    pub async fn check_health(&self) -> bool {
        let url = self.tags_url();
        let result = self
            .client
            .get(&url)
            .timeout(self.health_timeout)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                info!("[JUDGE] Health check ok: {}", url);
                true
            }
            Ok(resp) => {
                warn!("[JUDGE] Health check status {}: {}", resp.status(), url);
                false
            }
            Err(e) => {
                warn!("[JUDGE] Health check failed: {}", e);
                false
            }
        }
    }

    pub async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        let start = Instant::now();
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let response = self.client.post(&self.url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::JsonError(e.to_string()))?;

        let content = body
            .response
            .filter(|s| !s.trim().is_empty())
            .ok_or(ProviderError::MissingContent)?;

        info!(
            "[JUDGE] model={} latency_ms={} chars={}",
            self.model,
            start.elapsed().as_millis(),
            content.chars().count()
        );
        Ok(content)
    }
}

impl JudgeTransport for JudgeClient {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        JudgeClient::generate(self, prompt).await
    }
}

fn tags_url_for(generate_url: &str) -> String {
    let trimmed = generate_url.trim_end_matches('/');
    match trimmed.strip_suffix(GENERATE_SUFFIX) {
        Some(base) => format!("{}{}", base, TAGS_SUFFIX),
        None => format!("{}{}", trimmed, TAGS_SUFFIX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_url_derivation() {
        assert_eq!(
            tags_url_for("http://localhost:11434/api/generate"),
            "http://localhost:11434/api/tags"
        );
        assert_eq!(
            tags_url_for("http://judge.local:8080/"),
            "http://judge.local:8080/api/tags"
        );
    }

    #[test]
    fn test_request_shape() {
        let req = GenerateRequest {
            model: "deepseek-r1:7b",
            prompt: "hello",
            stream: false,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "deepseek-r1:7b");
        assert_eq!(json["prompt"], "hello");
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_response_parsing() {
        let body: GenerateResponse =
            serde_json::from_str(r#"{"model":"m","response":"{\"a\":1}","done":true}"#).unwrap();
        assert_eq!(body.response.as_deref(), Some("{\"a\":1}"));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unhealthy() {
        let config = JudgeConfig {
            url: "http://127.0.0.1:9/api/generate".to_string(),
            health_timeout_ms: 500,
            ..JudgeConfig::default()
        };
        let client = JudgeClient::new(&config);
        assert!(!client.check_health().await);
    }
}
