//! OpenAI-compatible chat-completions client.
//!
//! Works against any server exposing `POST {base_url}/chat/completions`
//! (OpenAI, DeepSeek, DashScope compatible mode, vLLM, llama.cpp server).
//! There is no retry layer here; a failed call is reported as-is.

use super::{Completion, CompletionService};
use crate::error::LLMError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    /// Never serialized back out.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    pub proxy: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".to_string(),
            api_key: None,
            model: "deepseek-chat".to_string(),
            max_tokens: 2048,
            temperature: 0.0,
            timeout_secs: 120,
            proxy: None,
        }
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct OpenAICompatibleClient {
    client: Client,
    config: ModelConfig,
    api_key: String,
}

impl OpenAICompatibleClient {
    pub fn new(config: ModelConfig) -> Result<Self, LLMError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                LLMError::NotConfigured("set TREEQA_API_KEY or OPENAI_API_KEY".to_string())
            })?;

        let mut builder = Client::builder().timeout(Duration::from_secs(config.timeout_secs));
        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| LLMError::NotConfigured(format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| LLMError::NotConfigured(e.to_string()))?;

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    total_tokens: Option<u64>,
}

#[async_trait]
impl CompletionService for OpenAICompatibleClient {
    async fn complete(&self, system_prompt: &str, user_text: &str) -> Result<Completion, LLMError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_text},
            ],
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "stream": false,
        });

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if response.status() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LLMError::RateLimited {
                retry_after_ms: retry_after.saturating_mul(1000),
            });
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LLMError::Api(format!("{status}: {error_text}")));
        }

        let data: ChatResponse = response
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;

        let text = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LLMError::InvalidResponse("no choices in response".to_string()))?;

        let tokens = data
            .usage
            .map(|u| u.total_tokens.unwrap_or(u.prompt_tokens + u.completion_tokens))
            .unwrap_or(0);

        Ok(Completion { text, tokens })
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String) -> ModelConfig {
        ModelConfig {
            base_url,
            api_key: Some("sk-test".to_string()),
            ..ModelConfig::default()
        }
    }

    #[test]
    fn test_missing_key_is_not_configured() {
        let err = OpenAICompatibleClient::new(ModelConfig::default()).err().unwrap();
        assert!(matches!(err, LLMError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_reports_total_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "Paris"}}],
                "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAICompatibleClient::new(config(server.uri())).unwrap();
        let out = client.complete("system", "capital of France?").await.unwrap();
        assert_eq!(out, Completion::new("Paris", 12));
    }

    #[tokio::test]
    async fn test_rate_limit_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAICompatibleClient::new(config(server.uri())).unwrap();
        let err = client.complete("s", "u").await.unwrap_err();
        assert!(matches!(err, LLMError::RateLimited { retry_after_ms: 2000 }));
    }

    #[tokio::test]
    async fn test_huge_retry_after_saturates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429).insert_header("retry-after", u64::MAX.to_string().as_str()),
            )
            .mount(&server)
            .await;

        let client = OpenAICompatibleClient::new(config(server.uri())).unwrap();
        let err = client.complete("s", "u").await.unwrap_err();
        assert!(matches!(err, LLMError::RateLimited { retry_after_ms: u64::MAX }));
    }

    #[tokio::test]
    async fn test_server_error_maps_to_api() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = OpenAICompatibleClient::new(config(server.uri())).unwrap();
        let err = client.complete("s", "u").await.unwrap_err();
        assert!(matches!(err, LLMError::Api(msg) if msg.contains("boom")));
    }
}
