//! Blocking text-completion client for local and hosted model endpoints.

use crate::config::{LlmConfig, LlmProvider};
use crate::{Error, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::json;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You clean and classify records from a D&D combat log dataset. Answer in exactly the requested format, with no extra commentary.";
const MAX_TOKENS: u32 = 200;

/// Text completion interface used by the cleaning advisors.
pub trait TextCompletion: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<String>;
}

/// Create the default HTTP-backed completion client.
pub fn create_client(llm: &LlmConfig) -> Result<Box<dyn TextCompletion>> {
    Ok(Box::new(HttpCompletionClient::new(llm)?))
}

/// One request per prompt, fixed timeout, no retry.
struct HttpCompletionClient {
    model: String,
    provider: LlmProvider,
    endpoint: String,
    api_key: Option<String>,
    runtime: tokio::runtime::Runtime,
    http: reqwest::Client,
}

impl HttpCompletionClient {
    fn new(config: &LlmConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| config.provider.default_endpoint().to_string());
        let api_key = match config.provider {
            LlmProvider::Ollama => None,
            LlmProvider::Claude => config
                .api_key
                .clone()
                .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok()),
            LlmProvider::OpenAI => config
                .api_key
                .clone()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok()),
        };

        // A custom OpenAI-compatible endpoint (LM Studio) needs no key.
        let needs_key = match config.provider {
            LlmProvider::Ollama => false,
            LlmProvider::Claude => true,
            LlmProvider::OpenAI => config.endpoint.is_none(),
        };
        if needs_key && api_key.is_none() {
            return Err(Error::Config(
                "llm.api_key (or provider env var) is required".to_string(),
            ));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Llm(format!("failed to build tokio runtime: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| Error::Llm(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            model: config.model.clone(),
            provider: config.provider,
            endpoint,
            api_key,
            runtime,
            http,
        })
    }

    async fn post(&self, url: String, headers: HeaderMap, body: serde_json::Value) -> Result<serde_json::Value> {
        let name = self.provider_name();
        let resp = self
            .http
            .post(url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Llm(format!("{name} request failed: {e}")))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::Llm(format!("{name} read body failed: {e}")))?;
        if !status.is_success() {
            return Err(Error::Llm(format!(
                "{name} returned {}: {}",
                status.as_u16(),
                text
            )));
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn provider_name(&self) -> &'static str {
        match self.provider {
            LlmProvider::Ollama => "ollama",
            LlmProvider::Claude => "claude",
            LlmProvider::OpenAI => "openai",
        }
    }
}

impl TextCompletion for HttpCompletionClient {
    fn complete(&self, prompt: &str) -> Result<String> {
        let base = self.endpoint.trim_end_matches('/');
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        self.runtime.block_on(async {
            match self.provider {
                LlmProvider::Ollama => {
                    let json = self
                        .post(
                            format!("{base}/api/generate"),
                            headers,
                            json!({
                                "model": self.model,
                                "system": SYSTEM_PROMPT,
                                "prompt": prompt,
                                "stream": false,
                            }),
                        )
                        .await?;
                    json.get("response")
                        .and_then(|v| v.as_str())
                        .map(ToString::to_string)
                        .ok_or_else(|| {
                            Error::Llm("ollama response missing string field `response`".to_string())
                        })
                }
                LlmProvider::Claude => {
                    headers.insert(
                        "x-api-key",
                        HeaderValue::from_str(self.api_key.as_deref().unwrap_or_default())
                            .map_err(|e| Error::Llm(format!("invalid claude api key header: {e}")))?,
                    );
                    headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));

                    let json = self
                        .post(
                            format!("{base}/v1/messages"),
                            headers,
                            json!({
                                "model": self.model,
                                "max_tokens": MAX_TOKENS,
                                "temperature": 0.1,
                                "system": SYSTEM_PROMPT,
                                "messages": [{ "role": "user", "content": prompt }],
                            }),
                        )
                        .await?;
                    json.get("content")
                        .and_then(|v| v.as_array())
                        .and_then(|arr| arr.first())
                        .and_then(|v| v.get("text"))
                        .and_then(|v| v.as_str())
                        .map(ToString::to_string)
                        .ok_or_else(|| {
                            Error::Llm("claude response missing content[0].text".to_string())
                        })
                }
                LlmProvider::OpenAI => {
                    if let Some(key) = self.api_key.as_deref() {
                        headers.insert(
                            AUTHORIZATION,
                            HeaderValue::from_str(&format!("Bearer {key}"))
                                .map_err(|e| Error::Llm(format!("invalid auth header: {e}")))?,
                        );
                    }

                    let json = self
                        .post(
                            format!("{base}/v1/chat/completions"),
                            headers,
                            json!({
                                "model": self.model,
                                "max_tokens": MAX_TOKENS,
                                "temperature": 0.1,
                                "messages": [
                                    { "role": "system", "content": SYSTEM_PROMPT },
                                    { "role": "user", "content": prompt }
                                ]
                            }),
                        )
                        .await?;
                    json.get("choices")
                        .and_then(|v| v.as_array())
                        .and_then(|arr| arr.first())
                        .and_then(|v| v.get("message"))
                        .and_then(|v| v.get("content"))
                        .and_then(|v| v.as_str())
                        .map(ToString::to_string)
                        .ok_or_else(|| {
                            Error::Llm(
                                "openai response missing choices[0].message.content".to_string(),
                            )
                        })
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: LlmProvider, endpoint: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider,
            model: "test-model".to_string(),
            endpoint: endpoint.map(ToString::to_string),
            api_key: None,
            timeout_secs: 1,
        }
    }

    #[test]
    fn test_local_endpoints_need_no_key() {
        assert!(create_client(&config(LlmProvider::Ollama, None)).is_ok());
        assert!(create_client(&config(
            LlmProvider::OpenAI,
            Some("http://localhost:1234")
        ))
        .is_ok());
    }

    #[test]
    fn test_unreachable_endpoint_is_llm_error() {
        let client = create_client(&config(LlmProvider::Ollama, Some("http://127.0.0.1:9"))).unwrap();
        match client.complete("hello") {
            Err(Error::Llm(message)) => assert!(message.contains("ollama")),
            other => panic!("expected LLM error, got {other:?}"),
        }
    }
}
