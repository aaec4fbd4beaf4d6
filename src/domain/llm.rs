//! Language-model client.
//!
//! Two calling conventions exist in the wild - the structured "responses"
//! API and legacy chat completions. Both are normalized into one
//! [`LlmResponse`] shape here so nothing downstream ever branches on the
//! provider's wire format.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{LlmConfig, LlmMode};
use crate::types::LlmUsage;

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_output_tokens: usize,
}

/// Canonical response shape, independent of calling convention.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub usage: Option<LlmUsage>,
    pub response_id: Option<String>,
    pub duration_ms: u64,
    pub mode: LlmMode,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponsesRequest {
    model: String,
    temperature: f32,
    max_output_tokens: usize,
    input: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    id: Option<String>,
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<ResponsesOutputItem>,
    usage: Option<LlmUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponsesOutputItem {
    #[serde(default)]
    content: Vec<ResponsesContentItem>,
}

#[derive(Debug, Deserialize)]
struct ResponsesContentItem {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    id: Option<String>,
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
    content: Option<String>,
}

/// Chat completions name the counters differently; map them onto the
/// canonical usage shape.
#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

impl From<ChatUsage> for LlmUsage {
    fn from(u: ChatUsage) -> Self {
        LlmUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    mode: LlmMode,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            mode: config.mode,
        })
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .context("Failed to send request to OpenAI")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API error ({}): {}", status, body);
        }
        Ok(response)
    }

    async fn complete_responses(&self, request: &LlmRequest) -> Result<(String, Option<LlmUsage>, Option<String>)> {
        let body = ResponsesRequest {
            model: request.model.clone(),
            temperature: request.temperature,
            max_output_tokens: request.max_output_tokens,
            input: vec![
                Message {
                    role: "system",
                    content: request.system_prompt.clone(),
                },
                Message {
                    role: "user",
                    content: request.user_prompt.clone(),
                },
            ],
        };

        let parsed: ResponsesResponse = self
            .post_json("/responses", &body)
            .await?
            .json()
            .await
            .context("Failed to parse OpenAI responses output")?;

        let text = match parsed.output_text {
            Some(t) => t,
            None => parsed
                .output
                .iter()
                .flat_map(|item| item.content.iter())
                .filter_map(|c| c.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        };

        Ok((text, parsed.usage, parsed.id))
    }

    async fn complete_chat(&self, request: &LlmRequest) -> Result<(String, Option<LlmUsage>, Option<String>)> {
        let body = ChatCompletionsRequest {
            model: request.model.clone(),
            temperature: request.temperature,
            max_tokens: request.max_output_tokens,
            messages: vec![
                Message {
                    role: "system",
                    content: request.system_prompt.clone(),
                },
                Message {
                    role: "user",
                    content: request.user_prompt.clone(),
                },
            ],
        };

        let parsed: ChatCompletionsResponse = self
            .post_json("/chat/completions", &body)
            .await?
            .json()
            .await
            .context("Failed to parse OpenAI chat completions output")?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok((text, parsed.usage.map(LlmUsage::from), parsed.id))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let started = Instant::now();

        let (text, usage, response_id) = match self.mode {
            LlmMode::Responses => self.complete_responses(request).await?,
            LlmMode::ChatCompletions => self.complete_chat(request).await?,
        };

        Ok(LlmResponse {
            text,
            usage,
            response_id,
            duration_ms: started.elapsed().as_millis() as u64,
            mode: self.mode,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_usage_maps_to_canonical_counters() {
        let usage: LlmUsage = ChatUsage {
            prompt_tokens: Some(10),
            completion_tokens: Some(5),
            total_tokens: Some(15),
        }
        .into();
        assert_eq!(usage.input_tokens, Some(10));
        assert_eq!(usage.output_tokens, Some(5));
        assert_eq!(usage.total_tokens, Some(15));
    }

    #[test]
    fn responses_text_falls_back_to_output_items() {
        let raw = r#"{
            "id": "resp_1",
            "output": [
                {"content": [{"text": "part one"}, {"text": "part two"}]},
                {"content": []}
            ],
            "usage": {"input_tokens": 100, "output_tokens": 20, "total_tokens": 120}
        }"#;
        let parsed: ResponsesResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.output_text.is_none());

        let text = parsed
            .output
            .iter()
            .flat_map(|item| item.content.iter())
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(text, "part one\npart two");
        assert_eq!(parsed.usage.unwrap().total_tokens, Some(120));
    }
}
