//! auditroute_providers
//!
//! Provider transport + normalization only. No policy, no masking, no
//! audit, no retries — callers (C4's LLM tier, the router's generative
//! step) own those concerns and pass already-masked text in.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMsg {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMsg>,
    pub max_output_tokens: u64,
    pub temperature: f64,
    pub top_p: f64,
    #[serde(default)]
    pub stop: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderReply {
    pub content: String,
    pub finish_reason: Option<String>,
    pub usage: Usage,
    pub provider_request_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub raw_json: Value,
    pub normalized: ProviderReply,
}

#[async_trait]
pub trait Provider: Send + Sync {
    async fn dispatch(&self, req: &ChatRequest) -> Result<ProviderResponse, ProviderError>;
}

pub struct OpenAICompatProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAICompatProvider {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAICompatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMsg],
    max_tokens: u64,
    temperature: f64,
    top_p: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[async_trait]
impl Provider for OpenAICompatProvider {
    async fn dispatch(&self, req: &ChatRequest) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let body = OpenAICompatRequest {
            model: &req.model,
            messages: &req.messages,
            max_tokens: req.max_output_tokens,
            temperature: req.temperature,
            top_p: req.top_p,
            stop: req.stop.clone(),
        };

        let mut r = self.client.post(url).json(&body);
        if let Some(k) = &self.api_key {
            if !k.is_empty() {
                r = r.bearer_auth(k);
            }
        }
        let resp = r.send().await?;
        let raw: Value = resp.json().await?;

        let content = raw
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c0| c0.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::InvalidResponse("missing choices[0].message.content".into()))?
            .to_string();

        let finish_reason = raw
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c0| c0.get("finish_reason"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let input_tokens = raw.get("usage").and_then(|u| u.get("prompt_tokens")).and_then(|v| v.as_u64());
        let output_tokens = raw
            .get("usage")
            .and_then(|u| u.get("completion_tokens"))
            .and_then(|v| v.as_u64());

        let provider_request_id = raw.get("id").and_then(|v| v.as_str()).map(|s| s.to_string());

        Ok(ProviderResponse {
            raw_json: raw.clone(),
            normalized: ProviderReply {
                content,
                finish_reason,
                usage: Usage { input_tokens, output_tokens },
                provider_request_id,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_serializes_without_stop_noise() {
        let req = ChatRequest {
            model: "gpt-intent".into(),
            messages: vec![ChatMsg {
                role: "user".into(),
                content: "hello".into(),
            }],
            max_output_tokens: 256,
            temperature: 0.0,
            top_p: 1.0,
            stop: vec![],
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["model"], "gpt-intent");
    }
}
