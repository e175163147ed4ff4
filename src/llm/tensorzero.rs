use crate::http::build_llm_client;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub gateway_url: String,
    pub api_key: Option<String>,
    pub function_name: Option<String>,
    pub model: Option<String>,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            gateway_url: std::env::var("TENSORZERO_GATEWAY_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            api_key: std::env::var("TENSORZERO_API_KEY").ok(),
            function_name: std::env::var("TENSORZERO_FUNCTION").ok(),
            model: std::env::var("TENSORZERO_MODEL").ok(),
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("missing gateway url")]
    MissingGateway,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// One multimodal block of a vision message. Photos travel as typed image
/// blocks rather than URLs pasted into prompt text.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { url: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct VisionMessage {
    pub role: &'static str,
    pub content: Vec<ContentBlock>,
}

impl VisionMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn user(content: Vec<ContentBlock>) -> Self {
        Self {
            role: "user",
            content,
        }
    }
}

pub struct LlmClient {
    http: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: build_llm_client(),
            config,
        }
    }

    /// Run one inference through the TensorZero gateway and return the first
    /// text block of the reply.
    pub async fn infer(&self, messages: &[VisionMessage]) -> Result<String, LlmError> {
        let gateway = self.config.gateway_url.trim();
        if gateway.is_empty() {
            return Err(LlmError::MissingGateway);
        }

        let body = InferenceRequest {
            function_name: self
                .config
                .function_name
                .as_deref()
                .unwrap_or("magpie_identification")
                .to_string(),
            model_name: self.config.model.clone(),
            input: InferenceInput {
                messages: messages.to_vec(),
            },
        };

        let mut request = self.http.post(format!("{gateway}/inference")).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;
        if !response.status().is_success() {
            return Err(LlmError::Http(format!("HTTP {}", response.status())));
        }

        let payload: InferenceReply = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;
        if let Some(usage) = &payload.usage {
            debug!(
                target = "magpie.llm",
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "inference usage",
            );
        }
        payload
            .first_text()
            .ok_or_else(|| LlmError::InvalidResponse("missing text block".into()))
    }
}

#[derive(Debug, Serialize)]
struct InferenceRequest {
    function_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_name: Option<String>,
    input: InferenceInput,
}

#[derive(Debug, Serialize)]
struct InferenceInput {
    messages: Vec<VisionMessage>,
}

#[derive(Debug, Deserialize)]
struct InferenceReply {
    content: Vec<ReplyBlock>,
    #[serde(default)]
    usage: Option<ReplyUsage>,
}

impl InferenceReply {
    fn first_text(self) -> Option<String> {
        self.content.into_iter().find_map(|block| {
            if block.kind == "text" { block.text } else { None }
        })
    }
}

// Non-text reply blocks (tool calls, thought traces) are skipped, so the
// text field stays optional.
#[derive(Debug, Deserialize)]
struct ReplyBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_blocks_serialize_with_type_tags() {
        let message = VisionMessage::user(vec![
            ContentBlock::Image {
                url: "https://example.com/a.jpg".into(),
            },
            ContentBlock::Text {
                text: "visible label: Nike".into(),
            },
        ]);
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({
                "role": "user",
                "content": [
                    {"type": "image", "url": "https://example.com/a.jpg"},
                    {"type": "text", "text": "visible label: Nike"},
                ],
            })
        );
    }

    #[test]
    fn reply_takes_the_first_text_block_and_skips_others() {
        let reply: InferenceReply = serde_json::from_str(
            r#"{"content":[{"type":"tool_call","id":"t1"},{"type":"text","text":"{\"name\":\"PS5\"}"}],
                "usage":{"input_tokens":120,"output_tokens":30}}"#,
        )
        .unwrap();
        assert_eq!(reply.first_text().as_deref(), Some("{\"name\":\"PS5\"}"));
    }

    #[test]
    fn reply_without_text_blocks_yields_none() {
        let reply: InferenceReply =
            serde_json::from_str(r#"{"content":[{"type":"tool_call","id":"t1"}]}"#).unwrap();
        assert!(reply.first_text().is_none());
    }
}
