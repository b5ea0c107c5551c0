//! LLM Client (C2): one call, one response, schema-constrained or free-form.
//!
//! The teacher wires its vision calls through `edgequake_llm::LLMProvider`,
//! an opaque multimodal chat trait. This engine's calls are plain text
//! completions with a JSON contract, so a narrower trait lives here instead,
//! backed directly by `reqwest` the way the teacher builds its own HTTP
//! client in `pipeline/input.rs` — a single pooled client, explicit timeout,
//! no internal retry (that's C4's job, per §4.2's contract).

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::config::LlmConfig;

/// Raw failure from one LLM call — not yet classified. C12 turns this into
/// an `ErrorKind`; C4 decides whether to retry.
#[derive(Debug, Clone)]
pub struct LlmCallError {
    pub status: Option<u16>,
    pub message: String,
}

impl LlmCallError {
    fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

impl std::fmt::Display for LlmCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(code) => write!(f, "llm call failed (status {code}): {}", self.message),
            None => write!(f, "llm call failed: {}", self.message),
        }
    }
}

impl std::error::Error for LlmCallError {}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Schema-constrained completion: the response must satisfy `schema`.
    async fn complete_with_schema(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema: &Value,
        max_output_tokens: u32,
    ) -> Result<String, LlmCallError>;

    /// Free-form completion, used only after a schema attempt fails to
    /// yield parseable JSON.
    async fn complete_free_form(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_output_tokens: u32,
    ) -> Result<String, LlmCallError>;
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'a str,
    strict: bool,
    schema: &'a Value,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ResponseFormat<'a> {
    #[serde(rename = "json_schema")]
    JsonSchema { json_schema: JsonSchemaFormat<'a> },
    #[serde(rename = "json_object")]
    JsonObject,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat<'a>>,
}

/// An OpenAI-compatible chat-completions client. One pooled `reqwest::Client`
/// per process, the same idle-connection budget the teacher reserves for
/// its provider HTTP calls, sized per §4.2's "idle cap per host >= 20".
pub struct HttpLlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpLlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(20)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    async fn call(&self, request: &ChatCompletionRequest<'_>) -> Result<String, LlmCallError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| LlmCallError::new(e.status().map(|s| s.as_u16()), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmCallError::new(Some(status.as_u16()), body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| LlmCallError::new(None, format!("invalid json response: {e}")))?;

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LlmCallError::new(None, "response missing choices[0].message.content".to_string()))
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete_with_schema(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema: &Value,
        max_output_tokens: u32,
    ) -> Result<String, LlmCallError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                Message { role: "system", content: system_prompt },
                Message { role: "user", content: user_prompt },
            ],
            temperature: 0.0,
            max_tokens: max_output_tokens,
            response_format: Some(ResponseFormat::JsonSchema {
                json_schema: JsonSchemaFormat { name: "extraction_result", strict: true, schema },
            }),
        };
        self.call(&request).await
    }

    async fn complete_free_form(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_output_tokens: u32,
    ) -> Result<String, LlmCallError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![
                Message { role: "system", content: system_prompt },
                Message { role: "user", content: user_prompt },
            ],
            temperature: 0.0,
            max_tokens: max_output_tokens,
            response_format: None,
        };
        self.call(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialises_schema_mode_with_expected_shape() {
        let schema = serde_json::json!({"type": "object"});
        let request = ChatCompletionRequest {
            model: "gpt-4o-mini",
            messages: vec![Message { role: "system", content: "sys" }, Message { role: "user", content: "usr" }],
            temperature: 0.0,
            max_tokens: 1024,
            response_format: Some(ResponseFormat::JsonSchema {
                json_schema: JsonSchemaFormat { name: "extraction_result", strict: true, schema: &schema },
            }),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["response_format"]["type"], "json_schema");
        assert_eq!(json["temperature"], 0.0);
    }

    #[test]
    fn free_form_request_omits_response_format() {
        let request = ChatCompletionRequest {
            model: "gpt-4o-mini",
            messages: vec![Message { role: "user", content: "usr" }],
            temperature: 0.0,
            max_tokens: 512,
            response_format: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("response_format").is_none());
    }
}
