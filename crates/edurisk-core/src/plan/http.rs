//! OpenAI-compatible chat completion generator.
//!
//! The system message carries the role and output schema, the user message
//! the student profile. The first choice's content is returned verbatim;
//! fence stripping happens in the parser.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::CapabilityError;

use super::prompt::{GenerationRequest, build_system_prompt, build_user_prompt};
use super::synth::TextGenerator;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: Option<f32>,
}

impl HttpGenerator {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TextGenerator for HttpGenerator {
    fn name(&self) -> &str {
        "http"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, CapabilityError> {
        let mut payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": build_system_prompt(&request.constraints)},
                {"role": "user", "content": build_user_prompt(request)},
            ],
        });
        if let Some(temperature) = self.temperature {
            payload["temperature"] = json!(temperature);
        }

        let mut call = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call
            .send()
            .await
            .map_err(|e| CapabilityError::Unreachable(format!("generation request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Unreachable(format!(
                "generation service returned {status}: {body}"
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::Malformed(format!("invalid chat response: {e}")))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CapabilityError::Malformed("chat response did not include choices".to_string()))?;

        debug!(model = %self.model, attempt = request.attempt, "chat completion received");
        Ok(content)
    }
}
