//! Prompt writing through a local Ollama model.
//!
//! Backs the `generate_prompt` tool: a short topic goes in, a single
//! image-generation prompt comes out.

use comfy_mcp_core::config::PromptLlmConfig;
use serde::{Deserialize, Serialize};

/// Instruction wrapped around the user's topic.
const PROMPT_INSTRUCTIONS: &str = "You are an AI Image Generation Prompt Assistant.\n\
Your job is to review the topic provided by the user for an image generation task and create \
an appropriate prompt from it. Respond with a single prompt. Don't ask for feedback about the prompt.\n\
\n\
Topic: {topic}\n\
Prompt: ";

#[derive(Debug, thiserror::Error)]
pub enum PromptLlmError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Ollama API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("Ollama returned an empty prompt")]
    Empty,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Client for Ollama's `/api/generate` endpoint.
#[derive(Debug, Clone)]
pub struct PromptWriter {
    client: reqwest::Client,
    api_base: String,
    model: String,
}

impl PromptWriter {
    pub fn new(config: &PromptLlmConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: &PromptLlmConfig) -> Self {
        Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask the model for an image prompt about `topic`.
    pub async fn write_prompt(&self, topic: &str) -> Result<String, PromptLlmError> {
        let body = GenerateRequest {
            model: &self.model,
            prompt: render_instructions(topic),
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.api_base))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(PromptLlmError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let generated: GenerateResponse = response.json().await?;
        let prompt = generated.response.trim();
        if prompt.is_empty() {
            return Err(PromptLlmError::Empty);
        }

        tracing::debug!(model = %self.model, chars = prompt.len(), "Prompt written");
        Ok(prompt.to_string())
    }
}

fn render_instructions(topic: &str) -> String {
    PROMPT_INSTRUCTIONS.replace("{topic}", topic)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn writer(server: &MockServer) -> PromptWriter {
        PromptWriter::new(&PromptLlmConfig {
            api_base: format!("{}/", server.uri()),
            model: "llama3".into(),
        })
    }

    #[test]
    fn instructions_embed_topic() {
        let rendered = render_instructions("foggy harbour");
        assert!(rendered.contains("Topic: foggy harbour\nPrompt: "));
        assert!(!rendered.contains("{topic}"));
    }

    #[tokio::test]
    async fn posts_non_streaming_request_and_trims_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({ "model": "llama3", "stream": false })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "response": "  A foggy harbour at dawn, oil painting\n" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let prompt = writer(&server).write_prompt("foggy harbour").await.unwrap();
        assert_eq!(prompt, "A foggy harbour at dawn, oil painting");
    }

    #[tokio::test]
    async fn non_success_status_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&server)
            .await;

        assert_matches!(
            writer(&server).write_prompt("x").await,
            Err(PromptLlmError::ApiError { status: 404, body }) if body == "model not found"
        );
    }

    #[tokio::test]
    async fn blank_response_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "  " })))
            .mount(&server)
            .await;

        assert_matches!(writer(&server).write_prompt("x").await, Err(PromptLlmError::Empty));
    }
}
