//! MCP tools exposed by this server.
//!
//! `generate_image` is always available. `generate_prompt` is only
//! registered when a prompt-writing LLM is configured.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use comfy_mcp_comfyui::events::ProgressSink;
use comfy_mcp_comfyui::poller::{Sleeper, TokioSleeper};
use comfy_mcp_comfyui::store::ArtifactStore;
use comfy_mcp_core::config::{GeneratorConfig, OutputMode};
use comfy_mcp_core::template::JobTemplate;
use comfy_mcp_pipeline::generator::Generator;
use comfy_mcp_pipeline::report::GenerationReport;

use crate::error::McpError;
use crate::prompt_llm::PromptWriter;
use crate::protocol::{CallToolParams, CallToolResult, ToolContent, ToolDescriptor};

pub const GENERATE_IMAGE_TOOL: &str = "generate_image";
pub const GENERATE_PROMPT_TOOL: &str = "generate_prompt";

/// Tool set backing `tools/list` and `tools/call`.
pub struct ToolRegistry<S, Z = TokioSleeper> {
    generator: Generator<S, Z>,
    output_mode: OutputMode,
    prompt_writer: Option<PromptWriter>,
}

impl<S: ArtifactStore> ToolRegistry<S, TokioSleeper> {
    /// Build the registry from startup configuration. The prompt tool is
    /// enabled when `config.prompt_llm` is set.
    pub fn new(config: Arc<GeneratorConfig>, template: Arc<JobTemplate>, store: S) -> Self {
        let prompt_writer = config.prompt_llm.as_ref().map(PromptWriter::new);
        let output_mode = config.output_mode;
        Self {
            generator: Generator::new(config, template, store),
            output_mode,
            prompt_writer,
        }
    }
}

impl<S: ArtifactStore, Z: Sleeper> ToolRegistry<S, Z> {
    /// Registry around an already built generator.
    pub fn from_generator(generator: Generator<S, Z>, prompt_writer: Option<PromptWriter>) -> Self {
        Self {
            output_mode: generator.config().output_mode,
            generator,
            prompt_writer,
        }
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut tools = vec![ToolDescriptor::with_string_arg(
            GENERATE_IMAGE_TOOL,
            "Generate an image using ComfyUI workflow",
            "prompt",
        )];
        if self.prompt_writer.is_some() {
            tools.push(ToolDescriptor::with_string_arg(
                GENERATE_PROMPT_TOOL,
                "Write an image generation prompt for a provided topic",
                "topic",
            ));
        }
        tools
    }

    /// Run one tool call.
    ///
    /// Unknown tools and missing arguments are protocol errors; a failed
    /// generation is a normal result flagged `isError`.
    pub async fn call<P>(
        &self,
        params: &CallToolParams,
        progress: &P,
    ) -> Result<CallToolResult, McpError>
    where
        P: ProgressSink + ?Sized,
    {
        match params.name.as_str() {
            GENERATE_IMAGE_TOOL => {
                let prompt = required_arg(params, "prompt")?;
                let report = self.generator.generate(prompt, progress).await;
                Ok(self.render_report(&report))
            }
            GENERATE_PROMPT_TOOL => {
                let writer = self.prompt_writer.as_ref().ok_or_else(|| {
                    McpError::InvalidParams(format!("Unknown tool: {GENERATE_PROMPT_TOOL}"))
                })?;
                let topic = required_arg(params, "topic")?;
                match writer.write_prompt(topic).await {
                    Ok(prompt) => Ok(CallToolResult::text(prompt)),
                    Err(e) => {
                        tracing::error!(model = %writer.model(), error = %e, "Prompt writing failed");
                        Ok(CallToolResult::error(format!("Failed to generate prompt: {e}")))
                    }
                }
            }
            other => Err(McpError::InvalidParams(format!("Unknown tool: {other}"))),
        }
    }

    fn render_report(&self, report: &GenerationReport) -> CallToolResult {
        match report {
            GenerationReport::Success(success) => {
                let mut result = CallToolResult::text(success.message());
                if self.output_mode == OutputMode::File {
                    result.content.push(ToolContent::Image {
                        data: STANDARD.encode(success.bytes()),
                        mime_type: success.mime_type().to_string(),
                    });
                }
                result
            }
            GenerationReport::Failure(failure) => CallToolResult::error(failure.message()),
        }
    }
}

fn required_arg<'a>(params: &'a CallToolParams, key: &str) -> Result<&'a str, McpError> {
    params.str_argument(key).ok_or_else(|| {
        McpError::InvalidParams(format!("{} requires a string '{key}' argument", params.name))
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use comfy_mcp_comfyui::api::ComfyUIApi;
    use comfy_mcp_comfyui::events::NoProgress;
    use comfy_mcp_core::config::PromptLlmConfig;
    use serde_json::json;

    use super::*;

    fn config(prompt_llm: Option<PromptLlmConfig>) -> Arc<GeneratorConfig> {
        Arc::new(GeneratorConfig {
            comfy_url: "http://127.0.0.1:9".into(),
            comfy_url_external: "http://127.0.0.1:9".into(),
            workflow_path: PathBuf::from("workflow.json"),
            prompt_node_id: "6".into(),
            output_node_id: "9".into(),
            output_mode: OutputMode::Url,
            max_poll_attempts: 1,
            poll_interval: Duration::ZERO,
            local_save_dir: PathBuf::from("./generated_images"),
            http_timeout: None,
            prompt_llm,
        })
    }

    fn registry(prompt_llm: Option<PromptLlmConfig>) -> ToolRegistry<ComfyUIApi> {
        let template =
            JobTemplate::from_value(json!({ "6": { "inputs": { "text": "" } } })).unwrap();
        ToolRegistry::new(
            config(prompt_llm),
            Arc::new(template),
            ComfyUIApi::new("http://127.0.0.1:9"),
        )
    }

    fn call(name: &str, arguments: serde_json::Value) -> CallToolParams {
        serde_json::from_value(json!({ "name": name, "arguments": arguments })).unwrap()
    }

    #[test]
    fn prompt_tool_listed_only_when_configured() {
        let names = |r: &ToolRegistry<ComfyUIApi>| {
            r.descriptors().iter().map(|d| d.name).collect::<Vec<_>>()
        };
        assert_eq!(names(&registry(None)), vec!["generate_image"]);
        assert_eq!(
            names(&registry(Some(PromptLlmConfig {
                api_base: "http://127.0.0.1:11434".into(),
                model: "llama3".into(),
            }))),
            vec!["generate_image", "generate_prompt"]
        );
    }

    #[test]
    fn descriptor_schema_requires_argument() {
        let descriptors = registry(None).descriptors();
        assert_eq!(descriptors[0].input_schema["required"], json!(["prompt"]));
        assert_eq!(
            descriptors[0].input_schema["properties"]["prompt"]["type"],
            "string"
        );
    }

    #[tokio::test]
    async fn missing_prompt_is_invalid_params() {
        let result = registry(None)
            .call(&call("generate_image", json!({})), &NoProgress)
            .await;
        assert_matches!(result, Err(McpError::InvalidParams(msg)) if msg.contains("prompt"));
    }

    #[tokio::test]
    async fn unknown_or_disabled_tool_is_invalid_params() {
        let registry = registry(None);
        assert_matches!(
            registry.call(&call("paint", json!({})), &NoProgress).await,
            Err(McpError::InvalidParams(_))
        );
        assert_matches!(
            registry
                .call(&call("generate_prompt", json!({ "topic": "x" })), &NoProgress)
                .await,
            Err(McpError::InvalidParams(_))
        );
    }

    #[tokio::test]
    async fn unreachable_engine_yields_error_result() {
        let result = registry(None)
            .call(&call("generate_image", json!({ "prompt": "a cat" })), &NoProgress)
            .await
            .unwrap();
        assert!(result.is_error);
        assert_matches!(
            &result.content[..],
            [ToolContent::Text { text }] if text.starts_with("Failed to generate image (network error)")
        );
    }
}
