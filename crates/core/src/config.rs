//! Startup configuration for the image generator.
//!
//! All values are read exactly once, in `main`, and the resulting
//! [`GeneratorConfig`] is handed to every component that needs it.
//! Nothing below the binary entrypoint reads the process environment.
//!
//! | Env Var                    | Required | Default              |
//! |----------------------------|----------|----------------------|
//! | `COMFY_URL`                | yes      | --                   |
//! | `COMFY_URL_EXTERNAL`       | no       | `COMFY_URL`          |
//! | `COMFY_WORKFLOW_JSON_FILE` | yes      | --                   |
//! | `PROMPT_NODE_ID`           | yes      | --                   |
//! | `OUTPUT_NODE_ID`           | yes      | --                   |
//! | `OUTPUT_MODE`              | no       | `file`               |
//! | `COMFY_MAX_POLL_ATTEMPTS`  | no       | `60`                 |
//! | `COMFY_POLL_INTERVAL`      | no       | `2` (seconds)        |
//! | `COMFY_LOCAL_SAVE_DIR`     | no       | `./generated_images` |
//! | `COMFY_HTTP_TIMEOUT_SECS`  | no       | unbounded            |
//! | `OLLAMA_API_BASE`          | no       | --                   |
//! | `PROMPT_LLM`               | no       | --                   |

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Variable names and defaults
// ---------------------------------------------------------------------------

pub const ENV_COMFY_URL: &str = "COMFY_URL";
pub const ENV_COMFY_URL_EXTERNAL: &str = "COMFY_URL_EXTERNAL";
pub const ENV_WORKFLOW_JSON_FILE: &str = "COMFY_WORKFLOW_JSON_FILE";
pub const ENV_PROMPT_NODE_ID: &str = "PROMPT_NODE_ID";
pub const ENV_OUTPUT_NODE_ID: &str = "OUTPUT_NODE_ID";
pub const ENV_OUTPUT_MODE: &str = "OUTPUT_MODE";
pub const ENV_MAX_POLL_ATTEMPTS: &str = "COMFY_MAX_POLL_ATTEMPTS";
pub const ENV_POLL_INTERVAL: &str = "COMFY_POLL_INTERVAL";
pub const ENV_LOCAL_SAVE_DIR: &str = "COMFY_LOCAL_SAVE_DIR";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "COMFY_HTTP_TIMEOUT_SECS";
pub const ENV_OLLAMA_API_BASE: &str = "OLLAMA_API_BASE";
pub const ENV_PROMPT_LLM: &str = "PROMPT_LLM";

/// Default number of status checks before a job is considered timed out.
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 60;

/// Default delay between status checks, in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

/// Default directory for persisted images.
pub const DEFAULT_LOCAL_SAVE_DIR: &str = "./generated_images";

/// Header line of the startup failure report.
pub const STARTUP_FAILURE_HEADER: &str = "Failed to start Comfy MCP Server:";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How a finished image is handed back to the MCP client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Text report only (remote URL and local path).
    Url,
    /// Text report plus the persisted image bytes as inline content.
    File,
}

impl OutputMode {
    /// Parse the `OUTPUT_MODE` value (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "url" => Some(Self::Url),
            "file" => Some(Self::File),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Url => "url",
            Self::File => "file",
        }
    }
}

/// Connection details for the optional prompt-writing LLM (Ollama).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptLlmConfig {
    pub api_base: String,
    pub model: String,
}

/// Immutable process-wide configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Base URL used for all ComfyUI API calls.
    pub comfy_url: String,
    /// Base URL shown to users in remote image links.
    pub comfy_url_external: String,
    /// Path to the ComfyUI workflow (API format) used as job template.
    pub workflow_path: PathBuf,
    /// Node whose `inputs.text` receives the prompt.
    pub prompt_node_id: String,
    /// Node whose `images` output carries the rendered artifact.
    pub output_node_id: String,
    pub output_mode: OutputMode,
    /// Poll attempt budget.
    pub max_poll_attempts: u32,
    pub poll_interval: Duration,
    pub local_save_dir: PathBuf,
    /// Per-request HTTP timeout. `None` leaves requests unbounded.
    pub http_timeout: Option<Duration>,
    pub prompt_llm: Option<PromptLlmConfig>,
}

/// Every problem found while reading startup configuration.
///
/// Rendered as one multi-line message so operators see all missing
/// values at once instead of fixing them one restart at a time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", render_problems(.problems))]
pub struct ConfigError {
    pub problems: Vec<String>,
}

fn render_problems(problems: &[String]) -> String {
    let mut lines = Vec::with_capacity(problems.len() + 1);
    lines.push(STARTUP_FAILURE_HEADER.to_string());
    lines.extend(problems.iter().map(|p| format!("- {p}")));
    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl GeneratorConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Blank values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut problems = Vec::new();

        let comfy_url = require(&get, ENV_COMFY_URL, &mut problems)
            .map(|url| url.trim_end_matches('/').to_string());
        let workflow_path = require(&get, ENV_WORKFLOW_JSON_FILE, &mut problems);
        let prompt_node_id = require(&get, ENV_PROMPT_NODE_ID, &mut problems);
        let output_node_id = require(&get, ENV_OUTPUT_NODE_ID, &mut problems);

        let output_mode = match get(ENV_OUTPUT_MODE) {
            None => OutputMode::File,
            Some(raw) => OutputMode::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(
                    value = %raw,
                    "{ENV_OUTPUT_MODE} is not 'url' or 'file', using 'file'",
                );
                OutputMode::File
            }),
        };

        let max_poll_attempts = parse_number(
            &get,
            ENV_MAX_POLL_ATTEMPTS,
            DEFAULT_MAX_POLL_ATTEMPTS,
            &mut problems,
        );
        if max_poll_attempts == 0 {
            problems.push(format!("{ENV_MAX_POLL_ATTEMPTS} must be at least 1"));
        }

        let poll_interval_secs = parse_number(
            &get,
            ENV_POLL_INTERVAL,
            DEFAULT_POLL_INTERVAL_SECS,
            &mut problems,
        );

        let http_timeout = match get(ENV_HTTP_TIMEOUT_SECS) {
            None => None,
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
                _ => {
                    problems.push(format!(
                        "{ENV_HTTP_TIMEOUT_SECS} must be a positive integer (got '{raw}')"
                    ));
                    None
                }
            },
        };

        let prompt_llm = match (get(ENV_OLLAMA_API_BASE), get(ENV_PROMPT_LLM)) {
            (Some(api_base), Some(model)) => Some(PromptLlmConfig {
                api_base: api_base.trim_end_matches('/').to_string(),
                model,
            }),
            _ => None,
        };

        let local_save_dir =
            PathBuf::from(get(ENV_LOCAL_SAVE_DIR).unwrap_or_else(|| DEFAULT_LOCAL_SAVE_DIR.into()));

        match (comfy_url, workflow_path, prompt_node_id, output_node_id) {
            (Some(comfy_url), Some(workflow_path), Some(prompt_node_id), Some(output_node_id))
                if problems.is_empty() =>
            {
                let comfy_url_external = get(ENV_COMFY_URL_EXTERNAL)
                    .map(|url| url.trim_end_matches('/').to_string())
                    .unwrap_or_else(|| comfy_url.clone());
                Ok(Self {
                    comfy_url,
                    comfy_url_external,
                    workflow_path: PathBuf::from(workflow_path),
                    prompt_node_id,
                    output_node_id,
                    output_mode,
                    max_poll_attempts,
                    poll_interval: Duration::from_secs(poll_interval_secs),
                    local_save_dir,
                    http_timeout,
                    prompt_llm,
                })
            }
            _ => Err(ConfigError { problems }),
        }
    }
}

fn require<G>(get: &G, key: &str, problems: &mut Vec<String>) -> Option<String>
where
    G: Fn(&str) -> Option<String>,
{
    let value = get(key);
    if value.is_none() {
        problems.push(format!("{key} environment variable not set"));
    }
    value
}

fn parse_number<G, T>(get: &G, key: &str, default: T, problems: &mut Vec<String>) -> T
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy,
{
    match get(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            problems.push(format!("{key} must be a non-negative integer (got '{raw}')"));
            default
        }),
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
