//! MCP client configuration files.
//!
//! Desktop assistants discover MCP servers through a JSON settings file
//! holding a map of server name to launch command. This module renders
//! the entry for this server and merges it into an existing file,
//! leaving every other key untouched.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::{
    GeneratorConfig, ENV_COMFY_URL, ENV_COMFY_URL_EXTERNAL, ENV_HTTP_TIMEOUT_SECS,
    ENV_LOCAL_SAVE_DIR, ENV_MAX_POLL_ATTEMPTS, ENV_OLLAMA_API_BASE, ENV_OUTPUT_MODE,
    ENV_OUTPUT_NODE_ID, ENV_POLL_INTERVAL, ENV_PROMPT_LLM, ENV_PROMPT_NODE_ID,
    ENV_WORKFLOW_JSON_FILE,
};
use crate::error::CoreError;

/// Key under which this server is registered in client configs.
pub const SERVER_KEY: &str = "comfyui-image-generator";

/// Server-map key used by Claude Desktop and Gemini CLI settings files.
pub const MCP_SERVERS_KEY: &str = "mcpServers";

/// Server-map key used by the standalone Gemini snippet.
pub const MCP_SERVERS_SNAKE_KEY: &str = "mcp_servers";

/// Tool-call timeout Gemini CLI applies to this server, in milliseconds.
pub const GEMINI_TOOL_TIMEOUT_MS: u64 = 120_000;

/// Target client dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFormat {
    ClaudeDesktop,
    Gemini,
}

impl ClientFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "claudedesktop" | "claude" => Some(Self::ClaudeDesktop),
            "gemini" => Some(Self::Gemini),
            _ => None,
        }
    }

    /// Server-map key used in the generated snippet file.
    pub fn servers_key(self) -> &'static str {
        match self {
            Self::ClaudeDesktop => MCP_SERVERS_KEY,
            Self::Gemini => MCP_SERVERS_SNAKE_KEY,
        }
    }

    /// Snippet file name for a given workflow stem.
    pub fn snippet_file_name(self, workflow_stem: &str) -> String {
        match self {
            Self::ClaudeDesktop => format!("claude_desktop_mcp_config_{workflow_stem}.json"),
            Self::Gemini => format!("gemini_settings_{workflow_stem}.json"),
        }
    }
}

/// Launch description for one MCP server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerEntry {
    pub command: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust: Option<bool>,
}

impl ServerEntry {
    /// Entry for Claude Desktop / Claude Code.
    pub fn claude(command: impl Into<String>, env: BTreeMap<String, String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            env,
            timeout: None,
            trust: None,
        }
    }

    /// Entry for Gemini CLI, which additionally takes a timeout and trust flag.
    pub fn gemini(command: impl Into<String>, env: BTreeMap<String, String>) -> Self {
        Self {
            timeout: Some(GEMINI_TOOL_TIMEOUT_MS),
            trust: Some(false),
            ..Self::claude(command, env)
        }
    }

    pub fn to_value(&self) -> Value {
        // ServerEntry only holds strings, maps and integers.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Environment block passed to the server so it reproduces `config`.
/// Optional settings are only included when set.
pub fn server_env(config: &GeneratorConfig) -> BTreeMap<String, String> {
    let mut env = BTreeMap::from([
        (ENV_COMFY_URL.to_string(), config.comfy_url.clone()),
        (
            ENV_COMFY_URL_EXTERNAL.to_string(),
            config.comfy_url_external.clone(),
        ),
        (
            ENV_WORKFLOW_JSON_FILE.to_string(),
            config.workflow_path.display().to_string(),
        ),
        (ENV_PROMPT_NODE_ID.to_string(), config.prompt_node_id.clone()),
        (ENV_OUTPUT_NODE_ID.to_string(), config.output_node_id.clone()),
        (ENV_OUTPUT_MODE.to_string(), config.output_mode.to_string()),
        (
            ENV_MAX_POLL_ATTEMPTS.to_string(),
            config.max_poll_attempts.to_string(),
        ),
        (
            ENV_POLL_INTERVAL.to_string(),
            config.poll_interval.as_secs().to_string(),
        ),
        (
            ENV_LOCAL_SAVE_DIR.to_string(),
            config.local_save_dir.display().to_string(),
        ),
    ]);
    if let Some(timeout) = config.http_timeout {
        env.insert(
            ENV_HTTP_TIMEOUT_SECS.to_string(),
            timeout.as_secs().to_string(),
        );
    }
    if let Some(llm) = &config.prompt_llm {
        env.insert(ENV_OLLAMA_API_BASE.to_string(), llm.api_base.clone());
        env.insert(ENV_PROMPT_LLM.to_string(), llm.model.clone());
    }
    env
}

/// Standalone snippet: `{ "<servers key>": { "comfyui-image-generator": entry } }`.
pub fn render_snippet(format: ClientFormat, entry: &ServerEntry) -> Value {
    let mut servers = Map::new();
    servers.insert(SERVER_KEY.to_string(), entry.to_value());
    let mut root = Map::new();
    root.insert(format.servers_key().to_string(), Value::Object(servers));
    Value::Object(root)
}

/// Read-merge-write `entry` into the client settings file at `path`.
///
/// A missing file (and its parent directories) is created. Existing keys,
/// including other registered servers, are preserved; only
/// `mcpServers.comfyui-image-generator` is added or replaced.
pub fn merge_server_entry(path: &Path, entry: &ServerEntry) -> Result<(), CoreError> {
    let mut root = match std::fs::read_to_string(path) {
        Ok(raw) if raw.trim().is_empty() => Value::Object(Map::new()),
        Ok(raw) => serde_json::from_str(&raw).map_err(|e| CoreError::json(path, e))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| CoreError::io(parent, e))?;
            }
            Value::Object(Map::new())
        }
        Err(e) => return Err(CoreError::io(path, e)),
    };

    let root_obj = root.as_object_mut().ok_or_else(|| {
        CoreError::Config(format!("{} does not contain a JSON object", path.display()))
    })?;

    let servers = root_obj
        .entry(MCP_SERVERS_KEY)
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| {
            CoreError::Config(format!(
                "'{MCP_SERVERS_KEY}' in {} is not an object",
                path.display()
            ))
        })?;
    servers.insert(SERVER_KEY.to_string(), entry.to_value());

    write_pretty_json(path, &root)
}

/// Write `value` as indented JSON.
pub fn write_pretty_json(path: &Path, value: &Value) -> Result<(), CoreError> {
    let mut rendered = serde_json::to_string_pretty(value).map_err(|e| CoreError::json(path, e))?;
    rendered.push('\n');
    std::fs::write(path, rendered).map_err(|e| CoreError::io(path, e))
}

/// Render the flat `KEY=value` summary kept next to generated snippets.
pub fn render_ini(config: &GeneratorConfig) -> String {
    [
        ("WORKFLOW_FILE", config.workflow_path.display().to_string()),
        ("PROMPT_NODE_ID", config.prompt_node_id.clone()),
        ("OUTPUT_NODE_ID", config.output_node_id.clone()),
        ("COMFY_URL", config.comfy_url.clone()),
        ("OUTPUT_MODE", config.output_mode.to_string()),
        ("MAX_POLL_ATTEMPTS", config.max_poll_attempts.to_string()),
        ("POLL_INTERVAL", config.poll_interval.as_secs().to_string()),
    ]
    .iter()
    .map(|(key, value)| format!("{key}={value}\n"))
    .collect()
}
