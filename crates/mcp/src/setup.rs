//! Registration of this server with MCP clients.
//!
//! Writes a standalone config snippet plus an `mcp_config.ini` summary,
//! and optionally registers the server with Claude Desktop, Gemini CLI
//! (read-merge-write of their settings files) and Claude Code (through
//! the `claude` CLI). Optional registrations report their own success
//! or failure and never abort the others.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use comfy_mcp_core::client_config::{
    merge_server_entry, render_ini, render_snippet, server_env, write_pretty_json, ClientFormat,
    ServerEntry, SERVER_KEY,
};
use comfy_mcp_core::config::GeneratorConfig;
use comfy_mcp_core::error::CoreError;
use tokio::process::Command;

pub const ENV_CONFIG_FORMAT: &str = "MCP_CONFIG_FORMAT";
pub const ENV_CONFIG_OUTPUT_DIR: &str = "MCP_CONFIG_OUTPUT_DIR";
pub const ENV_SERVER_COMMAND: &str = "MCP_SERVER_COMMAND";
pub const ENV_UPDATE_CLAUDE_CODE: &str = "MCP_UPDATE_CLAUDE_CODE";
pub const ENV_UPDATE_CLAUDE_DESKTOP: &str = "MCP_UPDATE_CLAUDE_DESKTOP";
pub const ENV_UPDATE_GEMINI_CLI: &str = "MCP_UPDATE_GEMINI_CLI";
pub const ENV_CLAUDE_DESKTOP_CONFIG: &str = "CLAUDE_DESKTOP_CONFIG";
pub const ENV_GEMINI_SETTINGS: &str = "GEMINI_SETTINGS_FILE";

/// Summary file written next to the snippet.
pub const INI_FILE_NAME: &str = "mcp_config.ini";

/// Time allowed for each `claude` CLI invocation.
pub const CLAUDE_CLI_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Invalid value for {key}: '{value}'")]
    InvalidOption { key: &'static str, value: String },

    #[error("Workflow file not found: {}", .0.display())]
    WorkflowMissing(PathBuf),

    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Settings file an optional client registration merges into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsTarget {
    /// Registration not requested.
    Skip,
    File(PathBuf),
    /// Requested, but no default location could be derived from the
    /// environment. `override_key` names the variable that sets it.
    Unresolved { override_key: &'static str },
}

impl SettingsTarget {
    fn resolve(
        requested: bool,
        explicit: Option<PathBuf>,
        default: Option<PathBuf>,
        override_key: &'static str,
    ) -> Self {
        match (requested, explicit.or(default)) {
            (false, _) => Self::Skip,
            (true, Some(path)) => Self::File(path),
            (true, None) => Self::Unresolved { override_key },
        }
    }
}

/// What the setup run should produce, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupOptions {
    pub format: ClientFormat,
    pub output_dir: PathBuf,
    /// Executable clients launch to start the server.
    pub server_command: String,
    pub update_claude_code: bool,
    pub claude_desktop_config: SettingsTarget,
    pub gemini_settings: SettingsTarget,
}

impl SetupOptions {
    /// Read options through `lookup`. `default_command` is used when
    /// `MCP_SERVER_COMMAND` is unset.
    pub fn from_lookup<F>(lookup: F, default_command: &str) -> Result<Self, SetupError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let format = match get(ENV_CONFIG_FORMAT) {
            Some(raw) => ClientFormat::parse(&raw).ok_or(SetupError::InvalidOption {
                key: ENV_CONFIG_FORMAT,
                value: raw,
            })?,
            None => ClientFormat::ClaudeDesktop,
        };

        let flag = |key: &'static str| -> Result<bool, SetupError> {
            match get(key) {
                None => Ok(false),
                Some(raw) => parse_flag(&raw).ok_or(SetupError::InvalidOption { key, value: raw }),
            }
        };

        let claude_desktop_config = SettingsTarget::resolve(
            flag(ENV_UPDATE_CLAUDE_DESKTOP)?,
            get(ENV_CLAUDE_DESKTOP_CONFIG).map(PathBuf::from),
            default_claude_desktop_config(&get),
            ENV_CLAUDE_DESKTOP_CONFIG,
        );
        let gemini_settings = SettingsTarget::resolve(
            flag(ENV_UPDATE_GEMINI_CLI)?,
            get(ENV_GEMINI_SETTINGS).map(PathBuf::from),
            default_gemini_settings(&get),
            ENV_GEMINI_SETTINGS,
        );

        Ok(Self {
            format,
            output_dir: get(ENV_CONFIG_OUTPUT_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            server_command: get(ENV_SERVER_COMMAND).unwrap_or_else(|| default_command.to_string()),
            update_claude_code: flag(ENV_UPDATE_CLAUDE_CODE)?,
            claude_desktop_config,
            gemini_settings,
        })
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Per-platform location of Claude Desktop's config file.
pub fn default_claude_desktop_config<F>(get: &F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    let base = if cfg!(target_os = "windows") {
        PathBuf::from(get("APPDATA")?)
    } else if cfg!(target_os = "macos") {
        PathBuf::from(get("HOME")?).join("Library").join("Application Support")
    } else {
        get("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| get("HOME").map(|home| PathBuf::from(home).join(".config")))?
    };
    Some(base.join("Claude").join("claude_desktop_config.json"))
}

/// Location of Gemini CLI's user settings file.
pub fn default_gemini_settings<F>(get: &F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    let home = get("HOME").or_else(|| get("USERPROFILE"))?;
    Some(PathBuf::from(home).join(".gemini").join("settings.json"))
}

/// Outcome of one optional client registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientUpdate {
    pub client: &'static str,
    pub success: bool,
    pub message: String,
}

impl ClientUpdate {
    fn ok(client: &'static str, message: impl Into<String>) -> Self {
        Self {
            client,
            success: true,
            message: message.into(),
        }
    }

    fn failed(client: &'static str, message: impl Into<String>) -> Self {
        Self {
            client,
            success: false,
            message: message.into(),
        }
    }
}

/// Whether Claude Code already knows about this server, from `claude mcp list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationStatus {
    Registered,
    NotRegistered,
    /// The CLI ran but exited unsuccessfully.
    CliError { exit_code: Option<i32> },
    CliNotFound,
    TimedOut(Duration),
    /// The CLI could not be started for another reason.
    Unavailable(String),
}

impl RegistrationStatus {
    /// Status implied by the stdout of a successful `claude mcp list`.
    pub fn from_listing(stdout: &str) -> Self {
        if stdout.contains(SERVER_KEY) {
            Self::Registered
        } else {
            Self::NotRegistered
        }
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered => write!(f, "Claude Code has '{SERVER_KEY}' registered"),
            Self::NotRegistered => write!(f, "Claude Code does not have '{SERVER_KEY}' registered"),
            Self::CliError { exit_code } => match exit_code {
                Some(code) => write!(f, "Claude Code CLI error (exit code {code})"),
                None => write!(f, "Claude Code CLI error (terminated by signal)"),
            },
            Self::CliNotFound => write!(f, "Claude Code CLI not found (optional)"),
            Self::TimedOut(after) => write!(
                f,
                "Claude Code CLI timed out after {}s, the server may still work",
                after.as_secs()
            ),
            Self::Unavailable(reason) => write!(f, "Cannot check Claude Code status: {reason}"),
        }
    }
}

/// Files written and registrations attempted by [`run_setup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupSummary {
    pub snippet_path: PathBuf,
    pub ini_path: PathBuf,
    pub updates: Vec<ClientUpdate>,
    pub claude_code_status: RegistrationStatus,
}

impl SetupSummary {
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("MCP config written to {}", self.snippet_path.display()),
            format!("Settings summary written to {}", self.ini_path.display()),
        ];
        for update in &self.updates {
            let mark = if update.success { "ok" } else { "failed" };
            lines.push(format!("[{mark}] {}: {}", update.client, update.message));
        }
        lines.push(format!("[status] {}", self.claude_code_status));
        lines.join("\n")
    }
}

/// Invocation of the Claude Code CLI.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    pub program: String,
    pub timeout: Duration,
}

impl Default for ClaudeCli {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            timeout: CLAUDE_CLI_TIMEOUT,
        }
    }
}

impl ClaudeCli {
    /// Run `claude mcp add-json --scope user comfyui-image-generator <json>`.
    pub async fn add_server(&self, entry: &ServerEntry) -> ClientUpdate {
        const CLIENT: &str = "Claude Code";

        let json = entry.to_value().to_string();
        let run = Command::new(&self.program)
            .args(["mcp", "add-json", "--scope", "user", SERVER_KEY, &json])
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) if output.status.success() => {
                tracing::info!("Registered with Claude Code");
                ClientUpdate::ok(CLIENT, format!("registered '{SERVER_KEY}'"))
            }
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                tracing::error!(
                    exit_code = ?output.status.code(),
                    stderr = %stderr.trim(),
                    "claude mcp add-json failed",
                );
                ClientUpdate::failed(
                    CLIENT,
                    format!(
                        "{} exited with {}: {}",
                        self.program,
                        output.status.code().unwrap_or(-1),
                        stderr.trim()
                    ),
                )
            }
            Ok(Err(e)) => {
                tracing::error!(program = %self.program, error = %e, "Failed to run Claude CLI");
                ClientUpdate::failed(CLIENT, format!("could not run {}: {e}", self.program))
            }
            Err(_) => ClientUpdate::failed(
                CLIENT,
                format!("timed out after {}s", self.timeout.as_secs()),
            ),
        }
    }

    /// Run `claude mcp list` and look for this server's key.
    pub async fn registration_status(&self) -> RegistrationStatus {
        let run = Command::new(&self.program)
            .args(["mcp", "list"])
            .kill_on_drop(true)
            .output();

        let status = match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) if output.status.success() => {
                RegistrationStatus::from_listing(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(Ok(output)) => RegistrationStatus::CliError {
                exit_code: output.status.code(),
            },
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => RegistrationStatus::CliNotFound,
            Ok(Err(e)) => RegistrationStatus::Unavailable(e.to_string()),
            Err(_) => RegistrationStatus::TimedOut(self.timeout),
        };
        tracing::debug!(program = %self.program, %status, "Claude Code status checked");
        status
    }
}

/// Write the config snippet and ini summary, then apply the requested
/// client registrations.
pub async fn run_setup(
    config: &GeneratorConfig,
    options: &SetupOptions,
    claude: &ClaudeCli,
) -> Result<SetupSummary, SetupError> {
    if !config.workflow_path.is_file() {
        return Err(SetupError::WorkflowMissing(config.workflow_path.clone()));
    }

    let env = server_env(config);
    let claude_entry = ServerEntry::claude(&options.server_command, env.clone());
    let gemini_entry = ServerEntry::gemini(&options.server_command, env);

    std::fs::create_dir_all(&options.output_dir).map_err(|source| CoreError::Io {
        path: options.output_dir.display().to_string(),
        source,
    })?;

    let stem = workflow_stem(&config.workflow_path);
    let snippet_path = options
        .output_dir
        .join(options.format.snippet_file_name(&stem));
    let snippet_entry = match options.format {
        ClientFormat::ClaudeDesktop => &claude_entry,
        ClientFormat::Gemini => &gemini_entry,
    };
    write_pretty_json(&snippet_path, &render_snippet(options.format, snippet_entry))?;

    let ini_path = options.output_dir.join(INI_FILE_NAME);
    std::fs::write(&ini_path, render_ini(config)).map_err(|source| CoreError::Io {
        path: ini_path.display().to_string(),
        source,
    })?;

    tracing::info!(
        snippet = %snippet_path.display(),
        ini = %ini_path.display(),
        "Client config written",
    );

    let mut updates = Vec::new();
    if options.update_claude_code {
        updates.push(claude.add_server(&claude_entry).await);
    }
    updates.extend(merge_into(
        "Claude Desktop",
        &options.claude_desktop_config,
        &claude_entry,
    ));
    updates.extend(merge_into("Gemini CLI", &options.gemini_settings, &gemini_entry));

    let claude_code_status = claude.registration_status().await;

    Ok(SetupSummary {
        snippet_path,
        ini_path,
        updates,
        claude_code_status,
    })
}

fn merge_into(
    client: &'static str,
    target: &SettingsTarget,
    entry: &ServerEntry,
) -> Option<ClientUpdate> {
    let path = match target {
        SettingsTarget::Skip => return None,
        SettingsTarget::File(path) => path,
        SettingsTarget::Unresolved { override_key } => {
            tracing::error!(client, override_key, "No settings file location found");
            return Some(ClientUpdate::failed(
                client,
                format!("settings file location unknown, set {override_key}"),
            ));
        }
    };
    Some(match merge_server_entry(path, entry) {
        Ok(()) => ClientUpdate::ok(client, format!("updated {}", path.display())),
        Err(e) => {
            tracing::error!(client, path = %path.display(), error = %e, "Config merge failed");
            ClientUpdate::failed(client, e.to_string())
        }
    })
}

fn workflow_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workflow".to_string())
}
