//! Writes MCP client configuration for `comfy-mcp-server`.
//!
//! Reads the same environment as the server (plus `MCP_*` setup options),
//! writes the config snippet and `mcp_config.ini`, and applies any
//! requested client registrations.

use std::path::PathBuf;

use anyhow::Context;
use comfy_mcp_core::config::GeneratorConfig;
use comfy_mcp_server::setup::{run_setup, ClaudeCli, SetupOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comfy_mcp_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = GeneratorConfig::from_env()?;
    let options = SetupOptions::from_lookup(
        |key| std::env::var(key).ok(),
        &default_server_command().display().to_string(),
    )?;

    let summary = run_setup(&config, &options, &ClaudeCli::default())
        .await
        .context("Failed to write MCP client configuration")?;
    println!("{}", summary.render());

    if summary.updates.iter().any(|update| !update.success) {
        anyhow::bail!("One or more client registrations failed");
    }
    Ok(())
}

/// `comfy-mcp-server` next to this executable, or bare on `PATH`.
fn default_server_command() -> PathBuf {
    let name = format!("comfy-mcp-server{}", std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&name)))
        .unwrap_or_else(|| PathBuf::from(name))
}
