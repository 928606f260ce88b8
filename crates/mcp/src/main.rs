use std::process::ExitCode;
use std::sync::Arc;

use comfy_mcp_comfyui::api::ComfyUIApi;
use comfy_mcp_core::config::{GeneratorConfig, STARTUP_FAILURE_HEADER};
use comfy_mcp_core::template::JobTemplate;
use comfy_mcp_server::server::McpServer;
use comfy_mcp_server::tools::ToolRegistry;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // Stdout carries protocol frames only.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "comfy_mcp_server=info,comfy_mcp_comfyui=info,comfy_mcp_pipeline=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match GeneratorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let template = match JobTemplate::load(&config.workflow_path) {
        Ok(template) => template,
        Err(e) => {
            eprintln!("{STARTUP_FAILURE_HEADER}\n- {e}");
            return ExitCode::FAILURE;
        }
    };
    if !template.has_node(&config.output_node_id) {
        tracing::warn!(
            output_node_id = %config.output_node_id,
            workflow = %config.workflow_path.display(),
            "Output node not found in workflow; generations will fail to find their image",
        );
    }

    let store = match ComfyUIApi::with_timeout(config.comfy_url.clone(), config.http_timeout) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("{STARTUP_FAILURE_HEADER}\n- {e}");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        comfy_url = %config.comfy_url,
        workflow = %config.workflow_path.display(),
        nodes = template.node_count(),
        output_mode = %config.output_mode,
        max_poll_attempts = config.max_poll_attempts,
        poll_interval_secs = config.poll_interval.as_secs(),
        "Starting Comfy MCP Server",
    );

    let tools = ToolRegistry::new(Arc::new(config), Arc::new(template), store);
    let server = McpServer::new(tools);

    match server.serve(tokio::io::stdin(), tokio::io::stdout()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "MCP server stopped");
            ExitCode::FAILURE
        }
    }
}
